// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    transaction::{SignedTransaction, TxId},
    Round,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header of a committed or in-progress block.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BlockHeader {
    pub round: Round,
    /// Hash of the previous block's header.
    pub prev_block: [u8; 32],
    /// The protocol version this block was produced under.
    pub current_protocol: String,
    /// Set when the network has agreed to switch to a new protocol version
    /// starting with the next block.
    pub next_protocol: Option<String>,
}

impl BlockHeader {
    /// Genesis header for a chain starting at the given protocol version.
    pub fn genesis(protocol: &str) -> Self {
        Self {
            round: 0,
            prev_block: [0; 32],
            current_protocol: protocol.to_string(),
            next_protocol: None,
        }
    }

    pub fn hash(&self) -> [u8; 32] {
        let encoded = bcs::to_bytes(self).expect("header serialization cannot fail");
        *blake3::hash(&encoded).as_bytes()
    }

    /// The protocol version the *next* block will be produced under: the
    /// agreed upgrade if one is pending, the current version otherwise.
    pub fn next_block_protocol(&self) -> &str {
        self.next_protocol
            .as_deref()
            .unwrap_or(&self.current_protocol)
    }
}

/// A block: header plus the flat sequence of transactions it commits.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Block {
    pub header: BlockHeader,
    pub payset: Vec<SignedTransaction>,
}

impl Block {
    /// Constructs the empty successor block of `prev`, carrying the protocol
    /// version forward (or switching to the agreed upgrade).
    pub fn next_from(prev: &BlockHeader) -> Self {
        Self {
            header: BlockHeader {
                round: prev.round + 1,
                prev_block: prev.hash(),
                current_protocol: prev.next_block_protocol().to_string(),
                next_protocol: None,
            },
            payset: Vec::new(),
        }
    }

    pub fn round(&self) -> Round {
        self.header.round
    }
}

/// A block that has passed through a block evaluator and is fit for
/// proposal.
#[derive(Clone, Debug)]
pub struct ValidatedBlock {
    block: Block,
}

impl ValidatedBlock {
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn round(&self) -> Round {
        self.block.round()
    }
}

/// The portion of a committed block's state delta the pool cares about: the
/// ids of the transactions the block committed, with the round they were
/// committed in.
#[derive(Clone, Debug, Default)]
pub struct StateDelta {
    pub txids: HashMap<TxId, Round>,
}
