// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::transaction::{SignedTransaction, TxId};
use serde::{Deserialize, Serialize};

/// Reserved group counter value meaning "no counter assigned". Real counters
/// start at 1 and are assigned by the transaction pool in commit order.
pub const INVALID_GROUP_COUNTER: u64 = 0;

/// An atomic unit of transactions: a non-empty ordered sequence that must
/// commit together.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignedTxGroup {
    pub transactions: Vec<SignedTransaction>,
    /// Pool-local identifier, strictly increasing in commit order and never
    /// reused. `INVALID_GROUP_COUNTER` until the group is committed.
    pub group_counter: u64,
    /// Hash identifying the group; computed lazily on first ingest.
    pub group_txid: Option<TxId>,
    /// Cached sum of the encoded sizes of the member transactions.
    pub encoded_length: usize,
    /// True iff the group was submitted through this node's local API
    /// rather than received over the gossip network.
    pub locally_originated: bool,
}

impl SignedTxGroup {
    pub fn new(transactions: Vec<SignedTransaction>, locally_originated: bool) -> Self {
        Self {
            transactions,
            group_counter: INVALID_GROUP_COUNTER,
            group_txid: None,
            encoded_length: 0,
            locally_originated,
        }
    }

    /// Hash identifying the group, computed over the ids of the member
    /// transactions in order.
    pub fn compute_group_txid(&self) -> TxId {
        let mut hasher = blake3::Hasher::new();
        for tx in &self.transactions {
            hasher.update(&tx.id().0);
        }
        TxId(*hasher.finalize().as_bytes())
    }
}
