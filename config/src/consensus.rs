// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use std::{collections::HashMap, time::Duration};

/// Consensus parameters fixed per protocol version. A node only knows the
/// versions enumerated here; blocks carrying any other version cannot be
/// built on until the node is upgraded.
#[derive(Clone, Debug)]
pub struct ConsensusParams {
    /// Protocol ceiling on the total encoded transaction bytes in a block.
    pub max_txn_bytes_per_block: usize,
    /// Maximum length, in rounds, of a transaction's validity window.
    pub max_txn_life: u64,
    /// Flat minimum fee enforced by the block evaluator.
    pub min_txn_fee: u64,
    /// Duration of the first agreement filter step; half of the bytes the
    /// node can push in this window bounds the proposal size.
    pub agreement_filter_timeout_period0: Duration,
}

pub const PROTOCOL_V1: &str = "meridian-v1";
pub const PROTOCOL_V2: &str = "meridian-v2";

static CONSENSUS: Lazy<HashMap<&'static str, ConsensusParams>> = Lazy::new(|| {
    let mut versions = HashMap::new();
    versions.insert(
        PROTOCOL_V1,
        ConsensusParams {
            max_txn_bytes_per_block: 1024 * 1024,
            max_txn_life: 1000,
            min_txn_fee: 1000,
            agreement_filter_timeout_period0: Duration::from_secs(4),
        },
    );
    versions.insert(
        PROTOCOL_V2,
        ConsensusParams {
            max_txn_bytes_per_block: 5 * 1024 * 1024,
            max_txn_life: 1000,
            min_txn_fee: 1000,
            agreement_filter_timeout_period0: Duration::from_secs(4),
        },
    );
    versions
});

/// Looks up the consensus parameters for a protocol version. Returns `None`
/// for versions this node does not know about.
pub fn consensus_params(version: &str) -> Option<&'static ConsensusParams> {
    CONSENSUS.get(version)
}
