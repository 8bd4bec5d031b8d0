// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Hard cap on the number of transactions queued in the pool.
    pub tx_pool_size: usize,
    /// Growth factor of the fee-per-byte floor as the backlog deepens.
    /// Values below 1 are clamped to 1 at pool construction.
    pub tx_pool_exponential_increase_factor: u64,
    pub enable_process_block_stats: bool,
    pub enable_assemble_stats: bool,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            tx_pool_size: 75_000,
            tx_pool_exponential_increase_factor: 2,
            enable_process_block_stats: false,
            enable_assemble_stats: false,
        }
    }
}
