// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

/// Number of transactions currently queued in the pool.
pub static PENDING_TXNS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "meridian_mempool_pending_txns",
        "Number of transactions currently queued in the pool"
    )
    .unwrap()
});

/// Number of full blocks' worth of bytes backed up behind the one being
/// assembled.
pub static PENDING_WHOLE_BLOCKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "meridian_mempool_pending_whole_blocks",
        "Full blocks of transactions backed up behind the one being assembled"
    )
    .unwrap()
});

/// Transactions dropped during pool recomputation, by any cause other than
/// expiry.
pub static REMOVED_INVALID_TXNS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "meridian_mempool_removed_invalid_txns_total",
        "Transactions dropped during pool recomputation as no longer valid"
    )
    .unwrap()
});

/// Transactions dropped during pool recomputation because their validity
/// window closed.
pub static EXPIRED_TXNS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "meridian_mempool_expired_txns_total",
        "Transactions dropped during pool recomputation as expired"
    )
    .unwrap()
});

/// Blocks handed to the consensus caller, full or empty.
pub static ASSEMBLED_BLOCKS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "meridian_mempool_assembled_blocks_total",
        "Blocks returned from assemble_block"
    )
    .unwrap()
});
