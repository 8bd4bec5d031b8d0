// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// What ended a block assembly pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// The pool ran out of pending groups before filling the block.
    Empty,
    /// The evaluator ran out of block space.
    Full,
    /// The assembly deadline fired.
    Timeout,
    /// Consensus moved on to a later round mid-assembly.
    Abandon,
}

impl Default for StopReason {
    fn default() -> Self {
        StopReason::Empty
    }
}

/// Telemetry gathered while assembling a block. Stored alongside the
/// assembly result and logged when `enable_assemble_stats` is set.
#[derive(Clone, Debug, Default)]
pub struct AssembleBlockStats {
    /// Pending groups at the start of the replay.
    pub start_count: usize,
    pub included_count: usize,
    pub invalid_count: usize,
    pub expired_count: usize,
    /// Groups skipped because the committed block already contained them.
    pub early_committed_count: usize,
    /// Groups dropped because the ledger already held their transactions.
    pub committed_count: usize,
    pub stop_reason: StopReason,
    /// Total evaluator time spent on groups that made it into the block.
    pub processing_time: Duration,
    pub block_generation_duration: Duration,
    /// Nanoseconds between the nominal start of proposal assembly and the
    /// first transaction group being evaluated. Negative when evaluation
    /// started before the window opened.
    pub transactions_loop_start_time_nanos: i64,
    /// Wall-clock nanoseconds the assemble_block call took.
    pub nanoseconds: i64,
    pub min_fee: u64,
    pub max_fee: u64,
    pub average_fee: u64,
    pub min_length: usize,
    pub max_length: usize,
    pub total_length: u64,
}

/// Telemetry gathered while excising a committed block from the pool.
/// Logged when `enable_process_block_stats` is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessBlockStats {
    /// Transactions dropped because their validity window closed.
    pub expired_count: usize,
    /// Transactions dropped for any other reason.
    pub removed_invalid_count: usize,
    /// Committed transactions the pool was holding.
    pub known_committed_count: usize,
    /// Committed transactions the pool had never seen.
    pub unknown_committed_count: usize,
}
