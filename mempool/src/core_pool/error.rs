// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::ledger::EvalError;
use meridian_types::Round;
use thiserror::Error;

/// Errors surfaced by the public pool interface.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PoolError {
    /// Admission refused because the pool is at its transaction cap; the
    /// caller may retry later.
    #[error("transaction pool has reached capacity")]
    CapacityReached,
    /// The pool is transiently without a block evaluator (startup race, or
    /// an upgrade to a protocol version this node does not know). The caller
    /// retries.
    #[error("no pending block evaluator")]
    NoEvaluator,
    /// The group was rejected for being below the current per-byte floor.
    #[error("fee {fee} below threshold {threshold} ({fee_per_byte} per byte * {encoded_length} bytes)")]
    InsufficientFee {
        fee: u64,
        threshold: u64,
        fee_per_byte: u64,
        encoded_length: usize,
    },
    /// The block evaluator refused the group; the original error is carried.
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// The consensus-requested round is strictly behind the pool.
    #[error("requested block assembly specified a round that is older than current transaction pool round")]
    StaleBlockAssemblyRequest,
    /// Block generation failed for the given round.
    #[error("assemble_block failed for round {round}: {msg}")]
    AssemblyFailed { round: Round, msg: String },
    #[error("internal error: {0}")]
    Internal(String),
}
