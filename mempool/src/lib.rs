// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! The transaction pool caches validated transaction groups and prepares
//! valid blocks for proposal.
//!
//! At all times, the pool maintains a queue of transaction groups slated for
//! proposal. [`TransactionPool::remember`] adds a properly-signed and
//! well-formed transaction group to this queue only if its fees clear the
//! load-sensitive floor and its state changes are consistent with the prior
//! transactions in the queue. [`TransactionPool::assemble_block`] constructs
//! a valid block for proposal given a deadline.

pub mod core_pool;
pub mod counters;
pub mod ledger;
#[cfg(any(test, feature = "fuzzing"))]
pub mod mocks;

pub use core_pool::{
    AssembleBlockStats, PoolError, ProcessBlockStats, StopReason, TransactionPool,
};
pub use ledger::{BlockEvaluator, EvalError, LedgerError, PoolLedger, VerifiedTransactionCache};
