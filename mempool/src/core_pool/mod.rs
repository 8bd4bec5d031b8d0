// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

mod error;
mod fee;
mod pending_store;
mod pool;
mod stats;
mod status_cache;
#[cfg(test)]
mod unit_tests;

pub use error::PoolError;
pub use pool::TransactionPool;
pub use stats::{AssembleBlockStats, ProcessBlockStats, StopReason};
