// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core data types shared between the ledger, the transaction pool, and
//! consensus.

pub mod block;
pub mod transaction;
pub mod txgroup;

/// The round of a block is a ledger-internal counter, which starts at 0 and
/// increases monotonically with each committed block.
pub type Round = u64;
