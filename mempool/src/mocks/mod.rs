// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mock ledger and evaluator used by the pool's own tests and by fuzzing.

mod mock_ledger;

pub use mock_ledger::{MockEvaluator, MockLedger, MockVerifiedTransactionCache};
