// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node configuration and per-protocol consensus parameters.

mod consensus;
mod pool_config;

pub use consensus::{consensus_params, ConsensusParams, PROTOCOL_V1, PROTOCOL_V2};
pub use pool_config::PoolConfig;

use std::time::Duration;

/// How long the agreement loop allocates for assembling a block proposal.
/// Deadlines handed to `AssembleBlock` are derived from this.
pub const PROPOSAL_ASSEMBLY_TIME: Duration = Duration::from_millis(250);
