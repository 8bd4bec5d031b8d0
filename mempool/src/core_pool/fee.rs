// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! The load-sensitive fee floor and the throughput-derived block size cap.

use crate::core_pool::{
    error::PoolError,
    pool::{PoolInner, TransactionPool},
};
use meridian_config::consensus_params;
use meridian_types::{
    transaction::{TxType, COMPACT_CERT_SENDER},
    txgroup::SignedTxGroup,
};
use std::sync::atomic::Ordering;

/// The smallest maximum block size the evaluator will be asked to produce.
/// A node measuring a very low bandwidth (a fluke, or a fluctuation) would
/// otherwise be asked for unrealistically tiny blocks.
const MIN_MAX_TXN_BYTES_PER_BLOCK: usize = 100 * 1024;

impl TransactionPool {
    /// The current minimum fee, in the smallest currency unit per encoded
    /// byte, a transaction needs to pay to get into the pool. Lock-free.
    pub fn fee_per_byte(&self) -> u64 {
        self.fee_per_byte.load(Ordering::Relaxed)
    }

    /// Computes the fee floor from the backlog depth and publishes it for
    /// fast reads.
    pub(crate) fn compute_fee_per_byte(&self, inner: &PoolInner) -> u64 {
        // Baseline of 1 per byte, scaled by the load multiplier. A small
        // transaction pays ~100 at baseline, far under the flat minimum
        // fee, so the per-byte term only bites once load builds up.
        let mut fee_per_byte: u64 = 1;
        fee_per_byte *= inner.fee_threshold_multiplier;

        // an integer 0 would stay 0 through the exponentiation below
        if fee_per_byte == 0 && inner.num_pending_whole_blocks > 1 {
            fee_per_byte = 1;
        }

        // one factor of growth per whole backed-up block beyond the first
        for _ in 1..inner.num_pending_whole_blocks {
            fee_per_byte = fee_per_byte.saturating_mul(self.exp_fee_factor);
        }

        self.fee_per_byte.store(fee_per_byte, Ordering::Relaxed);
        fee_per_byte
    }

    /// Verifies that every transaction of the group pays at least the
    /// current per-byte floor for its encoded size.
    pub(crate) fn check_sufficient_fee(
        &self,
        inner: &PoolInner,
        txgroup: &SignedTxGroup,
    ) -> Result<(), PoolError> {
        // A singleton compact cert from the protocol's designated sender
        // is admitted without any fee.
        if let [only] = txgroup.transactions.as_slice() {
            if only.txn.tx_type == TxType::CompactCert
                && only.txn.sender == COMPACT_CERT_SENDER
                && only.txn.fee == 0
            {
                return Ok(());
            }
        }

        let fee_per_byte = self.compute_fee_per_byte(inner);
        for tx in &txgroup.transactions {
            let encoded_length = tx.encoded_length();
            let threshold = fee_per_byte.saturating_mul(encoded_length as u64);
            if tx.txn.fee < threshold {
                return Err(PoolError::InsufficientFee {
                    fee: tx.txn.fee,
                    threshold,
                    fee_per_byte,
                    encoded_length,
                });
            }
        }
        Ok(())
    }

    /// Updates the data exchange rate this node is measured to sustain.
    pub fn set_data_exchange_rate(&self, bytes_per_second: u64) {
        self.data_exchange_rate
            .store(bytes_per_second, Ordering::Relaxed);
    }

    /// The byte budget to hand the evaluator for a block under the given
    /// protocol: half of what the node can push within the first agreement
    /// filter step, clamped to a sane range. 0 means "use the protocol
    /// default" (no measurement available, or unknown protocol).
    pub(crate) fn calculate_max_txn_bytes_per_block(&self, protocol_version: &str) -> usize {
        let data_exchange_rate = self.data_exchange_rate.load(Ordering::Relaxed);
        if data_exchange_rate == 0 {
            return 0;
        }

        let proto = match consensus_params(protocol_version) {
            None => return 0,
            Some(proto) => proto,
        };

        let half_max_block_size = (data_exchange_rate as u128
            * proto.agreement_filter_timeout_period0.as_millis()
            / 1000
            / 2) as usize;

        if half_max_block_size > proto.max_txn_bytes_per_block {
            proto.max_txn_bytes_per_block
        } else if half_max_block_size < MIN_MAX_TXN_BYTES_PER_BLOCK {
            MIN_MAX_TXN_BYTES_PER_BLOCK
        } else {
            half_max_block_size
        }
    }
}
