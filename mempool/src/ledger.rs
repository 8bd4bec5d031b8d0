// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! The seam between the pool and the ledger. The ledger owns the state
//! database and the block evaluator; the pool only ever talks to it through
//! these traits.

use meridian_types::{
    block::{BlockHeader, ValidatedBlock},
    transaction::{SignedTransaction, TxId},
    txgroup::SignedTxGroup,
    Round,
};
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by the block evaluator while applying transaction groups.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EvalError {
    #[error("block evaluator is out of space")]
    NoSpace,
    #[error("transaction already in ledger: {0}")]
    TransactionInLedger(TxId),
    #[error("txn dead: round {round} outside of {first_valid}--{last_valid}")]
    Dead {
        round: Round,
        first_valid: Round,
        last_valid: Round,
    },
    #[error("txn {txid} had fee {fee}, which is less than the minimum {min_fee}")]
    MinFee { txid: TxId, fee: u64, min_fee: u64 },
    #[error("evaluator rejected transaction group: {0}")]
    Other(String),
}

/// Errors surfaced by the ledger itself.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("no block header for round {0}")]
    MissingBlockHeader(Round),
    #[error("ledger error: {0}")]
    Other(String),
}

/// Incrementally applies transaction groups into a prospective block for a
/// single round. Owned by the pool between recomputations.
pub trait BlockEvaluator: Send {
    /// The round the prospective block would be committed at.
    fn round(&self) -> Round;

    /// Number of transactions applied so far.
    fn txn_counter(&self) -> u64;

    /// Restarts the byte accounting for the current block, so subsequent
    /// groups accumulate into the next block's budget.
    fn reset_txn_bytes(&mut self);

    /// Dry-run check of a transaction group; no state change.
    fn test_transaction_group(&self, txgroup: &[SignedTransaction]) -> Result<(), EvalError>;

    /// Applies a transaction group to the prospective block.
    fn transaction_group(&mut self, txgroup: &SignedTxGroup) -> Result<(), EvalError>;

    /// Seals the applied transactions into a validated block.
    fn generate_block(&mut self) -> Result<ValidatedBlock, EvalError>;
}

/// Pins verified transactions so their signature-verification results stay
/// cached while they are pending.
pub trait VerifiedTransactionCache: Send + Sync {
    fn update_pinned(&self, pinned: &HashMap<TxId, SignedTransaction>);
}

/// The ledger interface the pool consumes.
pub trait PoolLedger: Send + Sync {
    /// The latest committed round.
    fn latest(&self) -> Round;

    /// The header of the block committed at `round`.
    fn block_hdr(&self, round: Round) -> Result<BlockHeader, LedgerError>;

    /// Starts an evaluator for the block following `header`'s predecessor,
    /// i.e. the block described by `header` itself. `txn_count_hint` sizes
    /// internal tables; `max_txn_bytes` caps the block's encoded size, with
    /// 0 meaning the protocol default.
    fn start_evaluator(
        &self,
        header: BlockHeader,
        txn_count_hint: usize,
        max_txn_bytes: usize,
    ) -> Result<Box<dyn BlockEvaluator>, LedgerError>;

    fn verified_transaction_cache(&self) -> &dyn VerifiedTransactionCache;
}
