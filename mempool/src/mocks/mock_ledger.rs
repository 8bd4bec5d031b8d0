// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::ledger::{
    BlockEvaluator, EvalError, LedgerError, PoolLedger, VerifiedTransactionCache,
};
use meridian_config::consensus_params;
use meridian_types::{
    block::{Block, BlockHeader, StateDelta, ValidatedBlock},
    transaction::{SignedTransaction, TxId, TxType, COMPACT_CERT_SENDER},
    txgroup::SignedTxGroup,
    Round,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

/// Records the pinned set handed to it, so tests can assert on it.
#[derive(Default)]
pub struct MockVerifiedTransactionCache {
    pinned: Mutex<HashSet<TxId>>,
}

impl MockVerifiedTransactionCache {
    pub fn pinned_ids(&self) -> HashSet<TxId> {
        self.pinned.lock().unwrap().clone()
    }
}

impl VerifiedTransactionCache for MockVerifiedTransactionCache {
    fn update_pinned(&self, pinned: &HashMap<TxId, SignedTransaction>) {
        *self.pinned.lock().unwrap() = pinned.keys().copied().collect();
    }
}

struct MockLedgerInner {
    headers: HashMap<Round, BlockHeader>,
    latest: Round,
    committed: HashSet<TxId>,
    block_byte_limit: Option<usize>,
}

/// An in-memory ledger: block headers, a committed-transaction set, and a
/// factory for [`MockEvaluator`]s. Tests drive it by committing blocks.
pub struct MockLedger {
    inner: Mutex<MockLedgerInner>,
    verified_cache: MockVerifiedTransactionCache,
}

impl MockLedger {
    /// A ledger holding only the genesis block of the given protocol.
    pub fn new(protocol: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert(0, BlockHeader::genesis(protocol));
        Self {
            inner: Mutex::new(MockLedgerInner {
                headers,
                latest: 0,
                committed: HashSet::new(),
                block_byte_limit: None,
            }),
            verified_cache: MockVerifiedTransactionCache::default(),
        }
    }

    /// Forces every evaluator started from this ledger to use the given
    /// block byte budget, regardless of what the pool asks for.
    pub fn set_block_byte_limit(&self, limit: usize) {
        self.inner.lock().unwrap().block_byte_limit = Some(limit);
    }

    /// Marks an upgrade on the stored header for `round`, as if the network
    /// had agreed to switch protocols after that block.
    pub fn set_next_protocol(&self, round: Round, next: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(header) = inner.headers.get_mut(&round) {
            header.next_protocol = Some(next.to_string());
        }
    }

    /// Commits a block: stores its header, advances the tip, and records
    /// its payset as committed. Returns the state delta the real ledger
    /// would hand to `on_new_block`.
    pub fn commit_block(&self, block: &Block) -> StateDelta {
        let mut inner = self.inner.lock().unwrap();
        let round = block.round();
        inner.headers.insert(round, block.header.clone());
        if round > inner.latest {
            inner.latest = round;
        }
        let mut delta = StateDelta::default();
        for tx in &block.payset {
            let txid = tx.id();
            inner.committed.insert(txid);
            delta.txids.insert(txid, round);
        }
        delta
    }

    /// Builds and commits the empty successor of the current tip. Returns
    /// the block and its (empty) delta.
    pub fn commit_empty_block(&self) -> (Block, StateDelta) {
        let tip = {
            let inner = self.inner.lock().unwrap();
            inner.headers[&inner.latest].clone()
        };
        let block = Block::next_from(&tip);
        let delta = self.commit_block(&block);
        (block, delta)
    }

    pub fn verified_cache(&self) -> &MockVerifiedTransactionCache {
        &self.verified_cache
    }
}

impl PoolLedger for MockLedger {
    fn latest(&self) -> Round {
        self.inner.lock().unwrap().latest
    }

    fn block_hdr(&self, round: Round) -> Result<BlockHeader, LedgerError> {
        self.inner
            .lock()
            .unwrap()
            .headers
            .get(&round)
            .cloned()
            .ok_or(LedgerError::MissingBlockHeader(round))
    }

    fn start_evaluator(
        &self,
        header: BlockHeader,
        txn_count_hint: usize,
        max_txn_bytes: usize,
    ) -> Result<Box<dyn BlockEvaluator>, LedgerError> {
        let inner = self.inner.lock().unwrap();
        let proto = consensus_params(&header.current_protocol).ok_or_else(|| {
            LedgerError::Other(format!(
                "unsupported protocol {}",
                header.current_protocol
            ))
        })?;
        let max_block_bytes = inner.block_byte_limit.unwrap_or(if max_txn_bytes == 0 {
            proto.max_txn_bytes_per_block
        } else {
            max_txn_bytes
        });
        Ok(Box::new(MockEvaluator {
            header,
            committed: inner.committed.clone(),
            applied: Vec::with_capacity(txn_count_hint),
            applied_ids: HashSet::new(),
            txn_bytes: 0,
            max_block_bytes,
            min_txn_fee: proto.min_txn_fee,
        }))
    }

    fn verified_transaction_cache(&self) -> &dyn VerifiedTransactionCache {
        &self.verified_cache
    }
}

/// A block evaluator over the mock ledger. Enforces the block byte budget,
/// duplicate detection, validity windows, and the flat minimum fee.
pub struct MockEvaluator {
    header: BlockHeader,
    committed: HashSet<TxId>,
    applied: Vec<SignedTransaction>,
    applied_ids: HashSet<TxId>,
    txn_bytes: usize,
    max_block_bytes: usize,
    min_txn_fee: u64,
}

impl MockEvaluator {
    fn check_transactions(&self, txns: &[SignedTransaction]) -> Result<(), EvalError> {
        let group_bytes: usize = txns.iter().map(|tx| tx.encoded_length()).sum();
        if self.txn_bytes + group_bytes > self.max_block_bytes {
            return Err(EvalError::NoSpace);
        }
        let round = self.header.round;
        for tx in txns {
            let txid = tx.id();
            if self.committed.contains(&txid) || self.applied_ids.contains(&txid) {
                return Err(EvalError::TransactionInLedger(txid));
            }
            if tx.txn.first_valid > round || tx.txn.last_valid < round {
                return Err(EvalError::Dead {
                    round,
                    first_valid: tx.txn.first_valid,
                    last_valid: tx.txn.last_valid,
                });
            }
            let fee_exempt = tx.txn.tx_type == TxType::CompactCert
                && tx.txn.sender == COMPACT_CERT_SENDER;
            if !fee_exempt && tx.txn.fee < self.min_txn_fee {
                return Err(EvalError::MinFee {
                    txid,
                    fee: tx.txn.fee,
                    min_fee: self.min_txn_fee,
                });
            }
        }
        Ok(())
    }
}

impl BlockEvaluator for MockEvaluator {
    fn round(&self) -> Round {
        self.header.round
    }

    fn txn_counter(&self) -> u64 {
        self.applied.len() as u64
    }

    fn reset_txn_bytes(&mut self) {
        self.txn_bytes = 0;
    }

    fn test_transaction_group(&self, txgroup: &[SignedTransaction]) -> Result<(), EvalError> {
        self.check_transactions(txgroup)
    }

    fn transaction_group(&mut self, txgroup: &SignedTxGroup) -> Result<(), EvalError> {
        self.check_transactions(&txgroup.transactions)?;
        for tx in &txgroup.transactions {
            self.txn_bytes += tx.encoded_length();
            self.applied_ids.insert(tx.id());
            self.applied.push(tx.clone());
        }
        Ok(())
    }

    fn generate_block(&mut self) -> Result<ValidatedBlock, EvalError> {
        Ok(ValidatedBlock::new(Block {
            header: self.header.clone(),
            payset: self.applied.clone(),
        }))
    }
}
