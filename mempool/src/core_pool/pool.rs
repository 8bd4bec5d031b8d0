// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    core_pool::{
        error::PoolError,
        pending_store::{PendingStore, RememberedGroups},
        stats::{AssembleBlockStats, ProcessBlockStats, StopReason},
        status_cache::StatusCache,
    },
    counters,
    ledger::{BlockEvaluator, EvalError, PoolLedger},
};
use log::{info, warn};
use meridian_config::{consensus_params, PoolConfig, PROPOSAL_ASSEMBLY_TIME};
use meridian_types::{
    block::{Block, StateDelta, ValidatedBlock},
    transaction::{SignedTransaction, TxId},
    txgroup::{SignedTxGroup, INVALID_GROUP_COUNTER},
    Round,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::AtomicU64,
        Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::{Duration, Instant},
};

/// How many multiples of `max_txn_life` worth of per-round expiration counts
/// are retained.
const EXPIRED_HISTORY: u64 = 10;

/// How long `test()` and `remember()` wait for `on_new_block()` to process a
/// block that already appears in the ledger.
const TIMEOUT_ON_NEW_BLOCK: Duration = Duration::from_secs(1);

/// Extra time `assemble_block()` waits past its deadline before giving up
/// and returning the pre-built empty block.
const ASSEMBLY_WAIT_EPS: Duration = Duration::from_millis(150);

// Used to project how long generate_block() will take, so assembly can stop
// adding transactions while there is still budget left to seal the block.
const GENERATE_BLOCK_BASE_DURATION: Duration = Duration::from_millis(2);
const GENERATE_BLOCK_PER_TXN_NANOS: u64 = 2155;

/// State guarded by the big pool mutex. Lock order: this mutex first, then
/// the assembly mutex, then the pending-store lock.
pub(crate) struct PoolInner {
    pub(crate) evaluator: Option<Box<dyn BlockEvaluator>>,
    /// Full blocks' worth of bytes already backed up behind the block being
    /// assembled.
    pub(crate) num_pending_whole_blocks: u64,
    pub(crate) fee_threshold_multiplier: u64,
    pub(crate) expired_tx_count: HashMap<Round, usize>,
    pub(crate) status_cache: StatusCache,
    pub(crate) remembered: RememberedGroups,
    /// Mirror of `AssemblyResults::ok`, readable without the assembly lock.
    /// Only ever touched while the pool mutex is held.
    pub(crate) assembly_completed_or_abandoned: bool,
}

/// The result record shared between the recompute loop (which may fill it
/// eagerly) and `assemble_block` (which may fill it on deadline). Guarded by
/// the assembly mutex.
pub(crate) struct AssemblyResults {
    pub(crate) ok: bool,
    pub(crate) block: Option<Arc<ValidatedBlock>>,
    pub(crate) err: Option<String>,
    pub(crate) stats: AssembleBlockStats,
    /// The round the pool last started evaluating. A measure of where the
    /// pool is, not of whether evaluation finished.
    pub(crate) round_started_evaluating: Round,
}

impl AssemblyResults {
    fn new(round_started_evaluating: Round) -> Self {
        Self {
            ok: false,
            block: None,
            err: None,
            stats: AssembleBlockStats::default(),
            round_started_evaluating,
        }
    }
}

pub(crate) struct AssemblyState {
    pub(crate) deadline: Option<Instant>,
    /// The round consensus is currently waiting for, or last waited for.
    pub(crate) round: Round,
    pub(crate) results: AssemblyResults,
}

/// A `TransactionPool` prepares valid blocks for proposal and caches
/// validated transaction groups.
///
/// At all times, the pool maintains a queue of transaction groups slated for
/// proposal. `remember` adds a properly-signed and well-formed transaction
/// group to this queue only if its fees are sufficiently high and its state
/// changes are consistent with the prior transactions in the queue.
/// `assemble_block` constructs a valid block for proposal given a deadline.
pub struct TransactionPool {
    /// Current fee floor in the smallest unit per encoded byte, readable
    /// without any lock.
    pub(crate) fee_per_byte: AtomicU64,
    /// Average data exchange rate measured by transaction sync, used to
    /// bound proposal sizes to what the node can actually push.
    pub(crate) data_exchange_rate: AtomicU64,

    log_process_block_stats: bool,
    log_assemble_stats: bool,
    pub(crate) exp_fee_factor: u64,
    tx_pool_max_size: usize,
    ledger: Arc<dyn PoolLedger>,

    inner: Mutex<PoolInner>,
    pool_cv: Condvar,

    assembly: Mutex<AssemblyState>,
    assembly_cv: Condvar,

    pending: RwLock<PendingStore>,
}

impl TransactionPool {
    /// Makes a transaction pool. The initial evaluator targets the round
    /// after the ledger's latest.
    pub fn new(ledger: Arc<dyn PoolLedger>, config: &PoolConfig) -> Self {
        let pool = Self {
            fee_per_byte: AtomicU64::new(0),
            data_exchange_rate: AtomicU64::new(0),
            log_process_block_stats: config.enable_process_block_stats,
            log_assemble_stats: config.enable_assemble_stats,
            exp_fee_factor: config.tx_pool_exponential_increase_factor.max(1),
            tx_pool_max_size: config.tx_pool_size,
            ledger,
            inner: Mutex::new(PoolInner {
                evaluator: None,
                num_pending_whole_blocks: 0,
                fee_threshold_multiplier: 0,
                expired_tx_count: HashMap::new(),
                status_cache: StatusCache::new(config.tx_pool_size),
                remembered: RememberedGroups::new(),
                assembly_completed_or_abandoned: false,
            }),
            pool_cv: Condvar::new(),
            assembly: Mutex::new(AssemblyState {
                deadline: None,
                round: 0,
                results: AssemblyResults::new(0),
            }),
            assembly_cv: Condvar::new(),
            pending: RwLock::new(PendingStore::new()),
        };
        {
            let mut inner = pool.lock_inner();
            pool.recompute_block_evaluator(&mut inner, &HashMap::new(), 0);
        }
        pool
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("[txpool] pool lock poisoned")
    }

    fn lock_assembly(&self) -> MutexGuard<'_, AssemblyState> {
        self.assembly.lock().expect("[txpool] assembly lock poisoned")
    }

    fn read_pending(&self) -> RwLockReadGuard<'_, PendingStore> {
        self.pending.read().expect("[txpool] pending lock poisoned")
    }

    fn write_pending(&self) -> RwLockWriteGuard<'_, PendingStore> {
        self.pending.write().expect("[txpool] pending lock poisoned")
    }

    /// Discards all pool content and restarts the evaluator from the
    /// ledger's current tip. Group counters keep running.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        self.write_pending().clear();
        inner.remembered.reset();
        inner.expired_tx_count.clear();
        inner.num_pending_whole_blocks = 0;
        inner.evaluator = None;
        inner.status_cache.reset();
        counters::PENDING_TXNS.set(0);
        counters::PENDING_WHOLE_BLOCKS.set(0);
        self.recompute_block_evaluator(&mut inner, &HashMap::new(), 0);
    }

    /// The number of transactions that expired at the end of the given
    /// round. Only meaningful for rounds the pool has processed.
    pub fn num_expired(&self, round: Round) -> usize {
        let inner = self.lock_inner();
        inner.expired_tx_count.get(&round).copied().unwrap_or(0)
    }

    /// The ids of all pending transactions.
    pub fn pending_tx_ids(&self) -> Vec<TxId> {
        let pending = self.read_pending();
        pending.pending_txids.keys().copied().collect()
    }

    /// The ordered list of transaction groups that should be proposed in
    /// the next block, and the group counter of the latest locally
    /// originated group. The returned handle stays consistent even as the
    /// pool keeps committing and recomputing.
    pub fn pending_tx_groups(&self) -> (Arc<Vec<SignedTxGroup>>, u64) {
        let pending = self.read_pending();
        (
            Arc::clone(&pending.pending_groups),
            pending.pending_latest_local,
        )
    }

    /// The number of transactions currently pending in the pool.
    pub fn pending_count(&self) -> usize {
        self.read_pending().txn_count()
    }

    fn pending_tx_ids_count(&self) -> usize {
        self.read_pending().pending_txids.len()
    }

    /// Checks whether `txn_count` more transactions would still fit under
    /// the pool cap. The limit is on transactions, not groups.
    fn check_pending_queue_size(&self, txn_count: usize) -> Result<(), PoolError> {
        if self.pending_tx_ids_count() + txn_count > self.tx_pool_max_size {
            return Err(PoolError::CapacityReached);
        }
        Ok(())
    }

    /// Dry-run admission check of a transaction group, with no state change.
    pub fn test(&self, txgroup: &[SignedTransaction]) -> Result<(), PoolError> {
        self.check_pending_queue_size(txgroup.len())?;

        let inner = self.lock_inner();
        match &inner.evaluator {
            None => Err(PoolError::NoEvaluator),
            Some(evaluator) => evaluator
                .test_transaction_group(txgroup)
                .map_err(PoolError::from),
        }
    }

    /// Stores the provided transaction group. The caller must only pass
    /// properly-signed and well-formed transactions; signatures are checked
    /// upstream.
    pub fn remember(&self, txgroup: SignedTxGroup) -> Result<(), PoolError> {
        self.check_pending_queue_size(txgroup.transactions.len())?;

        let inner = self.lock_inner();
        let (mut inner, result) = self.remember_one(inner, txgroup);
        match result {
            Ok(()) => {
                self.remember_commit(&mut inner, false);
                Ok(())
            }
            Err(err) => {
                inner.remembered.reset();
                Err(err)
            }
        }
    }

    /// Stores the provided transaction groups as one batch: either all of
    /// them are committed to the pool, or none.
    pub fn remember_array(&self, txgroups: Vec<SignedTxGroup>) -> Result<(), PoolError> {
        let total_size = txgroups
            .iter()
            .map(|txgroup| txgroup.transactions.len())
            .sum();
        self.check_pending_queue_size(total_size)?;

        let mut inner = self.lock_inner();
        for txgroup in txgroups {
            let (guard, result) = self.remember_one(inner, txgroup);
            inner = guard;
            if let Err(err) = result {
                // earlier groups of this batch may already be staged
                inner.remembered.reset();
                return Err(err);
            }
        }
        self.remember_commit(&mut inner, false);
        Ok(())
    }

    /// Admission path for a single group: wait out any `on_new_block` race,
    /// check fees, then feed the group to the evaluator and stage it.
    fn remember_one<'a>(
        &'a self,
        inner: MutexGuard<'a, PoolInner>,
        mut txgroup: SignedTxGroup,
    ) -> (MutexGuard<'a, PoolInner>, Result<(), PoolError>) {
        let (inner, fresh) = self.wait_for_evaluator_freshness(inner);
        if let Err(err) = fresh {
            return (inner, Err(err));
        }

        if let Err(err) = self.check_sufficient_fee(&inner, &txgroup) {
            return (inner, Err(err));
        }

        // first time this group enters the pool; fix its identity now
        txgroup.group_txid = Some(txgroup.compute_group_txid());

        let mut inner = inner;
        let result = self.ingest(&mut inner, txgroup, false, None);
        (inner, result)
    }

    /// If the ledger has committed a block the pool has not reacted to yet,
    /// wait a bounded time for `on_new_block` to catch up. Absorbs the race
    /// between the commit thread and admission callers.
    fn wait_for_evaluator_freshness<'a>(
        &'a self,
        mut inner: MutexGuard<'a, PoolInner>,
    ) -> (MutexGuard<'a, PoolInner>, Result<(), PoolError>) {
        let latest = self.ledger.latest();
        let wait_expires = Instant::now() + TIMEOUT_ON_NEW_BLOCK;
        loop {
            let evaluator_round = match &inner.evaluator {
                None => return (inner, Err(PoolError::NoEvaluator)),
                Some(evaluator) => evaluator.round(),
            };
            let now = Instant::now();
            if evaluator_round > latest || now >= wait_expires {
                break;
            }
            let (guard, _) = self
                .pool_cv
                .wait_timeout(inner, wait_expires - now)
                .expect("[txpool] pool lock poisoned");
            inner = guard;
        }
        (inner, Ok(()))
    }

    /// Feeds a group to the evaluator and appends it to the staging layer.
    /// In recomputing mode the fee checks and freshness wait are skipped and
    /// per-group timing feeds the assembly stats.
    fn ingest(
        &self,
        inner: &mut PoolInner,
        txgroup: SignedTxGroup,
        recomputing: bool,
        stats: Option<&mut AssembleBlockStats>,
    ) -> Result<(), PoolError> {
        if inner.evaluator.is_none() {
            return Err(PoolError::NoEvaluator);
        }

        self.add_to_pending_block_evaluator(inner, &txgroup, recomputing, stats)?;

        for tx in &txgroup.transactions {
            inner.remembered.txids.insert(tx.id(), tx.clone());
        }
        inner.remembered.groups.push(txgroup);
        Ok(())
    }

    /// Feeds a group to the evaluator, rolling the backlog pointer forward
    /// and retrying once if the current block is full.
    fn add_to_pending_block_evaluator(
        &self,
        inner: &mut PoolInner,
        txgroup: &SignedTxGroup,
        recomputing: bool,
        mut stats: Option<&mut AssembleBlockStats>,
    ) -> Result<(), PoolError> {
        let result =
            self.add_to_pending_block_evaluator_once(inner, txgroup, recomputing, stats.as_deref_mut());
        if let Err(PoolError::Eval(EvalError::NoSpace)) = result {
            inner.num_pending_whole_blocks += 1;
            counters::PENDING_WHOLE_BLOCKS.set(inner.num_pending_whole_blocks as i64);
            if let Some(evaluator) = inner.evaluator.as_mut() {
                evaluator.reset_txn_bytes();
            }
            return self.add_to_pending_block_evaluator_once(inner, txgroup, recomputing, stats);
        }
        result
    }

    fn add_to_pending_block_evaluator_once(
        &self,
        inner: &mut PoolInner,
        txgroup: &SignedTxGroup,
        recomputing: bool,
        stats: Option<&mut AssembleBlockStats>,
    ) -> Result<(), PoolError> {
        let PoolInner {
            evaluator,
            num_pending_whole_blocks,
            assembly_completed_or_abandoned,
            ..
        } = inner;
        let evaluator = match evaluator.as_mut() {
            None => return Err(PoolError::NoEvaluator),
            Some(evaluator) => evaluator,
        };

        // A transaction must stay valid until the block it would land in:
        // the backlog pushes that block past the evaluator's round.
        let target_round = evaluator.round() + *num_pending_whole_blocks;
        for tx in &txgroup.transactions {
            if tx.txn.last_valid < target_round {
                return Err(EvalError::Dead {
                    round: target_round,
                    first_valid: tx.txn.first_valid,
                    last_valid: tx.txn.last_valid,
                }
                .into());
            }
        }

        let group_starts = Instant::now();
        let result = evaluator.transaction_group(txgroup);
        let group_duration = group_starts.elapsed();

        if recomputing && !*assembly_completed_or_abandoned {
            if let Some(stats) = stats {
                let mut assembly = self.lock_assembly();
                if assembly.round > evaluator.round() {
                    // Consensus wants a later round than the one we're
                    // assembling; finishing this block would be pointless.
                    // Flag completion so the replay loop winds down fast.
                    assembly.results.ok = true;
                    *assembly_completed_or_abandoned = true;
                    stats.stop_reason = StopReason::Abandon;
                    assembly.results.stats = stats.clone();
                    self.assembly_cv.notify_all();
                } else if matches!(result, Err(EvalError::NoSpace))
                    || Self::assembly_timed_out(&assembly, evaluator.txn_counter())
                {
                    assembly.results.ok = true;
                    *assembly_completed_or_abandoned = true;
                    if matches!(result, Err(EvalError::NoSpace)) {
                        stats.stop_reason = StopReason::Full;
                    } else {
                        stats.stop_reason = StopReason::Timeout;
                        // the block is not full, so this group made it in
                        stats.processing_time += group_duration;
                    }
                    let generation_starts = Instant::now();
                    match evaluator.generate_block() {
                        Ok(block) => assembly.results.block = Some(Arc::new(block)),
                        Err(err) => {
                            assembly.results.err = Some(format!(
                                "could not generate block for {}: {}",
                                assembly.results.round_started_evaluating, err
                            ))
                        }
                    }
                    stats.block_generation_duration = generation_starts.elapsed();
                    assembly.results.stats = stats.clone();
                    self.assembly_cv.notify_all();
                } else {
                    stats.processing_time += group_duration;
                }
            }
        }

        result.map_err(PoolError::from)
    }

    /// Whether assembly should stop adding transactions now so that
    /// `generate_block` can still finish before the posted deadline.
    fn assembly_timed_out(assembly: &AssemblyState, txn_counter: u64) -> bool {
        match assembly.deadline {
            // no deadline, no reason to time out
            None => false,
            Some(deadline) => {
                let generate_block_duration = GENERATE_BLOCK_BASE_DURATION
                    + Duration::from_nanos(txn_counter.saturating_mul(GENERATE_BLOCK_PER_TXN_NANOS));
                Instant::now() + generate_block_duration > deadline
            }
        }
    }

    /// Promotes the staging layer into the pending store. With `flush` the
    /// pending store is replaced wholesale; otherwise the staged groups are
    /// appended, each receiving the next group counter.
    fn remember_commit(&self, inner: &mut PoolInner, flush: bool) {
        let mut pending = self.write_pending();

        if flush {
            pending.pending_groups = Arc::new(std::mem::take(&mut inner.remembered.groups));
            pending.pending_txids = std::mem::take(&mut inner.remembered.txids);
            pending.pending_latest_local = inner.remembered.latest_local;
        } else {
            let PendingStore {
                pending_groups,
                pending_txids,
                pending_counter,
                pending_latest_local,
            } = &mut *pending;
            let groups = Arc::make_mut(pending_groups);
            for mut txgroup in inner.remembered.groups.drain(..) {
                *pending_counter += 1;
                txgroup.group_counter = *pending_counter;
                txgroup.encoded_length = txgroup
                    .transactions
                    .iter()
                    .map(|tx| tx.encoded_length())
                    .sum();
                if txgroup.locally_originated {
                    *pending_latest_local = txgroup.group_counter;
                }
                groups.push(txgroup);
            }
            for (txid, txn) in inner.remembered.txids.drain() {
                pending_txids.insert(txid, txn);
            }
        }

        self.ledger
            .verified_transaction_cache()
            .update_pinned(&pending.pending_txids);
        counters::PENDING_TXNS.set(pending.pending_txids.len() as i64);
        inner.remembered.reset();
    }

    /// The error associated with a transaction that used to be in the pool,
    /// or the transaction itself (with an empty reason) if it still is.
    /// `None` if no status is available, e.g. because the transaction
    /// committed successfully or was dropped too long ago.
    pub fn lookup(&self, txid: &TxId) -> Option<(SignedTransaction, String)> {
        let inner = self.lock_inner();
        let pending = self.read_pending();

        if let Some(txn) = pending.pending_txids.get(txid) {
            return Some((txn.clone(), String::new()));
        }
        inner.status_cache.check(txid)
    }

    /// Excises transactions committed by the given block (or expired by it)
    /// from the pool, adjusts the fee floor, and rebuilds the evaluator at
    /// the new tip. Invoked by the ledger on every committed block.
    pub fn on_new_block(&self, block: &Block, delta: &StateDelta) {
        let mut stats = ProcessBlockStats::default();
        let mut known_committed = 0usize;
        let mut unknown_committed = 0usize;

        let committed_txids = &delta.txids;
        if self.log_process_block_stats {
            let pending = self.read_pending();
            for txid in committed_txids.keys() {
                if pending.pending_txids.contains_key(txid) {
                    known_committed += 1;
                } else {
                    unknown_committed += 1;
                }
            }
        }

        let mut inner = self.lock_inner();
        let evaluator_round = inner.evaluator.as_ref().map(|evaluator| evaluator.round());
        if evaluator_round.is_none() || block.round() >= evaluator_round.unwrap_or(0) {
            // Move the fee multiplier with the backlog: shrink it below one
            // full block (it bottoms out at 0, where only the flat minimum
            // fee filters), hold it at exactly one, grow it at two or more.
            // The asymmetry is deliberate.
            match inner.num_pending_whole_blocks {
                0 => {
                    inner.fee_threshold_multiplier =
                        inner.fee_threshold_multiplier / self.exp_fee_factor
                }
                1 => {}
                _ => {
                    inner.fee_threshold_multiplier = if inner.fee_threshold_multiplier == 0 {
                        1
                    } else {
                        inner
                            .fee_threshold_multiplier
                            .saturating_mul(self.exp_fee_factor)
                    }
                }
            }

            // Recompute the pool from the new latest block. This drops
            // transactions that have been committed or are no longer valid.
            stats = self.recompute_block_evaluator(&mut inner, committed_txids, known_committed);
            self.compute_fee_per_byte(&inner);
        }

        stats.known_committed_count = known_committed;
        stats.unknown_committed_count = unknown_committed;
        counters::EXPIRED_TXNS.inc_by(stats.expired_count as u64);
        counters::REMOVED_INVALID_TXNS.inc_by(stats.removed_invalid_count as u64);

        inner.expired_tx_count.insert(block.round(), stats.expired_count);
        if let Some(proto) = consensus_params(&block.header.current_protocol) {
            if let Some(stale_round) = block
                .round()
                .checked_sub(EXPIRED_HISTORY.saturating_mul(proto.max_txn_life))
            {
                inner.expired_tx_count.remove(&stale_round);
            }
        }

        if self.log_process_block_stats {
            info!("processed block {}: {:?}", block.round(), stats);
        }

        self.pool_cv.notify_all();
    }

    /// Constructs a new evaluator at the ledger's tip and replays all
    /// pending groups through it, dropping the ones it rejects. Expects the
    /// pool mutex to be held.
    pub(crate) fn recompute_block_evaluator(
        &self,
        inner: &mut PoolInner,
        committed_txids: &HashMap<TxId, Round>,
        known_committed: usize,
    ) -> ProcessBlockStats {
        let mut stats = ProcessBlockStats::default();
        inner.evaluator = None;

        let latest = self.ledger.latest();
        let prev = match self.ledger.block_hdr(latest) {
            Ok(header) => header,
            Err(err) => {
                warn!(
                    "recompute_block_evaluator: cannot get prev header for {}: {}",
                    latest, err
                );
                return stats;
            }
        };

        // Make sure we know the protocol of the block we're about to build.
        // Building a block for an unknown version cannot work; stalling
        // locally beats taking the node down.
        let next_version = prev.next_block_protocol();
        if consensus_params(next_version).is_none() {
            warn!(
                "recompute_block_evaluator: next protocol version {} is not supported",
                next_version
            );
            return stats;
        }

        // Grab the groups to be played through the new evaluator.
        let (txgroups, pending_count) = {
            let pending = self.read_pending();
            (Arc::clone(&pending.pending_groups), pending.txn_count())
        };

        {
            let mut assembly = self.lock_assembly();
            assembly.results = AssemblyResults::new(prev.round + 1);
        }
        inner.assembly_completed_or_abandoned = false;

        let next = Block::next_from(&prev);
        inner.num_pending_whole_blocks = 0;
        counters::PENDING_WHOLE_BLOCKS.set(0);
        inner.remembered.latest_local = INVALID_GROUP_COUNTER;

        let hint = pending_count.saturating_sub(known_committed);
        let max_txn_bytes =
            self.calculate_max_txn_bytes_per_block(&next.header.current_protocol);
        inner.evaluator = match self.ledger.start_evaluator(next.header, hint, max_txn_bytes) {
            Ok(evaluator) => Some(evaluator),
            Err(err) => {
                warn!("recompute_block_evaluator: cannot start evaluator: {}", err);
                return stats;
            }
        };

        let mut asm_stats = AssembleBlockStats {
            start_count: txgroups.len(),
            stop_reason: StopReason::Empty,
            ..AssembleBlockStats::default()
        };

        let first_txn_group_time = Instant::now();

        // Feed the transactions in order.
        for txgroup in txgroups.iter() {
            if txgroup.transactions.is_empty() {
                asm_stats.invalid_count += 1;
                continue;
            }
            if committed_txids.contains_key(&txgroup.transactions[0].id()) {
                asm_stats.early_committed_count += 1;
                continue;
            }
            match self.ingest(inner, txgroup.clone(), true, Some(&mut asm_stats)) {
                Ok(()) => {
                    if txgroup.locally_originated {
                        inner.remembered.latest_local = txgroup.group_counter;
                    }
                }
                Err(err) => {
                    for tx in &txgroup.transactions {
                        inner.status_cache.put(tx.clone(), err.to_string());
                    }
                    match &err {
                        PoolError::Eval(EvalError::TransactionInLedger(_)) => {
                            asm_stats.committed_count += 1;
                            stats.removed_invalid_count += 1;
                        }
                        PoolError::Eval(EvalError::Dead { .. }) => {
                            asm_stats.invalid_count += 1;
                            stats.expired_count += 1;
                        }
                        PoolError::Eval(EvalError::MinFee { .. }) => {
                            asm_stats.invalid_count += 1;
                            stats.removed_invalid_count += 1;
                            info!("Cannot re-add pending transaction to pool: {}", err);
                        }
                        _ => {
                            asm_stats.invalid_count += 1;
                            stats.removed_invalid_count += 1;
                            warn!("Cannot re-add pending transaction to pool: {}", err);
                        }
                    }
                }
            }
        }

        {
            let PoolInner {
                evaluator,
                assembly_completed_or_abandoned,
                ..
            } = &mut *inner;
            let mut assembly = self.lock_assembly();
            if let Some(deadline) = assembly.deadline {
                // How long had proposal assembly been underway before the
                // first group was evaluated? Ideally near zero.
                if let Some(window_opens) = deadline.checked_sub(PROPOSAL_ASSEMBLY_TIME) {
                    asm_stats.transactions_loop_start_time_nanos =
                        match first_txn_group_time.checked_duration_since(window_opens) {
                            Some(late) => late.as_nanos() as i64,
                            None => -(window_opens
                                .saturating_duration_since(first_txn_group_time)
                                .as_nanos() as i64),
                        };
                }
            }

            if let Some(evaluator) = evaluator.as_mut() {
                if !assembly.results.ok && assembly.round <= evaluator.round() {
                    assembly.results.ok = true;
                    *assembly_completed_or_abandoned = true;
                    let generation_starts = Instant::now();
                    match evaluator.generate_block() {
                        Ok(block) => assembly.results.block = Some(Arc::new(block)),
                        Err(err) => {
                            assembly.results.err = Some(format!(
                                "could not generate block for {} (end): {}",
                                assembly.results.round_started_evaluating, err
                            ))
                        }
                    }
                    asm_stats.block_generation_duration = generation_starts.elapsed();
                    assembly.results.stats = asm_stats.clone();
                    self.assembly_cv.notify_all();
                }
            }
        }

        self.remember_commit(inner, true);
        stats
    }

    /// Assembles a block for the given round, trying not to take longer than
    /// `deadline`. Returns `StaleBlockAssemblyRequest` when consensus asks
    /// for a round the pool has already moved past.
    pub fn assemble_block(
        &self,
        round: Round,
        deadline: Instant,
    ) -> Result<Arc<ValidatedBlock>, PoolError> {
        let start = Instant::now();
        let (assembled, mut stats) = self.assemble_block_impl(round, deadline)?;
        counters::ASSEMBLED_BLOCKS.inc();

        if self.log_assemble_stats {
            // measured here because how close we came to the deadline is
            // the interesting part
            stats.nanoseconds = start.elapsed().as_nanos() as i64;

            let payset = &assembled.block().payset;
            if !payset.is_empty() {
                let mut total_fees = 0u64;
                for (i, txn) in payset.iter().enumerate() {
                    let fee = txn.txn.fee;
                    let encoded_length = txn.encoded_length();

                    stats.included_count += 1;
                    total_fees += fee;

                    if i == 0 {
                        stats.min_fee = fee;
                        stats.max_fee = fee;
                        stats.min_length = encoded_length;
                        stats.max_length = encoded_length;
                    } else {
                        if fee < stats.min_fee {
                            stats.min_fee = fee;
                        } else if fee > stats.max_fee {
                            stats.max_fee = fee;
                        }
                        if encoded_length < stats.min_length {
                            stats.min_length = encoded_length;
                        } else if encoded_length > stats.max_length {
                            stats.max_length = encoded_length;
                        }
                    }
                    stats.total_length += encoded_length as u64;
                }
                stats.average_fee = total_fees / stats.included_count as u64;
            }
            info!("assembled block for round {}: {:?}", round, stats);
        }

        Ok(assembled)
    }

    fn assemble_block_impl(
        &self,
        round: Round,
        mut deadline: Instant,
    ) -> Result<(Arc<ValidatedBlock>, AssembleBlockStats), PoolError> {
        let mut assembly = self.lock_assembly();

        // If the pool is more than two rounds behind the request, waiting
        // will not help; serve an empty block right away.
        if assembly.results.round_started_evaluating <= round.saturating_sub(2) {
            info!(
                "assemble_block: requested round is more than a single round ahead of the transaction pool {} <= {}-2",
                assembly.results.round_started_evaluating, round
            );
            drop(assembly);
            let block = self.assemble_empty_block(round)?;
            return Ok((block, AssembleBlockStats::default()));
        }

        if assembly.results.round_started_evaluating > round {
            // We have already assembled a later round; consensus is behind
            // us. The network is ahead anyway, so not producing a block for
            // this round loses nothing.
            info!(
                "assemble_block: requested round is behind transaction pool round {} < {}",
                round, assembly.results.round_started_evaluating
            );
            return Err(PoolError::StaleBlockAssemblyRequest);
        }

        assembly.deadline = Some(deadline);
        assembly.round = round;
        assembly = self.wait_for_assembly(assembly, deadline, round);

        if !assembly.results.ok {
            // Past the deadline with nothing assembled. Start preparing an
            // empty block in case the grace period is not enough either;
            // that touches the ledger database, so drop the lock meanwhile.
            drop(assembly);
            let empty_block = self.assemble_empty_block(round);
            assembly = self.lock_assembly();

            if assembly.results.round_started_evaluating > round {
                // The pool managed to advance twice while we were preparing
                // the empty block. Unlikely, but it means consensus is
                // behind and this proposal would be discarded anyway.
                info!(
                    "assemble_block: requested round is behind transaction pool round after timing out {} < {}",
                    round, assembly.results.round_started_evaluating
                );
                return Err(PoolError::StaleBlockAssemblyRequest);
            }

            deadline += ASSEMBLY_WAIT_EPS;
            assembly = self.wait_for_assembly(assembly, deadline, round);

            if !assembly.results.ok {
                // the extra time didn't help; return the block we prepared
                warn!("assemble_block: ran out of time for round {}", round);
                let stats = AssembleBlockStats {
                    stop_reason: StopReason::Timeout,
                    ..AssembleBlockStats::default()
                };
                return match empty_block {
                    Ok(block) => Ok((block, stats)),
                    Err(err) => Err(PoolError::AssemblyFailed {
                        round,
                        msg: format!("failed to construct empty block: {}", err),
                    }),
                };
            }
        }
        assembly.deadline = None;

        if let Some(err) = &assembly.results.err {
            return Err(PoolError::AssemblyFailed {
                round,
                msg: err.clone(),
            });
        }

        let started = assembly.results.round_started_evaluating;
        if started > round {
            // only possible if the pool saw new blocks arrive with gaps
            // between consecutive rounds, hence the warning
            warn!(
                "assemble_block: requested round is behind transaction pool round {} < {}",
                round, started
            );
            return Err(PoolError::StaleBlockAssemblyRequest);
        } else if started == round.saturating_sub(1) && round > 0 {
            // the assembler never caught up to the requested round because
            // the tip advanced mid-flight
            warn!(
                "assemble_block: assembled block round did not catch up to requested round: {} != {}",
                started, round
            );
            drop(assembly);
            let block = self.assemble_empty_block(round)?;
            let stats = AssembleBlockStats {
                stop_reason: StopReason::Timeout,
                ..AssembleBlockStats::default()
            };
            return Ok((block, stats));
        } else if started < round {
            return Err(PoolError::Internal(format!(
                "assemble_block: assembled block round much behind requested round: {} != {}",
                started, round
            )));
        }

        let stats = assembly.results.stats.clone();
        match assembly.results.block.clone() {
            Some(block) => Ok((block, stats)),
            None => Err(PoolError::Internal(format!(
                "assemble_block: missing assembled block for round {}",
                round
            ))),
        }
    }

    /// Timed wait on the assembly condition variable until the results are
    /// ready for `round` or the deadline passes. Broadcast wakeups require
    /// re-checking the predicate every iteration.
    fn wait_for_assembly<'a>(
        &self,
        mut assembly: MutexGuard<'a, AssemblyState>,
        deadline: Instant,
        round: Round,
    ) -> MutexGuard<'a, AssemblyState> {
        loop {
            if assembly.results.ok && assembly.results.round_started_evaluating == round {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .assembly_cv
                .wait_timeout(assembly, deadline - now)
                .expect("[txpool] assembly lock poisoned");
            assembly = guard;
        }
        assembly
    }

    /// Builds an empty block for the given round with a one-shot evaluator.
    /// Reads the ledger database, so callers should expect it to take a
    /// while.
    fn assemble_empty_block(&self, round: Round) -> Result<Arc<ValidatedBlock>, PoolError> {
        let prev_round = round.saturating_sub(1);
        let prev = self.ledger.block_hdr(prev_round).map_err(|err| {
            PoolError::AssemblyFailed {
                round,
                msg: format!("cannot get prev header for {}: {}", prev_round, err),
            }
        })?;
        let next = Block::next_from(&prev);
        let max_txn_bytes =
            self.calculate_max_txn_bytes_per_block(&next.header.current_protocol);
        let mut evaluator = self
            .ledger
            .start_evaluator(next.header, 0, max_txn_bytes)
            .map_err(|err| PoolError::AssemblyFailed {
                round,
                msg: format!("cannot start evaluator for {}: {}", round, err),
            })?;
        evaluator
            .generate_block()
            .map(Arc::new)
            .map_err(|err| PoolError::AssemblyFailed {
                round,
                msg: format!("cannot generate empty block: {}", err),
            })
    }

    /// Drops the current evaluator, recomputes the pool, and assembles a
    /// block from whatever is pending right now. Dev-mode networks commit a
    /// block per transaction; this is their assembly entry point.
    pub fn assemble_dev_mode_block(&self) -> Result<Arc<ValidatedBlock>, PoolError> {
        let mut inner = self.lock_inner();
        self.recompute_block_evaluator(&mut inner, &HashMap::new(), 0);

        let round = match &inner.evaluator {
            None => return Err(PoolError::NoEvaluator),
            Some(evaluator) => evaluator.round(),
        };

        // the recompute above pregenerated the block, so no waiting happens
        self.assemble_block(round, Instant::now() + PROPOSAL_ASSEMBLY_TIME)
    }
}
