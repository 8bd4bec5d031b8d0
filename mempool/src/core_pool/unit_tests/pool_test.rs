// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    core_pool::{PoolError, TransactionPool},
    ledger::{EvalError, PoolLedger},
    mocks::MockLedger,
};
use meridian_config::{PoolConfig, PROTOCOL_V1};
use meridian_types::{
    block::Block,
    transaction::{Address, SignedTransaction, Transaction, TxType, COMPACT_CERT_SENDER},
    txgroup::SignedTxGroup,
    Round,
};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

// every generated transaction gets a unique note, hence a unique id
static NOTE_NONCE: AtomicU64 = AtomicU64::new(0);

fn payment(fee: u64, first_valid: Round, last_valid: Round, note_len: usize) -> SignedTransaction {
    let nonce = NOTE_NONCE.fetch_add(1, Ordering::Relaxed);
    let mut note = nonce.to_le_bytes().to_vec();
    note.resize(note_len.max(8), 0);
    SignedTransaction {
        txn: Transaction {
            sender: Address([1; 32]),
            tx_type: TxType::Payment,
            fee,
            first_valid,
            last_valid,
            note,
            receiver: Address([2; 32]),
            amount: 100,
        },
        signature: vec![0; 64],
    }
}

fn compact_cert_txn() -> SignedTransaction {
    SignedTransaction {
        txn: Transaction {
            sender: COMPACT_CERT_SENDER,
            tx_type: TxType::CompactCert,
            fee: 0,
            first_valid: 0,
            last_valid: 1000,
            note: Vec::new(),
            receiver: Address([0; 32]),
            amount: 0,
        },
        signature: vec![0; 64],
    }
}

fn group(txns: Vec<SignedTransaction>) -> SignedTxGroup {
    SignedTxGroup::new(txns, false)
}

fn local_group(txns: Vec<SignedTransaction>) -> SignedTxGroup {
    SignedTxGroup::new(txns, true)
}

fn test_config() -> PoolConfig {
    PoolConfig {
        tx_pool_size: 1000,
        tx_pool_exponential_increase_factor: 5,
        ..PoolConfig::default()
    }
}

fn setup() -> (Arc<MockLedger>, TransactionPool) {
    setup_with(test_config())
}

fn setup_with(config: PoolConfig) -> (Arc<MockLedger>, TransactionPool) {
    let ledger = Arc::new(MockLedger::new(PROTOCOL_V1));
    let pool = TransactionPool::new(ledger.clone(), &config);
    (ledger, pool)
}

#[test]
fn accepts_group_when_idle() {
    let (_ledger, pool) = setup();
    let txn = payment(1000, 0, 1000, 0);
    let txid = txn.id();

    assert_eq!(pool.fee_per_byte(), 0);
    pool.remember(group(vec![txn])).unwrap();

    assert_eq!(pool.pending_count(), 1);
    assert!(pool.pending_tx_ids().contains(&txid));
    let (groups, latest_local) = pool.pending_tx_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_counter, 1);
    assert!(groups[0].group_txid.is_some());
    assert!(groups[0].encoded_length > 0);
    assert_eq!(latest_local, 0);
}

#[test]
fn zero_fee_compact_cert_exempt() {
    let (_ledger, pool) = setup();

    pool.remember(group(vec![compact_cert_txn()])).unwrap();
    assert_eq!(pool.pending_count(), 1);

    // any other zero-fee group is refused by the evaluator's flat minimum
    let err = pool.remember(group(vec![payment(0, 0, 1000, 0)])).unwrap_err();
    assert!(matches!(err, PoolError::Eval(EvalError::MinFee { .. })));
    assert_eq!(pool.pending_count(), 1);
}

#[test]
fn dead_transaction_rejected() {
    let (_ledger, pool) = setup();
    let txn = payment(1000, 0, 0, 0);
    let txid = txn.id();

    let err = pool.remember(group(vec![txn])).unwrap_err();
    assert!(matches!(err, PoolError::Eval(EvalError::Dead { .. })));
    assert!(!pool.pending_tx_ids().contains(&txid));
    assert_eq!(pool.pending_count(), 0);
}

#[test]
fn capacity_is_enforced() {
    let config = PoolConfig {
        tx_pool_size: 2,
        ..test_config()
    };
    let (_ledger, pool) = setup_with(config);

    let big = group(vec![
        payment(1000, 0, 1000, 0),
        payment(1000, 0, 1000, 0),
        payment(1000, 0, 1000, 0),
    ]);
    assert!(matches!(
        pool.remember(big).unwrap_err(),
        PoolError::CapacityReached
    ));

    pool.remember(group(vec![
        payment(1000, 0, 1000, 0),
        payment(1000, 0, 1000, 0),
    ]))
    .unwrap();
    assert!(matches!(
        pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap_err(),
        PoolError::CapacityReached
    ));
    assert_eq!(pool.pending_count(), 2);
}

#[test]
fn duplicate_group_is_rejected() {
    let (_ledger, pool) = setup();
    let txgroup = group(vec![payment(1000, 0, 1000, 0)]);

    pool.remember(txgroup.clone()).unwrap();
    let err = pool.remember(txgroup).unwrap_err();
    assert!(matches!(
        err,
        PoolError::Eval(EvalError::TransactionInLedger(_))
    ));
    assert_eq!(pool.pending_tx_ids().len(), 1);
}

#[test]
fn remember_array_commits_in_order() {
    let (_ledger, pool) = setup();
    pool.remember_array(vec![
        group(vec![payment(1000, 0, 1000, 0)]),
        local_group(vec![payment(1000, 0, 1000, 0)]),
    ])
    .unwrap();

    let (groups, latest_local) = pool.pending_tx_groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].group_counter, 1);
    assert_eq!(groups[1].group_counter, 2);
    assert!(groups[1].locally_originated);
    assert_eq!(latest_local, 2);
}

#[test]
fn remember_array_failure_discards_whole_batch() {
    let (_ledger, pool) = setup();
    let err = pool
        .remember_array(vec![
            group(vec![payment(1000, 0, 1000, 0)]),
            group(vec![payment(1000, 0, 0, 0)]), // dead
        ])
        .unwrap_err();
    assert!(matches!(err, PoolError::Eval(EvalError::Dead { .. })));
    assert_eq!(pool.pending_count(), 0);
    assert!(pool.pending_tx_ids().is_empty());
}

#[test]
fn snapshot_survives_later_commits() {
    let (_ledger, pool) = setup();
    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();

    let (snapshot, _) = pool.pending_tx_groups();
    assert_eq!(snapshot.len(), 1);

    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    // the old handle still sees the state it was taken at
    assert_eq!(snapshot.len(), 1);
    let (fresh, _) = pool.pending_tx_groups();
    assert_eq!(fresh.len(), 2);
}

#[test]
fn committed_transactions_leave_the_pool() {
    let (ledger, pool) = setup();
    let committed_txn = payment(1000, 0, 1000, 0);
    let committed_id = committed_txn.id();
    let surviving_txn = payment(1000, 0, 1000, 0);
    let surviving_id = surviving_txn.id();

    pool.remember(group(vec![committed_txn.clone()])).unwrap();
    pool.remember(group(vec![surviving_txn])).unwrap();

    let prev = ledger.block_hdr(0).unwrap();
    let mut block = Block::next_from(&prev);
    block.payset = vec![committed_txn];
    let delta = ledger.commit_block(&block);
    pool.on_new_block(&block, &delta);

    let ids = pool.pending_tx_ids();
    assert!(!ids.contains(&committed_id));
    assert!(ids.contains(&surviving_id));
    // committed groups are skipped silently; no eviction status is recorded
    assert!(pool.lookup(&committed_id).is_none());
}

#[test]
fn expired_transactions_are_counted_and_cached() {
    let (ledger, pool) = setup();
    let txn = payment(1000, 0, 1, 0);
    let txid = txn.id();
    pool.remember(group(vec![txn])).unwrap();

    let (block, delta) = ledger.commit_empty_block();
    pool.on_new_block(&block, &delta);

    assert_eq!(pool.pending_count(), 0);
    assert_eq!(pool.num_expired(block.round()), 1);
    let (_txn, reason) = pool.lookup(&txid).expect("dropped txn should be cached");
    assert!(reason.contains("dead"), "unexpected reason: {}", reason);
}

#[test]
fn on_new_block_is_idempotent() {
    let (ledger, pool) = setup();
    let txn = payment(1000, 0, 1000, 0);
    pool.remember(group(vec![txn.clone()])).unwrap();
    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();

    let prev = ledger.block_hdr(0).unwrap();
    let mut block = Block::next_from(&prev);
    block.payset = vec![txn];
    let delta = ledger.commit_block(&block);

    pool.on_new_block(&block, &delta);
    let mut ids_once = pool.pending_tx_ids();
    ids_once.sort();
    let count_once = pool.pending_count();

    // a replayed commit notification is stale and must not disturb the pool
    pool.on_new_block(&block, &delta);
    let mut ids_twice = pool.pending_tx_ids();
    ids_twice.sort();
    assert_eq!(ids_once, ids_twice);
    assert_eq!(count_once, pool.pending_count());
}

#[test]
fn fee_floor_grows_with_backlog() {
    let ledger = Arc::new(MockLedger::new(PROTOCOL_V1));
    let txn_size = payment(1_000_000, 0, 1000, 0).encoded_length();
    // three transactions per block, the fourth overflows; set before the
    // pool starts its first evaluator
    ledger.set_block_byte_limit(3 * txn_size + 10);
    let pool = TransactionPool::new(ledger.clone(), &test_config());

    // 8 groups: the backlog crosses two whole blocks at the 7th, so the
    // 8th admission computes a floor of factor^(2-1)
    for _ in 0..8 {
        pool.remember(group(vec![payment(1_000_000, 0, 1000, 0)])).unwrap();
    }
    assert_eq!(pool.fee_per_byte(), 5);

    // the multiplier engages on the next block while the backlog persists
    let (block, delta) = ledger.commit_empty_block();
    pool.on_new_block(&block, &delta);
    assert_eq!(pool.fee_per_byte(), 5);
    assert_eq!(pool.pending_count(), 8);
}

#[test]
fn assemble_block_on_empty_pool() {
    let (_ledger, pool) = setup();
    let block = pool
        .assemble_block(1, Instant::now() + Duration::from_millis(500))
        .unwrap();
    assert_eq!(block.round(), 1);
    assert!(block.block().payset.is_empty());
}

#[test]
fn assemble_block_stale_round_is_distinguishable() {
    let (_ledger, pool) = setup();
    let err = pool
        .assemble_block(0, Instant::now() + Duration::from_millis(10))
        .unwrap_err();
    assert_eq!(err, PoolError::StaleBlockAssemblyRequest);
}

#[test]
fn assemble_block_far_ahead_returns_empty_block() {
    let (ledger, pool) = setup();
    // the ledger moves two rounds ahead without the pool hearing about it
    ledger.commit_empty_block();
    ledger.commit_empty_block();

    let block = pool
        .assemble_block(3, Instant::now() + Duration::from_millis(200))
        .unwrap();
    assert_eq!(block.round(), 3);
    assert!(block.block().payset.is_empty());
}

#[test]
fn assemble_block_waits_for_pool_to_catch_up() {
    let (ledger, pool) = setup_with(test_config());
    let pool = Arc::new(pool);

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.assemble_block(2, Instant::now() + Duration::from_secs(5)))
    };

    // let the waiter publish its deadline before the pool advances
    thread::sleep(Duration::from_millis(200));
    let (block, delta) = ledger.commit_empty_block();
    pool.on_new_block(&block, &delta);

    let assembled = waiter.join().unwrap().unwrap();
    assert_eq!(assembled.round(), 2);
}

#[test]
fn assembly_seals_partial_block_when_full() {
    let ledger = Arc::new(MockLedger::new(PROTOCOL_V1));
    let txn_size = payment(1_000_000, 0, 1000, 0).encoded_length();
    // one transaction per block
    ledger.set_block_byte_limit(txn_size + 10);
    let pool = TransactionPool::new(ledger.clone(), &test_config());

    for _ in 0..3 {
        pool.remember(group(vec![payment(1_000_000, 0, 1000, 0)])).unwrap();
    }

    let pool = Arc::new(pool);
    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.assemble_block(2, Instant::now() + Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(200));

    let (block, delta) = ledger.commit_empty_block();
    pool.on_new_block(&block, &delta);

    // the evaluator filled up after one transaction, so that is the block
    let assembled = waiter.join().unwrap().unwrap();
    assert_eq!(assembled.round(), 2);
    assert_eq!(assembled.block().payset.len(), 1);
    // the overflow groups are still pending for later rounds
    assert_eq!(pool.pending_count(), 3);
}

#[test]
fn unknown_protocol_upgrade_stalls_admission() {
    let (ledger, pool) = setup();
    let (block, delta) = ledger.commit_empty_block();
    ledger.set_next_protocol(block.round(), "meridian-v999");
    pool.on_new_block(&block, &delta);

    let err = pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap_err();
    assert_eq!(err, PoolError::NoEvaluator);
    assert!(matches!(
        pool.test(&[payment(1000, 0, 1000, 0)]).unwrap_err(),
        PoolError::NoEvaluator
    ));

    // once the node understands the next version, the pool recovers
    ledger.set_next_protocol(block.round(), meridian_config::PROTOCOL_V2);
    pool.reset();
    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    assert_eq!(pool.pending_count(), 1);
}

#[test]
fn remember_waits_for_on_new_block_to_catch_up() {
    let (ledger, pool) = setup();
    let pool = Arc::new(pool);

    // the ledger is ahead of the pool: admission has to wait
    let (block, delta) = ledger.commit_empty_block();

    let notifier = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            pool.on_new_block(&block, &delta);
        })
    };

    let start = Instant::now();
    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(pool.pending_count(), 1);
    notifier.join().unwrap();
}

#[test]
fn reset_preserves_group_counters() {
    let (_ledger, pool) = setup();
    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    let (groups, _) = pool.pending_tx_groups();
    assert_eq!(groups[0].group_counter, 1);

    pool.reset();
    assert_eq!(pool.pending_count(), 0);
    assert!(pool.pending_tx_ids().is_empty());

    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    let (groups, _) = pool.pending_tx_groups();
    // counters keep running across resets
    assert_eq!(groups[0].group_counter, 2);
}

#[test]
fn dev_mode_block_includes_pending_transactions() {
    let (_ledger, pool) = setup();
    let txn = payment(1000, 0, 1000, 0);
    let txid = txn.id();
    pool.remember(group(vec![txn])).unwrap();

    let block = pool.assemble_dev_mode_block().unwrap();
    assert_eq!(block.round(), 1);
    assert!(block.block().payset.iter().any(|tx| tx.id() == txid));
}

#[test]
fn test_is_a_dry_run() {
    let (_ledger, pool) = setup();
    pool.test(&[payment(1000, 0, 1000, 0)]).unwrap();
    assert_eq!(pool.pending_count(), 0);

    assert!(matches!(
        pool.test(&[payment(1000, 0, 0, 0)]).unwrap_err(),
        PoolError::Eval(EvalError::Dead { .. })
    ));
}

#[test]
fn pinned_transactions_track_the_pool() {
    let (ledger, pool) = setup();
    let txn = payment(1000, 0, 1000, 0);
    let txid = txn.id();
    pool.remember(group(vec![txn.clone()])).unwrap();
    assert!(ledger.verified_cache().pinned_ids().contains(&txid));

    let prev = ledger.block_hdr(0).unwrap();
    let mut block = Block::next_from(&prev);
    block.payset = vec![txn];
    let delta = ledger.commit_block(&block);
    pool.on_new_block(&block, &delta);
    assert!(!ledger.verified_cache().pinned_ids().contains(&txid));
}

#[test]
fn lookup_finds_pending_transactions() {
    let (_ledger, pool) = setup();
    let txn = payment(1000, 0, 1000, 0);
    let txid = txn.id();
    pool.remember(group(vec![txn.clone()])).unwrap();

    let (found, reason) = pool.lookup(&txid).unwrap();
    assert_eq!(found, txn);
    assert!(reason.is_empty());
    assert!(pool.lookup(&payment(1000, 0, 1000, 0).id()).is_none());
}

#[test]
fn local_groups_update_latest_local_across_recompute() {
    let (ledger, pool) = setup();
    pool.remember(group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    pool.remember(local_group(vec![payment(1000, 0, 1000, 0)])).unwrap();
    let (_, latest_local) = pool.pending_tx_groups();
    assert_eq!(latest_local, 2);

    // both groups survive the recompute; the marker must survive with them
    let (block, delta) = ledger.commit_empty_block();
    pool.on_new_block(&block, &delta);
    let (groups, latest_local) = pool.pending_tx_groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(latest_local, 2);
}
