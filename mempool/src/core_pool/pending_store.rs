// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use meridian_types::{
    transaction::{SignedTransaction, TxId},
    txgroup::{SignedTxGroup, INVALID_GROUP_COUNTER},
};
use std::{collections::HashMap, sync::Arc};

/// The committed layer of the pool: the ordered queue of transaction groups
/// slated for the next block, plus an id index for O(1) lookup.
///
/// The group sequence lives behind an `Arc` that is swapped wholesale on
/// every commit. A reader that cloned the handle keeps a stable, fully
/// consistent view without holding any pool lock, no matter how many commits
/// or promotions happen afterwards.
pub(crate) struct PendingStore {
    pub(crate) pending_groups: Arc<Vec<SignedTxGroup>>,
    pub(crate) pending_txids: HashMap<TxId, SignedTransaction>,
    /// The last group counter handed out. Survives `reset()` so counters
    /// stay strictly monotonic for the life of the pool.
    pub(crate) pending_counter: u64,
    /// Largest group counter belonging to a locally-originated group still
    /// pending, or `INVALID_GROUP_COUNTER` if none.
    pub(crate) pending_latest_local: u64,
}

impl PendingStore {
    pub(crate) fn new() -> Self {
        Self {
            pending_groups: Arc::new(Vec::new()),
            pending_txids: HashMap::new(),
            pending_counter: INVALID_GROUP_COUNTER,
            pending_latest_local: INVALID_GROUP_COUNTER,
        }
    }

    /// Number of transactions across all pending groups.
    pub(crate) fn txn_count(&self) -> usize {
        self.pending_groups
            .iter()
            .map(|group| group.transactions.len())
            .sum()
    }

    /// Clears the committed layer. The counter is deliberately preserved.
    pub(crate) fn clear(&mut self) {
        self.pending_groups = Arc::new(Vec::new());
        self.pending_txids.clear();
        self.pending_latest_local = INVALID_GROUP_COUNTER;
    }
}

/// The staging layer: groups accepted by an in-progress ingest batch, not
/// yet visible to readers. Promoted into the `PendingStore` on commit,
/// discarded wholesale if the batch fails.
pub(crate) struct RememberedGroups {
    pub(crate) groups: Vec<SignedTxGroup>,
    pub(crate) txids: HashMap<TxId, SignedTransaction>,
    pub(crate) latest_local: u64,
}

impl RememberedGroups {
    pub(crate) fn new() -> Self {
        Self {
            groups: Vec::new(),
            txids: HashMap::new(),
            latest_local: INVALID_GROUP_COUNTER,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.groups.clear();
        self.txids.clear();
        self.latest_local = INVALID_GROUP_COUNTER;
    }
}
