// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use meridian_types::transaction::{SignedTransaction, TxId};
use std::collections::{BTreeMap, HashMap};

struct StatusEntry {
    txn: SignedTransaction,
    reason: String,
    seq: u64,
}

/// Bounded record of why transactions were last evicted from the pool, so
/// `lookup` can answer for transactions that are no longer pending. Oldest
/// entries are evicted once the cache is at capacity.
pub(crate) struct StatusCache {
    capacity: usize,
    seq: u64,
    data: HashMap<TxId, StatusEntry>,
    order: BTreeMap<u64, TxId>,
}

impl StatusCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seq: 0,
            data: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub(crate) fn put(&mut self, txn: SignedTransaction, reason: String) {
        let txid = txn.id();

        // refresh an existing entry, or make room for a new one
        match self.data.get(&txid) {
            Some(entry) => {
                self.order.remove(&entry.seq);
            }
            None => {
                if self.data.len() >= self.capacity {
                    let oldest = self.order.keys().next().cloned();
                    if let Some(seq) = oldest {
                        if let Some(evicted) = self.order.remove(&seq) {
                            self.data.remove(&evicted);
                        }
                    }
                }
            }
        }

        self.seq += 1;
        self.order.insert(self.seq, txid);
        self.data.insert(
            txid,
            StatusEntry {
                txn,
                reason,
                seq: self.seq,
            },
        );
    }

    pub(crate) fn check(&self, txid: &TxId) -> Option<(SignedTransaction, String)> {
        self.data
            .get(txid)
            .map(|entry| (entry.txn.clone(), entry.reason.clone()))
    }

    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.order.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }
}
