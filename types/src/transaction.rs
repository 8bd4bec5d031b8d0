// Copyright (c) The Meridian Core Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::Round;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A Meridian account address.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Address(pub [u8; 32]);

/// The well-known sender of compact certificate transactions. Compact
/// certificates are produced by the protocol itself rather than by a user
/// account; the sender is a fixed, unspendable address.
pub const COMPACT_CERT_SENDER: Address = Address([0xcc; 32]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Content-addressed identifier of an individual transaction.
#[derive(
    Clone, Copy, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct TxId(pub [u8; 32]);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}..)", hex::encode(&self.0[..4]))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TxType {
    Payment,
    KeyRegistration,
    CompactCert,
}

/// The body of a transaction, covered by the signature.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Transaction {
    pub sender: Address,
    pub tx_type: TxType,
    /// Fee in the smallest currency unit.
    pub fee: u64,
    /// The first round at which this transaction may be committed.
    pub first_valid: Round,
    /// The last round at which this transaction may be committed.
    pub last_valid: Round,
    /// Arbitrary user data carried with the transaction.
    pub note: Vec<u8>,
    pub receiver: Address,
    pub amount: u64,
}

/// A transaction together with its signature. Signature verification happens
/// upstream of the pool; the signature is carried opaquely here.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignedTransaction {
    pub txn: Transaction,
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// The content-addressed id of this transaction, a hash over the
    /// canonical encoding of the transaction body.
    pub fn id(&self) -> TxId {
        let encoded =
            bcs::to_bytes(&self.txn).expect("transaction serialization cannot fail");
        TxId(*blake3::hash(&encoded).as_bytes())
    }

    /// The canonical encoded size of the signed transaction, in bytes. Fee
    /// thresholds and block byte budgets are denominated in this size.
    pub fn encoded_length(&self) -> usize {
        bcs::serialized_size(self).expect("transaction serialization cannot fail")
    }
}
