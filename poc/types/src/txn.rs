// Copyright (c) 2024 Botho Foundation

//! The PoC receipts transaction and the public PoC ledger record.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::hashes::{BlockHash, GatewayPubkey, OnionKeyHash};
use crate::report::{Receipt, Witness};

/// One hop of a submitted challenge path: the challengee, its receipt if
/// one arrived in time, and the witnesses heard for its transmission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocPathElement {
    pub challengee: GatewayPubkey,
    pub receipt: Option<Receipt>,
    pub witnesses: Vec<Witness>,
}

/// The v1 receipts transaction a challenger submits when a challenge's
/// collection window closes.
///
/// `secret` is the canonical encoding of the ephemeral keypair; publishing
/// it lets every validator re-derive the target and path and check the
/// attestations against them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocReceiptsTxnV1 {
    pub challenger: GatewayPubkey,
    pub secret: Vec<u8>,
    pub onion_key_hash: OnionKeyHash,
    pub block_hash: BlockHash,
    /// Path elements in challenge order: element 0 is the target.
    pub path: Vec<PocPathElement>,
    pub fee: u64,
    pub signature: Vec<u8>,
}

impl PocReceiptsTxnV1 {
    pub fn signing_bytes(&self) -> Vec<u8> {
        // bincode over a signature-less copy keeps the encoding canonical
        // without a hand-maintained field list.
        let unsigned = Self {
            signature: Vec::new(),
            ..self.clone()
        };
        bincode::serialize(&unsigned).expect("serializing an owned txn cannot fail")
    }

    pub fn verify_signature(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(self.challenger.as_bytes()) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        key.verify(&self.signing_bytes(), &signature).is_ok()
    }
}

/// The ledger's public record of a proposed challenge. Written for every
/// ephemeral key seen in a block regardless of challenger, so any
/// validator can verify a later receipts transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPoc {
    pub onion_key_hash: OnionKeyHash,
    pub challenger: GatewayPubkey,
    pub block_hash: BlockHash,
    pub start_height: u64,
}
