// Copyright (c) 2024 Botho Foundation

//! Onion construction, path building, and transaction submission seams,
//! plus the secret-hash fragment derivation shared with verifiers.

use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use bth_poc_types::{BlockHash, ChainVars, GatewayPubkey, PocKeypair, PocReceiptsTxnV1};

use crate::error::ChallengeError;
use crate::ledger::Ledger;

/// Width in bytes of one secret-hash fragment.
pub const FRAGMENT_BYTES: usize = 2;

/// Builds the layered onion packet for a challenge.
pub trait OnionBuilder: Send + Sync {
    /// Build the onion for the given hops.
    ///
    /// Returns the ciphertext delivered to the target and the cleartext
    /// layer list. The layer list carries one entry per hop plus the
    /// outermost packet at index 0, so `layers[i + 1]` is what hop i
    /// retransmits and what its witnesses hash.
    fn build(
        &self,
        keys: &PocKeypair,
        iv: u16,
        hops: &[(GatewayPubkey, Vec<u8>)],
        block_hash: &BlockHash,
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>), ChallengeError>;
}

/// Builds the gateway path outward from a chosen target.
pub trait PathBuilder: Send + Sync {
    /// Returns the ordered hop list; `out[0]` must be `target`.
    fn build(
        &self,
        target: &GatewayPubkey,
        rng: &mut ChaCha20Rng,
        ledger: &dyn Ledger,
        block_time: u64,
        vars: &ChainVars,
    ) -> Result<Vec<GatewayPubkey>, ChallengeError>;
}

/// The validator's transaction signing identity.
pub trait TxnSigner: Send + Sync {
    fn pubkey(&self) -> GatewayPubkey;

    fn sign(&self, msg: &[u8]) -> Vec<u8>;
}

/// Hands finished transactions to the node's submission pipeline.
pub trait TxnSubmitter: Send + Sync {
    fn submit(&self, txn: PocReceiptsTxnV1) -> Result<(), ChallengeError>;
}

/// Derive `count` secret-hash fragments from challenge entropy.
///
/// The chain is `h0 = sha256(entropy)`, `h(i+1) = sha256(h(i))`; fragment
/// i is the first two bytes of `h(i)`. Fragment 0 read little-endian is
/// the onion IV, the rest are per-hop layer data. Anyone holding the
/// entropy can reproduce the sequence, which is what lets verifiers check
/// receipt layer data against the published secret.
pub fn secret_hash_fragments(entropy: &[u8], count: usize) -> Vec<[u8; FRAGMENT_BYTES]> {
    let mut fragments = Vec::with_capacity(count);
    let mut digest: [u8; 32] = Sha256::digest(entropy).into();
    for _ in 0..count {
        fragments.push([digest[0], digest[1]]);
        digest = Sha256::digest(digest).into();
    }
    fragments
}

/// The onion IV encoded in fragment 0.
pub fn onion_iv(fragment: [u8; FRAGMENT_BYTES]) -> u16 {
    u16::from_le_bytes(fragment)
}
