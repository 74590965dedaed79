// Copyright (c) 2024 Botho Foundation

//! Ephemeral challenge keypairs.
//!
//! A challenge keypair is a Ristretto scalar and its public point. The
//! SHA-256 of the compressed public point is the onion key hash that
//! identifies the challenge from key proposal through final submission.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::hashes::OnionKeyHash;

/// Length of the canonical keypair encoding: secret scalar followed by the
/// compressed public point.
pub const KEYPAIR_BYTES: usize = 64;

/// An ephemeral proof-of-coverage keypair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocKeypair {
    secret: Scalar,
    public: RistrettoPoint,
}

impl PocKeypair {
    /// Generate a fresh keypair.
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        let secret = Scalar::random(rng);
        let public = RistrettoPoint::mul_base(&secret);
        Self { secret, public }
    }

    /// The secret scalar bytes. Seeds the target-selection RNG so that only
    /// the key owner can reproduce the within-zone pick.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Compressed public point bytes (the canonical public encoding).
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.compress().to_bytes()
    }

    /// SHA-256 of the canonical public encoding.
    pub fn onion_key_hash(&self) -> OnionKeyHash {
        let digest: [u8; 32] = Sha256::digest(self.public_bytes()).into();
        OnionKeyHash(digest)
    }

    /// Canonical 64-byte encoding: secret scalar then compressed public.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(KEYPAIR_BYTES);
        out.extend_from_slice(&self.secret.to_bytes());
        out.extend_from_slice(&self.public_bytes());
        out
    }

    /// Decode the canonical encoding. Returns `None` on length mismatch,
    /// a non-canonical scalar, or a point that fails to decompress.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != KEYPAIR_BYTES {
            return None;
        }
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&bytes[..32]);
        let secret: Option<Scalar> = Scalar::from_canonical_bytes(secret_bytes).into();
        secret_bytes.zeroize();
        let secret = secret?;
        let public = CompressedRistretto::from_slice(&bytes[32..])
            .ok()?
            .decompress()?;
        Some(Self { secret, public })
    }
}

impl Drop for PocKeypair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}
