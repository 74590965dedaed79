// Copyright (c) 2024 Botho Foundation

//! Receipt and witness reports.
//!
//! A receipt is the attestation a challengee produces when it decrypts its
//! onion layer; a witness is a third-party gateway's attestation that it
//! heard a hop's transmission. Both are signed by the reporting gateway
//! over a canonical byte encoding that excludes the signature itself and
//! any field stamped on after the fact.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::hashes::{GatewayPubkey, PacketHash};

/// How a challengee received its onion layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// First hop: delivered directly over p2p by the challenger.
    P2p,
    /// Later hops: heard over the radio from the previous hop.
    Radio,
}

/// A challengee's attestation for one hop of a challenge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// The reporting gateway (must be the challengee at some hop).
    pub gateway: GatewayPubkey,
    /// Unix nanoseconds at which the layer was decrypted.
    pub timestamp: u64,
    /// Received signal strength, dBm.
    pub signal: i32,
    /// The decrypted layer data; must match what derivation assigned to
    /// this gateway's hop.
    pub data: Vec<u8>,
    pub origin: Origin,
    pub signature: Vec<u8>,
    /// Address hash stamped by the challenger's filter at ingestion time.
    /// Never part of the signed payload.
    pub addr_hash: Option<Vec<u8>>,
}

impl Receipt {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.gateway.as_ref());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.signal.to_le_bytes());
        bytes.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.data);
        bytes.push(match self.origin {
            Origin::P2p => 0,
            Origin::Radio => 1,
        });
        bytes
    }

    /// Check the gateway's signature over the canonical payload.
    pub fn verify_signature(&self) -> bool {
        verify(&self.gateway, &self.signing_bytes(), &self.signature)
    }
}

/// A third-party gateway's attestation that it heard a hop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    /// The reporting gateway.
    pub gateway: GatewayPubkey,
    /// Unix nanoseconds at which the packet was heard.
    pub timestamp: u64,
    /// Received signal strength, dBm.
    pub signal: i32,
    /// SHA-256 of the heard ciphertext; locates the hop being witnessed.
    pub packet_hash: PacketHash,
    pub signature: Vec<u8>,
}

impl Witness {
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.gateway.as_ref());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.signal.to_le_bytes());
        bytes.extend_from_slice(self.packet_hash.as_ref());
        bytes
    }

    pub fn verify_signature(&self) -> bool {
        verify(&self.gateway, &self.signing_bytes(), &self.signature)
    }
}

fn verify(key: &GatewayPubkey, msg: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(msg, &signature).is_ok()
}
