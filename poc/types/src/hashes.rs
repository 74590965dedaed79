// Copyright (c) 2024 Botho Foundation

//! Fixed-width hash and key newtypes.
//!
//! All four are 32-byte values with lexicographic ordering; the ordering is
//! load-bearing for challenge derivation, which sorts candidate gateways by
//! pubkey bytes before every deterministic draw.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! bytes32_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Truncated hex keeps log lines readable
                write!(f, "{}({}..)", stringify!($name), &hex::encode(self.0)[..8])
            }
        }
    };
}

bytes32_newtype! {
    /// SHA-256 of an ephemeral challenge public key; the primary identifier
    /// of a challenge everywhere in the subsystem.
    OnionKeyHash
}

bytes32_newtype! {
    /// Hash of a block header.
    BlockHash
}

bytes32_newtype! {
    /// SHA-256 of one onion layer's ciphertext; what a downstream witness
    /// is expected to report for the corresponding hop.
    PacketHash
}

bytes32_newtype! {
    /// A gateway's ed25519 public key bytes. Also used for the challenger
    /// (validator) identity in public PoC records and transactions.
    GatewayPubkey
}
