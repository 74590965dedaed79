// Copyright (c) 2024 Botho Foundation

//! The durable record of a challenge this validator owns.

use libp2p_identity::PeerId;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::hashes::{BlockHash, GatewayPubkey, OnionKeyHash, PacketHash};
use crate::keys::PocKeypair;
use crate::report::{Receipt, Witness};

/// Schema version written ahead of every serialized record.
pub const LOCAL_POC_VERSION: u8 = 1;

/// The libp2p identity of the peer that relayed a report to us.
///
/// Serialized as the peer id's canonical multihash bytes; `PeerId` itself
/// does not implement serde.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReporterId(pub PeerId);

impl From<PeerId> for ReporterId {
    fn from(peer: PeerId) -> Self {
        Self(peer)
    }
}

impl fmt::Debug for ReporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReporterId({})", self.0)
    }
}

impl fmt::Display for ReporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for ReporterId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0.to_bytes())
    }
}

impl<'de> Deserialize<'de> for ReporterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        let peer = PeerId::from_bytes(&bytes)
            .map_err(|e| D::Error::custom(format!("bad peer id bytes: {e}")))?;
        Ok(Self(peer))
    }
}

/// An in-flight challenge owned by the local validator.
///
/// Created by the derivation task when target selection succeeds, mutated
/// only by the challenge manager as reports arrive, deleted after the
/// receipts transaction is assembled at TTL expiry.
///
/// The hop lists are parallel: `challengees[i]` is hop i's gateway and
/// layer data, `packet_hashes[i]` is the ciphertext hash a witness of hop
/// i is expected to report, and `challengees[0]` is the target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalPoc {
    pub onion_key_hash: OnionKeyHash,
    pub block_hash: BlockHash,
    pub start_height: u64,
    pub keys: PocKeypair,
    /// Canonical keypair encoding, published in the final transaction.
    pub secret: Vec<u8>,
    pub target: GatewayPubkey,
    pub onion: Vec<u8>,
    pub challengees: Vec<(GatewayPubkey, Vec<u8>)>,
    pub packet_hashes: Vec<(GatewayPubkey, PacketHash)>,
    pub receipts: BTreeMap<GatewayPubkey, (ReporterId, Receipt)>,
    pub witnesses: BTreeMap<PacketHash, Vec<(ReporterId, Witness)>>,
}

impl LocalPoc {
    /// Number of hops in the challenge path.
    pub fn path_len(&self) -> usize {
        self.challengees.len()
    }

    /// Hop index of the given gateway, if it is a challengee.
    pub fn hop_of_gateway(&self, gateway: &GatewayPubkey) -> Option<usize> {
        self.challengees.iter().position(|(g, _)| g == gateway)
    }

    /// Hop index matching a witness's packet hash.
    pub fn hop_of_packet_hash(&self, hash: &PacketHash) -> Option<usize> {
        self.packet_hashes.iter().position(|(_, h)| h == hash)
    }

    pub fn receipt_for(&self, gateway: &GatewayPubkey) -> Option<&Receipt> {
        self.receipts.get(gateway).map(|(_, r)| r)
    }

    pub fn witnesses_for(&self, hash: &PacketHash) -> &[(ReporterId, Witness)] {
        self.witnesses.get(hash).map(Vec::as_slice).unwrap_or(&[])
    }
}
