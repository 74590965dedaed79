// Copyright (c) 2024 Botho Foundation

//! Process-wide cache of ephemeral keys we have proposed.
//!
//! The cache maps onion key hashes to the secret half of keypairs the
//! local validator generated but has not yet seen confirmed in a block.
//! It is owned by the node supervisor and cloned into the challenge
//! manager, so a manager restart re-acquires the same table instead of
//! losing pending keys. There is no persistence: keys lost to a cold
//! start can simply be regenerated.
//!
//! Reads are shared; the challenge manager is the only writer.

use dashmap::DashMap;
use std::sync::Arc;

use bth_poc_types::{OnionKeyHash, PocKeypair};

#[derive(Clone, Debug, PartialEq)]
pub struct KeyCacheEntry {
    /// Height at which the key batch was generated.
    pub received_height: u64,
    pub keypair: PocKeypair,
}

/// Shared handle to the key table. Cheap to clone.
#[derive(Clone, Default)]
pub struct KeyCache {
    inner: Arc<DashMap<OnionKeyHash, KeyCacheEntry>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key. Idempotent; a re-insert under the same hash wins.
    pub fn cache(&self, hash: OnionKeyHash, received_height: u64, keypair: PocKeypair) {
        self.inner.insert(
            hash,
            KeyCacheEntry {
                received_height,
                keypair,
            },
        );
    }

    pub fn lookup(&self, hash: &OnionKeyHash) -> Option<KeyCacheEntry> {
        self.inner.get(hash).map(|e| e.value().clone())
    }

    /// Snapshot of all entries, for garbage collection scans.
    pub fn entries(&self) -> Vec<(OnionKeyHash, KeyCacheEntry)> {
        self.inner
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn delete(&self, hash: &OnionKeyHash) {
        self.inner.remove(hash);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
