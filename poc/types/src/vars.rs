// Copyright (c) 2024 Botho Foundation

//! Chain variables consumed by the challenger.
//!
//! All fields are optional: a variable that has never been activated on
//! chain is simply absent from the snapshot. Accessors apply the
//! documented defaults; the two filter variables deliberately have none,
//! because an unset value disables the address-hash filter outright.

use serde::{Deserialize, Serialize};

/// Typed view of the chain-variable snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainVars {
    pub poc_version: Option<u64>,
    pub poc_challenge_interval: Option<u64>,
    pub poc_addr_hash_byte_count: Option<usize>,
    pub poc_target_pool_size: Option<usize>,
    pub poc_target_hex_parent_res: Option<u8>,
    pub poc_v5_target_prob_randomness_wt: Option<f64>,
    pub poc_witness_consideration_limit: Option<usize>,
    pub poc_per_hop_max_witnesses: Option<usize>,
    pub poc_activity_filter_enabled: Option<bool>,
    pub hip17_interactivity_blocks: Option<u64>,
}

impl ChainVars {
    pub fn poc_version(&self) -> u64 {
        self.poc_version.unwrap_or(0)
    }

    /// Epoch length for the address-hash filter. `None` disables it.
    pub fn challenge_interval(&self) -> Option<u64> {
        self.poc_challenge_interval
    }

    /// Address-hash width in bytes. `None` disables the filter.
    pub fn addr_hash_byte_count(&self) -> Option<usize> {
        self.poc_addr_hash_byte_count
    }

    /// v6 hex sample size; also bounds zone reselection attempts.
    pub fn target_pool_size(&self) -> usize {
        self.poc_target_pool_size.unwrap_or(10)
    }

    /// H3 parent resolution the ledger's targeting hex index is keyed at.
    pub fn target_hex_parent_res(&self) -> u8 {
        self.poc_target_hex_parent_res.unwrap_or(5)
    }

    /// Identical weight assigned to every surviving target candidate.
    pub fn target_prob_randomness_wt(&self) -> f64 {
        self.poc_v5_target_prob_randomness_wt.unwrap_or(1.0)
    }

    /// Optional bound on the candidate set considered per zone.
    pub fn witness_consideration_limit(&self) -> Option<usize> {
        self.poc_witness_consideration_limit
    }

    pub fn per_hop_max_witnesses(&self) -> usize {
        self.poc_per_hop_max_witnesses.unwrap_or(5)
    }

    pub fn activity_filter_enabled(&self) -> bool {
        self.poc_activity_filter_enabled.unwrap_or(false)
    }

    /// Gateways whose last challenge is further back than this are
    /// considered inactive when the activity filter is on.
    pub fn interactivity_blocks(&self) -> u64 {
        self.hip17_interactivity_blocks.unwrap_or(3600)
    }
}
