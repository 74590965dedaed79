// Copyright (c) 2024 Botho Foundation

//! Read and write surface the challenger needs from the node's ledger.
//!
//! The ledger itself lives outside this crate; these traits are the seam.
//! Reads run against a versioned snapshot that stays immutable for the
//! duration of a derivation call. Writes go through either the direct
//! public-PoC methods (full overwrite by key, so block re-processing is
//! idempotent) or a scratch context that batches hex-index removals and
//! commits them atomically.

use thiserror::Error;

use bth_poc_types::{ChainVars, GatewayPubkey, OnionKeyHash, PublicPoc};

/// An H3 cell identifier at the targeting resolution.
pub type HexId = u64;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found")]
    NotFound,

    #[error("ledger backend error: {0}")]
    Backend(String),
}

/// Operating mode of a gateway, from its on-chain registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayMode {
    Full,
    Light,
    /// Data-only gateways forward packets but cannot be challenged.
    DataOnly,
}

impl GatewayMode {
    /// Whether this mode carries the challengee capability.
    pub fn is_challengeable(&self) -> bool {
        matches!(self, GatewayMode::Full | GatewayMode::Light)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayInfo {
    pub mode: GatewayMode,
    /// H3 index of the asserted location, if one has been asserted.
    pub location: Option<u64>,
    /// Height of the last challenge this gateway was targeted in.
    pub last_poc_challenge: Option<u64>,
}

/// Read/write surface of the node ledger used by the challenger.
pub trait Ledger: Send + Sync {
    fn current_height(&self) -> Result<u64, LedgerError>;

    /// Total registered gateway count; sizes the address-hash bloom.
    fn gateway_count(&self) -> Result<usize, LedgerError>;

    /// Populated targeting hexes at the given H3 parent resolution, with
    /// their gateway counts, ordered by hex id ascending. Derivation
    /// relies on this ordering; the resolution comes from
    /// `poc_target_hex_parent_res`.
    fn targeting_hexes(&self, parent_res: u8) -> Result<Vec<(HexId, u64)>, LedgerError>;

    /// Gateways located in the given hex, in ledger order.
    fn gateways_in_hex(&self, hex: HexId) -> Result<Vec<GatewayPubkey>, LedgerError>;

    fn find_gateway(&self, key: &GatewayPubkey) -> Result<Option<GatewayInfo>, LedgerError>;

    /// The chain-variable snapshot at the current height.
    fn vars(&self) -> Result<ChainVars, LedgerError>;

    /// Record a proposed challenge. Full overwrite by onion key hash.
    fn save_public_poc(&self, poc: &PublicPoc) -> Result<(), LedgerError>;

    fn delete_public_poc(&self, hash: &OnionKeyHash) -> Result<(), LedgerError>;

    fn active_public_pocs(&self) -> Result<Vec<PublicPoc>, LedgerError>;

    /// Open a scratch context for batched hex-index mutations.
    fn scratch(&self) -> Result<Box<dyn LedgerScratch>, LedgerError>;
}

/// Batched ledger mutations, applied atomically on commit and discarded
/// on drop.
pub trait LedgerScratch: Send {
    /// Queue removal of a gateway from the hex targeting index.
    fn remove_gateway_from_hex(
        &mut self,
        hex: HexId,
        gateway: &GatewayPubkey,
    ) -> Result<(), LedgerError>;

    fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
