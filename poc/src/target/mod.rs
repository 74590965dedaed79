// Copyright (c) 2024 Botho Foundation

//! Deterministic target and path derivation.
//!
//! Derivation maps `(challenger, block, ephemeral keys, ledger snapshot,
//! chain vars)` to a complete challenge record. Two RNG streams drive it:
//!
//! - `ZoneRand`, seeded from `sha256(onion_key_hash || block_hash)`.
//!   Anyone holding the public entropy can replay zone selection.
//! - `TargetRand`, seeded from `sha256(secret scalar)`. The pick within a
//!   zone needs the key secret, so non-owners cannot precompute targets.
//!
//! Every draw is inverse-CDF over an explicitly ordered list; there is no
//! iteration over unordered containers anywhere on this path. For fixed
//! inputs the output is bit-identical across runs and processes.

mod v4;
mod v6;

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

use bth_poc_types::{Block, ChainVars, GatewayPubkey, LocalPoc, PacketHash, PocKeypair};

use crate::error::ChallengeError;
use crate::ledger::{HexId, Ledger};
use crate::onion::{onion_iv, secret_hash_fragments, OnionBuilder, PathBuilder};

/// Inputs to one derivation call. All references are immutable snapshots;
/// derivation tasks run off-actor against them.
pub struct DeriveContext<'a> {
    pub challenger: GatewayPubkey,
    pub keys: &'a PocKeypair,
    pub block: &'a Block,
    pub ledger: &'a dyn Ledger,
    pub vars: &'a ChainVars,
    pub path_builder: &'a dyn PathBuilder,
    pub onion_builder: &'a dyn OnionBuilder,
}

/// Derivation variant, selected by chain var.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Targeting {
    /// Enumerate every populated hex.
    V4,
    /// Sample a bounded hex pool and garbage-collect the hex index of
    /// gateways that fail candidate filtering.
    V6,
}

impl Targeting {
    pub fn from_vars(vars: &ChainVars) -> Self {
        if vars.poc_version() >= 6 {
            Targeting::V6
        } else {
            Targeting::V4
        }
    }

    /// Run the full derivation and produce the challenge record.
    pub fn derive(&self, ctx: &DeriveContext<'_>) -> Result<LocalPoc, ChallengeError> {
        let onion_key_hash = ctx.keys.onion_key_hash();

        let mut entropy = Vec::with_capacity(64);
        entropy.extend_from_slice(onion_key_hash.as_ref());
        entropy.extend_from_slice(ctx.block.hash.as_ref());

        let zone_seed: [u8; 32] = Sha256::digest(&entropy).into();
        let mut zone_rand = ChaCha20Rng::from_seed(zone_seed);

        let target_seed: [u8; 32] = Sha256::digest(ctx.keys.secret_bytes()).into();
        let mut target_rand = ChaCha20Rng::from_seed(target_seed);

        let hexes = match self {
            Targeting::V4 => v4::zone_pool(ctx.ledger, ctx.vars)?,
            Targeting::V6 => v6::zone_pool(ctx.ledger, ctx.vars, &mut zone_rand)?,
        };
        if hexes.is_empty() {
            return Err(ChallengeError::EmptyHexList);
        }

        let candidates = self.select_candidates(ctx, &hexes, &mut zone_rand)?;

        // Identical weight per survivor; ordering by pubkey makes the
        // inverse-CDF draw well-defined.
        let wt = ctx.vars.target_prob_randomness_wt();
        let weighted: Vec<(GatewayPubkey, f64)> =
            candidates.iter().map(|g| (*g, wt)).collect();
        let target = *pick_weighted(&weighted, &mut target_rand)
            .ok_or(ChallengeError::NoGatewaysFound)?;

        debug!(%onion_key_hash, target = %target, "selected challenge target");

        let path = ctx.path_builder.build(
            &target,
            &mut target_rand,
            ctx.ledger,
            ctx.block.time,
            ctx.vars,
        )?;
        if path.first() != Some(&target) {
            return Err(ChallengeError::Path(
                "path does not start at the target".into(),
            ));
        }

        let fragments = secret_hash_fragments(&entropy, path.len() + 1);
        let iv = onion_iv(fragments[0]);
        let challengees: Vec<(GatewayPubkey, Vec<u8>)> = path
            .iter()
            .zip(fragments[1..].iter())
            .map(|(gateway, fragment)| (*gateway, fragment.to_vec()))
            .collect();

        let (onion, layers) =
            ctx.onion_builder
                .build(ctx.keys, iv, &challengees, &ctx.block.hash)?;
        if layers.len() != path.len() + 1 {
            return Err(ChallengeError::Onion(format!(
                "expected {} layers, onion builder returned {}",
                path.len() + 1,
                layers.len()
            )));
        }

        // Hash at index i is what hop i's downstream witness reports; the
        // outermost layer is skipped.
        let packet_hashes: Vec<(GatewayPubkey, PacketHash)> = path
            .iter()
            .zip(layers[1..].iter())
            .map(|(gateway, layer)| {
                let digest: [u8; 32] = Sha256::digest(layer).into();
                (*gateway, PacketHash(digest))
            })
            .collect();

        Ok(LocalPoc {
            onion_key_hash,
            block_hash: ctx.block.hash,
            start_height: ctx.block.height,
            keys: ctx.keys.clone(),
            secret: ctx.keys.to_bytes(),
            target,
            onion,
            challengees,
            packet_hashes,
            receipts: BTreeMap::new(),
            witnesses: BTreeMap::new(),
        })
    }

    /// Zone selection with bounded retry: pick a hex, list and filter its
    /// gateways, and reselect (threading `ZoneRand`) while the filtered
    /// set comes up empty.
    fn select_candidates(
        &self,
        ctx: &DeriveContext<'_>,
        hexes: &[(HexId, u64)],
        zone_rand: &mut ChaCha20Rng,
    ) -> Result<Vec<GatewayPubkey>, ChallengeError> {
        let attempts = ctx.vars.target_pool_size().max(1);
        let weighted: Vec<(HexId, f64)> = hexes
            .iter()
            .map(|(hex, count)| (*hex, *count as f64))
            .collect();

        for _ in 0..attempts {
            let hex = *pick_weighted(&weighted, zone_rand)
                .ok_or(ChallengeError::ZoneWeightZero)?;

            let mut candidates = ctx.ledger.gateways_in_hex(hex)?;
            candidates.sort();

            if let Some(limit) = ctx.vars.witness_consideration_limit() {
                candidates = deterministic_subset(limit, zone_rand, candidates);
            }

            let (kept, removed) = filter_candidates(ctx, &candidates)?;

            if let Targeting::V6 = self {
                v6::gc_hex_index(ctx.ledger, hex, &removed)?;
            }

            if !kept.is_empty() {
                return Ok(kept);
            }
            debug!(hex, "zone produced no viable candidates, reselecting");
        }

        Err(ChallengeError::NoGatewaysFound)
    }
}

/// Candidate filtering: drop the challenger itself, gateways without the
/// challengee capability, and (when the activity filter is on) gateways
/// that have not been challenged recently enough. Returns `(kept,
/// removed)`; `removed` excludes the challenger, which is merely
/// ineligible here, not stale.
fn filter_candidates(
    ctx: &DeriveContext<'_>,
    candidates: &[GatewayPubkey],
) -> Result<(Vec<GatewayPubkey>, Vec<GatewayPubkey>), ChallengeError> {
    let mut kept = Vec::new();
    let mut removed = Vec::new();

    for gateway in candidates {
        if *gateway == ctx.challenger {
            continue;
        }
        let Some(info) = ctx.ledger.find_gateway(gateway)? else {
            removed.push(*gateway);
            continue;
        };
        if !info.mode.is_challengeable() {
            removed.push(*gateway);
            continue;
        }
        if ctx.vars.activity_filter_enabled() {
            let active = info.last_poc_challenge.is_some_and(|last| {
                ctx.block.height.saturating_sub(last) <= ctx.vars.interactivity_blocks()
            });
            if !active {
                removed.push(*gateway);
                continue;
            }
        }
        kept.push(*gateway);
    }

    Ok((kept, removed))
}

/// Inverse-CDF selection: a uniform draw against cumulative weights.
/// `None` when the list is empty or carries no weight.
fn pick_weighted<'a, T>(items: &'a [(T, f64)], rng: &mut ChaCha20Rng) -> Option<&'a T> {
    let total: f64 = items.iter().map(|(_, w)| *w).sum();
    if !(total > 0.0) {
        return None;
    }
    let roll = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (item, weight) in items {
        cumulative += *weight;
        if cumulative > roll {
            return Some(item);
        }
    }
    // Accumulation error can leave the roll at the far edge; the last
    // weighted item owns that edge.
    items.iter().rev().find(|(_, w)| *w > 0.0).map(|(i, _)| i)
}

/// Bound a candidate list to `limit` entries with a deterministic draw,
/// keeping the result ordered by pubkey.
fn deterministic_subset(
    limit: usize,
    rng: &mut ChaCha20Rng,
    mut candidates: Vec<GatewayPubkey>,
) -> Vec<GatewayPubkey> {
    if candidates.len() <= limit {
        return candidates;
    }
    let mut picked = Vec::with_capacity(limit);
    for _ in 0..limit {
        let idx = rng.gen_range(0..candidates.len());
        picked.push(candidates.swap_remove(idx));
    }
    picked.sort();
    picked
}
