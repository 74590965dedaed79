// Copyright (c) 2024 Botho Foundation

//! v6 zone selection: a bounded random hex pool instead of the full
//! enumeration, plus garbage collection of the hex targeting index as
//! stale gateways are discovered during candidate filtering.

use rand::Rng;
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use bth_poc_types::GatewayPubkey;

use crate::error::ChallengeError;
use crate::ledger::{HexId, Ledger};

/// Draw `poc_target_pool_size` hexes from the ordered targeting list at
/// the `poc_target_hex_parent_res` resolution, deduplicated by sort. The
/// draw threads `ZoneRand`, so the pool is reproducible from public
/// entropy.
pub(super) fn zone_pool(
    ledger: &dyn Ledger,
    vars: &bth_poc_types::ChainVars,
    zone_rand: &mut ChaCha20Rng,
) -> Result<Vec<(HexId, u64)>, ChallengeError> {
    let all = ledger.targeting_hexes(vars.target_hex_parent_res())?;
    if all.is_empty() {
        return Ok(all);
    }

    let pool_size = vars.target_pool_size().max(1);
    let mut pool: Vec<(HexId, u64)> = (0..pool_size)
        .map(|_| all[zone_rand.gen_range(0..all.len())])
        .collect();
    pool.sort_by_key(|(hex, _)| *hex);
    pool.dedup_by_key(|(hex, _)| *hex);
    Ok(pool)
}

/// Remove gateways that failed candidate filtering from the hex index,
/// batched through a scratch context and committed atomically.
pub(super) fn gc_hex_index(
    ledger: &dyn Ledger,
    hex: HexId,
    removed: &[GatewayPubkey],
) -> Result<(), ChallengeError> {
    if removed.is_empty() {
        return Ok(());
    }
    let mut scratch = ledger.scratch()?;
    for gateway in removed {
        scratch.remove_gateway_from_hex(hex, gateway)?;
    }
    scratch.commit()?;
    debug!(hex, count = removed.len(), "pruned stale gateways from hex index");
    Ok(())
}
