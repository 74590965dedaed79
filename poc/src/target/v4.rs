// Copyright (c) 2024 Botho Foundation

//! v4 zone selection: enumerate every populated targeting hex.

use bth_poc_types::ChainVars;

use crate::error::ChallengeError;
use crate::ledger::{HexId, Ledger};

pub(super) fn zone_pool(
    ledger: &dyn Ledger,
    vars: &ChainVars,
) -> Result<Vec<(HexId, u64)>, ChallengeError> {
    Ok(ledger.targeting_hexes(vars.target_hex_parent_res())?)
}
