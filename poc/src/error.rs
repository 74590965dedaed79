use thiserror::Error;

use crate::ledger::LedgerError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ChallengeError {
    /// `check_target` was asked about a block we cannot resolve.
    #[error("block not found")]
    BlockNotFound,

    /// `check_target` was asked about a challenge we do not hold.
    #[error("invalid or expired poc")]
    InvalidOrExpiredPoc,

    /// The caller's block hash disagrees with the stored challenge.
    #[error("mismatched block hash")]
    MismatchedBlockHash,

    /// Zone retries exhausted without a viable target candidate.
    #[error("no gateways found")]
    NoGatewaysFound,

    /// The ledger has no populated hexes to select a zone from.
    #[error("empty hex list")]
    EmptyHexList,

    /// Every candidate zone carries zero weight.
    #[error("zone weight zero")]
    ZoneWeightZero,

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("onion build failed: {0}")]
    Onion(String),

    #[error("path build failed: {0}")]
    Path(String),

    #[error("transaction submit failed: {0}")]
    Txn(String),

    /// The manager actor is gone; its command channel is closed.
    #[error("challenge manager unavailable")]
    Unavailable,
}
