// Copyright (c) 2024 Botho Foundation

//! Block event subscription and chain read access.

use bth_poc_types::{Block, BlockHash};

use crate::ledger::LedgerError;

/// One block notification from the node's event bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEvent {
    pub hash: BlockHash,
    /// Set while the node is catching up; the challenger ignores these.
    pub sync: bool,
}

/// Read access to decoded blocks.
///
/// `is_ready` gates bootstrap: until the chain is loaded the manager
/// idles and retries rather than erroring.
pub trait ChainReader: Send + Sync {
    fn is_ready(&self) -> bool;

    fn current_height(&self) -> Result<u64, LedgerError>;

    fn get_block(&self, height: u64) -> Result<Block, LedgerError>;

    fn get_block_by_hash(&self, hash: &BlockHash) -> Result<Block, LedgerError>;
}
