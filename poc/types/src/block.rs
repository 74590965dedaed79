// Copyright (c) 2024 Botho Foundation

//! Decoded block view.
//!
//! The challenger never touches raw block bytes; the node's codec layer
//! hands it this view, carrying exactly the fields the subsystem reads:
//! the header identity, the block's ephemeral PoC key list, and the
//! receipts transactions the address-hash filter folds over.

use serde::{Deserialize, Serialize};

use crate::hashes::{BlockHash, GatewayPubkey, OnionKeyHash};
use crate::txn::PocReceiptsTxnV1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: BlockHash,
    /// Unix seconds from the block header.
    pub time: u64,
    /// `(challenger, onion_key_hash)` for every ephemeral key the block
    /// confirmed, across all challengers.
    pub poc_keys: Vec<(GatewayPubkey, OnionKeyHash)>,
    pub poc_receipts: Vec<PocReceiptsTxnV1>,
}
