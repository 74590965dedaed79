// Copyright (c) 2024 Botho Foundation

//! Shared data and wire types for the proof-of-coverage challenger.
//!
//! Everything that crosses a boundary lives here: the ephemeral challenge
//! keypair and its hash identifiers, the receipt/witness reports gateways
//! send back, the receipts transaction the challenger eventually submits,
//! the decoded block view, and the chain variables the subsystem consumes.

pub mod block;
pub mod hashes;
pub mod keys;
pub mod local;
pub mod report;
pub mod txn;
pub mod vars;

pub use block::Block;
pub use hashes::{BlockHash, GatewayPubkey, OnionKeyHash, PacketHash};
pub use keys::PocKeypair;
pub use local::{LocalPoc, ReporterId, LOCAL_POC_VERSION};
pub use report::{Origin, Receipt, Witness};
pub use txn::{PocPathElement, PocReceiptsTxnV1, PublicPoc};
pub use vars::ChainVars;
