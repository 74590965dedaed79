// Copyright (c) 2024 Botho Foundation

//! Proof-of-coverage challenge manager.
//!
//! This crate owns the lifecycle of PoC challenges for which the local
//! validator is the challenger: matching block-confirmed ephemeral keys
//! against the process-wide key cache, deriving target and path
//! deterministically from public entropy plus the key secret, collecting
//! receipts and witnesses from gateways, and submitting the signed
//! receipts transaction when a challenge's collection window closes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      ChallengeManager                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌────────────┐  ┌─────────────────────────┐ │
//! │  │ManagerHandle│  │ PocStore   │  │ AddrHashFilter          │ │
//! │  │ (commands)  │  │ (LMDB)     │  │ (bloom, epoch-scoped)   │ │
//! │  └─────────────┘  └────────────┘  └─────────────────────────┘ │
//! │  ┌─────────────┐  ┌────────────────────────────────────────┐  │
//! │  │ KeyCache    │  │ Targeting (v4 / v6 derivation tasks)   │  │
//! │  └─────────────┘  └────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The manager is a single actor task: all store and filter mutation is
//! serialized through its command/event loop. Only target derivation runs
//! off-actor, on spawned tasks holding immutable snapshots.

pub mod addr_filter;
pub mod chain;
pub mod error;
pub mod key_cache;
pub mod ledger;
pub mod manager;
pub mod onion;
pub mod store;
pub mod target;

pub use addr_filter::{AddrCheck, AddrHashFilter};
pub use chain::{BlockEvent, ChainReader};
pub use error::ChallengeError;
pub use key_cache::{KeyCache, KeyCacheEntry};
pub use ledger::{GatewayInfo, GatewayMode, HexId, Ledger, LedgerError, LedgerScratch};
pub use manager::{ChallengeManager, ManagerConfig, ManagerHandle};
pub use onion::{OnionBuilder, PathBuilder, TxnSigner, TxnSubmitter};
pub use store::{PocStore, StoreError};
pub use target::{DeriveContext, Targeting};

/// Blocks a challenge stays open for collection after initialization.
pub const POC_TIMEOUT: u64 = 4;

/// False-positive rate for the address-hash bloom filter.
pub const ADDR_FILTER_FP_RATE: f64 = 1e-9;

/// Key-cache garbage collection runs every this many blocks.
pub const KEY_CACHE_GC_INTERVAL: u64 = 50;

/// Public PoC record garbage collection runs every this many blocks.
pub const PUBLIC_POC_GC_INTERVAL: u64 = 100;

/// Delay before re-attempting bootstrap while the chain is unavailable.
pub const BOOTSTRAP_RETRY: std::time::Duration = std::time::Duration::from_millis(500);
