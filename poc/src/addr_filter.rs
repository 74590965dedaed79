// Copyright (c) 2024 Botho Foundation

//! Replay detection for receipt reporter addresses.
//!
//! Receipts arrive attributed to a reporting peer address. Seeing the
//! same address hash twice within a challenge interval suggests replay or
//! collocated gateways, so the filter remembers every address hash that
//! appeared in a PoC receipts transaction this epoch, plus every hash it
//! has handed out itself. Membership is a bloom filter sized for the
//! gateway population; the salt is the hash of the block that opened the
//! current interval, so hashes cannot be precomputed across epochs.
//!
//! The filter is rebuildable state, not a database: on epoch advance it
//! is discarded and refolded from the chain.

use argon2::Argon2;
use bloomfilter::Bloom;
use std::net::SocketAddrV4;
use tracing::{debug, warn};

use bth_poc_types::{Block, BlockHash, ChainVars};

use crate::chain::ChainReader;
use crate::error::ChallengeError;
use crate::ledger::Ledger;
use crate::ADDR_FILTER_FP_RATE;

/// Salt length taken from the epoch block hash, matching the pwhash
/// primitive's named salt width.
pub const SALTBYTES: usize = 16;

/// Outcome of an address check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddrCheck {
    /// The address hash was already present: possible replay.
    Seen,
    /// First sighting; the computed hash should be stamped on the receipt.
    Fresh(Vec<u8>),
    /// Filter disabled or address not attributable (not IPv4).
    Unknown,
}

struct FilterState {
    start_height: u64,
    /// Last height folded into the bloom.
    ref_height: u64,
    byte_size: usize,
    salt: BlockHash,
    bloom: Bloom<Vec<u8>>,
}

/// Bloom-backed set of receipt address hashes for the current challenge
/// interval. Owned by the challenge manager; rebuilt on epoch advance.
#[derive(Default)]
pub struct AddrHashFilter {
    state: Option<FilterState>,
}

impl AddrHashFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the filter up to date with the given block.
    ///
    /// Disabled (and cleared) unless both filter chain vars are set. On
    /// epoch advance the bloom is discarded and refolded from the epoch's
    /// opening block to the current one; within an epoch only the new
    /// block is applied.
    pub fn maybe_rebuild(
        &mut self,
        chain: &dyn ChainReader,
        ledger: &dyn Ledger,
        block: &Block,
        vars: &ChainVars,
    ) -> Result<(), ChallengeError> {
        let (Some(byte_size), Some(interval)) =
            (vars.addr_hash_byte_count(), vars.challenge_interval())
        else {
            if self.state.is_some() {
                debug!("address filter vars unset, disabling filter");
                self.state = None;
            }
            return Ok(());
        };

        let height = block.height;
        let start = std::cmp::max(1, height - (height % interval));

        match &mut self.state {
            Some(state) if state.start_height == start && state.byte_size == byte_size => {
                if block.height > state.ref_height {
                    apply_block(&mut state.bloom, block);
                    state.ref_height = block.height;
                }
                Ok(())
            }
            _ => {
                let salt = chain.get_block(start)?.hash;
                let gateways = std::cmp::max(1, ledger.gateway_count()?);
                let mut bloom = Bloom::new_for_fp_rate(gateways, ADDR_FILTER_FP_RATE);

                // Fold latest back to the epoch's opening block.
                let mut h = height;
                loop {
                    let folded = if h == height {
                        block.clone()
                    } else {
                        chain.get_block(h)?
                    };
                    apply_block(&mut bloom, &folded);
                    if h == start {
                        break;
                    }
                    h -= 1;
                }

                debug!(start, height, byte_size, "rebuilt address-hash filter");
                self.state = Some(FilterState {
                    start_height: start,
                    ref_height: height,
                    byte_size,
                    salt,
                    bloom,
                });
                Ok(())
            }
        }
    }

    /// Check (and record) the hash of a reporting peer's address.
    pub fn check(&mut self, peer_addr: &str) -> AddrCheck {
        let Some(state) = &mut self.state else {
            return AddrCheck::Unknown;
        };

        let Ok(addr) = peer_addr.parse::<SocketAddrV4>() else {
            return AddrCheck::Unknown;
        };

        let octets = addr.ip().octets();
        let mut output = [0u8; 32];
        if let Err(e) = Argon2::default().hash_password_into(
            &octets,
            &state.salt.as_bytes()[..SALTBYTES],
            &mut output,
        ) {
            warn!(error = %e, "address pwhash failed");
            return AddrCheck::Unknown;
        }

        let hash = output[..state.byte_size].to_vec();
        if state.bloom.check_and_set(&hash) {
            AddrCheck::Seen
        } else {
            AddrCheck::Fresh(hash)
        }
    }

    /// Whether the filter currently holds rebuilt state.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }
}

fn apply_block(bloom: &mut Bloom<Vec<u8>>, block: &Block) {
    for txn in &block.poc_receipts {
        for element in &txn.path {
            if let Some(receipt) = &element.receipt {
                if let Some(hash) = &receipt.addr_hash {
                    bloom.set(hash);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bth_poc_types::{GatewayPubkey, OnionKeyHash, PocPathElement, PocReceiptsTxnV1, Receipt};
    use bth_poc_types::report::Origin;
    use crate::ledger::{GatewayInfo, HexId, LedgerError, LedgerScratch};
    use bth_poc_types::PublicPoc;

    struct FakeChain {
        blocks: Vec<Block>,
    }

    impl ChainReader for FakeChain {
        fn is_ready(&self) -> bool {
            true
        }

        fn current_height(&self) -> Result<u64, LedgerError> {
            Ok(self.blocks.last().map(|b| b.height).unwrap_or(0))
        }

        fn get_block(&self, height: u64) -> Result<Block, LedgerError> {
            self.blocks
                .iter()
                .find(|b| b.height == height)
                .cloned()
                .ok_or(LedgerError::NotFound)
        }

        fn get_block_by_hash(&self, hash: &BlockHash) -> Result<Block, LedgerError> {
            self.blocks
                .iter()
                .find(|b| b.hash == *hash)
                .cloned()
                .ok_or(LedgerError::NotFound)
        }
    }

    struct FakeLedger;

    impl Ledger for FakeLedger {
        fn current_height(&self) -> Result<u64, LedgerError> {
            Ok(0)
        }
        fn gateway_count(&self) -> Result<usize, LedgerError> {
            Ok(100)
        }
        fn targeting_hexes(&self, _parent_res: u8) -> Result<Vec<(HexId, u64)>, LedgerError> {
            Ok(Vec::new())
        }
        fn gateways_in_hex(&self, _hex: HexId) -> Result<Vec<GatewayPubkey>, LedgerError> {
            Ok(Vec::new())
        }
        fn find_gateway(
            &self,
            _key: &GatewayPubkey,
        ) -> Result<Option<GatewayInfo>, LedgerError> {
            Ok(None)
        }
        fn vars(&self) -> Result<ChainVars, LedgerError> {
            Ok(ChainVars::default())
        }
        fn save_public_poc(&self, _poc: &PublicPoc) -> Result<(), LedgerError> {
            Ok(())
        }
        fn delete_public_poc(&self, _hash: &OnionKeyHash) -> Result<(), LedgerError> {
            Ok(())
        }
        fn active_public_pocs(&self) -> Result<Vec<PublicPoc>, LedgerError> {
            Ok(Vec::new())
        }
        fn scratch(&self) -> Result<Box<dyn LedgerScratch>, LedgerError> {
            unimplemented!("not used by filter tests")
        }
    }

    fn block(height: u64, tag: u8) -> Block {
        Block {
            height,
            hash: BlockHash([tag; 32]),
            time: height * 10,
            poc_keys: Vec::new(),
            poc_receipts: Vec::new(),
        }
    }

    fn vars() -> ChainVars {
        ChainVars {
            poc_addr_hash_byte_count: Some(8),
            poc_challenge_interval: Some(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_without_vars() {
        let chain = FakeChain { blocks: vec![block(1, 1)] };
        let mut filter = AddrHashFilter::new();
        filter
            .maybe_rebuild(&chain, &FakeLedger, &block(1, 1), &ChainVars::default())
            .unwrap();
        assert!(!filter.is_active());
        assert_eq!(filter.check("127.0.0.1:1234"), AddrCheck::Unknown);
    }

    #[test]
    fn test_fresh_then_seen() {
        let blocks: Vec<Block> = (1..=12).map(|h| block(h, h as u8)).collect();
        let current = blocks.last().unwrap().clone();
        let chain = FakeChain { blocks };
        let mut filter = AddrHashFilter::new();
        filter
            .maybe_rebuild(&chain, &FakeLedger, &current, &vars())
            .unwrap();
        assert!(filter.is_active());

        let first = filter.check("10.0.0.1:44158");
        let AddrCheck::Fresh(hash) = first else {
            panic!("expected fresh, got {first:?}");
        };
        assert_eq!(hash.len(), 8);
        assert_eq!(filter.check("10.0.0.1:44158"), AddrCheck::Seen);
        // Port does not participate in the hash
        assert_eq!(filter.check("10.0.0.1:9999"), AddrCheck::Seen);
    }

    #[test]
    fn test_non_ipv4_is_unknown() {
        let blocks: Vec<Block> = (1..=12).map(|h| block(h, h as u8)).collect();
        let current = blocks.last().unwrap().clone();
        let chain = FakeChain { blocks };
        let mut filter = AddrHashFilter::new();
        filter
            .maybe_rebuild(&chain, &FakeLedger, &current, &vars())
            .unwrap();
        assert_eq!(filter.check("not-an-address"), AddrCheck::Unknown);
        assert_eq!(filter.check("[::1]:4000"), AddrCheck::Unknown);
    }

    #[test]
    fn test_epoch_advance_resets() {
        let blocks: Vec<Block> = (1..=21).map(|h| block(h, h as u8)).collect();
        let chain = FakeChain { blocks };
        let mut filter = AddrHashFilter::new();

        filter
            .maybe_rebuild(&chain, &FakeLedger, &chain.get_block(12).unwrap(), &vars())
            .unwrap();
        assert!(matches!(filter.check("10.0.0.7:1"), AddrCheck::Fresh(_)));
        assert_eq!(filter.check("10.0.0.7:1"), AddrCheck::Seen);

        // Height 21 starts a new interval (start = 20): fresh bloom.
        filter
            .maybe_rebuild(&chain, &FakeLedger, &chain.get_block(21).unwrap(), &vars())
            .unwrap();
        assert!(matches!(filter.check("10.0.0.7:1"), AddrCheck::Fresh(_)));
    }

    #[test]
    fn test_rebuild_folds_prior_receipts() {
        // A receipts txn at height 11 carries an addr hash; rebuilding at
        // height 12 must already contain it.
        let mut b11 = block(11, 11);
        let stamped = {
            // Hash of 10.0.0.9 under the epoch salt (block 10's hash).
            let salt = BlockHash([10u8; 32]);
            let mut out = [0u8; 32];
            Argon2::default()
                .hash_password_into(&[10, 0, 0, 9], &salt.as_bytes()[..SALTBYTES], &mut out)
                .unwrap();
            out[..8].to_vec()
        };
        b11.poc_receipts.push(PocReceiptsTxnV1 {
            challenger: GatewayPubkey([1u8; 32]),
            secret: Vec::new(),
            onion_key_hash: OnionKeyHash([1u8; 32]),
            block_hash: BlockHash([1u8; 32]),
            path: vec![PocPathElement {
                challengee: GatewayPubkey([2u8; 32]),
                receipt: Some(Receipt {
                    gateway: GatewayPubkey([2u8; 32]),
                    timestamp: 0,
                    signal: -90,
                    data: vec![1],
                    origin: Origin::P2p,
                    signature: Vec::new(),
                    addr_hash: Some(stamped),
                }),
                witnesses: Vec::new(),
            }],
            fee: 0,
            signature: Vec::new(),
        });

        let mut blocks: Vec<Block> = (1..=12).filter(|h| *h != 11).map(|h| block(h, h as u8)).collect();
        blocks.push(b11);
        blocks.sort_by_key(|b| b.height);
        let current = blocks.last().unwrap().clone();
        let chain = FakeChain { blocks };

        let mut filter = AddrHashFilter::new();
        filter
            .maybe_rebuild(&chain, &FakeLedger, &current, &vars())
            .unwrap();
        assert_eq!(filter.check("10.0.0.9:44158"), AddrCheck::Seen);
    }
}
