// Copyright (c) 2024 Botho Foundation

//! In-memory collaborators for driving the challenge manager end to end.

use ed25519_dalek::{Signer as _, SigningKey};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bth_poc_types::report::Origin;
use bth_poc_types::{
    Block, BlockHash, ChainVars, GatewayPubkey, OnionKeyHash, PacketHash, PocKeypair,
    PocReceiptsTxnV1, PublicPoc, Receipt, Witness,
};
use bth_poc::{
    ChainReader, ChallengeError, GatewayInfo, GatewayMode, HexId, Ledger, LedgerError,
    LedgerScratch, OnionBuilder, PathBuilder, TxnSigner, TxnSubmitter,
};

/// A block hash derived from the height, so tests can name blocks without
/// bookkeeping.
pub fn block_hash(height: u64) -> BlockHash {
    let digest: [u8; 32] = Sha256::digest(height.to_le_bytes()).into();
    BlockHash(digest)
}

pub fn empty_block(height: u64) -> Block {
    Block {
        height,
        hash: block_hash(height),
        time: 1_700_000_000 + height * 60,
        poc_keys: Vec::new(),
        poc_receipts: Vec::new(),
    }
}

/// Chain fake: a height-indexed block map behind a mutex.
pub struct TestChain {
    ready: AtomicBool,
    blocks: Mutex<HashMap<u64, Block>>,
}

impl TestChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(true),
            blocks: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn insert(&self, block: Block) {
        self.blocks.lock().unwrap().insert(block.height, block);
    }

    /// Insert empty blocks for every height in the range.
    pub fn fill(&self, heights: std::ops::RangeInclusive<u64>) {
        let mut blocks = self.blocks.lock().unwrap();
        for h in heights {
            blocks.entry(h).or_insert_with(|| empty_block(h));
        }
    }
}

impl ChainReader for TestChain {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn current_height(&self) -> Result<u64, LedgerError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .keys()
            .copied()
            .max()
            .unwrap_or(0))
    }

    fn get_block(&self, height: u64) -> Result<Block, LedgerError> {
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or(LedgerError::NotFound)
    }

    fn get_block_by_hash(&self, hash: &BlockHash) -> Result<Block, LedgerError> {
        self.blocks
            .lock()
            .unwrap()
            .values()
            .find(|b| b.hash == *hash)
            .cloned()
            .ok_or(LedgerError::NotFound)
    }
}

/// A gateway identity the tests can sign reports with.
#[derive(Clone)]
pub struct TestGateway {
    key: SigningKey,
    pub pubkey: GatewayPubkey,
}

impl TestGateway {
    pub fn new(seed: u8) -> Self {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let pubkey = GatewayPubkey(key.verifying_key().to_bytes());
        Self { key, pubkey }
    }

    pub fn receipt(&self, data: Vec<u8>, origin: Origin, timestamp: u64) -> Receipt {
        let mut receipt = Receipt {
            gateway: self.pubkey,
            timestamp,
            signal: -75,
            data,
            origin,
            signature: Vec::new(),
            addr_hash: None,
        };
        receipt.signature = self.key.sign(&receipt.signing_bytes()).to_bytes().to_vec();
        receipt
    }

    pub fn witness(&self, packet_hash: PacketHash, timestamp: u64) -> Witness {
        let mut witness = Witness {
            gateway: self.pubkey,
            timestamp,
            signal: -103,
            packet_hash,
            signature: Vec::new(),
        };
        witness.signature = self.key.sign(&witness.signing_bytes()).to_bytes().to_vec();
        witness
    }
}

/// Ledger fake: gateways in one or more hexes, a public PoC table, and a
/// swappable chain-vars snapshot.
pub struct TestLedger {
    pub hexes: Mutex<BTreeMap<HexId, Vec<GatewayPubkey>>>,
    pub gateways: Mutex<BTreeMap<GatewayPubkey, GatewayInfo>>,
    pub public_pocs: Mutex<BTreeMap<OnionKeyHash, PublicPoc>>,
    pub vars: Mutex<ChainVars>,
    pub height: Mutex<u64>,
    /// Hex-index removals committed through scratch contexts.
    pub removed: Arc<Mutex<Vec<(HexId, GatewayPubkey)>>>,
}

impl TestLedger {
    pub fn new(vars: ChainVars) -> Arc<Self> {
        Arc::new(Self {
            hexes: Mutex::new(BTreeMap::new()),
            gateways: Mutex::new(BTreeMap::new()),
            public_pocs: Mutex::new(BTreeMap::new()),
            vars: Mutex::new(vars),
            height: Mutex::new(0),
            removed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn add_gateway(&self, hex: HexId, gateway: &TestGateway) {
        self.hexes
            .lock()
            .unwrap()
            .entry(hex)
            .or_default()
            .push(gateway.pubkey);
        self.gateways.lock().unwrap().insert(
            gateway.pubkey,
            GatewayInfo {
                mode: GatewayMode::Full,
                location: Some(0x8c2681a3064d9ff),
                last_poc_challenge: Some(95),
            },
        );
    }

    /// Register a gateway that can report but sits in no targeting hex.
    pub fn add_reporter(&self, gateway: &TestGateway) {
        self.gateways.lock().unwrap().insert(
            gateway.pubkey,
            GatewayInfo {
                mode: GatewayMode::Full,
                location: Some(0x8c2681a3064d9ff),
                last_poc_challenge: Some(95),
            },
        );
    }

    pub fn public_poc_count(&self) -> usize {
        self.public_pocs.lock().unwrap().len()
    }
}

pub struct TestScratch {
    removed: Arc<Mutex<Vec<(HexId, GatewayPubkey)>>>,
    pending: Vec<(HexId, GatewayPubkey)>,
}

impl LedgerScratch for TestScratch {
    fn remove_gateway_from_hex(
        &mut self,
        hex: HexId,
        gateway: &GatewayPubkey,
    ) -> Result<(), LedgerError> {
        self.pending.push((hex, *gateway));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.removed.lock().unwrap().extend(self.pending);
        Ok(())
    }
}

impl Ledger for TestLedger {
    fn current_height(&self) -> Result<u64, LedgerError> {
        Ok(*self.height.lock().unwrap())
    }

    fn gateway_count(&self) -> Result<usize, LedgerError> {
        Ok(self.gateways.lock().unwrap().len())
    }

    fn targeting_hexes(&self, _parent_res: u8) -> Result<Vec<(HexId, u64)>, LedgerError> {
        Ok(self
            .hexes
            .lock()
            .unwrap()
            .iter()
            .map(|(hex, gws)| (*hex, gws.len() as u64))
            .collect())
    }

    fn gateways_in_hex(&self, hex: HexId) -> Result<Vec<GatewayPubkey>, LedgerError> {
        self.hexes
            .lock()
            .unwrap()
            .get(&hex)
            .cloned()
            .ok_or(LedgerError::NotFound)
    }

    fn find_gateway(&self, key: &GatewayPubkey) -> Result<Option<GatewayInfo>, LedgerError> {
        Ok(self.gateways.lock().unwrap().get(key).cloned())
    }

    fn vars(&self) -> Result<ChainVars, LedgerError> {
        Ok(self.vars.lock().unwrap().clone())
    }

    fn save_public_poc(&self, poc: &PublicPoc) -> Result<(), LedgerError> {
        self.public_pocs
            .lock()
            .unwrap()
            .insert(poc.onion_key_hash, poc.clone());
        Ok(())
    }

    fn delete_public_poc(&self, hash: &OnionKeyHash) -> Result<(), LedgerError> {
        self.public_pocs.lock().unwrap().remove(hash);
        Ok(())
    }

    fn active_public_pocs(&self) -> Result<Vec<PublicPoc>, LedgerError> {
        Ok(self.public_pocs.lock().unwrap().values().cloned().collect())
    }

    fn scratch(&self) -> Result<Box<dyn LedgerScratch>, LedgerError> {
        Ok(Box::new(TestScratch {
            removed: Arc::clone(&self.removed),
            pending: Vec::new(),
        }))
    }
}

/// Path builder fake: the target plus the next two distinct gateways in
/// pubkey order, wrapping around the full gateway list.
pub struct SeqPathBuilder;

impl PathBuilder for SeqPathBuilder {
    fn build(
        &self,
        target: &GatewayPubkey,
        _rng: &mut ChaCha20Rng,
        ledger: &dyn Ledger,
        _block_time: u64,
        vars: &ChainVars,
    ) -> Result<Vec<GatewayPubkey>, ChallengeError> {
        let mut all: Vec<GatewayPubkey> = Vec::new();
        for (hex, _) in ledger.targeting_hexes(vars.target_hex_parent_res())? {
            all.extend(ledger.gateways_in_hex(hex)?);
        }
        all.sort();
        all.dedup();
        let start = all
            .iter()
            .position(|g| g == target)
            .ok_or_else(|| ChallengeError::Path("target not in ledger".into()))?;
        let hops = 3.min(all.len());
        Ok((0..hops).map(|i| all[(start + i) % all.len()]).collect())
    }
}

/// Onion fake: layers are running hashes over the hop inputs, so layer
/// contents (and thus packet hashes) are deterministic per challenge.
pub struct HashOnionBuilder;

impl OnionBuilder for HashOnionBuilder {
    fn build(
        &self,
        keys: &PocKeypair,
        iv: u16,
        hops: &[(GatewayPubkey, Vec<u8>)],
        block_hash: &BlockHash,
    ) -> Result<(Vec<u8>, Vec<Vec<u8>>), ChallengeError> {
        let mut layers = Vec::with_capacity(hops.len() + 1);
        let mut state = Vec::new();
        state.extend_from_slice(&keys.public_bytes());
        state.extend_from_slice(&iv.to_le_bytes());
        state.extend_from_slice(block_hash.as_ref());
        layers.push(Sha256::digest(&state).to_vec());
        for (gateway, data) in hops {
            state.extend_from_slice(gateway.as_ref());
            state.extend_from_slice(data);
            layers.push(Sha256::digest(&state).to_vec());
        }
        Ok((layers[0].clone(), layers))
    }
}

/// Records submitted transactions.
#[derive(Default)]
pub struct RecordingSubmitter {
    pub submitted: Mutex<Vec<PocReceiptsTxnV1>>,
}

impl RecordingSubmitter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<PocReceiptsTxnV1> {
        self.submitted.lock().unwrap().last().cloned()
    }
}

impl TxnSubmitter for RecordingSubmitter {
    fn submit(&self, txn: PocReceiptsTxnV1) -> Result<(), ChallengeError> {
        self.submitted.lock().unwrap().push(txn);
        Ok(())
    }
}

/// The validator's signing identity.
pub struct ValidatorSigner(SigningKey);

impl ValidatorSigner {
    pub fn new(seed: u8) -> Arc<Self> {
        Arc::new(Self(SigningKey::from_bytes(&[seed; 32])))
    }
}

impl TxnSigner for ValidatorSigner {
    fn pubkey(&self) -> GatewayPubkey {
        GatewayPubkey(self.0.verifying_key().to_bytes())
    }

    fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.0.sign(msg).to_bytes().to_vec()
    }
}

/// Poll until `check` yields `Some`, or panic after five seconds.
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within deadline");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Let the actor drain whatever is already queued: round-trips a
/// synchronous command through it.
pub async fn drain(handle: &bth_poc::ManagerHandle) {
    let _ = handle.active_pocs().await;
}
