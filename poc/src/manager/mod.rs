// Copyright (c) 2024 Botho Foundation

//! The challenge manager actor.
//!
//! A single task owns all mutable challenge state: the local PoC store,
//! the address-hash filter, and writes to the key cache. Block events and
//! external commands (target checks, receipt/witness reports, snapshots)
//! arrive on channels and are applied strictly one at a time, so no other
//! locking exists anywhere on the mutation path. The only work running
//! off-actor is target derivation, spawned per confirmed key against
//! immutable snapshots and writing its result straight to the store.

use libp2p_identity::PeerId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use bth_poc_types::{
    Block, BlockHash, ChainVars, GatewayPubkey, LocalPoc, OnionKeyHash, PocPathElement,
    PocReceiptsTxnV1, PublicPoc, Receipt, ReporterId, Witness,
};

use crate::addr_filter::{AddrCheck, AddrHashFilter};
use crate::chain::{BlockEvent, ChainReader};
use crate::error::ChallengeError;
use crate::key_cache::KeyCache;
use crate::ledger::Ledger;
use crate::onion::{OnionBuilder, PathBuilder, TxnSigner, TxnSubmitter};
use crate::store::{PocStore, StoreError};
use crate::target::{DeriveContext, Targeting};
use crate::{BOOTSTRAP_RETRY, KEY_CACHE_GC_INTERVAL, POC_TIMEOUT, PUBLIC_POC_GC_INTERVAL};

/// Receipts transactions exist from this poc_version on.
const RECEIPTS_TXN_MIN_VERSION: u64 = 10;

const COMMAND_QUEUE_DEPTH: usize = 256;

/// Collaborators the manager is wired to at construction.
#[derive(Clone)]
pub struct ManagerConfig {
    pub chain: Arc<dyn ChainReader>,
    pub ledger: Arc<dyn Ledger>,
    pub path_builder: Arc<dyn PathBuilder>,
    pub onion_builder: Arc<dyn OnionBuilder>,
    pub signer: Arc<dyn TxnSigner>,
    pub submitter: Arc<dyn TxnSubmitter>,
}

enum ManagerCommand {
    CheckTarget {
        challengee: GatewayPubkey,
        block_hash: BlockHash,
        onion_key_hash: OnionKeyHash,
        reply: oneshot::Sender<Result<Option<Vec<u8>>, ChallengeError>>,
    },
    Receipt {
        onion_key_hash: OnionKeyHash,
        receipt: Receipt,
        peer: PeerId,
        peer_addr: String,
    },
    Witness {
        onion_key_hash: OnionKeyHash,
        witness: Witness,
        peer: PeerId,
    },
    ActivePocs {
        reply: oneshot::Sender<Vec<LocalPoc>>,
    },
    Shutdown,
}

/// Cheaply cloneable handle for talking to the manager actor.
#[derive(Clone)]
pub struct ManagerHandle {
    command_tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    /// Ask whether `challengee` is the intended first hop of the given
    /// challenge. Returns the onion ciphertext when it is.
    pub async fn check_target(
        &self,
        challengee: GatewayPubkey,
        block_hash: BlockHash,
        onion_key_hash: OnionKeyHash,
    ) -> Result<Option<Vec<u8>>, ChallengeError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ManagerCommand::CheckTarget {
                challengee,
                block_hash,
                onion_key_hash,
                reply,
            })
            .await
            .map_err(|_| ChallengeError::Unavailable)?;
        rx.await.map_err(|_| ChallengeError::Unavailable)?
    }

    /// Report a receipt. Fire-and-forget: adversarial or stale reports
    /// are dropped by the actor, never surfaced to the reporter.
    pub async fn receipt(
        &self,
        receipt: Receipt,
        onion_key_hash: OnionKeyHash,
        peer: PeerId,
        peer_addr: String,
    ) {
        let _ = self
            .command_tx
            .send(ManagerCommand::Receipt {
                onion_key_hash,
                receipt,
                peer,
                peer_addr,
            })
            .await;
    }

    /// Report a witness. Fire-and-forget.
    pub async fn witness(&self, witness: Witness, onion_key_hash: OnionKeyHash, peer: PeerId) {
        let _ = self
            .command_tx
            .send(ManagerCommand::Witness {
                onion_key_hash,
                witness,
                peer,
            })
            .await;
    }

    /// Snapshot of every in-flight challenge.
    pub async fn active_pocs(&self) -> Vec<LocalPoc> {
        let (reply, rx) = oneshot::channel();
        if self
            .command_tx
            .send(ManagerCommand::ActivePocs { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop the actor after it drains commands queued ahead of this one.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(ManagerCommand::Shutdown).await;
    }
}

/// The challenge manager actor. Construct with [`ChallengeManager::new`],
/// then drive it with `tokio::spawn(manager.run())`.
pub struct ChallengeManager {
    config: ManagerConfig,
    store: PocStore,
    key_cache: KeyCache,
    filter: AddrHashFilter,
    /// Chain-variable snapshot refreshed on every processed block.
    vars: ChainVars,
    events: mpsc::Receiver<BlockEvent>,
    commands: mpsc::Receiver<ManagerCommand>,
}

impl ChallengeManager {
    pub fn new(
        config: ManagerConfig,
        store: PocStore,
        key_cache: KeyCache,
        events: mpsc::Receiver<BlockEvent>,
    ) -> (Self, ManagerHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let manager = Self {
            config,
            store,
            key_cache,
            filter: AddrHashFilter::new(),
            vars: ChainVars::default(),
            events,
            commands,
        };
        (manager, ManagerHandle { command_tx })
    }

    /// Actor loop. Idles until the chain is available, then serializes
    /// block events and commands until shutdown or both channels close.
    pub async fn run(mut self) {
        while !self.config.chain.is_ready() {
            debug!("chain not ready, delaying challenge manager bootstrap");
            tokio::time::sleep(BOOTSTRAP_RETRY).await;
        }
        info!("challenge manager attached to chain");

        loop {
            tokio::select! {
                // Biased toward block events: queries answered after an
                // event observe the state that event produced.
                biased;
                Some(event) = self.events.recv() => self.handle_block_event(event),
                Some(command) = self.commands.recv() => {
                    if self.handle_command(command) {
                        break;
                    }
                }
                else => break,
            }
        }
        info!("challenge manager stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::CheckTarget {
                challengee,
                block_hash,
                onion_key_hash,
                reply,
            } => {
                let _ = reply.send(self.check_target(challengee, block_hash, onion_key_hash));
            }
            ManagerCommand::Receipt {
                onion_key_hash,
                receipt,
                peer,
                peer_addr,
            } => self.ingest_receipt(onion_key_hash, receipt, peer, &peer_addr),
            ManagerCommand::Witness {
                onion_key_hash,
                witness,
                peer,
            } => self.ingest_witness(onion_key_hash, witness, peer),
            ManagerCommand::ActivePocs { reply } => {
                let _ = reply.send(self.store.iter().unwrap_or_else(|e| {
                    error!(error = %e, "active poc scan failed");
                    Vec::new()
                }));
            }
            ManagerCommand::Shutdown => return true,
        }
        false
    }

    fn handle_block_event(&mut self, event: BlockEvent) {
        if event.sync {
            debug!(hash = %event.hash, "ignoring block event while syncing");
            return;
        }

        let block = match self.config.chain.get_block_by_hash(&event.hash) {
            Ok(block) => block,
            Err(e) => {
                warn!(hash = %event.hash, error = %e, "block event for unknown block");
                return;
            }
        };

        match self.config.ledger.vars() {
            Ok(vars) => self.vars = vars,
            Err(e) => warn!(error = %e, "failed to refresh chain vars, keeping previous"),
        }

        if let Err(e) = self.filter.maybe_rebuild(
            self.config.chain.as_ref(),
            self.config.ledger.as_ref(),
            &block,
            &self.vars,
        ) {
            warn!(error = %e, "address-hash filter rebuild failed");
        }

        self.process_block_pocs(&block);
        self.gc_local_pocs(block.height);

        if block.height % KEY_CACHE_GC_INTERVAL == 0 {
            self.gc_key_cache(block.height);
        }
        if block.height % PUBLIC_POC_GC_INTERVAL == 0 {
            self.gc_public_pocs(block.height);
        }
    }

    /// Record every confirmed ephemeral key publicly, and start a
    /// challenge for each one whose secret we hold.
    fn process_block_pocs(&mut self, block: &Block) {
        for (challenger, onion_key_hash) in &block.poc_keys {
            let record = PublicPoc {
                onion_key_hash: *onion_key_hash,
                challenger: *challenger,
                block_hash: block.hash,
                start_height: block.height,
            };
            if let Err(e) = self.config.ledger.save_public_poc(&record) {
                warn!(%onion_key_hash, error = %e, "failed to save public poc record");
            }

            let Some(entry) = self.key_cache.lookup(onion_key_hash) else {
                continue;
            };
            debug!(%onion_key_hash, "block confirmed one of our poc keys");
            self.spawn_initialization(*challenger, entry.keypair, block.clone());
        }
    }

    /// Derivation runs off-actor: its inputs are immutable snapshots and
    /// the resulting record is keyed by a hash unique to this challenge,
    /// so the task writes to the store without further coordination.
    fn spawn_initialization(
        &self,
        challenger: GatewayPubkey,
        keypair: bth_poc_types::PocKeypair,
        block: Block,
    ) {
        let store = self.store.clone();
        let ledger = Arc::clone(&self.config.ledger);
        let path_builder = Arc::clone(&self.config.path_builder);
        let onion_builder = Arc::clone(&self.config.onion_builder);
        let vars = self.vars.clone();
        let onion_key_hash = keypair.onion_key_hash();

        tokio::spawn(async move {
            let targeting = Targeting::from_vars(&vars);
            let ctx = DeriveContext {
                challenger,
                keys: &keypair,
                block: &block,
                ledger: ledger.as_ref(),
                vars: &vars,
                path_builder: path_builder.as_ref(),
                onion_builder: onion_builder.as_ref(),
            };
            match targeting.derive(&ctx) {
                Ok(poc) => {
                    if let Err(e) = store.put(&poc) {
                        error!(%onion_key_hash, error = %e, "failed to persist new challenge");
                    } else {
                        info!(%onion_key_hash, target = %poc.target, hops = poc.path_len(),
                              "challenge initialized");
                    }
                }
                Err(e) => {
                    warn!(%onion_key_hash, error = %e, "challenge initialization failed");
                }
            }
        });
    }

    fn check_target(
        &self,
        challengee: GatewayPubkey,
        block_hash: BlockHash,
        onion_key_hash: OnionKeyHash,
    ) -> Result<Option<Vec<u8>>, ChallengeError> {
        if self.config.chain.get_block_by_hash(&block_hash).is_err() {
            return Err(ChallengeError::BlockNotFound);
        }
        let poc = self
            .store
            .get(&onion_key_hash)
            .map_err(|_| ChallengeError::InvalidOrExpiredPoc)?;
        if poc.block_hash != block_hash {
            return Err(ChallengeError::MismatchedBlockHash);
        }
        if poc.target == challengee {
            Ok(Some(poc.onion))
        } else {
            Ok(None)
        }
    }

    fn ingest_witness(&mut self, onion_key_hash: OnionKeyHash, witness: Witness, peer: PeerId) {
        if !self.report_gateway_valid(&witness.gateway) || !witness.verify_signature() {
            warn!(%onion_key_hash, gateway = %witness.gateway, "dropping invalid witness");
            return;
        }

        let mut poc = match self.store.get(&onion_key_hash) {
            Ok(poc) => poc,
            Err(StoreError::NotFound) => {
                debug!(%onion_key_hash, "witness for unknown or expired challenge");
                return;
            }
            Err(e) => {
                error!(%onion_key_hash, error = %e, "store read failed during witness ingest");
                return;
            }
        };

        let Some(hop) = poc.hop_of_packet_hash(&witness.packet_hash) else {
            warn!(%onion_key_hash, "witness references unknown onion layer");
            return;
        };
        let challengee = poc.challengees[hop].0;
        if witness.gateway == challengee {
            warn!(%onion_key_hash, hop, "dropping self-witness");
            return;
        }

        let max_witnesses = self.vars.per_hop_max_witnesses();
        let bucket = poc.witnesses.entry(witness.packet_hash).or_default();

        // A full bucket drops everything, replacements included.
        if bucket.len() >= max_witnesses {
            debug!(%onion_key_hash, hop, "witness bucket full");
            return;
        }
        if bucket
            .iter()
            .any(|(p, w)| w.gateway == witness.gateway && p.0 != peer)
        {
            warn!(%onion_key_hash, hop, gateway = %witness.gateway,
                  "dropping duplicate witness gateway");
            return;
        }

        if let Some(slot) = bucket.iter_mut().find(|(p, _)| p.0 == peer) {
            *slot = (ReporterId(peer), witness);
        } else {
            bucket.push((ReporterId(peer), witness));
        }

        if let Err(e) = self.store.put(&poc) {
            error!(%onion_key_hash, error = %e, "failed to persist witness");
        }
    }

    fn ingest_receipt(
        &mut self,
        onion_key_hash: OnionKeyHash,
        mut receipt: Receipt,
        peer: PeerId,
        peer_addr: &str,
    ) {
        if !self.report_gateway_valid(&receipt.gateway) || !receipt.verify_signature() {
            warn!(%onion_key_hash, gateway = %receipt.gateway, "dropping invalid receipt");
            return;
        }

        let mut poc = match self.store.get(&onion_key_hash) {
            Ok(poc) => poc,
            Err(StoreError::NotFound) => {
                debug!(%onion_key_hash, "receipt for unknown or expired challenge");
                return;
            }
            Err(e) => {
                error!(%onion_key_hash, error = %e, "store read failed during receipt ingest");
                return;
            }
        };

        let Some(hop) = poc.hop_of_gateway(&receipt.gateway) else {
            warn!(%onion_key_hash, gateway = %receipt.gateway,
                  "receipt from gateway outside the path");
            return;
        };
        if receipt.data != poc.challengees[hop].1 {
            warn!(%onion_key_hash, hop, "receipt layer data mismatch");
            return;
        }
        if poc.receipts.contains_key(&receipt.gateway) {
            debug!(%onion_key_hash, hop, "receipt already recorded");
            return;
        }

        match self.filter.check(peer_addr) {
            AddrCheck::Seen if hop == 0 => {
                // The first receipt must be independently obtainable; a
                // replayed first-hop address poisons the whole challenge.
                warn!(%onion_key_hash, "first-hop address replay, discarding challenge");
                if let Err(e) = self.store.delete(&onion_key_hash) {
                    error!(%onion_key_hash, error = %e, "failed to discard challenge");
                }
                return;
            }
            AddrCheck::Seen => {
                warn!(%onion_key_hash, hop, "address replay, dropping receipt");
                return;
            }
            AddrCheck::Unknown => {}
            AddrCheck::Fresh(hash) => receipt.addr_hash = Some(hash),
        }

        poc.receipts
            .insert(receipt.gateway, (ReporterId(peer), receipt));
        if let Err(e) = self.store.put(&poc) {
            error!(%onion_key_hash, error = %e, "failed to persist receipt");
        }
    }

    /// Submit and delete every challenge whose collection window closed.
    fn gc_local_pocs(&mut self, height: u64) {
        let pocs = match self.store.iter() {
            Ok(pocs) => pocs,
            Err(e) => {
                error!(error = %e, "local poc scan failed");
                return;
            }
        };

        for poc in pocs {
            if height.saturating_sub(poc.start_height) <= POC_TIMEOUT {
                continue;
            }
            let onion_key_hash = poc.onion_key_hash;

            if self.vars.poc_version() >= RECEIPTS_TXN_MIN_VERSION {
                let txn = assemble_receipts_txn(&poc, self.config.signer.as_ref());
                let receipts = txn.path.iter().filter(|e| e.receipt.is_some()).count();
                match self.config.submitter.submit(txn) {
                    Ok(()) => {
                        info!(%onion_key_hash, receipts, "submitted poc receipts transaction");
                    }
                    Err(e) => {
                        // Keep the record; the next block retries.
                        warn!(%onion_key_hash, error = %e, "receipts submission failed");
                        continue;
                    }
                }
            } else {
                debug!(%onion_key_hash, "poc_version predates receipts txn, dropping challenge");
            }

            if let Err(e) = self.store.delete(&onion_key_hash) {
                error!(%onion_key_hash, error = %e, "failed to delete expired challenge");
            }
        }
    }

    fn gc_key_cache(&mut self, height: u64) {
        let mut dropped = 0usize;
        for (hash, entry) in self.key_cache.entries() {
            if height.saturating_sub(entry.received_height) > POC_TIMEOUT {
                self.key_cache.delete(&hash);
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, height, "garbage collected unconfirmed poc keys");
        }
    }

    fn gc_public_pocs(&mut self, height: u64) {
        let records = match self.config.ledger.active_public_pocs() {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "public poc scan failed");
                return;
            }
        };
        let mut dropped = 0usize;
        for record in records {
            if height.saturating_sub(record.start_height) > POC_TIMEOUT {
                if let Err(e) = self.config.ledger.delete_public_poc(&record.onion_key_hash) {
                    warn!(onion_key_hash = %record.onion_key_hash, error = %e,
                          "failed to delete public poc record");
                } else {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            debug!(dropped, height, "garbage collected public poc records");
        }
    }

    /// Ledger-level validity shared by receipts and witnesses: the
    /// reporting gateway must exist and have an asserted location.
    fn report_gateway_valid(&self, gateway: &GatewayPubkey) -> bool {
        match self.config.ledger.find_gateway(gateway) {
            Ok(Some(info)) => info.location.is_some(),
            Ok(None) => false,
            Err(e) => {
                warn!(gateway = %gateway, error = %e, "gateway lookup failed");
                false
            }
        }
    }
}

/// Fold a finished challenge into its receipts transaction. Path elements
/// stay in challenge order; witnesses drop any entry from the challengee
/// itself or from the gateway that signed the hop's receipt.
fn assemble_receipts_txn(poc: &LocalPoc, signer: &dyn TxnSigner) -> PocReceiptsTxnV1 {
    let mut path = Vec::with_capacity(poc.challengees.len());
    for (i, (challengee, _)) in poc.challengees.iter().enumerate() {
        let receipt = poc.receipt_for(challengee).cloned();
        let (_, layer_hash) = poc.packet_hashes[i];
        let witnesses = poc
            .witnesses_for(&layer_hash)
            .iter()
            .filter(|(_, w)| w.gateway != *challengee)
            .filter(|(_, w)| receipt.as_ref().map_or(true, |r| w.gateway != r.gateway))
            .map(|(_, w)| w.clone())
            .collect();
        path.push(PocPathElement {
            challengee: *challengee,
            receipt,
            witnesses,
        });
    }

    let mut txn = PocReceiptsTxnV1 {
        challenger: signer.pubkey(),
        secret: poc.secret.clone(),
        onion_key_hash: poc.onion_key_hash,
        block_hash: poc.block_hash,
        path,
        fee: 0,
        signature: Vec::new(),
    };
    txn.signature = signer.sign(&txn.signing_bytes());
    txn
}
