use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use bth_poc_types::{LocalPoc, OnionKeyHash, LOCAL_POC_VERSION};

/// LMDB map size. Challenges are short-lived and bounded by the PoC
/// timeout, so the store stays tiny; 64 MiB leaves generous headroom.
const MAP_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown record version: {0}")]
    Corrupt(u8),
}

impl From<heed::Error> for StoreError {
    fn from(e: heed::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable store of in-flight challenges, keyed by onion key hash.
///
/// Every mutation is a full-record overwrite: challenges live at most
/// `POC_TIMEOUT` blocks and records are small, so overwrite keeps the
/// single-writer serialization trivial. Values are bincode payloads
/// behind a leading schema version byte.
#[derive(Clone)]
pub struct PocStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl PocStore {
    /// Open or create the store at the given directory.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(path)
            .map_err(|e| StoreError::Database(format!("failed to create directory: {e}")))?;

        let env = unsafe { EnvOpenOptions::new().max_dbs(1).map_size(MAP_SIZE).open(path) }?;

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some("local_pocs"))?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }

    pub fn get(&self, hash: &OnionKeyHash) -> Result<LocalPoc, StoreError> {
        let rtxn = self.env.read_txn()?;
        let bytes = self
            .db
            .get(&rtxn, hash.as_ref())?
            .ok_or(StoreError::NotFound)?;
        decode(bytes)
    }

    /// Persist a challenge, replacing any previous record under its hash.
    pub fn put(&self, poc: &LocalPoc) -> Result<(), StoreError> {
        let bytes = encode(poc)?;
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, poc.onion_key_hash.as_ref(), &bytes)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn delete(&self, hash: &OnionKeyHash) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn()?;
        self.db.delete(&mut wtxn, hash.as_ref())?;
        wtxn.commit()?;
        Ok(())
    }

    /// Snapshot of every stored challenge. Records that fail to decode are
    /// logged and skipped so one corrupt entry cannot wedge a GC scan.
    pub fn iter(&self) -> Result<Vec<LocalPoc>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.db.iter(&rtxn)? {
            let (key, value) = item?;
            match decode(value) {
                Ok(poc) => out.push(poc),
                Err(e) => {
                    warn!(key = %hex::encode(key), error = %e, "skipping undecodable local poc");
                }
            }
        }
        Ok(out)
    }
}

fn encode(poc: &LocalPoc) -> Result<Vec<u8>, StoreError> {
    let body =
        bincode::serialize(poc).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let mut bytes = Vec::with_capacity(1 + body.len());
    bytes.push(LOCAL_POC_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<LocalPoc, StoreError> {
    match bytes.split_first() {
        Some((&LOCAL_POC_VERSION, body)) => {
            bincode::deserialize(body).map_err(|e| StoreError::Serialization(e.to_string()))
        }
        Some((&version, _)) => Err(StoreError::Corrupt(version)),
        None => Err(StoreError::Corrupt(0)),
    }
}
