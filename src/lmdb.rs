//! LMDB-backed log store (feature `lmdb`)

use crate::{CodecError, LogStoreError, SagaLog, SagaLogStore};
use async_trait::async_trait;
use heed::byteorder::BigEndian;
use heed::types::{Bytes, U64};
use heed::{Database, Env, EnvOpenOptions};
use rkyv::util::AlignedVec;
use std::path::Path;

const DATABASE_NAME: &str = "saga_log";
const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// Appends rkyv-encoded entries keyed by a monotonically increasing sequence
pub struct HeedLogStore {
    env: Env,
    db: Database<U64<BigEndian>, Bytes>,
}

impl HeedLogStore {
    /// Open (or create) the store in an existing directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogStoreError> {
        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(DEFAULT_MAP_SIZE)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(storage)?;

        let mut wtxn = env.write_txn().map_err(storage)?;
        let db = env
            .create_database(&mut wtxn, Some(DATABASE_NAME))
            .map_err(storage)?;
        wtxn.commit().map_err(storage)?;

        Ok(Self { env, db })
    }

    /// Read back every entry in append order
    pub fn entries(&self) -> Result<Vec<SagaLog>, LogStoreError> {
        let rtxn = self.env.read_txn().map_err(storage)?;
        let mut entries = Vec::new();
        for item in self.db.iter(&rtxn).map_err(storage)? {
            let (_, bytes) = item.map_err(storage)?;
            entries.push(decode(bytes)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SagaLogStore for HeedLogStore {
    async fn create_log(&self, entry: SagaLog) -> Result<(), LogStoreError> {
        let bytes = encode(&entry)?;
        let env = self.env.clone();
        let db = self.db;

        tokio::task::spawn_blocking(move || -> Result<(), LogStoreError> {
            let mut wtxn = env.write_txn().map_err(storage)?;
            let sequence = db
                .last(&wtxn)
                .map_err(storage)?
                .map(|(key, _)| key + 1)
                .unwrap_or(0);
            db.put(&mut wtxn, &sequence, bytes.as_slice())
                .map_err(storage)?;
            wtxn.commit().map_err(storage)
        })
        .await
        .map_err(|e| LogStoreError::Storage(e.to_string().into()))?
    }
}

fn storage(error: heed::Error) -> LogStoreError {
    LogStoreError::Storage(error.to_string().into())
}

fn encode(entry: &SagaLog) -> Result<Vec<u8>, CodecError> {
    rkyv::to_bytes::<rkyv::rancor::Error>(entry)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| CodecError::Encode(e.to_string().into()))
}

fn decode(bytes: &[u8]) -> Result<SagaLog, CodecError> {
    let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<SagaLog, rkyv::rancor::Error>(&aligned)
        .map_err(|e| CodecError::Decode(e.to_string().into()))
}
