//! In-memory record store

use super::TransactionStore;
use crate::error::{TrackerError, TrackerResult};
use crate::record::{BridgeTransactionRecord, HopStage, RecordUpdate};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Record store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, BridgeTransactionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn get(&self, hash: &str) -> TrackerResult<Option<BridgeTransactionRecord>> {
        Ok(self.records.get(hash).map(|r| r.clone()))
    }

    async fn create(&self, record: BridgeTransactionRecord) -> TrackerResult<()> {
        match self.records.entry(record.hash.clone()) {
            Entry::Occupied(_) => Err(TrackerError::DuplicateTransaction { hash: record.hash }),
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(())
            }
        }
    }

    async fn persist(&self, update: RecordUpdate) -> TrackerResult<BridgeTransactionRecord> {
        let mut record = self
            .records
            .get_mut(&update.hash)
            .ok_or_else(|| TrackerError::TransactionNotFound {
                hash: update.hash.clone(),
            })?;

        record.apply(update);
        Ok(record.clone())
    }

    async fn health_check(&self) -> TrackerResult<()> {
        Ok(())
    }

    async fn stage_counts(&self) -> TrackerResult<Vec<(HopStage, u64)>> {
        let mut counts = BTreeMap::new();
        for record in self.records.iter() {
            *counts.entry(record.hop_status.stage).or_insert(0u64) += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
