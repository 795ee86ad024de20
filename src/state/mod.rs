//! Bridge record persistence
//!
//! Handles:
//! - Lookup of bridge records by hash
//! - Merging provider snapshots into stored records
//! - Per-stage statistics
//!
//! Records live in PostgreSQL in production; the in-memory store backs
//! development setups and tests.

mod manager;
mod memory;

pub use manager::StateManager;
pub use memory::MemoryStore;

use crate::error::TrackerResult;
use crate::record::{BridgeTransactionRecord, HopStage, RecordUpdate};

use async_trait::async_trait;

/// Durable storage of bridge records keyed by hash
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Look up a record by hash
    async fn get(&self, hash: &str) -> TrackerResult<Option<BridgeTransactionRecord>>;

    /// Store a new record; fails if the hash is already tracked
    async fn create(&self, record: BridgeTransactionRecord) -> TrackerResult<()>;

    /// Merge an update into the stored record and return the result
    async fn persist(&self, update: RecordUpdate) -> TrackerResult<BridgeTransactionRecord>;

    async fn health_check(&self) -> TrackerResult<()>;

    /// Number of records per relay stage
    async fn stage_counts(&self) -> TrackerResult<Vec<(HopStage, u64)>>;
}

/// Look up a record, falling back to an empty placeholder
pub async fn lookup_or_placeholder(
    store: &dyn TransactionStore,
    hash: &str,
) -> TrackerResult<BridgeTransactionRecord> {
    Ok(store
        .get(hash)
        .await?
        .unwrap_or_else(BridgeTransactionRecord::placeholder))
}
