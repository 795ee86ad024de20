//! PostgreSQL state manager

use super::TransactionStore;
use crate::config::DatabaseConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::record::{BridgeTransactionRecord, HopStage, RecordUpdate};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};

const RECORD_COLUMNS: &str = "hash, method_id, src_chain_id, symbol, initial_amount, \
                              hop_status, shift_status, created_at, updated_at";

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> TrackerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> TrackerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_transactions (
                hash VARCHAR(66) PRIMARY KEY,
                method_id VARCHAR(16) NOT NULL,
                src_chain_id BIGINT NOT NULL,
                symbol VARCHAR(16) NOT NULL,
                initial_amount TEXT NOT NULL,
                hop_status JSONB NOT NULL,
                shift_status JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bridge_transactions_hop_stage
            ON bridge_transactions ((hop_status->>'stage'))
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> TrackerResult<BridgeTransactionRecord> {
        let hop_status: serde_json::Value = row.try_get("hop_status")?;
        let shift_status: serde_json::Value = row.try_get("shift_status")?;

        Ok(BridgeTransactionRecord {
            hash: row.try_get("hash")?,
            method_id: row.try_get("method_id")?,
            src_chain_id: row.try_get::<i64, _>("src_chain_id")? as u64,
            symbol: row.try_get("symbol")?,
            initial_amount: row.try_get("initial_amount")?,
            hop_status: serde_json::from_value(hop_status)?,
            shift_status: serde_json::from_value(shift_status)?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl TransactionStore for StateManager {
    async fn get(&self, hash: &str) -> TrackerResult<Option<BridgeTransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bridge_transactions WHERE hash = $1",
            RECORD_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn create(&self, record: BridgeTransactionRecord) -> TrackerResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO bridge_transactions
                (hash, method_id, src_chain_id, symbol, initial_amount,
                 hop_status, shift_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (hash) DO NOTHING
            "#,
        )
        .bind(&record.hash)
        .bind(&record.method_id)
        .bind(record.src_chain_id as i64)
        .bind(&record.symbol)
        .bind(&record.initial_amount)
        .bind(serde_json::to_value(&record.hop_status)?)
        .bind(serde_json::to_value(&record.shift_status)?)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrackerError::DuplicateTransaction { hash: record.hash });
        }

        debug!("Stored bridge transaction {}", record.hash);
        Ok(())
    }

    async fn persist(&self, update: RecordUpdate) -> TrackerResult<BridgeTransactionRecord> {
        let hop_status = update.hop_status.as_ref().map(serde_json::to_value).transpose()?;
        let shift_status = update
            .shift_status
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE bridge_transactions
            SET hop_status = COALESCE($2, hop_status),
                shift_status = COALESCE($3, shift_status),
                updated_at = NOW()
            WHERE hash = $1
            RETURNING {}
            "#,
            RECORD_COLUMNS
        ))
        .bind(&update.hash)
        .bind(hop_status)
        .bind(shift_status)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::record_from_row(&row),
            None => Err(TrackerError::TransactionNotFound { hash: update.hash }),
        }
    }

    async fn health_check(&self) -> TrackerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn stage_counts(&self) -> TrackerResult<Vec<(HopStage, u64)>> {
        let rows = sqlx::query(
            r#"
            SELECT hop_status->>'stage' AS stage, COUNT(*) AS count
            FROM bridge_transactions
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in rows {
            let stage: Option<String> = row.try_get("stage")?;
            let count: i64 = row.try_get("count")?;

            match stage.map(|s| serde_json::from_value::<HopStage>(serde_json::Value::String(s))) {
                Some(Ok(stage)) => counts.push((stage, count as u64)),
                _ => warn!("Skipping {} records with an unknown relay stage", count),
            }
        }

        Ok(counts)
    }
}
