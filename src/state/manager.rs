//! SQLite attempt journal

use crate::bridge::CorrelationId;
use crate::config::JournalConfig;
use crate::coordination::attempt::TransferAttempt;
use crate::error::{BridgeError, BridgeResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Phase recorded when an attempt is cancelled back to idle
pub const PHASE_CANCELLED: &str = "cancelled";

/// One snapshot of an attempt, as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub correlation_id: CorrelationId,
    /// A transfer state name or `cancelled`
    pub phase: String,
    pub amount: String,
    pub value: Option<U256>,
    pub source_account: Address,
    pub destination: String,
    pub approval_tx: Option<H256>,
    pub deposit_tx: Option<H256>,
    pub destination_tx: Option<String>,
    pub poll_count: u32,
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn from_attempt(attempt: &TransferAttempt, phase: &str) -> Self {
        Self {
            correlation_id: attempt.correlation_id,
            phase: phase.to_string(),
            amount: attempt.request.amount.clone(),
            value: attempt.value,
            source_account: attempt.request.source_account,
            destination: attempt.request.destination_address.clone(),
            approval_tx: attempt.approval_tx,
            deposit_tx: attempt.deposit_tx,
            destination_tx: attempt.destination_tx.clone(),
            poll_count: attempt.poll_count,
            error_kind: attempt.error.as_ref().map(|e| e.kind().to_string()),
            error: attempt.error.as_ref().map(|e| e.to_string()),
            recorded_at: Utc::now(),
        }
    }

    fn from_row(row: &SqliteRow) -> BridgeResult<Self> {
        let correlation_id = CorrelationId::from_hex(&row.get::<String, _>("correlation_id"))?;
        let value = row
            .get::<Option<String>, _>("value")
            .map(|v| {
                U256::from_dec_str(&v)
                    .map_err(|e| BridgeError::Internal(format!("bad stored value {}: {}", v, e)))
            })
            .transpose()?;

        Ok(Self {
            correlation_id,
            phase: row.get("phase"),
            amount: row.get("amount"),
            value,
            source_account: parse_hex(&row.get::<String, _>("source_account"))?,
            destination: row.get("destination"),
            approval_tx: parse_optional_hex(row.get("approval_tx"))?,
            deposit_tx: parse_optional_hex(row.get("deposit_tx"))?,
            destination_tx: row.get("destination_tx"),
            poll_count: row.get::<i64, _>("poll_count") as u32,
            error_kind: row.get("error_kind"),
            error: row.get("error"),
            recorded_at: row.get("recorded_at"),
        })
    }
}

fn parse_hex<T: FromStr>(text: &str) -> BridgeResult<T>
where
    T::Err: std::fmt::Display,
{
    T::from_str(text).map_err(|e| BridgeError::Internal(format!("bad stored hex {}: {}", text, e)))
}

fn parse_optional_hex<T: FromStr>(text: Option<String>) -> BridgeResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    text.as_deref().map(parse_hex).transpose()
}

/// Append-only log of attempt snapshots keyed by correlation id
pub struct AttemptJournal {
    pool: SqlitePool,
}

impl AttemptJournal {
    /// Open the journal described by `config`
    pub async fn new(config: &JournalConfig) -> BridgeResult<Self> {
        Self::connect(&config.url, config.max_connections).await
    }

    pub async fn connect(url: &str, max_connections: u32) -> BridgeResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables if missing
    pub async fn run_migrations(&self) -> BridgeResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                correlation_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                amount TEXT NOT NULL,
                value TEXT,
                source_account TEXT NOT NULL,
                destination TEXT NOT NULL,
                approval_tx TEXT,
                deposit_tx TEXT,
                destination_tx TEXT,
                poll_count INTEGER NOT NULL DEFAULT 0,
                error_kind TEXT,
                error TEXT,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_attempts_correlation
            ON transfer_attempts (correlation_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Attempt journal migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> BridgeResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Append one snapshot
    pub async fn append(&self, record: &AttemptRecord) -> BridgeResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_attempts
                (correlation_id, phase, amount, value, source_account, destination,
                 approval_tx, deposit_tx, destination_tx, poll_count, error_kind, error,
                 recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(record.correlation_id.to_hex())
        .bind(&record.phase)
        .bind(&record.amount)
        .bind(record.value.map(|v| v.to_string()))
        .bind(format!("{:?}", record.source_account))
        .bind(&record.destination)
        .bind(record.approval_tx.map(|tx| format!("{:?}", tx)))
        .bind(record.deposit_tx.map(|tx| format!("{:?}", tx)))
        .bind(&record.destination_tx)
        .bind(record.poll_count as i64)
        .bind(&record.error_kind)
        .bind(&record.error)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        debug!("Journaled {} for {}", record.phase, record.correlation_id);
        Ok(())
    }

    /// Every snapshot of one attempt, oldest first
    pub async fn history(&self, correlation_id: &CorrelationId) -> BridgeResult<Vec<AttemptRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transfer_attempts
            WHERE correlation_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(correlation_id.to_hex())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(AttemptRecord::from_row).collect()
    }

    /// Most recent snapshot of any attempt
    pub async fn latest(&self) -> BridgeResult<Option<AttemptRecord>> {
        let row = sqlx::query("SELECT * FROM transfer_attempts ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(AttemptRecord::from_row).transpose()
    }
}
