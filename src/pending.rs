// src/pending.rs

//! The `pending_payment` record that survives the external payment redirect.
//!
//! There is at most one such record: it is written when checkout starts,
//! read when the user comes back, and deleted on a terminal payment outcome.

use async_trait::async_trait;
use log::{debug, info};
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::errors::{FlowError, Result};
use crate::models::{PendingPayment, TransactionId};

pub const PENDING_PAYMENT_KEY: &str = "pending_payment";

#[async_trait]
pub trait PendingPaymentStore: Send + Sync {
    async fn save(&self, record: &PendingPayment) -> Result<()>;

    async fn load(&self) -> Result<Option<PendingPayment>>;

    async fn clear(&self) -> Result<()>;
}

/// Creates the database file if needed, connects and runs migrations.
pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let db_path = db_path(database_url)?;

    // Create parent directory BEFORE attempting to connect
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
        debug!("Ensured database directory: {}", parent.display());
    }

    let absolute_path = if db_path.is_relative() {
        std::env::current_dir()?.join(&db_path)
    } else {
        db_path
    };

    let db_url = format!("sqlite://{}?mode=rwc", absolute_path.display());
    info!("📦 Connecting to: {}", db_url);

    let pool = SqlitePoolOptions::new().max_connections(5).connect(&db_url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| FlowError::Database(e.into()))?;
    debug!("Database migrations completed");
    Ok(())
}

fn db_path(database_url: &str) -> Result<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .ok_or_else(|| FlowError::Config("DATABASE_URL must start with 'sqlite:'".to_string()))?;
    Ok(PathBuf::from(path))
}

pub struct SqlitePendingStore {
    pool: SqlitePool,
}

impl SqlitePendingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingPaymentStore for SqlitePendingStore {
    async fn save(&self, record: &PendingPayment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_records (key, transaction_id, plan_name, amount, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                transaction_id = excluded.transaction_id,
                plan_name = excluded.plan_name,
                amount = excluded.amount,
                created_at = excluded.created_at
            "#,
        )
        .bind(PENDING_PAYMENT_KEY)
        .bind(record.transaction_id.as_str())
        .bind(&record.plan_name)
        .bind(record.amount)
        .bind(&record.created_at)
        .execute(&self.pool)
        .await?;

        debug!("💾 Saved pending payment {}", record.transaction_id);
        Ok(())
    }

    async fn load(&self) -> Result<Option<PendingPayment>> {
        let row = sqlx::query(
            r#"
            SELECT transaction_id, plan_name, amount, created_at
            FROM pending_records
            WHERE key = ?
            "#,
        )
        .bind(PENDING_PAYMENT_KEY)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| PendingPayment {
            transaction_id: TransactionId::new(row.get::<String, _>(0)),
            plan_name: row.get(1),
            amount: row.get(2),
            created_at: row.get(3),
        }))
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM pending_records WHERE key = ?")
            .bind(PENDING_PAYMENT_KEY)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryPendingStore {
    slot: Mutex<Option<PendingPayment>>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingPaymentStore for MemoryPendingStore {
    async fn save(&self, record: &PendingPayment) -> Result<()> {
        *self.slot.lock().await = Some(record.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PendingPayment>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.slot.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, plan: &str) -> PendingPayment {
        PendingPayment {
            transaction_id: TransactionId::new(id),
            plan_name: Some(plan.to_string()),
            amount: Some(499.0),
            created_at: "2026-10-18T10:00:00+00:00".to_string(),
        }
    }

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sqlite_store_lifecycle() {
        let store = SqlitePendingStore::new(memory_pool().await);
        assert_eq!(store.load().await.unwrap(), None);

        store.save(&record("t1", "Pro")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(record("t1", "Pro")));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sqlite_store_keeps_a_single_record() {
        let store = SqlitePendingStore::new(memory_pool().await);
        store.save(&record("t1", "Basic")).await.unwrap();
        store.save(&record("t2", "Pro")).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.transaction_id.as_str(), "t2");
        assert_eq!(loaded.plan_name.as_deref(), Some("Pro"));
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryPendingStore::new();
        store.save(&record("t1", "Pro")).await.unwrap();
        assert!(store.load().await.unwrap().is_some());
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[test]
    fn test_db_path_requires_sqlite_scheme() {
        assert_eq!(db_path("sqlite:data/flows.db").unwrap(), PathBuf::from("data/flows.db"));
        assert_eq!(db_path("sqlite:///tmp/flows.db").unwrap(), PathBuf::from("/tmp/flows.db"));
        assert!(matches!(db_path("postgres://x"), Err(FlowError::Config(_))));
    }
}
