//! PostgreSQL queue store
//!
//! Each queue is a set of rows ordered by `position`. Mutating operations take
//! a transaction-scoped advisory lock keyed on the queue name, so every
//! operation is atomic with respect to the others on the same queue.

use super::QueueStore;
use crate::config::QueueConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

/// Queue store for PostgreSQL persistence
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    /// Connect to the database
    pub async fn new(config: &QueueConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the queue table if needed
    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id BIGSERIAL PRIMARY KEY,
                queue VARCHAR(128) NOT NULL,
                position BIGINT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_items_queue_position
            ON queue_items (queue, position)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Queue migrations complete");
        Ok(())
    }

    /// Begin a transaction holding the queue's advisory lock
    async fn locked(&self, queue: &str) -> RelayerResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(queue)
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn delete_at(&self, queue: &str, offset: i64) -> RelayerResult<Option<String>> {
        let mut tx = self.locked(queue).await?;
        let row = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue = $1
                ORDER BY position
                OFFSET $2
                LIMIT 1
            )
            RETURNING payload
            "#,
        )
        .bind(queue)
        .bind(offset)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(row.map(|r| r.get::<String, _>("payload")))
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn push(&self, queue: &str, item: String) -> RelayerResult<()> {
        let mut tx = self.locked(queue).await?;
        sqlx::query(
            r#"
            INSERT INTO queue_items (queue, position, payload)
            SELECT $1, COALESCE(MAX(position), 0) + 1, $2
            FROM queue_items
            WHERE queue = $1
            "#,
        )
        .bind(queue)
        .bind(&item)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!("Pushed item to {}", queue);
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> RelayerResult<Option<String>> {
        self.delete_at(queue, 0).await
    }

    async fn peek_head(&self, queue: &str) -> RelayerResult<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT payload FROM queue_items
            WHERE queue = $1
            ORDER BY position
            LIMIT 1
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get::<String, _>("payload")))
    }

    async fn remove_at(&self, queue: &str, index: usize) -> RelayerResult<Option<String>> {
        let offset = i64::try_from(index).map_err(|_| RelayerError::Queue {
            queue: queue.to_string(),
            message: format!("index {} out of range", index),
        })?;
        self.delete_at(queue, offset).await
    }

    async fn rotate(&self, queue: &str) -> RelayerResult<()> {
        let mut tx = self.locked(queue).await?;
        sqlx::query(
            r#"
            UPDATE queue_items
            SET position = (SELECT MAX(position) + 1 FROM queue_items WHERE queue = $1)
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue = $1
                ORDER BY position
                LIMIT 1
            )
            "#,
        )
        .bind(queue)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn len(&self, queue: &str) -> RelayerResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS len FROM queue_items WHERE queue = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get::<i64, _>("len") as usize)
    }

    async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
