//! `PostgreSQL` ticket registry.
//!
//! # Schema
//!
//! ```text
//! cas_tickets
//!   id          TEXT PRIMARY KEY
//!   kind        TEXT            -- TGT, ST, PGT, PT
//!   version     BIGINT          -- compare-and-swap counter
//!   body        JSONB           -- serialized ticket
//!   expires_at  TIMESTAMPTZ     -- backstop deadline, NULL when disabled
//! ```
//!
//! Updates are a single `UPDATE ... WHERE id = $1 AND version = $2`; a
//! zero row count means another writer won (or the row is gone). Rows past
//! `expires_at` are invisible to lookups and counts but still streamed, so
//! the cleaner removes them.
//!
//! # Example
//!
//! ```no_run
//! use sso_broker_postgres::PostgresTicketRegistry;
//! use sso_broker_tickets::config::RegistryConfig;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/cas").await?;
//! let registry = PostgresTicketRegistry::from_pool(pool, RegistryConfig::default());
//! registry.migrate().await?;
//! # Ok(())
//! # }
//! ```

use crate::bounded;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use sso_broker_tickets::config::RegistryConfig;
use sso_broker_tickets::{Result, Ticket, TicketError, TicketId, TicketKind, TicketRegistry};

/// `PostgreSQL` ticket registry.
///
/// Clones share the connection pool.
#[derive(Clone)]
pub struct PostgresTicketRegistry {
    pool: PgPool,
    config: RegistryConfig,
}

impl PostgresTicketRegistry {
    /// Connect a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] if the database cannot be
    /// reached within the operation timeout.
    pub async fn new(database_url: &str, config: RegistryConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .acquire_timeout(config.operation_timeout)
            .connect(database_url)
            .await
            .map_err(|e| crate::unavailable("connect", &e))?;

        tracing::info!("PostgresTicketRegistry initialized successfully");
        Ok(Self::from_pool(pool, config))
    }

    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool, config: RegistryConfig) -> Self {
        Self { pool, config }
    }

    /// Create the `cas_tickets` and `cas_locks` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| TicketError::RegistryUnavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying pool, shared with [`crate::PostgresLockingStrategy`].
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn expires_at(&self, ticket: &Ticket) -> Option<DateTime<Utc>> {
        if self.config.backend_expiry {
            ticket.backend_expiry()
        } else {
            None
        }
    }

    async fn fetch_page(&self, after: &str) -> Result<Vec<PgRow>> {
        let limit = i64::try_from(self.config.scan_batch_size.max(1)).unwrap_or(i64::MAX);
        bounded(
            "scan",
            self.config.operation_timeout,
            sqlx::query(
                r"
                SELECT id, version, body
                FROM cas_tickets
                WHERE id > $1
                ORDER BY id
                LIMIT $2
                ",
            )
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool),
        )
        .await
    }
}

fn encode_version(version: u64) -> Result<i64> {
    i64::try_from(version)
        .map_err(|_| TicketError::InternalError(format!("Ticket version {version} out of range")))
}

fn encode_body(ticket: &Ticket) -> Result<serde_json::Value> {
    serde_json::to_value(ticket).map_err(|e| TicketError::SerializationError(e.to_string()))
}

fn decode(row: &PgRow) -> Result<Ticket> {
    let version: i64 = row
        .try_get("version")
        .map_err(|e| TicketError::SerializationError(e.to_string()))?;
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| TicketError::SerializationError(e.to_string()))?;

    let mut ticket: Ticket =
        serde_json::from_value(body).map_err(|e| TicketError::SerializationError(e.to_string()))?;
    ticket.set_version(u64::try_from(version).unwrap_or_default());
    Ok(ticket)
}

impl TicketRegistry for PostgresTicketRegistry {
    async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        let result = bounded(
            "insert",
            self.config.operation_timeout,
            sqlx::query(
                r"
                INSERT INTO cas_tickets (id, kind, version, body, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(ticket.id().as_str())
            .bind(ticket.kind().prefix())
            .bind(encode_version(ticket.version())?)
            .bind(encode_body(ticket)?)
            .bind(self.expires_at(ticket))
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 0 {
            tracing::error!(ticket_id = %ticket.id(), "Ticket id collision");
            return Err(TicketError::TicketAlreadyExists {
                id: ticket.id().clone(),
            });
        }

        tracing::debug!(ticket_id = %ticket.id(), "Stored ticket in PostgreSQL");
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let row = bounded(
            "select",
            self.config.operation_timeout,
            sqlx::query(
                r"
                SELECT version, body
                FROM cas_tickets
                WHERE id = $1 AND (expires_at IS NULL OR expires_at > now())
                ",
            )
            .bind(id.as_str())
            .fetch_optional(&self.pool),
        )
        .await?;

        row.as_ref().map(decode).transpose()
    }

    async fn update_ticket(&self, ticket: &mut Ticket) -> Result<()> {
        let next_version = ticket.version() + 1;
        let mut stored = ticket.clone();
        stored.set_version(next_version);

        let result = bounded(
            "update",
            self.config.operation_timeout,
            sqlx::query(
                r"
                UPDATE cas_tickets
                SET version = $3, body = $4, expires_at = $5
                WHERE id = $1 AND version = $2
                ",
            )
            .bind(ticket.id().as_str())
            .bind(encode_version(ticket.version())?)
            .bind(encode_version(next_version)?)
            .bind(encode_body(&stored)?)
            .bind(self.expires_at(ticket))
            .execute(&self.pool),
        )
        .await?;

        if result.rows_affected() == 1 {
            ticket.set_version(next_version);
            return Ok(());
        }

        let (exists,): (bool,) = bounded(
            "select",
            self.config.operation_timeout,
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM cas_tickets WHERE id = $1)")
                .bind(ticket.id().as_str())
                .fetch_one(&self.pool),
        )
        .await?;

        if exists {
            metrics::counter!("registry.postgres.conflicts").increment(1);
            tracing::debug!(ticket_id = %ticket.id(), version = ticket.version(), "Stale ticket update");
            Err(TicketError::ConcurrentModification {
                id: ticket.id().clone(),
            })
        } else {
            Err(TicketError::InvalidTicket {
                id: ticket.id().clone(),
            })
        }
    }

    async fn delete_single_ticket(&self, id: &TicketId) -> Result<bool> {
        let result = bounded(
            "delete",
            self.config.operation_timeout,
            sqlx::query("DELETE FROM cas_tickets WHERE id = $1")
                .bind(id.as_str())
                .execute(&self.pool),
        )
        .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::debug!(ticket_id = %id, "Deleted ticket from PostgreSQL");
        }
        Ok(deleted)
    }

    fn get_tickets_stream(&self) -> BoxStream<'_, Result<Ticket>> {
        Box::pin(async_stream::try_stream! {
            let mut after = String::new();
            loop {
                let rows = self.fetch_page(&after).await?;
                let Some(last) = rows.last() else {
                    break;
                };
                after = last
                    .try_get("id")
                    .map_err(|e| TicketError::SerializationError(e.to_string()))?;

                let full_page = rows.len() >= self.config.scan_batch_size.max(1);
                for row in &rows {
                    yield decode(row)?;
                }
                if !full_page {
                    break;
                }
            }
        })
    }

    async fn count_tickets_of_kind(&self, kind: TicketKind) -> Result<usize> {
        let (count,): (i64,) = bounded(
            "count",
            self.config.operation_timeout,
            sqlx::query_as(
                r"
                SELECT COUNT(*)
                FROM cas_tickets
                WHERE kind = $1 AND (expires_at IS NULL OR expires_at > now())
                ",
            )
            .bind(kind.prefix())
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl std::fmt::Debug for PostgresTicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTicketRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
