//! Redis-based ticket registry.
//!
//! # Architecture
//!
//! Each ticket is a hash at `cas:ticket:{ticket_id}` with three fields:
//!
//! - `kind`: discriminator (`TGT`, `ST`, `PGT`, `PT`)
//! - `version`: compare-and-swap counter
//! - `body`: JSON-serialized [`Ticket`]
//!
//! Adds and updates run as Lua scripts so the existence/version check and
//! the write happen in one server-side step. Streaming walks the keyspace
//! with `SCAN`, which is lazy and never materializes the whole registry.
//!
//! When backend expiry is enabled, every write sets `PEXPIREAT` to the
//! ticket's deadline plus a grace period as a backstop to the cleaner.
//!
//! # Example
//!
//! ```no_run
//! use sso_broker_tickets::config::RegistryConfig;
//! use sso_broker_tickets::stores::RedisTicketRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RedisTicketRegistry::new("redis://127.0.0.1:6379", RegistryConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RegistryConfig;
use crate::constants::keys::TICKET_KEY_PREFIX;
use crate::error::{Result, TicketError};
use crate::ids::{TicketId, TicketKind};
use crate::providers::TicketRegistry;
use crate::ticket::Ticket;
use futures::stream::BoxStream;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};

const ADD_SCRIPT: &str = r"
    if redis.call('EXISTS', KEYS[1]) == 1 then
        return 0
    end
    redis.call('HSET', KEYS[1], 'kind', ARGV[1], 'version', ARGV[2], 'body', ARGV[3])
    if tonumber(ARGV[4]) > 0 then
        redis.call('PEXPIREAT', KEYS[1], ARGV[4])
    end
    return 1
";

const UPDATE_SCRIPT: &str = r"
    local current = redis.call('HGET', KEYS[1], 'version')
    if not current then
        return -1
    end
    if current ~= ARGV[1] then
        return 0
    end
    redis.call('HSET', KEYS[1], 'version', ARGV[2], 'body', ARGV[3])
    if tonumber(ARGV[4]) > 0 then
        redis.call('PEXPIREAT', KEYS[1], ARGV[4])
    end
    return 1
";

/// `Redis` ticket registry.
///
/// # Thread Safety
///
/// This type is `Clone`; clones share the same `ConnectionManager`.
#[derive(Clone)]
pub struct RedisTicketRegistry {
    conn_manager: ConnectionManager,
    config: RegistryConfig,
}

impl RedisTicketRegistry {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] if the URL is malformed
    /// or the connection cannot be established within the operation timeout.
    pub async fn new(redis_url: &str, config: RegistryConfig) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            TicketError::RegistryUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager =
            super::bounded("connect", config.operation_timeout, ConnectionManager::new(client)).await?;

        tracing::info!("RedisTicketRegistry initialized successfully");

        Ok(Self {
            conn_manager,
            config,
        })
    }

    /// `cas:ticket:{ticket_id}`
    fn ticket_key(id: &TicketId) -> String {
        format!("{TICKET_KEY_PREFIX}{id}")
    }

    fn key_pattern(kind: Option<TicketKind>) -> String {
        kind.map_or_else(
            || format!("{TICKET_KEY_PREFIX}*"),
            |kind| format!("{TICKET_KEY_PREFIX}{}-*", kind.prefix()),
        )
    }

    /// Milliseconds timestamp for `PEXPIREAT`, or 0 for none.
    fn expiry_millis(&self, ticket: &Ticket) -> i64 {
        if !self.config.backend_expiry {
            return 0;
        }
        ticket
            .backend_expiry()
            .map_or(0, |deadline| deadline.timestamp_millis().max(1))
    }

    /// Run one backend call under the operation timeout.
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl std::future::Future<Output = RedisResult<T>> + Send,
    ) -> Result<T> {
        super::bounded(operation, self.config.operation_timeout, call).await
    }

    async fn scan_page(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn_manager.clone();
        let mut command = redis::cmd("SCAN");
        command
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(self.config.scan_batch_size);

        self.bounded("SCAN", async move { command.query_async(&mut conn).await })
            .await
    }
}

impl TicketRegistry for RedisTicketRegistry {
    async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::ticket_key(ticket.id());
        let body = serde_json::to_string(ticket)
            .map_err(|e| TicketError::SerializationError(e.to_string()))?;
        let expiry = self.expiry_millis(ticket);

        let script = redis::Script::new(ADD_SCRIPT);
        let mut invocation = script.key(&key);
        invocation
            .arg(ticket.kind().prefix())
            .arg(ticket.version())
            .arg(body)
            .arg(expiry);

        let added: i64 = self
            .bounded("add", async move { invocation.invoke_async(&mut conn).await })
            .await?;

        if added == 0 {
            tracing::error!(ticket_id = %ticket.id(), "Ticket id collision");
            return Err(TicketError::TicketAlreadyExists {
                id: ticket.id().clone(),
            });
        }

        tracing::debug!(ticket_id = %ticket.id(), expires_at_ms = expiry, "Stored ticket in Redis");
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let mut conn = self.conn_manager.clone();
        let key = Self::ticket_key(id);

        let (version, body): (Option<u64>, Option<String>) = self
            .bounded("get", async move {
                redis::cmd("HMGET")
                    .arg(&key)
                    .arg("version")
                    .arg("body")
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let (Some(version), Some(body)) = (version, body) else {
            return Ok(None);
        };

        let mut ticket: Ticket = serde_json::from_str(&body)
            .map_err(|e| TicketError::SerializationError(e.to_string()))?;
        ticket.set_version(version);
        Ok(Some(ticket))
    }

    async fn update_ticket(&self, ticket: &mut Ticket) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::ticket_key(ticket.id());
        let next_version = ticket.version() + 1;

        let mut stored = ticket.clone();
        stored.set_version(next_version);
        let body = serde_json::to_string(&stored)
            .map_err(|e| TicketError::SerializationError(e.to_string()))?;
        let expiry = self.expiry_millis(ticket);

        let script = redis::Script::new(UPDATE_SCRIPT);
        let mut invocation = script.key(&key);
        invocation
            .arg(ticket.version())
            .arg(next_version)
            .arg(body)
            .arg(expiry);

        let outcome: i64 = self
            .bounded("update", async move { invocation.invoke_async(&mut conn).await })
            .await?;

        match outcome {
            1 => {
                ticket.set_version(next_version);
                Ok(())
            }
            0 => Err(TicketError::ConcurrentModification {
                id: ticket.id().clone(),
            }),
            _ => Err(TicketError::InvalidTicket {
                id: ticket.id().clone(),
            }),
        }
    }

    async fn delete_single_ticket(&self, id: &TicketId) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let key = Self::ticket_key(id);

        let deleted: i64 = self
            .bounded("delete", async move { conn.del(&key).await })
            .await?;

        if deleted > 0 {
            tracing::debug!(ticket_id = %id, "Deleted ticket from Redis");
        } else {
            tracing::trace!(ticket_id = %id, "Ticket delete: key not found");
        }

        Ok(deleted > 0)
    }

    fn get_tickets_stream(&self) -> BoxStream<'_, Result<Ticket>> {
        let pattern = Self::key_pattern(None);

        Box::pin(async_stream::try_stream! {
            let mut cursor = 0_u64;
            loop {
                let (next, keys) = self.scan_page(cursor, &pattern).await?;
                for key in keys {
                    let Some(id) = key.strip_prefix(TICKET_KEY_PREFIX) else {
                        continue;
                    };
                    // dropped between SCAN and the read
                    if let Some(ticket) = self.get_ticket(&TicketId::from(id)).await? {
                        yield ticket;
                    }
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        })
    }

    async fn count_tickets_of_kind(&self, kind: TicketKind) -> Result<usize> {
        let pattern = Self::key_pattern(Some(kind));
        let mut cursor = 0_u64;
        let mut count = 0;

        loop {
            let (next, keys) = self.scan_page(cursor, &pattern).await?;
            count += keys.len();
            if next == 0 {
                return Ok(count);
            }
            cursor = next;
        }
    }
}

impl std::fmt::Debug for RedisTicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTicketRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TicketConfig;
    use crate::factory::TicketFactory;
    use futures::TryStreamExt;
    use sso_broker_core::environment::SystemClock;
    use sso_broker_testing::fixtures;
    use std::sync::Arc;

    fn factory() -> TicketFactory {
        TicketFactory::new(&TicketConfig::default(), Arc::new(SystemClock))
    }

    #[allow(clippy::expect_used)] // Test code
    async fn registry() -> RedisTicketRegistry {
        RedisTicketRegistry::new("redis://127.0.0.1:6379", RegistryConfig::default())
            .await
            .expect("Failed to create registry")
    }

    #[test]
    fn test_key_namespacing() {
        assert_eq!(
            RedisTicketRegistry::ticket_key(&TicketId::from("TGT-1-abc")),
            "cas:ticket:TGT-1-abc"
        );
        assert_eq!(
            RedisTicketRegistry::key_pattern(Some(TicketKind::Service)),
            "cas:ticket:ST-*"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running at localhost:6379
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_redis_ticket_lifecycle() {
        let registry = registry().await;
        let factory = factory();
        let mut tgt = factory.create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()));
        let st = factory
            .create_service_ticket(&mut tgt, &fixtures::app_service(), false)
            .unwrap();

        registry.add_ticket(&tgt).await.unwrap();
        registry.add_ticket(&st).await.unwrap();
        assert!(matches!(
            registry.add_ticket(&st).await,
            Err(TicketError::TicketAlreadyExists { .. })
        ));

        let loaded = registry.get_ticket(st.id()).await.unwrap().unwrap();
        assert_eq!(loaded, st);

        let report = registry.delete_ticket(tgt.id()).await.unwrap();
        assert_eq!(report.removed(), 2);
        assert!(registry.get_ticket(st.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_atomic_update() {
        let registry = registry().await;
        let mut tgt = factory().create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()));
        registry.add_ticket(&tgt).await.unwrap();

        // Spawn 10 concurrent tasks updating from the same snapshot
        let mut handles = vec![];
        for _ in 0..10 {
            let registry = registry.clone();
            let mut snapshot = tgt.clone();
            handles.push(tokio::spawn(async move {
                snapshot.record_use(chrono::Utc::now());
                registry.update_ticket(&mut snapshot).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1, "Exactly one update should win the version check");

        registry.delete_single_ticket(tgt.id()).await.unwrap();
        assert!(matches!(
            registry.update_ticket(&mut tgt).await,
            Err(TicketError::InvalidTicket { .. })
        ));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_stream_visits_stored_tickets() {
        let registry = registry().await;
        let tgt = factory().create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()));
        registry.add_ticket(&tgt).await.unwrap();

        let streamed: Vec<Ticket> = registry.get_tickets_stream().try_collect().await.unwrap();
        assert!(streamed.iter().any(|ticket| ticket.id() == tgt.id()));
        assert!(registry.count_tickets_of_kind(TicketKind::TicketGranting).await.unwrap() >= 1);

        registry.delete_single_ticket(tgt.id()).await.unwrap();
    }
}
