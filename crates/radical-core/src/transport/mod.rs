//! Queue transports.
//!
//! A transport moves opaque payloads: requests go into a named queue, replies
//! go to a channel named after the caller's correlation token.
//!
//! # Implementations
//!
//! - [`RedisTransport`]: list per queue (`RPUSH`/`BLPOP`) plus pub/sub replies
//! - [`PostgresTransport`]: table per queue under an advisory lock plus
//!   `LISTEN`/`NOTIFY` replies
//! - [`MemoryTransport`]: in-process broker for tests and single-process use
//!
//! # Reply ordering
//!
//! [`Transport::get_response`] attaches the listener before it returns. The
//! client sends the request only afterwards, so a reply can never be
//! published into a channel nobody is listening on yet.

mod memory;
mod postgres;
mod redis;

pub use self::memory::{MemoryBroker, MemoryTransport};
pub use self::postgres::PostgresTransport;
pub use self::redis::RedisTransport;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RadicalError, Result};
use crate::retry::RetryConfig;

/// A reply that has been subscribed to but not yet received.
///
/// Resolves with the raw reply payload or fails with
/// [`RadicalError::Timeout`]. Dropping it tears the listener down.
pub type PendingReply = BoxFuture<'static, Result<Vec<u8>>>;

/// Moves request and reply payloads through a backing store.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Acquire connections and prepare the peer's own queue.
    async fn start(&self) -> Result<()>;

    /// Release every connection. Calling it twice is a no-op.
    async fn stop(&self) -> Result<()>;

    /// Append a request payload to `queue_name`.
    ///
    /// Transient failures are retried; an error means the payload was not
    /// queued.
    async fn send_to(&self, queue_name: &str, payload: &[u8]) -> Result<()>;

    /// Pop the next payload from the peer's own queue.
    ///
    /// Waits at most the poll interval and returns `Ok(None)` when nothing
    /// arrived, including after a transient store error.
    async fn get_next_request(&self) -> Result<Option<Vec<u8>>>;

    /// Publish a reply payload for `token`.
    async fn reply_to(&self, token: &str, payload: &[u8]) -> Result<()>;

    /// Start listening for the reply to `token`.
    ///
    /// The listener is attached when this returns.
    async fn get_response(&self, token: &str) -> Result<PendingReply>;
}

/// Available transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    #[default]
    Redis,
    Postgres,
    Memory,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Redis => "redis",
            TransportKind::Postgres => "postgres",
            TransportKind::Memory => "memory",
        }
    }

    /// Instantiate the transport. No connection is made until `start`.
    pub fn create(&self, settings: TransportSettings) -> Result<Arc<dyn Transport>> {
        Ok(match self {
            TransportKind::Redis => Arc::new(RedisTransport::new(settings)?),
            TransportKind::Postgres => Arc::new(PostgresTransport::new(settings)?),
            TransportKind::Memory => Arc::new(MemoryTransport::new(settings)?),
        })
    }
}

impl FromStr for TransportKind {
    type Err = RadicalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "redis" | "radical.transports.redis:redistransport" => Ok(TransportKind::Redis),
            "postgres" | "postgresql" | "radical.transports.postgres:postgrestransport" => {
                Ok(TransportKind::Postgres)
            }
            "memory" => Ok(TransportKind::Memory),
            _ => Err(RadicalError::UnknownTransport(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a transport needs to know about its peer.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Store URL with radical's own query parameters removed.
    pub url: String,
    /// Queue this peer pops from.
    pub queue_name: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub send_retry: RetryConfig,
}

/// Check that a queue name can be used as part of a SQL identifier.
pub(crate) fn validate_table_queue_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| RadicalError::InvalidQueueName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > crate::config::QueueConfig::MAX_TABLE_QUEUE_NAME_LEN {
        return Err(invalid("too long for a table name"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid("only ASCII letters, digits and '_' are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("redis".parse::<TransportKind>().unwrap(), TransportKind::Redis);
        assert_eq!(
            "PostgreSQL".parse::<TransportKind>().unwrap(),
            TransportKind::Postgres
        );
        assert_eq!(
            "radical.transports.postgres:PostgresTransport"
                .parse::<TransportKind>()
                .unwrap(),
            TransportKind::Postgres
        );
        assert!(matches!(
            "amqp".parse::<TransportKind>(),
            Err(RadicalError::UnknownTransport(_))
        ));
    }

    #[test]
    fn test_default_kind_is_redis() {
        assert_eq!(TransportKind::default(), TransportKind::Redis);
    }

    #[test]
    fn test_table_queue_names() {
        assert!(validate_table_queue_name("default").is_ok());
        assert!(validate_table_queue_name("jobs_2").is_ok());
        assert!(validate_table_queue_name("").is_err());
        assert!(validate_table_queue_name("drop table; --").is_err());
        assert!(validate_table_queue_name("Ünïcode").is_err());
        assert!(validate_table_queue_name(&"q".repeat(60)).is_err());
    }
}
