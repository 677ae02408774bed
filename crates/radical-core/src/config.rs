//! Centralized configuration for radical peers.
//!
//! Naming conventions for queue keys and reply channels, timing defaults and
//! pool sizing live here so both transports agree on them.

use std::time::Duration;

/// Queue and channel naming.
pub struct QueueConfig;

impl QueueConfig {
    pub const DEFAULT_QUEUE: &'static str = "default";

    /// Prefix for Redis list keys and pub/sub channels.
    pub const LIST_PREFIX: &'static str = "radical:";

    /// Prefix for PostgreSQL queue tables and NOTIFY channels.
    pub const TABLE_PREFIX: &'static str = "radical_";

    /// Reserved introspection method, always registered on every worker.
    pub const INSPECT_METHOD: &'static str = "_inspect";

    /// PostgreSQL table holding replies too large for a NOTIFY payload. The
    /// `:` keeps it apart from every queue table.
    pub const REPLY_TABLE: &'static str = "radical:replies";

    /// PostgreSQL identifiers are capped at 63 bytes.
    pub const MAX_TABLE_QUEUE_NAME_LEN: usize = 63 - Self::TABLE_PREFIX.len();
}

/// Timing and connection settings.
pub struct NetworkConfig;

impl NetworkConfig {
    /// How long a wait-call blocks for its reply unless the URL overrides it.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Upper bound on a single accept attempt, so the scheduler can observe
    /// shutdown between polls.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Pause after a failed pop before the next attempt.
    pub const TRANSIENT_BACKOFF: Duration = Duration::from_secs(1);

    /// At least one connection for the blocking pop plus one for replies.
    pub const POOL_SIZE: usize = 4;

    /// PostgreSQL rejects NOTIFY payloads of 8000 bytes or more.
    pub const MAX_NOTIFY_PAYLOAD: usize = 7999;

    /// Stored replies nobody collected are removed after this long.
    pub const STORED_REPLY_TTL: Duration = Duration::from_secs(3600);

    /// Query parameter carrying the request timeout in seconds.
    pub const REQUEST_TIMEOUT_PARAM: &'static str = "request_timeout";

    pub const SEND_RETRY_ATTEMPTS: u32 = 3;
    pub const SEND_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
    pub const SEND_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_bounded() {
        assert!(NetworkConfig::POLL_INTERVAL <= Duration::from_secs(1));
        assert!(NetworkConfig::DEFAULT_REQUEST_TIMEOUT > NetworkConfig::POLL_INTERVAL);
    }

    #[test]
    fn test_pool_has_room_for_pop_and_reply() {
        assert!(NetworkConfig::POOL_SIZE >= 2);
    }

    #[test]
    fn test_table_name_fits_identifier_limit() {
        assert_eq!(
            QueueConfig::TABLE_PREFIX.len() + QueueConfig::MAX_TABLE_QUEUE_NAME_LEN,
            63
        );
    }
}
