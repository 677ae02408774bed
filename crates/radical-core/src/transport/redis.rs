//! Redis transport: one list per queue, pub/sub for replies.
//!
//! ```text
//! request:  RPUSH radical:<queue> <payload>   ->   BLPOP radical:<queue> <poll>
//! reply:    PUBLISH radical:<token> <payload> ->   SUBSCRIBE radical:<token>
//! ```
//!
//! The blocking pop gets a connection of its own. Commands on a multiplexed
//! connection are pipelined, so a `BLPOP` sharing the reply connection would
//! hold every `PUBLISH` behind it for up to a full poll interval.

use ::redis::aio::{MultiplexedConnection, PubSub};
use ::redis::Client;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

use super::{PendingReply, Transport, TransportSettings};
use crate::config::{NetworkConfig, QueueConfig};
use crate::error::{RadicalError, Result};
use crate::retry::{retry_async, RetryConfig};

/// List + pub/sub transport backed by Redis.
pub struct RedisTransport {
    client: Client,
    request_key: String,
    request_timeout: Duration,
    poll_interval: Duration,
    /// Applied to `RPUSH` and to reply subscriptions.
    send_retry: RetryConfig,
    /// Dedicated to `BLPOP`.
    pop_conn: Mutex<Option<MultiplexedConnection>>,
    /// Shared by `RPUSH` and `PUBLISH`.
    command_conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisTransport {
    pub fn new(settings: TransportSettings) -> Result<Self> {
        let client = Client::open(settings.url.as_str())?;
        Ok(Self {
            client,
            request_key: Self::key(&settings.queue_name),
            request_timeout: settings.request_timeout,
            poll_interval: settings.poll_interval,
            send_retry: settings.send_retry,
            pop_conn: Mutex::new(None),
            command_conn: RwLock::new(None),
        })
    }

    fn key(name: &str) -> String {
        format!("{}{}", QueueConfig::LIST_PREFIX, name)
    }

    /// `BLPOP` only takes whole seconds on older servers, so the poll
    /// interval is rounded up, to at least one second.
    fn blpop_timeout_secs(&self) -> u64 {
        (self.poll_interval.as_secs_f64().ceil() as u64).max(1)
    }

    async fn command_connection(&self) -> Result<MultiplexedConnection> {
        self.command_conn
            .read()
            .await
            .clone()
            .ok_or(RadicalError::NotStarted)
    }

    async fn push(&self, key: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.command_connection().await?;
        let length: i64 = ::redis::cmd("RPUSH")
            .arg(key)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!("RPUSH {} (length {})", key, length);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let mut guard = self.pop_conn.lock().await;
        let conn = guard.as_mut().ok_or(RadicalError::NotStarted)?;
        let popped: Option<(String, Vec<u8>)> = ::redis::cmd("BLPOP")
            .arg(&self.request_key)
            .arg(self.blpop_timeout_secs())
            .query_async(conn)
            .await?;
        Ok(popped.map(|(_, payload)| payload))
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn start(&self) -> Result<()> {
        let pop_conn = self.client.get_multiplexed_async_connection().await?;
        let command_conn = self.client.get_multiplexed_async_connection().await?;
        *self.pop_conn.lock().await = Some(pop_conn);
        *self.command_conn.write().await = Some(command_conn);
        debug!("Redis transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let had_pop = self.pop_conn.lock().await.take().is_some();
        let had_command = self.command_conn.write().await.take().is_some();
        if had_pop || had_command {
            debug!("Redis transport stopped");
        }
        Ok(())
    }

    async fn send_to(&self, queue_name: &str, payload: &[u8]) -> Result<()> {
        let key = Self::key(queue_name);
        retry_async(
            &self.send_retry,
            || self.push(&key, payload),
            RadicalError::is_retryable,
        )
        .await
    }

    async fn get_next_request(&self) -> Result<Option<Vec<u8>>> {
        match self.pop().await {
            Ok(Some(payload)) => {
                debug!("BLPOP {}", self.request_key);
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(RadicalError::NotStarted) => Err(RadicalError::NotStarted),
            Err(e) => {
                error!(
                    "{}, retrying in {:?}",
                    e,
                    NetworkConfig::TRANSIENT_BACKOFF
                );
                tokio::time::sleep(NetworkConfig::TRANSIENT_BACKOFF).await;
                Ok(None)
            }
        }
    }

    async fn reply_to(&self, token: &str, payload: &[u8]) -> Result<()> {
        let channel = Self::key(token);
        let mut conn = self.command_connection().await?;
        let receivers: i64 = ::redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!("PUBLISH {} ({} receivers)", channel, receivers);
        Ok(())
    }

    async fn get_response(&self, token: &str) -> Result<PendingReply> {
        let channel = Self::key(token);
        let timeout = self.request_timeout;

        let mut pubsub = retry_async(
            &self.send_retry,
            || self.subscribe(&channel),
            RadicalError::is_retryable,
        )
        .await?;
        debug!("SUBSCRIBE {}", channel);

        Ok(Box::pin(async move {
            let received = {
                let mut messages = pubsub.on_message();
                tokio::time::timeout(timeout, messages.next()).await
            };

            // Unsubscribe on every path; a failure here is reported, not hidden.
            pubsub.unsubscribe(&channel).await.map_err(|e| {
                RadicalError::Transport {
                    message: format!("failed to unsubscribe from {}: {}", channel, e),
                    transient: false,
                }
            })?;
            debug!("UNSUBSCRIBE {}", channel);

            match received {
                Ok(Some(message)) => Ok(message.get_payload_bytes().to_vec()),
                Ok(None) => Err(RadicalError::Transport {
                    message: format!("subscription to {} closed", channel),
                    transient: true,
                }),
                Err(_) => Err(RadicalError::Timeout(timeout)),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> TransportSettings {
        TransportSettings {
            url: url.to_string(),
            queue_name: "test".to_string(),
            request_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(250),
            send_retry: RetryConfig::none(),
        }
    }

    #[test]
    fn test_keys_use_prefix() {
        let transport = RedisTransport::new(settings("redis://127.0.0.1:6379/0")).unwrap();
        assert_eq!(transport.request_key, "radical:test");
        assert_eq!(RedisTransport::key("abc123"), "radical:abc123");
    }

    #[test]
    fn test_blpop_timeout_rounds_up() {
        let transport = RedisTransport::new(settings("redis://127.0.0.1:6379/0")).unwrap();
        assert_eq!(transport.blpop_timeout_secs(), 1);

        let mut slow = settings("redis://127.0.0.1:6379/0");
        slow.poll_interval = Duration::from_millis(1900);
        assert_eq!(RedisTransport::new(slow).unwrap().blpop_timeout_secs(), 2);

        let mut exact = settings("redis://127.0.0.1:6379/0");
        exact.poll_interval = Duration::from_secs(3);
        assert_eq!(RedisTransport::new(exact).unwrap().blpop_timeout_secs(), 3);
    }

    #[tokio::test]
    async fn test_subscribe_retries_refused_connection() {
        let mut settings = settings("redis://127.0.0.1:1/0");
        settings.send_retry = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(50))
            .with_jitter(false);
        let transport = RedisTransport::new(settings).unwrap();

        let begin = std::time::Instant::now();
        let err = match transport.get_response("abc").await {
            Ok(_) => panic!("nothing listens on port 1"),
            Err(e) => e,
        };
        assert!(err.is_retryable(), "{}", err);
        // Two backoff sleeps: 50ms, then 100ms.
        assert!(begin.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_rejects_non_redis_url() {
        assert!(RedisTransport::new(settings("http://127.0.0.1/")).is_err());
    }

    #[tokio::test]
    async fn test_operations_before_start_fail() {
        let transport = RedisTransport::new(settings("redis://127.0.0.1:6379/0")).unwrap();
        assert!(matches!(
            transport.get_next_request().await,
            Err(RadicalError::NotStarted)
        ));
        assert!(matches!(
            transport.send_to("test", b"payload").await,
            Err(RadicalError::NotStarted)
        ));
        // Stopping an unstarted transport is a no-op.
        assert!(transport.stop().await.is_ok());
    }
}
