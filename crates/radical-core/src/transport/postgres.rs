//! PostgreSQL transport: one table per queue, LISTEN/NOTIFY for replies.
//!
//! Queue tables are `radical_<queue>(id BIGSERIAL, data BYTEA)`. Every access
//! to a queue table happens inside a transaction holding the queue's advisory
//! lock (`pg_advisory_xact_lock`), which serializes table creation, pushes and
//! pops between workers and is released automatically on commit, rollback or
//! a dropped connection.
//!
//! Replies go through `pg_notify('radical_<token>', body)`. NOTIFY payloads
//! are text and shorter than 8000 bytes, so the body is the hex-encoded reply
//! when it fits. Larger replies are inserted into the shared
//! `"radical:replies"` table in the same transaction as the NOTIFY, whose body
//! is then `@<row id>`; the listener deletes the row as it reads it.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use futures::{stream, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_postgres::{AsyncMessage, NoTls, Notification};
use tracing::{debug, error, warn};

use super::{validate_table_queue_name, PendingReply, Transport, TransportSettings};
use crate::config::{NetworkConfig, QueueConfig};
use crate::error::{RadicalError, Result};
use crate::retry::{retry_async, RetryConfig};

/// Marks a NOTIFY body that names a row of the reply table.
const STORED_MARKER: char = '@';

/// What a reply NOTIFY carries.
#[derive(Debug, PartialEq)]
enum NotifyBody {
    Inline(Vec<u8>),
    Stored(i64),
}

impl NotifyBody {
    /// Hex body for `payload`, or `None` when it is too long for NOTIFY.
    fn inline(payload: &[u8]) -> Option<String> {
        (payload.len() * 2 <= NetworkConfig::MAX_NOTIFY_PAYLOAD).then(|| hex::encode(payload))
    }

    fn stored(id: i64) -> String {
        format!("{}{}", STORED_MARKER, id)
    }

    fn parse(body: &str) -> Result<Self> {
        match body.strip_prefix(STORED_MARKER) {
            Some(id) => id
                .parse()
                .map(NotifyBody::Stored)
                .map_err(|e| RadicalError::protocol(format!("invalid reply row id: {}", e))),
            None => hex::decode(body)
                .map(NotifyBody::Inline)
                .map_err(|e| RadicalError::protocol(format!("invalid NOTIFY payload: {}", e))),
        }
    }
}

/// Table + advisory lock + NOTIFY transport backed by PostgreSQL.
pub struct PostgresTransport {
    pg_config: tokio_postgres::Config,
    queue_name: String,
    request_timeout: Duration,
    poll_interval: Duration,
    send_retry: RetryConfig,
    pool: RwLock<Option<Pool>>,
    /// Queue tables known to exist, so `send_to` creates each at most once.
    known_tables: Mutex<HashSet<String>>,
}

impl PostgresTransport {
    pub fn new(settings: TransportSettings) -> Result<Self> {
        validate_table_queue_name(&settings.queue_name)?;
        let pg_config: tokio_postgres::Config = settings
            .url
            .parse()
            .map_err(|e| RadicalError::config(format!("invalid PostgreSQL URL: {}", e)))?;

        Ok(Self {
            pg_config,
            queue_name: settings.queue_name,
            request_timeout: settings.request_timeout,
            poll_interval: settings.poll_interval,
            send_retry: settings.send_retry,
            pool: RwLock::new(None),
            known_tables: Mutex::new(HashSet::new()),
        })
    }

    /// Quoted identifier for a queue table or notification channel.
    fn identifier(name: &str) -> String {
        format!("\"{}{}\"", QueueConfig::TABLE_PREFIX, name)
    }

    fn channel(token: &str) -> String {
        format!("{}{}", QueueConfig::TABLE_PREFIX, token)
    }

    fn reply_table() -> String {
        format!("\"{}\"", QueueConfig::REPLY_TABLE)
    }

    /// Advisory lock id for a queue: the first 8 bytes of SHA-256 of its name.
    pub(crate) fn lock_id(queue_name: &str) -> i64 {
        let digest = Sha256::digest(queue_name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_le_bytes(bytes)
    }

    async fn pool(&self) -> Result<Pool> {
        self.pool.read().await.clone().ok_or(RadicalError::NotStarted)
    }

    async fn ensure_table(&self, queue_name: &str) -> Result<()> {
        if self.known_tables.lock().await.contains(queue_name) {
            return Ok(());
        }

        let table = Self::identifier(queue_name);
        let pool = self.pool().await?;
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&Self::lock_id(queue_name)])
            .await?;
        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id BIGSERIAL PRIMARY KEY, data BYTEA NOT NULL)",
            table
        ))
        .await?;
        tx.commit().await?;

        debug!("Queue table {} ready", table);
        self.known_tables
            .lock()
            .await
            .insert(queue_name.to_string());
        Ok(())
    }

    async fn ensure_reply_table(&self) -> Result<()> {
        let pool = self.pool().await?;
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "SELECT pg_advisory_xact_lock($1)",
            &[&Self::lock_id(QueueConfig::REPLY_TABLE)],
        )
        .await?;
        tx.batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                id BIGSERIAL PRIMARY KEY, \
                token TEXT NOT NULL, \
                data BYTEA NOT NULL, \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now())",
            Self::reply_table()
        ))
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert a reply too large for NOTIFY and announce its row id.
    async fn store_reply(&self, token: &str, channel: &str, payload: &[u8]) -> Result<()> {
        let table = Self::reply_table();
        let pool = self.pool().await?;
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE created_at < now() - make_interval(secs => $1)",
                table
            ),
            &[&NetworkConfig::STORED_REPLY_TTL.as_secs_f64()],
        )
        .await?;
        let row = tx
            .query_one(
                &format!("INSERT INTO {} (token, data) VALUES ($1, $2) RETURNING id", table),
                &[&token, &payload],
            )
            .await?;
        let id: i64 = row.get(0);
        tx.execute("SELECT pg_notify($1, $2)", &[&channel, &NotifyBody::stored(id)])
            .await?;
        tx.commit().await?;

        debug!("Stored {} byte reply as row {}", payload.len(), id);
        Ok(())
    }

    /// Open a listening session on `channel`.
    ///
    /// LISTEN needs a session of its own for as long as the call waits, so
    /// this does not use the pool.
    async fn listen(
        &self,
        channel: &str,
    ) -> Result<(tokio_postgres::Client, mpsc::UnboundedReceiver<Notification>)> {
        let (client, mut connection) = self.pg_config.connect(NoTls).await?;
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let mut messages = Box::pin(stream::poll_fn(move |cx| connection.poll_message(cx)));
        tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(notification)) => {
                        if notify_tx.send(notification).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Listener connection failed: {}", e);
                        break;
                    }
                }
            }
        });

        client
            .batch_execute(&format!("LISTEN \"{}\"", channel))
            .await?;
        debug!("LISTEN {}", channel);
        Ok((client, notify_rx))
    }

    /// Turn a reply NOTIFY into the reply bytes, collecting a stored row.
    async fn read_reply(
        client: &tokio_postgres::Client,
        token: &str,
        body: &str,
    ) -> Result<Vec<u8>> {
        match NotifyBody::parse(body)? {
            NotifyBody::Inline(payload) => Ok(payload),
            NotifyBody::Stored(id) => {
                let row = client
                    .query_opt(
                        &format!(
                            "DELETE FROM {} WHERE id = $1 AND token = $2 RETURNING data",
                            Self::reply_table()
                        ),
                        &[&id, &token],
                    )
                    .await?;
                row.map(|row| row.get::<_, Vec<u8>>(0)).ok_or_else(|| {
                    RadicalError::protocol(format!("reply row {} is missing", id))
                })
            }
        }
    }

    async fn push(&self, queue_name: &str, payload: &[u8]) -> Result<()> {
        self.ensure_table(queue_name).await?;

        let table = Self::identifier(queue_name);
        let pool = self.pool().await?;
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&Self::lock_id(queue_name)])
            .await?;
        tx.execute(
            &format!("INSERT INTO {} (data) VALUES ($1)", table),
            &[&payload],
        )
        .await?;
        tx.commit().await?;

        debug!("Sending request to {}", queue_name);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Vec<u8>>> {
        let table = Self::identifier(&self.queue_name);
        let pool = self.pool().await?;
        let mut client = pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute(
            "SELECT pg_advisory_xact_lock($1)",
            &[&Self::lock_id(&self.queue_name)],
        )
        .await?;
        let row = tx
            .query_opt(
                &format!(
                    "DELETE FROM {table} WHERE id = (SELECT id FROM {table} ORDER BY id LIMIT 1) \
                     RETURNING data"
                ),
                &[],
            )
            .await?;
        tx.commit().await?;

        Ok(row.map(|row| row.get::<_, Vec<u8>>(0)))
    }
}

#[async_trait]
impl Transport for PostgresTransport {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn start(&self) -> Result<()> {
        let manager = Manager::from_config(
            self.pg_config.clone(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(NetworkConfig::POOL_SIZE)
            .build()
            .map_err(|e| RadicalError::config(format!("cannot build PostgreSQL pool: {}", e)))?;
        *self.pool.write().await = Some(pool);

        self.ensure_table(&self.queue_name).await?;
        self.ensure_reply_table().await?;
        debug!("Postgres transport started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
            self.known_tables.lock().await.clear();
            debug!("Postgres transport stopped");
        }
        Ok(())
    }

    async fn send_to(&self, queue_name: &str, payload: &[u8]) -> Result<()> {
        validate_table_queue_name(queue_name)?;
        retry_async(
            &self.send_retry,
            || self.push(queue_name, payload),
            RadicalError::is_retryable,
        )
        .await
    }

    async fn get_next_request(&self) -> Result<Option<Vec<u8>>> {
        match self.pop().await {
            Ok(Some(payload)) => {
                debug!("Received new request in queue table");
                Ok(Some(payload))
            }
            Ok(None) => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(None)
            }
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
        let channel = Self::channel(token);
        let Some(body) = NotifyBody::inline(payload) else {
            return self.store_reply(token, &channel, payload).await;
        };
        let pool = self.pool().await?;
        let client = pool.get().await?;
        client
            .execute("SELECT pg_notify($1, $2)", &[&channel, &body])
            .await?;
        debug!("NOTIFY {}", channel);
        Ok(())
    }

    async fn get_response(&self, token: &str) -> Result<PendingReply> {
        let channel = Self::channel(token);
        let timeout = self.request_timeout;
        let (client, mut notify_rx) = retry_async(
            &self.send_retry,
            || self.listen(&channel),
            RadicalError::is_retryable,
        )
        .await?;
        let token = token.to_string();

        Ok(Box::pin(async move {
            let reply = match tokio::time::timeout(timeout, notify_rx.recv()).await {
                Ok(Some(notification)) => {
                    Self::read_reply(&client, &token, notification.payload()).await
                }
                Ok(None) => Err(RadicalError::Transport {
                    message: format!("listener for {} closed", channel),
                    transient: true,
                }),
                Err(_) => Err(RadicalError::Timeout(timeout)),
            };

            let unlisten = client
                .batch_execute(&format!("UNLISTEN \"{}\"", channel))
                .await;
            debug!("UNLISTEN {}", channel);

            let payload = reply?;
            unlisten?;
            Ok(payload)
        }))
    }
}
