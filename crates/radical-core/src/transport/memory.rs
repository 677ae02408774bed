//! In-process transport.
//!
//! Peers created with the same `memory://<name>` URL share one
//! [`MemoryBroker`]: FIFO queues for requests and single-subscriber channels
//! for replies. Nothing leaves the process, which makes it the transport of
//! choice for tests and for embedding a worker next to its callers.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::{PendingReply, Transport, TransportSettings};
use crate::error::{RadicalError, Result};

fn registry() -> &'static Mutex<HashMap<String, Arc<MemoryBroker>>> {
    static BROKERS: OnceLock<Mutex<HashMap<String, Arc<MemoryBroker>>>> = OnceLock::new();
    BROKERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Shared queues and reply channels for in-process peers.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    pushed: Notify,
    channels: Mutex<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
    published: AtomicUsize,
    publish_attempts: AtomicUsize,
}

impl MemoryBroker {
    /// Broker registered under `name`, created on first use.
    pub fn named(name: &str) -> Arc<Self> {
        let mut brokers = registry().lock().unwrap_or_else(|e| e.into_inner());
        brokers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Self::default()))
            .clone()
    }

    /// Append a raw payload to `queue`.
    pub fn enqueue(&self, queue: &str, payload: Vec<u8>) {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        self.pushed.notify_waiters();
    }

    /// Number of payloads waiting in `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Number of reply channels with a listener attached.
    pub fn subscriber_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of replies delivered so far.
    pub fn published_count(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// Number of replies sent so far, listener or not.
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    fn try_pop(&self, queue: &str) -> Option<Vec<u8>> {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }

    /// Pop from `queue`, waiting up to `wait` for a payload to arrive.
    async fn pop(&self, queue: &str, wait: Duration) -> Option<Vec<u8>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so a push in between is not lost.
            let notified = self.pushed.notified();
            if let Some(payload) = self.try_pop(queue) {
                return Some(payload);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop(queue);
            }
        }
    }

    fn publish(&self, channel: &str, payload: Vec<u8>) -> bool {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let delivered = channels
            .get(channel)
            .map_or(false, |sender| sender.send(payload).is_ok());
        if delivered {
            self.published.fetch_add(1, Ordering::SeqCst);
        }
        delivered
    }

    fn subscribe(self: &Arc<Self>, channel: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel.to_string(), tx);
        Subscription {
            broker: Arc::clone(self),
            channel: channel.to_string(),
            receiver: rx,
        }
    }
}

/// Listener on a reply channel; detaches when dropped.
struct Subscription {
    broker: Arc<MemoryBroker>,
    channel: String,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.channel);
    }
}

/// Transport over a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    queue_name: String,
    request_timeout: Duration,
    poll_interval: Duration,
    started: AtomicBool,
}

impl MemoryTransport {
    /// The broker name is the URL host; `memory://` alone uses `"default"`.
    pub fn new(settings: TransportSettings) -> Result<Self> {
        let url = Url::parse(&settings.url)
            .map_err(|e| RadicalError::config(format!("invalid memory URL: {}", e)))?;
        if url.scheme() != "memory" {
            return Err(RadicalError::config(format!(
                "memory transport needs a memory:// URL, got {}://",
                url.scheme()
            )));
        }
        let name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .unwrap_or("default");

        Ok(Self::with_broker(MemoryBroker::named(name), settings))
    }

    /// Build a transport on an explicit broker.
    pub fn with_broker(broker: Arc<MemoryBroker>, settings: TransportSettings) -> Self {
        Self {
            broker,
            queue_name: settings.queue_name,
            request_timeout: settings.request_timeout,
            poll_interval: settings.poll_interval,
            started: AtomicBool::new(false),
        }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RadicalError::NotStarted)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_to(&self, queue_name: &str, payload: &[u8]) -> Result<()> {
        self.ensure_started()?;
        self.broker.enqueue(queue_name, payload.to_vec());
        debug!("Sending request to {}", queue_name);
        Ok(())
    }

    async fn get_next_request(&self) -> Result<Option<Vec<u8>>> {
        self.ensure_started()?;
        Ok(self.broker.pop(&self.queue_name, self.poll_interval).await)
    }

    async fn reply_to(&self, token: &str, payload: &[u8]) -> Result<()> {
        self.ensure_started()?;
        if !self.broker.publish(token, payload.to_vec()) {
            debug!("No listener for reply {}", token);
        }
        Ok(())
    }

    async fn get_response(&self, token: &str) -> Result<PendingReply> {
        self.ensure_started()?;
        let mut subscription = self.broker.subscribe(token);
        let timeout = self.request_timeout;

        Ok(Box::pin(async move {
            match tokio::time::timeout(timeout, subscription.receiver.recv()).await {
                Ok(Some(payload)) => Ok(payload),
                Ok(None) => Err(RadicalError::Transport {
                    message: format!("reply channel {} closed", subscription.channel),
                    transient: false,
                }),
                Err(_) => Err(RadicalError::Timeout(timeout)),
            }
        }))
    }
}
