//! Calling remote methods.
//!
//! Two call styles share one queue:
//!
//! - [`Client::call`] pushes a request without a reply address and returns as
//!   soon as the payload is queued. Failures of the method are never reported.
//! - [`Client::call_wait`] mints a correlation token, subscribes to the reply
//!   channel, and only then queues the request. It resolves with the method's
//!   result, [`RadicalError::Remote`] if the method failed, or
//!   [`RadicalError::Timeout`] if no reply arrived in time.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{RadicalError, Result};
use crate::message::{Arguments, Request, Signature};
use crate::peer::{Peer, PeerConfig};

/// Sends requests to worker queues.
///
/// Cheap to share behind an `Arc`: every call borrows the client immutably,
/// so any number of calls may be in flight at once.
pub struct Client {
    peer: Peer,
}

impl Client {
    pub fn new(config: PeerConfig) -> Result<Self> {
        Ok(Self::from_peer(Peer::new(config)?))
    }

    pub fn from_peer(peer: Peer) -> Self {
        Self { peer }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub async fn start(&self) -> Result<()> {
        self.peer.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.peer.stop().await
    }

    /// Queue a call and return without waiting for it to run.
    pub async fn call(
        &self,
        queue_name: &str,
        method: &str,
        arguments: impl Into<Arguments>,
    ) -> Result<()> {
        let request = Request::fire_and_forget(Signature::new(method, arguments));
        let payload = self.peer.serializer().encode_request(&request)?;
        self.peer.transport().send_to(queue_name, &payload).await?;
        debug!("Called {} on {}", method, queue_name);
        Ok(())
    }

    /// Queue a call and wait for its result.
    pub async fn call_wait(
        &self,
        queue_name: &str,
        method: &str,
        arguments: impl Into<Arguments>,
    ) -> Result<Value> {
        let token = uuid::Uuid::new_v4().simple().to_string();

        // Listen before sending, or a fast worker could reply into the void.
        let pending = self.peer.transport().get_response(&token).await?;

        let request = Request::new(Signature::new(method, arguments), Some(token.clone()));
        let payload = self.peer.serializer().encode_request(&request)?;
        self.peer.transport().send_to(queue_name, &payload).await?;
        debug!("Called {} on {}, waiting on {}", method, queue_name, token);

        let reply = pending.await?;
        let response = self.peer.serializer().decode_response(&reply)?;
        response.into_result()
    }

    /// [`Client::call_wait`], decoding the result into `T`.
    pub async fn call_wait_as<T: DeserializeOwned>(
        &self,
        queue_name: &str,
        method: &str,
        arguments: impl Into<Arguments>,
    ) -> Result<T> {
        let value = self.call_wait(queue_name, method, arguments).await?;
        serde_json::from_value(value).map_err(RadicalError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryBroker, TransportKind};
    use serde_json::json;
    use std::time::Duration;

    fn client(broker: &str) -> Client {
        Client::new(
            PeerConfig::new(format!("memory://{}", broker))
                .with_transport(TransportKind::Memory)
                .with_request_timeout(Duration::from_millis(200)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_call_only_queues() {
        let client = client("client-call");
        client.start().await.unwrap();
        client
            .call("jobs", "test.add", vec![json!(1), json!(2)])
            .await
            .unwrap();

        let broker = MemoryBroker::named("client-call");
        assert_eq!(broker.queue_len("jobs"), 1);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_call_wait_times_out_and_detaches() {
        let client = client("client-timeout");
        client.start().await.unwrap();

        let err = client
            .call_wait("nobody", "test.add", ())
            .await
            .unwrap_err();
        assert!(matches!(err, RadicalError::Timeout(_)));

        let broker = MemoryBroker::named("client-timeout");
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(broker.queue_len("nobody"), 1);
    }

    #[tokio::test]
    async fn test_call_before_start_fails() {
        let client = client("client-unstarted");
        let err = client.call("jobs", "test.add", ()).await.unwrap_err();
        assert!(matches!(err, RadicalError::NotStarted));
    }
}
