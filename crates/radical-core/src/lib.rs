//! Radical - queue-backed RPC between async peers.
//!
//! Clients push requests into a named queue held by Redis or PostgreSQL;
//! workers pop them, run the named method and, when the caller is waiting,
//! publish the result on a reply channel keyed by a correlation token.
//!
//! # Example
//!
//! ```rust,ignore
//! use radical::{Arguments, Client, PeerConfig};
//!
//! #[tokio::main]
//! async fn main() -> radical::Result<()> {
//!     let client = Client::new(PeerConfig::new("redis://127.0.0.1:6379/0?request_timeout=5"))?;
//!     client.start().await?;
//!
//!     // Queue and forget
//!     client.call("default", "demo.wait", Arguments::new().arg(1)).await?;
//!
//!     // Queue and wait for the result
//!     let sum = client
//!         .call_wait("default", "demo.add", Arguments::new().arg(1300).arg(37))
//!         .await?;
//!     println!("1300 + 37 = {}", sum);
//!
//!     client.stop().await
//! }
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod peer;
pub mod retry;
pub mod serialization;
pub mod transport;
pub mod worker;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use client::Client;
pub use error::{RadicalError, Result};
pub use message::{Arguments, Request, Response, Signature};
pub use peer::{Peer, PeerConfig};
pub use retry::RetryConfig;
pub use serialization::{Serializer, SerializerKind};
pub use transport::{Transport, TransportKind};
pub use worker::{
    AsyncFnMethod, Call, DiscoverySource, Export, FnMethod, Method, MethodProvider, Worker,
    WorkerHandle,
};
