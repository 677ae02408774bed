//! Serving methods from a queue.
//!
//! # Example
//!
//! ```no_run
//! use radical::{Call, PeerConfig, Worker};
//! use serde_json::json;
//!
//! # async fn run() -> radical::Result<()> {
//! let mut worker = Worker::new(PeerConfig::new("redis://127.0.0.1:6379/0"))?;
//! worker.register_fn("math.add", |call: &Call| {
//!     let a: i64 = call.param(0, "a")?;
//!     let b: i64 = call.param(1, "b")?;
//!     Ok(json!(a + b))
//! })?;
//!
//! let mut handle = worker.start().await?;
//! tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

mod discovery;
mod registry;
mod scheduler;

pub use discovery::{DiscoverySource, Export, MethodProvider};
pub use registry::{AsyncFnMethod, Call, FnMethod, Method, MethodRegistry};

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cancel::CancellationToken;
use crate::error::{RadicalError, Result};
use crate::peer::{Peer, PeerConfig};
use scheduler::Scheduler;

/// Collects methods, then serves them once started.
pub struct Worker {
    peer: Peer,
    registry: MethodRegistry,
}

impl Worker {
    pub fn new(config: PeerConfig) -> Result<Self> {
        Ok(Self::from_peer(Peer::new(config)?))
    }

    pub fn from_peer(peer: Peer) -> Self {
        Self {
            peer,
            registry: MethodRegistry::new(),
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn register_method(
        &mut self,
        name: impl Into<String>,
        method: Arc<dyn Method>,
    ) -> Result<()> {
        self.registry.register(name, method)
    }

    /// Register a synchronous closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&Call) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register_method(name, Arc::new(FnMethod::new(f)))
    }

    /// Register a closure returning a future.
    pub fn register_async<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register_method(name, Arc::new(AsyncFnMethod::new(f)))
    }

    /// Register every rpc export found in `source` as `provider.export`.
    ///
    /// Returns the names registered, in discovery order.
    pub fn discover(&mut self, source: impl Into<DiscoverySource>) -> Result<Vec<String>> {
        let source = source.into();
        let mut registered = Vec::new();
        for provider in source.providers() {
            for export in provider.exports() {
                if !export.is_rpc() {
                    continue;
                }
                let name = format!("{}.{}", provider.name(), export.name());
                self.register_method(name.clone(), Arc::clone(export.method()))?;
                info!("Discovered {}", name);
                registered.push(name);
            }
        }
        Ok(registered)
    }

    /// Canonical names of every registered method.
    pub fn methods(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Connect and start serving in a background task.
    pub async fn start(self) -> Result<WorkerHandle> {
        self.peer.start().await?;
        info!("Worker {} serving {} method(s):", self.peer, self.registry.len());
        for name in self.registry.names() {
            info!("  - {}", name);
        }

        let token = CancellationToken::new();
        let scheduler = Scheduler::new(
            Arc::new(self.peer),
            Arc::new(self.registry),
            token.clone(),
        );
        let task = tokio::spawn(scheduler.run());

        Ok(WorkerHandle {
            token,
            task: Some(task),
        })
    }
}

/// Handle to a running worker. Dropping it asks the worker to stop.
pub struct WorkerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl WorkerHandle {
    /// Stop accepting, finish in-flight calls and disconnect.
    pub async fn stop(&mut self) -> Result<()> {
        self.token.cancel();
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Worker scheduler failed: {}", e);
                Err(RadicalError::Other(format!("worker scheduler failed: {}", e)))
            }
        }
    }

    /// Ask the worker to stop without waiting for it.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    /// Token that stops the worker when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
