//! The worker's supervisor loop.
//!
//! All work runs as units in one [`JoinSet`]:
//!
//! ```text
//! accept ──Accepted(req)──> accept + process_request
//!        ──Idle──────────> accept
//! process_request ──Processed(resp)──> process_response
//! process_response ──Replied──> (done)
//! ```
//!
//! Exactly one accept is outstanding until cancellation; after that no new
//! accept starts and the loop exits once the set drains. A unit that panics
//! cancels the worker the same way.
//!
//! When a reply cannot be published, the caller gets a short error response
//! in its place instead of waiting for its timeout.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::registry::MethodRegistry;
use crate::cancel::CancellationToken;
use crate::config::NetworkConfig;
use crate::error::{RadicalError, Result};
use crate::message::{Request, Response};
use crate::peer::Peer;

enum Outcome {
    Accepted(Request),
    Idle,
    Processed(Response),
    Replied,
}

pub(crate) struct Scheduler {
    peer: Arc<Peer>,
    registry: Arc<MethodRegistry>,
    token: CancellationToken,
}

impl Scheduler {
    pub(crate) fn new(
        peer: Arc<Peer>,
        registry: Arc<MethodRegistry>,
        token: CancellationToken,
    ) -> Self {
        Self {
            peer,
            registry,
            token,
        }
    }

    pub(crate) async fn run(self) -> Result<()> {
        let mut tasks = JoinSet::new();
        let mut terminated = false;
        self.spawn_accept(&mut tasks);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled(), if !terminated => {
                    info!("Stopping worker, waiting for {} task(s)", tasks.len());
                    terminated = true;
                }
                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok(Outcome::Accepted(request)) => {
                            if !terminated {
                                self.spawn_accept(&mut tasks);
                            }
                            let registry = Arc::clone(&self.registry);
                            tasks.spawn(process_request(registry, request));
                        }
                        Ok(Outcome::Idle) => {
                            if !terminated {
                                self.spawn_accept(&mut tasks);
                            }
                        }
                        Ok(Outcome::Processed(response)) => {
                            let peer = Arc::clone(&self.peer);
                            tasks.spawn(process_response(peer, response));
                        }
                        Ok(Outcome::Replied) => {}
                        Err(e) => {
                            error!("Worker task failed: {}", e);
                            self.token.cancel();
                        }
                    }
                }
            }
        }

        self.peer.stop().await
    }

    fn spawn_accept(&self, tasks: &mut JoinSet<Outcome>) {
        tasks.spawn(accept(Arc::clone(&self.peer)));
    }
}

async fn accept(peer: Arc<Peer>) -> Outcome {
    let data = match peer.transport().get_next_request().await {
        Ok(Some(data)) => data,
        Ok(None) => return Outcome::Idle,
        Err(e) => {
            warn!(
                "Failed to fetch request: {}, retrying in {:?}",
                e,
                NetworkConfig::TRANSIENT_BACKOFF
            );
            tokio::time::sleep(NetworkConfig::TRANSIENT_BACKOFF).await;
            return Outcome::Idle;
        }
    };

    match peer.serializer().decode_request(&data) {
        Ok(request) => {
            debug!("Accepted {}", request.method());
            Outcome::Accepted(request)
        }
        Err(e) => {
            error!("Dropping invalid request: {}", e);
            Outcome::Idle
        }
    }
}

async fn process_request(registry: Arc<MethodRegistry>, request: Request) -> Outcome {
    let outcome = registry.invoke(request.signature()).await;
    let response = match outcome {
        Ok(result) => Response::success(request, result),
        Err(message) => {
            warn!("{} failed: {}", request.method(), message);
            Response::failure(request, message)
        }
    };
    Outcome::Processed(response)
}

async fn process_response(peer: Arc<Peer>, response: Response) -> Outcome {
    let Some(token) = response.reply_to() else {
        debug!("No reply address, discarding response");
        return Outcome::Replied;
    };

    let Err(e) = send_reply(&peer, token, &response).await else {
        return Outcome::Replied;
    };
    log_reply_error(token, &e);

    if let Some(request) = response.request() {
        let notice = Response::failure(request.clone(), format!("cannot deliver reply: {}", e));
        if let Err(e) = send_reply(&peer, token, &notice).await {
            log_reply_error(token, &e);
        }
    }
    Outcome::Replied
}

async fn send_reply(peer: &Peer, token: &str, response: &Response) -> Result<()> {
    let payload = peer.serializer().encode_response(response)?;
    peer.transport().reply_to(token, &payload).await
}

fn log_reply_error(token: &str, err: &RadicalError) {
    if err.is_retryable() {
        warn!("Reply to {} lost: {}", token, err);
    } else {
        error!("Reply to {} failed: {}", token, err);
    }
}
