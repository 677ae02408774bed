//! Radical worker - serves provider methods from a queue.
//!
//! Connects to the store named by `--url`, registers the methods of every
//! provider given on the command line and runs until SIGINT or SIGTERM, then
//! finishes the calls in flight before exiting.

mod providers;

use anyhow::{Context, Result};
use clap::Parser;
use radical::{CancellationToken, PeerConfig, SerializerKind, TransportKind, Worker};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "radical-worker")]
#[command(about = "Serve radical methods from a Redis or PostgreSQL queue")]
struct Args {
    /// Store URL; `?request_timeout=<secs>` is accepted
    #[arg(short, long, default_value = "redis://127.0.0.1:6379/0")]
    url: String,

    /// Queue to serve
    #[arg(short, long, default_value = "default")]
    queue: String,

    /// Transport (redis, postgres, memory)
    #[arg(short, long, default_value = "redis")]
    transport: TransportKind,

    /// Serializer (msgpack, json)
    #[arg(short, long, default_value = "msgpack")]
    serializer: SerializerKind,

    /// Log level or filter directive
    #[arg(short, long, default_value = "info")]
    level: String,

    /// Providers whose methods are served
    #[arg(required = true, num_args = 1..)]
    providers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let filter = EnvFilter::try_new(&args.level)
        .with_context(|| format!("Invalid log level {:?}", args.level))?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting radical worker");

    let config = PeerConfig::new(&args.url)
        .with_queue(&args.queue)
        .with_transport(args.transport)
        .with_serializer(args.serializer);

    let mut worker = Worker::new(config).context("Failed to configure worker")?;
    let source = providers::resolve_all(&args.providers)?;
    worker.discover(source).context("Failed to register methods")?;

    let mut handle = worker.start().await.context("Failed to start worker")?;

    wait_for_shutdown(handle.cancellation_token()).await?;
    info!("Shutdown signal received, finishing in-flight calls");

    handle.stop().await?;
    info!("Worker stopped");
    Ok(())
}

/// Resolve on SIGINT, SIGTERM or when the worker cancels itself.
async fn wait_for_shutdown(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
            _ = token.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = token.cancelled() => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["radical-worker", "demo"]).unwrap();
        assert_eq!(args.url, "redis://127.0.0.1:6379/0");
        assert_eq!(args.queue, "default");
        assert_eq!(args.transport, TransportKind::Redis);
        assert_eq!(args.serializer, SerializerKind::MessagePack);
        assert_eq!(args.level, "info");
        assert_eq!(args.providers, ["demo"]);
    }

    #[test]
    fn test_short_flags() {
        let args = Args::try_parse_from([
            "radical-worker",
            "-u",
            "postgres://radical@localhost/radical",
            "-q",
            "jobs",
            "-t",
            "postgres",
            "-s",
            "json",
            "-l",
            "debug",
            "demo",
            "demo",
        ])
        .unwrap();
        assert_eq!(args.queue, "jobs");
        assert_eq!(args.transport, TransportKind::Postgres);
        assert_eq!(args.serializer, SerializerKind::Json);
        assert_eq!(args.providers.len(), 2);
    }

    #[test]
    fn test_requires_provider() {
        assert!(Args::try_parse_from(["radical-worker"]).is_err());
    }

    #[test]
    fn test_rejects_unknown_transport() {
        assert!(Args::try_parse_from(["radical-worker", "-t", "amqp", "demo"]).is_err());
    }

    #[tokio::test]
    async fn test_demo_worker_over_memory() {
        let config = PeerConfig::new("memory://radical-worker-main")
            .with_transport(TransportKind::Memory)
            .with_poll_interval(std::time::Duration::from_millis(20));
        let mut worker = Worker::new(config.clone()).unwrap();
        worker
            .discover(providers::resolve_all(&["demo".to_string()]).unwrap())
            .unwrap();
        let mut handle = worker.start().await.unwrap();

        let client = radical::Client::new(config).unwrap();
        client.start().await.unwrap();
        let sum: i64 = client
            .call_wait_as(
                "default",
                "demo.add",
                radical::Arguments::new().arg(1300).arg(37),
            )
            .await
            .unwrap();
        assert_eq!(sum, 1337);

        handle.stop().await.unwrap();
    }
}
