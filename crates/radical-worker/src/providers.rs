//! Method providers built into the worker binary.

use anyhow::{bail, Result};
use radical::{AsyncFnMethod, Call, DiscoverySource, Export, FnMethod, MethodProvider};
use serde_json::{json, Value};
use std::time::Duration;

/// Names accepted on the command line.
pub const BUILTIN: &[&str] = &["demo"];

/// Look up a provider by the name given on the command line.
pub fn resolve(name: &str) -> Result<DiscoverySource> {
    match name {
        "demo" => Ok(DiscoverySource::provider(Demo)),
        other => bail!(
            "Unknown provider {:?} (available: {})",
            other,
            BUILTIN.join(", ")
        ),
    }
}

/// Resolve every name into one source.
pub fn resolve_all(names: &[String]) -> Result<DiscoverySource> {
    let sources = names
        .iter()
        .map(|name| resolve(name))
        .collect::<Result<Vec<_>>>()?;
    Ok(DiscoverySource::list(sources))
}

/// Small arithmetic and timing methods for trying a deployment out.
pub struct Demo;

impl Demo {
    fn add(call: &Call) -> Result<Value> {
        let a: i64 = call.param(0, "a")?;
        let b: i64 = call.param(1, "b")?;
        Ok(json!(a + b))
    }

    async fn wait(call: Call) -> Result<Value> {
        let delay: f64 = call.param_or(0, "delay", 1.0)?;
        let result: Value = call.param_or(1, "result", json!(42))?;
        if !delay.is_finite() || delay < 0.0 {
            bail!("delay must be a non-negative number of seconds, got {}", delay);
        }
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        Ok(result)
    }

    fn version(_: &Call) -> Result<Value> {
        Ok(json!(env!("CARGO_PKG_VERSION")))
    }
}

impl MethodProvider for Demo {
    fn name(&self) -> &str {
        "demo"
    }

    fn exports(&self) -> Vec<Export> {
        vec![
            Export::rpc("add", FnMethod::new(Demo::add)),
            Export::rpc("wait", AsyncFnMethod::new(Demo::wait)),
            Export::private("version", FnMethod::new(Demo::version)),
        ]
    }
}
