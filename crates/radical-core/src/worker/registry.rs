//! Registered methods and how calls reach them.

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::{RadicalError, Result};
use crate::message::Signature;

/// A callable exposed by a worker.
///
/// Errors are sent back to the caller as text (`{:#}`, so the whole context
/// chain is included).
#[async_trait]
pub trait Method: Send + Sync + 'static {
    async fn invoke(&self, call: Call) -> anyhow::Result<Value>;
}

/// Arguments of one incoming call.
#[derive(Debug, Clone, Default)]
pub struct Call {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl Call {
    pub fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Positional argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing positional argument {}", index))?;
        decode(value, &format!("argument {}", index))
    }

    /// Keyword argument `name`, if given.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        self.kwargs
            .get(name)
            .map(|value| decode(value, &format!("argument {:?}", name)))
            .transpose()
    }

    /// Argument passed either by position or by keyword.
    pub fn param<T: DeserializeOwned>(&self, index: usize, name: &str) -> anyhow::Result<T> {
        match self.lookup(index, name) {
            Some(value) => decode(value, &format!("argument {:?}", name)),
            None => anyhow::bail!("missing required argument {:?}", name),
        }
    }

    /// Like [`Call::param`] with a fallback when the argument is absent.
    pub fn param_or<T: DeserializeOwned>(
        &self,
        index: usize,
        name: &str,
        default: T,
    ) -> anyhow::Result<T> {
        match self.lookup(index, name) {
            Some(value) => decode(value, &format!("argument {:?}", name)),
            None => Ok(default),
        }
    }

    fn lookup(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }
}

impl From<&Signature> for Call {
    fn from(signature: &Signature) -> Self {
        Self::new(signature.args().to_vec(), signature.kwargs().clone())
    }
}

fn decode<T: DeserializeOwned>(value: &Value, what: &str) -> anyhow::Result<T> {
    T::deserialize(value).map_err(|e| anyhow::anyhow!("{}: {}", what, e))
}

/// [`Method`] backed by a synchronous closure.
///
/// The closure runs on the worker's runtime, so it should not block.
pub struct FnMethod<F> {
    f: F,
}

impl<F> FnMethod<F>
where
    F: Fn(&Call) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Method for FnMethod<F>
where
    F: Fn(&Call) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn invoke(&self, call: Call) -> anyhow::Result<Value> {
        (self.f)(&call)
    }
}

/// [`Method`] backed by a closure returning a future.
pub struct AsyncFnMethod<F> {
    f: F,
}

impl<F, Fut> AsyncFnMethod<F>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Method for AsyncFnMethod<F>
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn invoke(&self, call: Call) -> anyhow::Result<Value> {
        (self.f)(call).await
    }
}

enum Entry {
    /// Lists the registry itself.
    Inspect,
    Method(Arc<dyn Method>),
}

/// Canonical name to method. Always holds `_inspect`.
pub struct MethodRegistry {
    entries: BTreeMap<String, Entry>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(QueueConfig::INSPECT_METHOD.to_string(), Entry::Inspect);
        Self { entries }
    }

    pub fn register(&mut self, name: impl Into<String>, method: Arc<dyn Method>) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(RadicalError::DuplicateMethod { name });
        }
        self.entries.insert(name, Entry::Method(method));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All canonical names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the method named in `signature`.
    ///
    /// Every failure, a panic included, comes back as the error string that
    /// goes on the wire.
    pub async fn invoke(&self, signature: &Signature) -> std::result::Result<Value, String> {
        let method = match self.entries.get(signature.method()) {
            Some(Entry::Inspect) => return Ok(Value::from(self.names())),
            Some(Entry::Method(method)) => Arc::clone(method),
            None => {
                return Err(RadicalError::MethodNotFound {
                    name: signature.method().to_string(),
                }
                .to_string())
            }
        };

        match AssertUnwindSafe(method.invoke(Call::from(signature)))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(format!("{:#}", err)),
            Err(panic) => Err(format!("method panicked: {}", panic_message(&*panic))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Arguments;
    use serde_json::json;

    fn add() -> Arc<dyn Method> {
        Arc::new(FnMethod::new(|call: &Call| {
            let a: i64 = call.param(0, "a")?;
            let b: i64 = call.param(1, "b")?;
            Ok(json!(a + b))
        }))
    }

    #[tokio::test]
    async fn test_inspect_lists_itself() {
        let mut registry = MethodRegistry::new();
        registry.register("test.add", add()).unwrap();

        let value = registry
            .invoke(&Signature::new("_inspect", ()))
            .await
            .unwrap();
        assert_eq!(value, json!(["_inspect", "test.add"]));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register("test.add", add()).unwrap();
        let err = registry.register("test.add", add()).unwrap_err();
        assert_eq!(err.to_string(), "Canonical name test.add already registered");
        assert!(registry.register("_inspect", add()).is_err());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_positional_and_keyword_args() {
        let mut registry = MethodRegistry::new();
        registry.register("test.add", add()).unwrap();

        let positional = Signature::new("test.add", Arguments::new().arg(1300).arg(37));
        assert_eq!(registry.invoke(&positional).await.unwrap(), json!(1337));

        let keyword = Signature::new("test.add", Arguments::new().arg(1).kwarg("b", 2));
        assert_eq!(registry.invoke(&keyword).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_error_string() {
        let mut registry = MethodRegistry::new();
        registry.register("test.add", add()).unwrap();

        let err = registry
            .invoke(&Signature::new("test.add", Arguments::new().arg(1).arg("2")))
            .await
            .unwrap_err();
        assert!(err.starts_with("argument \"b\""), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_method() {
        let registry = MethodRegistry::new();
        let err = registry
            .invoke(&Signature::new("nope", ()))
            .await
            .unwrap_err();
        assert_eq!(err, "Method not found: nope");
    }

    #[tokio::test]
    async fn test_error_chain_is_kept() {
        let mut registry = MethodRegistry::new();
        registry
            .register(
                "test.fail",
                Arc::new(FnMethod::new(|_: &Call| {
                    Err(anyhow::anyhow!("disk full").context("cannot save"))
                })),
            )
            .unwrap();

        let err = registry
            .invoke(&Signature::new("test.fail", ()))
            .await
            .unwrap_err();
        assert_eq!(err, "cannot save: disk full");
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let mut registry = MethodRegistry::new();
        registry
            .register(
                "test.panic",
                Arc::new(AsyncFnMethod::new(|_: Call| async {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, anyhow::Error>(Value::Null)
                })),
            )
            .unwrap();

        let err = registry
            .invoke(&Signature::new("test.panic", ()))
            .await
            .unwrap_err();
        assert_eq!(err, "method panicked: boom");
    }

    #[test]
    fn test_param_or_default() {
        let call = Call::new(vec![json!(0.5)], Map::new());
        let delay: f64 = call.param_or(0, "delay", 1.0).unwrap();
        let result: i64 = call.param_or(1, "result", 42).unwrap();
        assert_eq!(delay, 0.5);
        assert_eq!(result, 42);
        assert!(call.kwarg::<i64>("result").unwrap().is_none());
    }
}
