//! Method providers and the sources workers discover them from.
//!
//! A provider is a named group of exports. Only exports created with
//! [`Export::rpc`] are offered to callers, under `provider.export`.

use std::sync::Arc;

use super::registry::Method;

/// One callable offered by a provider.
pub struct Export {
    name: String,
    method: Arc<dyn Method>,
    rpc: bool,
}

impl Export {
    /// A method callers can reach.
    pub fn rpc(name: impl Into<String>, method: impl Method) -> Self {
        Self {
            name: name.into(),
            method: Arc::new(method),
            rpc: true,
        }
    }

    /// A helper that stays local to the provider.
    pub fn private(name: impl Into<String>, method: impl Method) -> Self {
        Self {
            name: name.into(),
            method: Arc::new(method),
            rpc: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_rpc(&self) -> bool {
        self.rpc
    }

    pub fn method(&self) -> &Arc<dyn Method> {
        &self.method
    }
}

/// A named group of methods.
pub trait MethodProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn exports(&self) -> Vec<Export>;
}

/// Where a worker looks for methods: a provider or a nested list of sources.
#[derive(Clone)]
pub enum DiscoverySource {
    Provider(Arc<dyn MethodProvider>),
    List(Vec<DiscoverySource>),
}

impl DiscoverySource {
    pub fn provider(provider: impl MethodProvider) -> Self {
        DiscoverySource::Provider(Arc::new(provider))
    }

    pub fn list(sources: impl IntoIterator<Item = DiscoverySource>) -> Self {
        DiscoverySource::List(sources.into_iter().collect())
    }

    /// Every provider in the source, depth first.
    pub fn providers(&self) -> Vec<Arc<dyn MethodProvider>> {
        let mut found = Vec::new();
        self.collect(&mut found);
        found
    }

    fn collect(&self, found: &mut Vec<Arc<dyn MethodProvider>>) {
        match self {
            DiscoverySource::Provider(provider) => found.push(Arc::clone(provider)),
            DiscoverySource::List(sources) => {
                for source in sources {
                    source.collect(found);
                }
            }
        }
    }
}

impl From<Arc<dyn MethodProvider>> for DiscoverySource {
    fn from(provider: Arc<dyn MethodProvider>) -> Self {
        DiscoverySource::Provider(provider)
    }
}

impl From<Vec<DiscoverySource>> for DiscoverySource {
    fn from(sources: Vec<DiscoverySource>) -> Self {
        DiscoverySource::List(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::registry::{Call, FnMethod};
    use serde_json::Value;

    struct Named(&'static str);

    impl MethodProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn exports(&self) -> Vec<Export> {
            vec![
                Export::rpc("ping", FnMethod::new(|_: &Call| Ok(Value::from("pong")))),
                Export::private("helper", FnMethod::new(|_: &Call| Ok(Value::Null))),
            ]
        }
    }

    #[test]
    fn test_nested_lists_flatten_in_order() {
        let source = DiscoverySource::list([
            DiscoverySource::provider(Named("a")),
            DiscoverySource::list([
                DiscoverySource::provider(Named("b")),
                DiscoverySource::list([]),
                DiscoverySource::provider(Named("c")),
            ]),
        ]);
        let names: Vec<String> = source
            .providers()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_export_marks() {
        let exports = Named("a").exports();
        assert!(exports[0].is_rpc());
        assert_eq!(exports[0].name(), "ping");
        assert!(!exports[1].is_rpc());
    }
}
