//! The Adapter Registry (§4.1): URI scheme → adapter factory, process-wide, populated by
//! explicit registration rather than ctor-style side effects (§9).

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use url::Url;

use super::{consul::ConsulAdapter, log_adapter::LogAdapter, Adapter, AdapterError};

type Factory = fn(&Url) -> Box<dyn Adapter>;

fn registry() -> &'static Mutex<HashMap<String, Factory>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Factory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers `factory` under `scheme`, overwriting any previous factory for that scheme.
pub fn register(scheme: &str, factory: Factory) {
    registry()
        .lock()
        .expect("adapter registry mutex is never held across a panic")
        .insert(scheme.to_string(), factory);
}

/// Registers this crate's reference adapters. Called once at binary startup, before the
/// first `build` call; the reference adapters register themselves here rather than via
/// ctor-style side effects (§9).
pub fn install_defaults() {
    register("log", |_uri| Box::new(LogAdapter::new()));
    register("consul", |uri| Box::new(ConsulAdapter::new(uri)));
}

/// Parses `uri` and constructs the adapter registered for its scheme. Startup fails with
/// [`AdapterError::UnknownScheme`] if no factory was registered for that scheme.
pub fn build(uri: &Url) -> Result<Box<dyn Adapter>, AdapterError> {
    let factory = registry()
        .lock()
        .expect("adapter registry mutex is never held across a panic")
        .get(uri.scheme())
        .copied();
    match factory {
        Some(factory) => Ok(factory(uri)),
        None => Err(AdapterError::UnknownScheme(uri.scheme().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_the_log_adapter() {
        install_defaults();
        let uri = Url::parse("log://").unwrap();
        assert!(build(&uri).is_ok());
    }

    #[test]
    fn builds_the_consul_adapter() {
        install_defaults();
        let uri = Url::parse("consul://localhost:8500").unwrap();
        assert!(build(&uri).is_ok());
    }

    #[test]
    fn rejects_unknown_schemes() {
        install_defaults();
        let uri = Url::parse("etcd://localhost:2379").unwrap();
        assert!(matches!(build(&uri), Err(AdapterError::UnknownScheme(s)) if s == "etcd"));
    }

    #[test]
    fn a_custom_scheme_can_be_registered() {
        register("memory", |_uri| Box::new(LogAdapter::new()));
        let uri = Url::parse("memory://").unwrap();
        assert!(build(&uri).is_ok());
    }
}
