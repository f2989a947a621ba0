//! The Registry Adapter contract (§4.1): a pluggable driver to a concrete service registry,
//! the abstraction point the rest of the engine is written against rather than any one
//! concrete registry backend.

use async_trait::async_trait;

use crate::core::Service;

pub mod consul;
pub mod log_adapter;
pub mod registry;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown adapter scheme '{0}'")]
    UnknownScheme(String),
    #[error("consul request failed: {0}")]
    Consul(#[from] reqwest::Error),
}

/// One entry as reported back by an adapter's `Services()` call (§4.1), used solely by
/// cleanup to decide whether an entry is ours and still live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalService {
    pub id: String,
    pub name: String,
}

/// The four-operation registry contract (§4.1). Object-safe so the Adapter Registry can
/// hand back `Box<dyn Adapter>`.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn ping(&self) -> Result<(), AdapterError>;
    async fn register(&self, service: &Service) -> Result<(), AdapterError>;
    /// Deregistration only needs the wire-format `Service.ID` (§6): every reference
    /// adapter's delete path is keyed by ID alone, and it lets cleanup deregister
    /// registry-reported dangling entries it never built a full `Service` for.
    async fn deregister(&self, id: &str) -> Result<(), AdapterError>;
    /// TTL renewal. Drivers with no TTL concept may treat this as a no-op.
    async fn refresh(&self, service: &Service) -> Result<(), AdapterError>;
    async fn services(&self) -> Result<Vec<ExternalService>, AdapterError>;
}
