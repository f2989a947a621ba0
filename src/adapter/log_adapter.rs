//! The `log://` reference adapter (§4.1.1): zero-dependency, logs every operation at
//! `info`, reports an empty `services()` so it never drives cleanup. Used as the default
//! adapter under the Bridge Engine's own unit tests so they need no network access.

use async_trait::async_trait;

use crate::core::Service;

use super::{Adapter, AdapterError, ExternalService};

#[derive(Debug, Default)]
pub struct LogAdapter;

impl LogAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Adapter for LogAdapter {
    async fn ping(&self) -> Result<(), AdapterError> {
        log::info!("log adapter: ping");
        Ok(())
    }

    async fn register(&self, service: &Service) -> Result<(), AdapterError> {
        log::info!(
            "log adapter: register {} ({}:{})",
            service.id, service.ip, service.port
        );
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), AdapterError> {
        log::info!("log adapter: deregister {id}");
        Ok(())
    }

    async fn refresh(&self, service: &Service) -> Result<(), AdapterError> {
        log::info!("log adapter: refresh {}", service.id);
        Ok(())
    }

    async fn services(&self) -> Result<Vec<ExternalService>, AdapterError> {
        Ok(Vec::new())
    }
}
