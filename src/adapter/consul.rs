//! The `consul://host:port` reference adapter (§4.1.2): speaks the Consul Agent HTTP API,
//! the same surface other Rust Docker/service tooling in the wild targets. Built on
//! `reqwest`: JSON bodies, short timeouts, typed errors wrapping the client crate's error
//! type.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::Service;

use super::{Adapter, AdapterError, ExternalService};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Address")]
    address: &'a str,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags")]
    tags: &'a [String],
    #[serde(rename = "Meta")]
    meta: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct AgentServiceEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    name: String,
}

#[derive(Debug)]
pub struct ConsulAdapter {
    client: reqwest::Client,
    base_url: Url,
}

impl ConsulAdapter {
    pub fn new(uri: &Url) -> Self {
        let mut base_url = uri.clone();
        base_url.set_scheme("http").expect("http is a valid scheme");
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with a static configuration");
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("endpoint paths are static and well-formed")
    }
}

#[async_trait]
impl Adapter for ConsulAdapter {
    async fn ping(&self) -> Result<(), AdapterError> {
        self.client
            .get(self.endpoint("/v1/status/leader"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn register(&self, service: &Service) -> Result<(), AdapterError> {
        let body = AgentServiceRegistration {
            id: &service.id,
            name: &service.name,
            address: service.register_ip.as_deref().unwrap_or(&service.ip),
            port: service.port,
            tags: &service.tags,
            meta: &service.attrs,
        };
        self.client
            .put(self.endpoint("/v1/agent/service/register"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn deregister(&self, id: &str) -> Result<(), AdapterError> {
        let path = format!("/v1/agent/service/deregister/{id}");
        self.client
            .put(self.endpoint(&path))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Consul's TTL-checked services are refreshed via a separate check-pass endpoint;
    /// this adapter registers without attaching a TTL check (§1's non-goal), so refresh
    /// is a no-op.
    async fn refresh(&self, _service: &Service) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn services(&self) -> Result<Vec<ExternalService>, AdapterError> {
        let entries: BTreeMap<String, AgentServiceEntry> = self
            .client
            .get(self.endpoint("/v1/agent/services"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries
            .into_values()
            .map(|entry| ExternalService {
                id: entry.id,
                name: entry.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_rewritten_to_http() {
        let uri = Url::parse("consul://localhost:8500").unwrap();
        let adapter = ConsulAdapter::new(&uri);
        assert_eq!(adapter.base_url.scheme(), "http");
        assert_eq!(adapter.base_url.host_str(), Some("localhost"));
        assert_eq!(adapter.base_url.port(), Some(8500));
    }

    #[test]
    fn registration_body_serializes_with_consul_field_names() {
        let body = AgentServiceRegistration {
            id: "myhost:abc:80",
            name: "nginx",
            address: "10.0.0.1",
            port: 8080,
            tags: &["prod".to_string()],
            meta: &BTreeMap::new(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["ID"], "myhost:abc:80");
        assert_eq!(json["Address"], "10.0.0.1");
        assert_eq!(json["Port"], 8080);
    }

    #[test]
    fn service_entries_deserialize_from_consul_shape() {
        let raw = r#"{"web": {"ID": "myhost:web:80", "Service": "nginx"}}"#;
        let entries: BTreeMap<String, AgentServiceEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries["web"].id, "myhost:web:80");
        assert_eq!(entries["web"].name, "nginx");
    }
}
