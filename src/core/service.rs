use std::collections::BTreeMap;

/// A container port, merged from declared-exposed and runtime-bound sources (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortType {
    Tcp,
    Udp,
}

impl PortType {
    pub fn as_str(self) -> &'static str {
        match self {
            PortType::Tcp => "tcp",
            PortType::Udp => "udp",
        }
    }
}

/// A snapshot of the container a `ServicePort` was derived from.
///
/// Deliberately not the full `ContainerInspectResponse`: derivation is a pure function of
/// this small struct, so it can be constructed by hand in tests without a Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    /// Container name without the leading slash Docker prepends.
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub network_mode: String,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

/// The pre-service tuple (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub exposed_port: u16,
    pub exposed_ip: String,
    pub host_port: Option<u16>,
    pub host_ip: String,
    pub port_type: PortType,
    pub container: ContainerRef,
}

/// One registry entry (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub register_ip: Option<String>,
    pub proxy_port: Option<u16>,
    pub tags: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub ttl: u64,
    pub origin: ServicePort,
}

/// Grace-period holder for a container that was removed or exited (§3).
#[derive(Debug, Clone)]
pub struct DeadContainer {
    pub ttl_remaining: i64,
    pub services: Vec<Service>,
}
