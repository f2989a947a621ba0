use regex::Regex;
use std::sync::OnceLock;

use super::service::PortType;

/// Builds the wire-format service ID: `<hostname>:<container-name>:<exposed-port>[:udp]` (§6).
pub fn build_id(hostname: &str, container_name: &str, exposed_port: u16, port_type: PortType) -> String {
    match port_type {
        PortType::Udp => format!("{hostname}:{container_name}:{exposed_port}:udp"),
        PortType::Tcp => format!("{hostname}:{container_name}:{exposed_port}"),
    }
}

/// A service ID parsed back out of its wire format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub hostname: String,
    pub container_name: String,
    pub port: u16,
    pub udp: bool,
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(.+?):([A-Za-z0-9][\w.\-]+):([0-9]+)(?::(udp))?$")
            .expect("service ID pattern is a valid regex")
    })
}

/// Parses the wire format back into `(hostname, container-name, exposed-port, proto)`,
/// the inverse of [`build_id`]. Returns `None` for anything that doesn't match the
/// service-ID pattern from §4.4 step 3c — callers must treat a non-match as "not ours".
pub fn parse_id(id: &str) -> Option<ParsedId> {
    let captures = id_pattern().captures(id)?;
    Some(ParsedId {
        hostname: captures[1].to_string(),
        container_name: captures[2].to_string(),
        port: captures[3].parse().ok()?,
        udp: captures.get(4).is_some(),
    })
}
