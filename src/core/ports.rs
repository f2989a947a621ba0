use std::collections::HashMap;

use bollard_stubs::models::PortMap;

use super::service::{ContainerRef, PortType, ServicePort};

/// Parses a docker-style port key such as `"80/tcp"` or `"53/udp"`.
fn parse_port_key(key: &str) -> Option<(u16, PortType)> {
    let (port, proto) = key.split_once('/')?;
    let port: u16 = port.parse().ok()?;
    let port_type = match proto {
        "udp" => PortType::Udp,
        _ => PortType::Tcp,
    };
    Some((port, port_type))
}

/// Merges declared-exposed ports and runtime port bindings into the `ServicePort` list a
/// container makes available, per §4.2's port-enumeration rules.
///
/// `exposed` comes from the image/container `Config.ExposedPorts` (keys only; Docker's API
/// represents it as a map to an empty object). `bindings` comes from
/// `NetworkSettings.Ports`. `container_ip` is the container's internal network address,
/// used as `ExposedIP` regardless of which source produced the entry.
pub fn enumerate_service_ports(
    container: &ContainerRef,
    exposed: &HashMap<String, serde_json::Value>,
    bindings: Option<&PortMap>,
    container_ip: &str,
    internal: bool,
) -> Vec<ServicePort> {
    let mut merged: HashMap<(u16, PortType), (Option<String>, Option<u16>)> = HashMap::new();

    // Declared exposed ports: host networking synthesizes HostIP=0.0.0.0, HostPort=ExposedPort.
    for key in exposed.keys() {
        if let Some(parsed) = parse_port_key(key) {
            merged
                .entry(parsed)
                .or_insert((Some("0.0.0.0".to_string()), Some(parsed.0)));
        }
    }

    // Runtime port bindings take precedence for bridge networking.
    if let Some(bindings) = bindings {
        for (key, binding) in bindings {
            let Some(parsed) = parse_port_key(key) else {
                continue;
            };
            let first = binding.as_ref().and_then(|b| b.first());
            let host_ip = first.and_then(|b| b.host_ip.clone());
            let host_port = first
                .and_then(|b| b.host_port.as_deref())
                .and_then(|p| p.parse::<u16>().ok());
            merged.insert(parsed, (host_ip, host_port));
        }
    }

    merged
        .into_iter()
        .filter_map(|((exposed_port, port_type), (host_ip, host_port))| {
            if host_port.is_none() && !internal {
                return None;
            }
            Some(ServicePort {
                exposed_port,
                exposed_ip: container_ip.to_string(),
                host_port,
                host_ip: host_ip.unwrap_or_else(|| "0.0.0.0".to_string()),
                port_type,
                container: container.clone(),
            })
        })
        .collect()
}
