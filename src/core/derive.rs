//! Service derivation (§4.2) and IP/port selection (§4.3).
//!
//! Deliberately pure: every piece of information that requires I/O (DNS resolution of a
//! hostname, inspecting a `network_mode: container:<id>` peer, the process hostname
//! itself) is resolved by the caller and threaded in through [`DeriveContext`]. That keeps
//! this module testable with plain fixtures against literal `ContainerInspectResponse`
//! JSON rather than a live daemon.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::Config;

use super::id::build_id;
use super::service::{ContainerRef, Service, ServicePort};
use super::tags::{compose_attrs, compose_tags};

/// Inputs to derivation that come from the outside world rather than from the container
/// definition itself.
#[derive(Debug, Clone, Default)]
pub struct DeriveContext {
    /// Resolved address of the hostname selected by §4.3's `hostname` rule, if DNS
    /// resolution succeeded. `None` means "fell through silently" (§7/§9).
    pub resolved_hostname_ip: Option<String>,
    /// IP of the container referenced by a `container:<id>` network mode, if that
    /// container was found and inspected successfully.
    pub network_container_ip: Option<String>,
    /// Value of the `com.amazonaws.ecs.task-arn` label, used under AWS VPC mode (§4.5).
    pub ecs_task_arn: Option<String>,
}

fn ec2_hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^ip-[0-9-]+\.[\w.-]*ec2\.internal$").unwrap())
}

/// §4.3's `hostname` selection rule. `pub(crate)` so the Bridge Engine can resolve the
/// same hostname it will later plug into [`DeriveContext::resolved_hostname_ip`].
pub(crate) fn select_hostname(container: &ContainerRef, config: &Config) -> String {
    if ec2_hostname_pattern().is_match(&container.hostname) {
        container.hostname.clone()
    } else {
        config.hostname.clone()
    }
}

fn strip_mask(value: &str) -> String {
    value.split('/').next().unwrap_or(value).to_string()
}

fn image_basename(image: &str) -> String {
    let without_registry = image.rsplit('/').next().unwrap_or(image);
    without_registry.split(':').next().unwrap_or(without_registry).to_string()
}

/// Parsed per-port and global metadata, merged from container env vars and labels.
struct MetadataBag {
    global: BTreeMap<String, String>,
    per_port: HashMap<u16, BTreeMap<String, String>>,
}

fn collect_metadata(container: &ContainerRef) -> MetadataBag {
    let mut global = BTreeMap::new();
    let mut per_port: HashMap<u16, BTreeMap<String, String>> = HashMap::new();

    for (key, value) in &container.env {
        let Some(rest) = key.strip_prefix("SERVICE_") else {
            continue;
        };
        insert_metadata(&mut global, &mut per_port, rest, value, '_');
    }
    for (key, value) in &container.labels {
        let Some(rest) = key.strip_prefix("service.") else {
            continue;
        };
        insert_metadata(&mut global, &mut per_port, rest, value, '.');
    }

    MetadataBag { global, per_port }
}

/// Splits `rest` as either `<port><sep><key>` (port-scoped) or `<key>` (global) and
/// records it in the matching bag, lower-cased.
fn insert_metadata(
    global: &mut BTreeMap<String, String>,
    per_port: &mut HashMap<u16, BTreeMap<String, String>>,
    rest: &str,
    value: &str,
    sep: char,
) {
    if let Some((maybe_port, key)) = rest.split_once(sep) {
        if let Ok(port) = maybe_port.parse::<u16>() {
            per_port
                .entry(port)
                .or_default()
                .insert(key.to_lowercase(), value.to_string());
            return;
        }
    }
    global.insert(rest.to_lowercase(), value.to_string());
}

/// One candidate service before grouping/name disambiguation is applied.
struct Candidate<'p> {
    port: &'p ServicePort,
    metadata: BTreeMap<String, String>,
    name_is_port_scoped: bool,
}

/// Produces the list of services to register for a container, per §4.2 and §4.3.
pub fn derive_services(
    container: &ContainerRef,
    ports: &[ServicePort],
    config: &Config,
    ctx: &DeriveContext,
) -> Vec<Service> {
    let metadata = collect_metadata(container);

    let candidates: Vec<Candidate> = ports
        .iter()
        .filter_map(|port| {
            let mut merged = metadata.global.clone();
            let port_scoped = metadata.per_port.get(&port.exposed_port);
            let name_is_port_scoped = port_scoped.is_some_and(|m| m.contains_key("name"));
            if let Some(scoped) = port_scoped {
                for (k, v) in scoped {
                    merged.insert(k.clone(), v.clone());
                }
            }

            if merged.get("ignore").is_some_and(|v| !v.is_empty()) {
                return None;
            }
            if config.explicit && !merged.contains_key("name") {
                return None;
            }

            Some(Candidate {
                port,
                metadata: merged,
                name_is_port_scoped,
            })
        })
        .collect();

    let group_mode = candidates.len() > 1;

    candidates
        .into_iter()
        .map(|candidate| build_service(container, candidate, group_mode, config, ctx))
        .collect()
}

fn build_service(
    container: &ContainerRef,
    candidate: Candidate,
    group_mode: bool,
    config: &Config,
    ctx: &DeriveContext,
) -> Service {
    let port = candidate.port;
    let metadata = &candidate.metadata;

    let mut name = metadata
        .get("name")
        .cloned()
        .unwrap_or_else(|| image_basename(&container.image));
    if group_mode && !candidate.name_is_port_scoped {
        name = format!("{name}-{}", port.exposed_port);
    }

    let id = metadata.get("id").cloned().unwrap_or_else(|| {
        build_id(&config.hostname, &container.name, port.exposed_port, port.port_type)
    });

    let (ip, port_num, register_ip) = select_ip_and_port(container, port, config, ctx);

    if config.awsvpc {
        if let Some(host_ip) = &config.host_ip {
            if host_ip != &ip {
                log::warn!(
                    "service '{}' on container '{}' advertises IP {} which differs from configured host-ip {} under AWS VPC mode",
                    id, container.name, ip, host_ip
                );
            }
        }
    }

    let ecs_tag = if config.awsvpc {
        ctx.ecs_task_arn
            .as_deref()
            .map(|arn| (config.ecs_task_arn_tag.as_str(), arn))
    } else {
        None
    };
    let tags = compose_tags(metadata.get("tags").map(String::as_str), &config.force_tags, port.port_type, ecs_tag);
    let attrs = compose_attrs(metadata);
    let proxy_port = metadata.get("proxyport").and_then(|v| v.parse().ok());

    Service {
        id,
        name,
        ip,
        port: port_num,
        register_ip,
        proxy_port,
        tags,
        attrs,
        ttl: config.refresh_ttl,
        origin: port.clone(),
    }
}

/// §4.3's IP/port selection matrix plus its two post-steps, in the load-bearing order
/// recorded in SPEC_FULL.md §9 (label override, then network-container override).
fn select_ip_and_port(
    container: &ContainerRef,
    port: &ServicePort,
    config: &Config,
    ctx: &DeriveContext,
) -> (String, u16, Option<String>) {
    // HostIp override applies unconditionally before the matrix.
    let host_ip = config.host_ip.clone().unwrap_or_else(|| port.host_ip.clone());

    let (mut ip, port_num, register_ip) = if config.internal {
        (port.exposed_ip.clone(), port.exposed_port, None)
    } else if config.awsvpc {
        let hostname = select_hostname(container, config);
        let resolved = ctx.resolved_hostname_ip.clone().unwrap_or(hostname);
        let host_port = port.host_port.unwrap_or(port.exposed_port);

        let label_override = config
            .use_ip_from_label
            .as_ref()
            .and_then(|label| container.labels.get(label))
            .map(|v| strip_mask(v));

        if let Some(register_ip) = label_override {
            (resolved, host_port, Some(register_ip))
        } else {
            (resolved, host_port, None)
        }
    } else {
        let mut ip = host_ip;
        if ip == "0.0.0.0" {
            if let Some(resolved) = &ctx.resolved_hostname_ip {
                ip = resolved.clone();
            }
        }
        (ip, port.host_port.unwrap_or(port.exposed_port), None)
    };

    // Post-steps, outside AWS VPC mode only.
    if !config.awsvpc {
        if let Some(label) = &config.use_ip_from_label {
            if let Some(value) = container.labels.get(label) {
                ip = strip_mask(value);
            }
        }
        if container.network_mode.starts_with("container:") {
            if let Some(net_ip) = &ctx.network_container_ip {
                ip = net_ip.clone();
            }
        }
    }

    (ip, port_num, register_ip)
}
