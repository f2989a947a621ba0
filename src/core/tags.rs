use std::collections::BTreeMap;

use super::service::PortType;

/// Metadata keys §4.2/§4.5 reserve for service shaping rather than free-form attributes.
pub const RESERVED_KEYS: &[&str] = &["id", "name", "tags", "proxyport", "ignore"];

/// Splits a comma-separated metadata value into trimmed, non-empty tokens.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the `Tags` list (§4.5): metadata tags, then configured force-tags, then the
/// `udp` token for UDP ports, then the ECS task ARN tag under AWS VPC mode.
pub fn compose_tags(
    metadata_tags: Option<&str>,
    force_tags: &[String],
    port_type: PortType,
    ecs_task_arn_tag: Option<(&str, &str)>,
) -> Vec<String> {
    let mut tags = metadata_tags.map(split_csv).unwrap_or_default();
    tags.extend(force_tags.iter().cloned());
    if port_type == PortType::Udp {
        tags.push("udp".to_string());
    }
    if let Some((key, task_arn)) = ecs_task_arn_tag {
        tags.push(format!("{key}={task_arn}"));
    }
    tags
}

/// Builds `Attrs` (§4.5): the metadata bag minus the reserved keys.
pub fn compose_attrs(metadata: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    metadata
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
