//! The engine configuration (§6), parsed from CLI flags by `src/bin/bridged.rs` and
//! validated eagerly (§4.7) rather than lazily at first use.

use std::str::FromStr;

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid adapter URI '{0}': {1}")]
    InvalidAdapterUri(String, url::ParseError),
    #[error("adapter URI '{0}' has no scheme")]
    MissingScheme(String),
    #[error("refresh-interval must be > 0 when refresh-ttl > 0")]
    RefreshIntervalRequired,
    #[error("unknown deregister-check '{0}', expected 'always' or 'default'")]
    UnknownDeregisterCheck(String),
}

/// `config.DeregisterCheck` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeregisterCheck {
    #[default]
    Default,
    Always,
}

impl FromStr for DeregisterCheck {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "always" => Ok(DeregisterCheck::Always),
            "default" => Ok(DeregisterCheck::Default),
            other => Err(ConfigError::UnknownDeregisterCheck(other.to_string())),
        }
    }
}

/// The Bridge Engine's configuration, one field per row of §6's table.
#[derive(Debug, Clone)]
pub struct Config {
    pub adapter_uri: Url,
    pub host_ip: Option<String>,
    pub internal: bool,
    pub explicit: bool,
    pub awsvpc: bool,
    pub use_ip_from_label: Option<String>,
    pub ecs_task_arn_tag: String,
    pub force_tags: Vec<String>,
    pub refresh_ttl: u64,
    pub refresh_interval: u64,
    pub cleanup: bool,
    pub deregister_check: DeregisterCheck,
    /// Resolved once at configuration-load time (§4.7/§9), not read lazily from global
    /// state, so tests can supply a fixed hostname.
    pub hostname: String,
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    pub adapter_uri: Option<String>,
    pub host_ip: Option<String>,
    pub internal: bool,
    pub explicit: bool,
    pub awsvpc: bool,
    pub use_ip_from_label: Option<String>,
    pub ecs_task_arn_tag: Option<String>,
    pub force_tags: Vec<String>,
    pub refresh_ttl: u64,
    pub refresh_interval: u64,
    pub cleanup: bool,
    pub deregister_check: Option<String>,
    pub hostname: Option<String>,
}

impl ConfigBuilder {
    pub fn build(self) -> Result<Config, ConfigError> {
        let raw_uri = self.adapter_uri.unwrap_or_default();
        let adapter_uri = Url::parse(&raw_uri)
            .map_err(|e| ConfigError::InvalidAdapterUri(raw_uri.clone(), e))?;
        if adapter_uri.scheme().is_empty() {
            return Err(ConfigError::MissingScheme(raw_uri));
        }

        if self.refresh_ttl > 0 && self.refresh_interval == 0 {
            return Err(ConfigError::RefreshIntervalRequired);
        }

        let deregister_check = self
            .deregister_check
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or_default();

        let hostname = self
            .hostname
            .or_else(|| hostname_from_os())
            .unwrap_or_else(|| "localhost".to_string());

        Ok(Config {
            adapter_uri,
            host_ip: self.host_ip,
            internal: self.internal,
            explicit: self.explicit,
            awsvpc: self.awsvpc,
            use_ip_from_label: self.use_ip_from_label,
            ecs_task_arn_tag: self
                .ecs_task_arn_tag
                .unwrap_or_else(|| "ECS_TASK_ARN".to_string()),
            force_tags: self.force_tags,
            refresh_ttl: self.refresh_ttl,
            refresh_interval: self.refresh_interval,
            cleanup: self.cleanup,
            deregister_check,
            hostname,
        })
    }
}

fn hostname_from_os() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        let output = std::process::Command::new("hostname").output().ok()?;
        String::from_utf8(output.stdout)
            .ok()
            .map(|s| s.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_refresh_ttl_without_interval() {
        let builder = ConfigBuilder {
            adapter_uri: Some("consul://localhost:8500".to_string()),
            refresh_ttl: 30,
            refresh_interval: 0,
            ..Default::default()
        };
        assert!(matches!(
            builder.build(),
            Err(ConfigError::RefreshIntervalRequired)
        ));
    }

    #[test]
    fn rejects_unknown_scheme_less_uri() {
        let builder = ConfigBuilder {
            adapter_uri: Some("not a uri".to_string()),
            ..Default::default()
        };
        assert!(builder.build().is_err());
    }

    #[test]
    fn accepts_a_well_formed_uri() {
        let builder = ConfigBuilder {
            adapter_uri: Some("consul://localhost:8500".to_string()),
            hostname: Some("myhost".to_string()),
            ..Default::default()
        };
        let config = builder.build().unwrap();
        assert_eq!(config.adapter_uri.scheme(), "consul");
        assert_eq!(config.hostname, "myhost");
    }
}
