//! Resolves the Docker connection settings from the environment. Kept deliberately small:
//! this bridge only needs `DOCKER_HOST` and the TLS verification flag, not a full
//! desktop-socket search chain.

use std::path::PathBuf;

#[derive(Debug, Default, Clone)]
pub struct DockerConnection {
    pub host: Option<String>,
    pub tls_verify: bool,
    pub cert_path: Option<PathBuf>,
}

impl DockerConnection {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("DOCKER_HOST").ok(),
            tls_verify: std::env::var("DOCKER_TLS_VERIFY")
                .map(|v| v == "1")
                .unwrap_or(false),
            cert_path: std::env::var("DOCKER_CERT_PATH").ok().map(PathBuf::from),
        }
    }
}
