use bollard::Docker;

use crate::core::env::DockerConnection;
use crate::core::error::RuntimeError;

/// Builds a `bollard::Docker` handle from the resolved connection settings.
pub fn init(connection: &DockerConnection) -> Result<Docker, RuntimeError> {
    match &connection.host {
        Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
            if connection.tls_verify {
                let cert_path = connection
                    .cert_path
                    .clone()
                    .unwrap_or_else(|| "/root/.docker".into());
                Docker::connect_with_ssl(
                    host,
                    &cert_path.join("key.pem"),
                    &cert_path.join("cert.pem"),
                    &cert_path.join("ca.pem"),
                    120,
                    bollard::API_DEFAULT_VERSION,
                )
                .map_err(RuntimeError::Init)
            } else {
                Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
                    .map_err(RuntimeError::Init)
            }
        }
        Some(host) => {
            Docker::connect_with_unix(host, 120, bollard::API_DEFAULT_VERSION).map_err(RuntimeError::Init)
        }
        None => Docker::connect_with_local_defaults().map_err(RuntimeError::Init),
    }
}
