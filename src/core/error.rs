/// Error type for the container runtime client: one variant per failing Docker Engine API
/// call, wrapping the underlying `bollard` error rather than trying to paper over it.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to initialize a docker client: {0}")]
    Init(bollard::errors::Error),
    #[error("failed to list containers: {0}")]
    ListContainers(bollard::errors::Error),
    #[error("failed to inspect container '{id}': {source}")]
    InspectContainer {
        id: String,
        source: bollard::errors::Error,
    },
    #[error("failed to read the container event stream: {0}")]
    EventStream(bollard::errors::Error),
}
