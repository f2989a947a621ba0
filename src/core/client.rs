use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bollard::{
    container::{InspectContainerOptions, ListContainersOptions},
    models::{ContainerSummary, EventMessageTypeEnum},
    system::EventsOptions,
    Docker,
};
use bollard_stubs::models::ContainerInspectResponse;
use futures::{Stream, StreamExt, TryStreamExt};

use super::env::DockerConnection;
use super::error::RuntimeError;

/// A boxed event stream borrowed from the runtime handle, the shape [`ContainerRuntime`]
/// needs to stay object-safe.
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send + 'a>>;

/// The subset of the Docker Engine API the Bridge Engine depends on, pulled out as a trait
/// so tests can swap in a fake runtime and drive `Add`/`Sync` against hand-built
/// `ContainerInspectResponse`/`ContainerSummary` fixtures instead of a live daemon (§8).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError>;
    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError>;
    fn events(&self) -> EventStream<'_>;
}

mod bollard_client;

/// The lifecycle events the bridge reacts to (§4.9); a narrowed view over Docker's own
/// event stream so callers never touch `bollard`'s raw event model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeAction {
    Start,
    Die,
    Destroy,
}

#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub container_id: String,
    pub action: RuntimeAction,
}

/// Thin wrapper over `bollard::Docker`.
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    docker: Docker,
}

impl RuntimeClient {
    pub fn connect(connection: &DockerConnection) -> Result<Self, RuntimeError> {
        let docker = bollard_client::init(connection)?;
        Ok(Self { docker })
    }

    pub async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all,
            ..Default::default()
        };
        self.docker
            .list_containers(Some(options))
            .await
            .map_err(RuntimeError::ListContainers)
    }

    pub async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|source| RuntimeError::InspectContainer {
                id: id.to_string(),
                source,
            })
    }

    /// Container `start`/`die`/`destroy` events, filtered and translated to `RuntimeEvent`
    /// (§4.6). Any other event type or action is dropped upstream of the bridge.
    pub fn events(&self) -> impl Stream<Item = Result<RuntimeEvent, RuntimeError>> + '_ {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        filters.insert(
            "event".to_string(),
            vec!["start".to_string(), "die".to_string(), "destroy".to_string()],
        );
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .map_err(RuntimeError::EventStream)
            .try_filter_map(|event| async move {
                if event.typ != Some(EventMessageTypeEnum::CONTAINER) {
                    return Ok(None);
                }
                let container_id = match event.actor.as_ref().and_then(|a| a.id.clone()) {
                    Some(id) => id,
                    None => return Ok(None),
                };
                let action = match event.action.as_deref() {
                    Some("start") => RuntimeAction::Start,
                    Some("die") => RuntimeAction::Die,
                    Some("destroy") => RuntimeAction::Destroy,
                    _ => return Ok(None),
                };
                Ok(Some(RuntimeEvent { container_id, action }))
            })
            .boxed()
    }
}

#[async_trait]
impl ContainerRuntime for RuntimeClient {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        RuntimeClient::list_containers(self, all).await
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        RuntimeClient::inspect(self, id).await
    }

    fn events(&self) -> EventStream<'_> {
        RuntimeClient::events(self).boxed()
    }
}
