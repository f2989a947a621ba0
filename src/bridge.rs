//! The Bridge Engine (§4.4): owns the live `container-id → [Service]` mapping and the
//! grace-period table, serializing every mutation behind a single engine-wide lock (§5)
//! rather than fine-grained per-container locking.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bollard_stubs::models::ContainerInspectResponse;

use crate::adapter::Adapter;
use crate::config::{Config, DeregisterCheck};
use crate::core::client::ContainerRuntime;
use crate::core::derive::{self, derive_services, DeriveContext};
use crate::core::id::parse_id;
use crate::core::ports::enumerate_service_ports;
use crate::core::service::{ContainerRef, DeadContainer, Service};
use crate::core::RuntimeError;

#[derive(Debug, Default)]
struct BridgeState {
    services: HashMap<String, Vec<Service>>,
    dead_containers: HashMap<String, DeadContainer>,
}

pub struct Bridge {
    config: Config,
    runtime: Box<dyn ContainerRuntime>,
    adapter: Box<dyn Adapter>,
    state: tokio::sync::Mutex<BridgeState>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Bridge {
    pub fn new(config: Config, runtime: Box<dyn ContainerRuntime>, adapter: Box<dyn Adapter>) -> Self {
        Self {
            config,
            runtime,
            adapter,
            state: tokio::sync::Mutex::new(BridgeState::default()),
        }
    }

    pub async fn ping(&self) -> Result<(), crate::adapter::AdapterError> {
        self.adapter.ping().await
    }

    /// **Add(containerId)** (§4.4).
    pub async fn add(&self, container_id: &str) {
        let mut state = self.state.lock().await;
        self.add_locked(container_id, &mut state).await;
    }

    /// Body of `Add`, taking an already-held state guard so [`Bridge::sync`] can drive it
    /// without releasing the engine lock between containers (§5).
    async fn add_locked(&self, container_id: &str, state: &mut BridgeState) {
        if let Some(dead) = state.dead_containers.remove(container_id) {
            log::info!("container {container_id} reappeared within its grace period, resurrecting {} service(s)", dead.services.len());
            state.services.insert(container_id.to_string(), dead.services);
            return;
        }
        if state.services.contains_key(container_id) {
            log::info!("container {container_id} already has registered services");
            return;
        }

        let inspect = match self.runtime.inspect(container_id).await {
            Ok(inspect) => inspect,
            Err(err) => {
                log::warn!("failed to inspect container {container_id}: {err}");
                return;
            }
        };

        let container = build_container_ref(container_id, &inspect);
        let ports = enumerate_service_ports(
            &container,
            &exposed_ports(&inspect),
            network_settings_ports(&inspect),
            &network_ip(&inspect).unwrap_or_default(),
            self.config.internal,
        );

        if ports.is_empty() {
            log::info!("container {container_id} ignored: no published ports");
            state.services.insert(container_id.to_string(), Vec::new());
            return;
        }

        let ctx = self.derive_context(&container).await;
        let candidates = derive_services(&container, &ports, &self.config, &ctx);

        let mut registered = Vec::with_capacity(candidates.len());
        for service in candidates {
            match self.adapter.register(&service).await {
                Ok(()) => registered.push(service),
                Err(err) => log::warn!("failed to register service {}: {}", service.id, err),
            }
        }
        state.services.insert(container_id.to_string(), registered);
    }

    /// **Remove(containerId, deregister)** (§4.4).
    pub async fn remove(&self, container_id: &str, deregister: bool) {
        let mut state = self.state.lock().await;

        if deregister {
            let services = state.services.remove(container_id).unwrap_or_default();
            let dead_services = state
                .dead_containers
                .remove(container_id)
                .map(|d| d.services)
                .unwrap_or_default();
            for service in services.into_iter().chain(dead_services) {
                self.deregister_best_effort(&service).await;
            }
            return;
        }

        if self.config.refresh_ttl > 0 {
            if let Some(services) = state.services.get(container_id) {
                if !services.is_empty() {
                    let services = state.services.remove(container_id).unwrap();
                    state.dead_containers.insert(
                        container_id.to_string(),
                        DeadContainer {
                            ttl_remaining: self.config.refresh_ttl as i64,
                            services,
                        },
                    );
                }
            }
        }
        state.services.remove(container_id);
    }

    /// **RemoveOnExit(containerId)** (§4.4).
    pub async fn remove_on_exit(&self, container_id: &str) {
        if self.config.deregister_check == DeregisterCheck::Always {
            self.remove(container_id, true).await;
            return;
        }

        match self.runtime.inspect(container_id).await {
            Err(err) if is_not_found(&err) => {
                self.remove(container_id, true).await;
            }
            Err(err) => {
                log::warn!("failed to inspect exited container {container_id}: {err}");
            }
            Ok(inspect) => {
                let state_info = inspect.state.clone().unwrap_or_default();
                if state_info.running.unwrap_or(false) {
                    log::info!("container {container_id} still running, leaving its services in place");
                    return;
                }
                let exit_code = state_info.exit_code.unwrap_or(0);
                if exit_code == 0 || (exit_code & 0x80) != 0 {
                    self.remove(container_id, true).await;
                } else {
                    self.remove(container_id, false).await;
                }
            }
        }
    }

    /// **Refresh** (§4.4).
    pub async fn refresh(&self) {
        let mut state = self.state.lock().await;

        let interval = self.config.refresh_interval as i64;
        state.dead_containers.retain(|container_id, dead| {
            dead.ttl_remaining -= interval;
            let alive = dead.ttl_remaining > 0;
            if !alive {
                log::info!("container {container_id}'s grace period expired, dropping its services");
            }
            alive
        });

        for services in state.services.values() {
            for service in services {
                if let Err(err) = self.adapter.refresh(service).await {
                    log::warn!("failed to refresh {}: {}", service.id, err);
                }
            }
        }
    }

    /// **Sync(quiet)** (§4.4). Steps 1-2 hold the engine lock for their entire duration,
    /// including adapter calls, so no other operation can interleave a deregister/remove
    /// for a container `sync` is re-registering (§5/§9). Only step 3's stale-container
    /// dispatch runs outside the lock, as the spec allows, to avoid `RemoveOnExit`
    /// re-acquiring it.
    pub async fn sync(self: &Arc<Self>, quiet: bool) -> Result<(), RuntimeError> {
        let containers = match self.runtime.list_containers(true).await {
            Ok(containers) => containers,
            Err(err) if quiet => {
                log::warn!("sync: failed to list containers: {err}");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        {
            let mut state = self.state.lock().await;
            for summary in &containers {
                let Some(id) = summary.id.clone() else { continue };
                if state.services.contains_key(&id) {
                    let services = state.services.get(&id).cloned().unwrap_or_default();
                    for service in &services {
                        if let Err(err) = self.adapter.register(service).await {
                            log::warn!("sync: failed to re-register {}: {}", service.id, err);
                        }
                    }
                } else {
                    self.add_locked(&id, &mut state).await;
                }
            }
        }

        if self.config.cleanup {
            self.cleanup().await;
        }

        Ok(())
    }

    /// Step 3 of `Sync`: schedule removal of containers no longer live, then deregister
    /// dangling registry entries the engine can positively attribute to this host (§4.4/§9).
    async fn cleanup(self: &Arc<Self>) {
        let active_ids: HashSet<String> = match self.runtime.list_containers(false).await {
            Ok(containers) => containers.into_iter().filter_map(|c| c.id).collect(),
            Err(err) => {
                log::warn!("cleanup: failed to list non-exited containers: {err}");
                return;
            }
        };

        let tracked_ids: Vec<String> = {
            let state = self.state.lock().await;
            state.services.keys().cloned().collect()
        };
        for container_id in tracked_ids {
            if !active_ids.contains(&container_id) {
                let bridge = Arc::clone(self);
                tokio::spawn(async move {
                    bridge.remove_on_exit(&container_id).await;
                });
            }
        }

        let tracked: HashSet<(String, String)> = {
            let state = self.state.lock().await;
            state
                .services
                .values()
                .flatten()
                .map(|s| (s.origin.container.name.clone(), s.name.clone()))
                .collect()
        };

        match self.adapter.services().await {
            Ok(entries) => {
                for entry in entries {
                    let Some(parsed) = parse_id(&entry.id) else {
                        continue;
                    };
                    if parsed.hostname != self.config.hostname {
                        continue;
                    }
                    if tracked.contains(&(parsed.container_name.clone(), entry.name.clone())) {
                        continue;
                    }
                    log::info!("deregistering dangling entry {}", entry.id);
                    if let Err(err) = self.adapter.deregister(&entry.id).await {
                        log::warn!("failed to deregister dangling entry {}: {}", entry.id, err);
                    }
                }
            }
            Err(err) => log::warn!("cleanup: failed to enumerate registry services: {err}"),
        }
    }

    async fn deregister_best_effort(&self, service: &Service) {
        if let Err(err) = self.adapter.deregister(&service.id).await {
            log::warn!("failed to deregister {}: {}", service.id, err);
        }
    }

    /// Resolves the I/O-backed inputs derivation needs: the advertised hostname's
    /// address, a referenced `container:<id>` peer's IP, and (under AWS VPC mode) the
    /// ECS task ARN label.
    async fn derive_context(&self, container: &ContainerRef) -> DeriveContext {
        let mut ctx = DeriveContext {
            ecs_task_arn: if self.config.awsvpc {
                container.labels.get("com.amazonaws.ecs.task-arn").cloned()
            } else {
                None
            },
            ..Default::default()
        };

        let hostname = derive::select_hostname(container, &self.config);
        match tokio::net::lookup_host((hostname.as_str(), 0)).await {
            Ok(mut addrs) => ctx.resolved_hostname_ip = addrs.next().map(|a| a.ip().to_string()),
            Err(err) => log::debug!("could not resolve hostname '{hostname}': {err}"),
        }

        if let Some(peer_id) = container.network_mode.strip_prefix("container:") {
            match self.runtime.inspect(peer_id).await {
                Ok(inspect) => ctx.network_container_ip = network_ip(&inspect),
                Err(err) => log::warn!(
                    "failed to inspect network-mode peer container '{peer_id}': {err}"
                ),
            }
        }

        ctx
    }
}

fn is_not_found(err: &RuntimeError) -> bool {
    matches!(
        err,
        RuntimeError::InspectContainer {
            source: bollard::errors::Error::DockerResponseServerError { status_code: 404, .. },
            ..
        }
    )
}

fn build_container_ref(container_id: &str, inspect: &ContainerInspectResponse) -> ContainerRef {
    let config = inspect.config.clone().unwrap_or_default();
    let name = inspect
        .name
        .clone()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();
    let network_mode = inspect
        .host_config
        .as_ref()
        .and_then(|hc| hc.network_mode.clone())
        .unwrap_or_else(|| "default".to_string());

    ContainerRef {
        id: container_id.to_string(),
        name,
        image: config.image.unwrap_or_default(),
        hostname: config.hostname.unwrap_or_default(),
        network_mode,
        labels: config
            .labels
            .unwrap_or_default()
            .into_iter()
            .collect::<BTreeMap<_, _>>(),
        env: parse_env(&config.env.unwrap_or_default()),
    }
}

fn parse_env(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn exposed_ports(inspect: &ContainerInspectResponse) -> HashMap<String, serde_json::Value> {
    inspect
        .config
        .as_ref()
        .and_then(|c| c.exposed_ports.as_ref())
        .map(|ports| ports.keys().map(|k| (k.clone(), serde_json::Value::Null)).collect())
        .unwrap_or_default()
}

fn network_settings_ports(
    inspect: &ContainerInspectResponse,
) -> Option<&bollard_stubs::models::PortMap> {
    inspect.network_settings.as_ref().and_then(|ns| ns.ports.as_ref())
}

fn network_ip(inspect: &ContainerInspectResponse) -> Option<String> {
    inspect
        .network_settings
        .as_ref()
        .and_then(|ns| ns.ip_address.clone())
        .filter(|ip| !ip.is_empty())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::adapter::log_adapter::LogAdapter;
    use crate::core::client::EventStream;
    use bollard::models::ContainerSummary;

    /// A fake runtime backed by hand-built inspect fixtures, so Bridge Engine tests need
    /// neither a live daemon nor network access (§8).
    #[derive(Default)]
    struct FakeRuntime {
        containers: AsyncMutex<StdHashMap<String, ContainerInspectResponse>>,
        listed: Vec<String>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_containers(&self, _all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
            Ok(self
                .listed
                .iter()
                .map(|id| ContainerSummary {
                    id: Some(id.clone()),
                    ..Default::default()
                })
                .collect())
        }

        async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
            self.containers
                .lock()
                .await
                .get(id)
                .cloned()
                .ok_or_else(|| RuntimeError::InspectContainer {
                    id: id.to_string(),
                    source: bollard::errors::Error::DockerResponseServerError {
                        status_code: 404,
                        message: "not found".to_string(),
                    },
                })
        }

        fn events(&self) -> EventStream<'_> {
            Box::pin(futures::stream::empty())
        }
    }

    fn fixture_inspect(image: &str, exposed_port: &str, host_port: &str) -> ContainerInspectResponse {
        let mut exposed_ports = StdHashMap::new();
        exposed_ports.insert(exposed_port.to_string(), StdHashMap::new());

        let mut ports = bollard_stubs::models::PortMap::new();
        ports.insert(
            exposed_port.to_string(),
            Some(vec![bollard_stubs::models::PortBinding {
                host_ip: Some("10.0.0.1".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        ContainerInspectResponse {
            id: Some("abc".to_string()),
            name: Some("/abc".to_string()),
            config: Some(bollard_stubs::models::ContainerConfig {
                image: Some(image.to_string()),
                hostname: Some("abc123".to_string()),
                exposed_ports: Some(exposed_ports),
                ..Default::default()
            }),
            host_config: Some(bollard_stubs::models::HostConfig {
                network_mode: Some("bridge".to_string()),
                ..Default::default()
            }),
            network_settings: Some(bollard_stubs::models::NetworkSettings {
                ip_address: Some("172.17.0.2".to_string()),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn config() -> Config {
        crate::config::ConfigBuilder {
            adapter_uri: Some("log://".to_string()),
            hostname: Some("myhost".to_string()),
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn add_registers_a_single_service() {
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), fixture_inspect("nginx:1.2", "80/tcp", "8080"));
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec!["abc".to_string()],
        };

        let bridge = Bridge::new(config(), Box::new(runtime), Box::new(LogAdapter::new()));
        bridge.add("abc").await;

        let state = bridge.state.lock().await;
        let services = state.services.get("abc").unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].id, "myhost:abc:80");
        assert_eq!(services[0].port, 8080);
    }

    #[tokio::test]
    async fn add_is_idempotent_for_an_already_tracked_container() {
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), fixture_inspect("nginx:1.2", "80/tcp", "8080"));
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let bridge = Bridge::new(config(), Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;
        bridge.add("abc").await;

        let state = bridge.state.lock().await;
        assert_eq!(state.services.get("abc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_with_deregister_clears_both_maps() {
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), fixture_inspect("nginx:1.2", "80/tcp", "8080"));
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let bridge = Bridge::new(config(), Box::new(runtime), Box::new(LogAdapter::new()));
        bridge.add("abc").await;

        bridge.remove("abc", true).await;

        let state = bridge.state.lock().await;
        assert!(!state.services.contains_key("abc"));
        assert!(!state.dead_containers.contains_key("abc"));
    }

    #[tokio::test]
    async fn graceful_restart_resurrects_without_reregistering() {
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), fixture_inspect("nginx:1.2", "80/tcp", "8080"));
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let mut cfg = config();
        cfg.refresh_ttl = 30;
        let bridge = Bridge::new(cfg, Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;
        bridge.remove("abc", false).await;
        {
            let state = bridge.state.lock().await;
            assert!(state.dead_containers.contains_key("abc"));
        }

        bridge.add("abc").await;
        let state = bridge.state.lock().await;
        assert_eq!(state.services.get("abc").unwrap().len(), 1);
        assert!(!state.dead_containers.contains_key("abc"));
    }

    /// §8 scenario 4, driven through `RemoveOnExit` itself rather than `remove` directly:
    /// a non-zero, non-signaled exit code with `RefreshTtl=30` enters the grace period
    /// instead of fully deregistering.
    #[tokio::test]
    async fn remove_on_exit_with_nonzero_unsignaled_exit_enters_grace_period() {
        let mut inspect = fixture_inspect("nginx:1.2", "80/tcp", "8080");
        inspect.state = Some(bollard_stubs::models::ContainerState {
            running: Some(false),
            exit_code: Some(1),
            ..Default::default()
        });
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), inspect);
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let mut cfg = config();
        cfg.refresh_ttl = 30;
        let bridge = Bridge::new(cfg, Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;
        bridge.remove_on_exit("abc").await;

        let state = bridge.state.lock().await;
        assert!(!state.services.contains_key("abc"));
        let dead = state.dead_containers.get("abc").expect("should be in the grace period");
        assert_eq!(dead.ttl_remaining, 30);
        assert_eq!(dead.services.len(), 1);
    }

    /// `RemoveOnExit`'s other branches: still running leaves services untouched; a 404 on
    /// inspect ("no longer known to the runtime") fully deregisters; `DeregisterCheck::Always`
    /// always fully deregisters regardless of exit status.
    #[tokio::test]
    async fn remove_on_exit_still_running_leaves_services_in_place() {
        let mut inspect = fixture_inspect("nginx:1.2", "80/tcp", "8080");
        inspect.state = Some(bollard_stubs::models::ContainerState {
            running: Some(true),
            ..Default::default()
        });
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), inspect);
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let bridge = Bridge::new(config(), Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;
        bridge.remove_on_exit("abc").await;

        let state = bridge.state.lock().await;
        assert_eq!(state.services.get("abc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_on_exit_container_no_longer_known_fully_deregisters() {
        // Empty runtime: inspecting "abc" 404s, as if the container had been removed
        // entirely (not merely exited) between the tracked `Add` and this `RemoveOnExit`.
        let runtime = FakeRuntime::default();
        let bridge = Bridge::new(config(), Box::new(runtime), Box::new(LogAdapter::new()));
        {
            let mut state = bridge.state.lock().await;
            state.services.insert("abc".to_string(), Vec::new());
        }

        bridge.remove_on_exit("abc").await;

        let state = bridge.state.lock().await;
        assert!(!state.services.contains_key("abc"));
        assert!(!state.dead_containers.contains_key("abc"));
    }

    #[tokio::test]
    async fn remove_on_exit_always_check_fully_deregisters_despite_refresh_ttl() {
        let mut inspect = fixture_inspect("nginx:1.2", "80/tcp", "8080");
        inspect.state = Some(bollard_stubs::models::ContainerState {
            running: Some(false),
            exit_code: Some(1),
            ..Default::default()
        });
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), inspect);
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let mut cfg = config();
        cfg.refresh_ttl = 30;
        cfg.deregister_check = DeregisterCheck::Always;
        let bridge = Bridge::new(cfg, Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;
        bridge.remove_on_exit("abc").await;

        let state = bridge.state.lock().await;
        assert!(!state.services.contains_key("abc"));
        assert!(!state.dead_containers.contains_key("abc"));
    }

    #[tokio::test]
    async fn refresh_expires_grace_period_entries() {
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), fixture_inspect("nginx:1.2", "80/tcp", "8080"));
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let mut cfg = config();
        cfg.refresh_ttl = 10;
        cfg.refresh_interval = 10;
        let bridge = Bridge::new(cfg, Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;
        bridge.remove("abc", false).await;
        bridge.refresh().await;

        let state = bridge.state.lock().await;
        assert!(!state.dead_containers.contains_key("abc"));
    }

    #[tokio::test]
    async fn container_with_no_published_ports_yields_no_services() {
        let mut inspect = fixture_inspect("nginx:1.2", "80/tcp", "8080");
        inspect.network_settings.as_mut().unwrap().ports = None;
        inspect.config.as_mut().unwrap().exposed_ports = None;
        let mut containers = StdHashMap::new();
        containers.insert("abc".to_string(), inspect);
        let runtime = FakeRuntime {
            containers: AsyncMutex::new(containers),
            listed: vec![],
        };
        let bridge = Bridge::new(config(), Box::new(runtime), Box::new(LogAdapter::new()));

        bridge.add("abc").await;

        let state = bridge.state.lock().await;
        assert!(state.services.get("abc").unwrap().is_empty());
    }
}
