//! CLI entry point (§4.9): parses flags, builds configuration, constructs the adapter and
//! the Bridge Engine, performs the initial sync, then drives the event stream and two
//! tickers concurrently until a termination signal arrives, stopping the bridge's loops
//! rather than tearing down containers.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;

use registry_bridge::adapter::registry;
use registry_bridge::config::{Config, ConfigBuilder};
use registry_bridge::core::client::{RuntimeAction, RuntimeClient};
use registry_bridge::core::env::DockerConnection;
use registry_bridge::Bridge;

/// A service-registration bridge between the local container runtime and an external
/// service registry.
#[derive(Parser, Debug)]
#[command(name = "bridged", version, about)]
struct Cli {
    /// Registry adapter URI, e.g. `consul://localhost:8500` or `log://`.
    adapter_uri: String,

    #[arg(long = "host-ip", env = "BRIDGE_IP")]
    host_ip: Option<String>,

    #[arg(long)]
    internal: bool,

    #[arg(long)]
    explicit: bool,

    #[arg(long)]
    awsvpc: bool,

    #[arg(long = "use-ip-from-label")]
    use_ip_from_label: Option<String>,

    #[arg(long = "ecs-task-arn-tag")]
    ecs_task_arn_tag: Option<String>,

    #[arg(long = "force-tags", value_delimiter = ',')]
    force_tags: Vec<String>,

    #[arg(long = "ttl", default_value_t = 0)]
    refresh_ttl: u64,

    #[arg(long = "refresh-interval", default_value_t = 0)]
    refresh_interval: u64,

    #[arg(long)]
    cleanup: bool,

    #[arg(long = "deregister")]
    deregister_check: Option<String>,

    /// How often to run a full resync sweep, in seconds.
    #[arg(long = "resync-interval", default_value_t = 30)]
    resync_interval: u64,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn build_config(cli: &Cli) -> Result<Config, registry_bridge::ConfigError> {
    ConfigBuilder {
        adapter_uri: Some(cli.adapter_uri.clone()),
        host_ip: cli.host_ip.clone(),
        internal: cli.internal,
        explicit: cli.explicit,
        awsvpc: cli.awsvpc,
        use_ip_from_label: cli.use_ip_from_label.clone(),
        ecs_task_arn_tag: cli.ecs_task_arn_tag.clone(),
        force_tags: cli.force_tags.clone(),
        refresh_ttl: cli.refresh_ttl,
        refresh_interval: cli.refresh_interval,
        cleanup: cli.cleanup,
        deregister_check: cli.deregister_check.clone(),
        hostname: None,
    }
    .build()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install a SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install a SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    registry::install_defaults();
    let adapter = match registry::build(&config.adapter_uri) {
        Ok(adapter) => adapter,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = adapter.ping().await {
        log::error!("registry unreachable at startup: {err}");
        return ExitCode::FAILURE;
    }

    let connection = DockerConnection::from_env();
    let runtime = match RuntimeClient::connect(&connection) {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let mut events = Box::pin(runtime.events());

    let bridge = Arc::new(Bridge::new(config, Box::new(runtime), adapter));

    if let Err(err) = bridge.sync(false).await {
        log::error!("startup sync failed: {err}");
        return ExitCode::FAILURE;
    }
    log::info!("startup sync complete, watching the container runtime");

    let mut refresh_ticker = tokio::time::interval(Duration::from_secs(cli.refresh_interval.max(1)));
    let mut resync_ticker = tokio::time::interval(Duration::from_secs(cli.resync_interval.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // Once the event stream ends, this stops polling it (the `if` guard below) rather than
    // tearing down the whole loop, so the refresh/resync tickers and shutdown signal keep
    // running until the process is restarted (§7).
    let mut stream_closed = false;

    loop {
        tokio::select! {
            event = events.next(), if !stream_closed => {
                match event {
                    Some(Ok(event)) => dispatch(&bridge, event).await,
                    Some(Err(err)) => {
                        log::error!("container event stream failed: {err}; relying on the resync ticker until restarted");
                        stream_closed = true;
                    }
                    None => {
                        log::warn!("container event stream closed; relying on the resync ticker until restarted");
                        stream_closed = true;
                    }
                }
            }
            _ = refresh_ticker.tick(), if cli.refresh_interval > 0 => {
                bridge.refresh().await;
            }
            _ = resync_ticker.tick() => {
                let _ = bridge.sync(true).await;
            }
            _ = &mut shutdown => {
                log::info!("shutdown signal received, stopping");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

async fn dispatch(bridge: &Arc<Bridge>, event: registry_bridge::core::client::RuntimeEvent) {
    match event.action {
        RuntimeAction::Start => bridge.add(&event.container_id).await,
        RuntimeAction::Die | RuntimeAction::Destroy => bridge.remove_on_exit(&event.container_id).await,
    }
}
