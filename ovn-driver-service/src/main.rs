//! OVN network driver service
//!
//! Startup sequence:
//! - Load the environment file and build the driver configuration
//! - Connect to the northbound and local Open vSwitch databases
//! - Rebuild state from the container engine and start the change monitor
//! - Serve the plugin API on the plugin socket

use anyhow::{Context, Result};
use clap::Parser;
use ovn_driver::{BollardEngine, ChangeMonitor, Driver, DriverConfig, DriverError};
use ovn_driver_service::{create_router, PluginServer};
use ovn_network::{LocalVswitch, NetlinkVeth, NetworkError, OvnNorthbound};
use ovn_ovsdb::Endpoint;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ovn-driver-service")]
#[command(about = "OVN network driver for the container engine")]
struct Args {
    /// Northbound database host
    #[arg(long)]
    nb_host: Option<String>,

    /// Northbound database port
    #[arg(long)]
    nb_port: Option<u16>,

    /// Local Open vSwitch database socket
    #[arg(long)]
    ovs_socket: Option<PathBuf>,

    /// Plugin socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut DriverConfig) {
        if self.nb_host.is_some() || self.nb_port.is_some() {
            let (host, port) = match &config.nb_endpoint {
                Endpoint::Tcp { host, port } => (host.clone(), *port),
                Endpoint::Unix(_) => (
                    ovn_driver::config::DEFAULT_NB_HOST.to_string(),
                    ovn_driver::config::DEFAULT_NB_PORT,
                ),
            };
            config.nb_endpoint = Endpoint::tcp(
                self.nb_host.clone().unwrap_or(host),
                self.nb_port.unwrap_or(port),
            );
        }
        if let Some(socket) = &self.ovs_socket {
            config.ovs_endpoint = Endpoint::unix(socket);
        }
        if let Some(socket) = &self.socket {
            config.plugin_socket = socket.clone();
        }
        config.debug |= self.debug;
    }
}

fn init_tracing(debug: bool, json: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for target in ["ovn_driver_service", "ovn_driver", "ovn_network", "ovn_ovsdb"] {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    filter = filter.add_directive("tower_http=info".parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn connection_error(what: &str, endpoint: &Endpoint, err: NetworkError) -> DriverError {
    warn!("{}", err.suggestion());
    DriverError::connection(format!("{} at {}: {}", what, endpoint, err))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/ovn-driver/environment (if exists)
    let env_file = ovn_driver::load_environment();

    let args = Args::parse();
    let mut config = DriverConfig::from_env().context("invalid driver configuration")?;
    args.apply(&mut config);

    init_tracing(config.debug, args.log_json)?;
    if let Some(path) = env_file {
        info!("Loaded environment from {}", path);
    }

    if unsafe { libc::geteuid() } != 0 {
        warn!("Not running as root: veth creation needs CAP_NET_ADMIN");
    }

    info!(
        nb = %config.nb_endpoint,
        ovs = %config.ovs_endpoint,
        bridge = %config.integration_bridge,
        scope = %config.scope,
        "Starting OVN network driver"
    );

    // --- 1. Database connections ---

    let northbound = OvnNorthbound::connect(&config.nb_endpoint, config.retry, config.transaction_timeout)
        .await
        .map_err(|e| connection_error("northbound database unreachable", &config.nb_endpoint, e))?;
    info!("Connected to the northbound database at {}", config.nb_endpoint);

    let vswitch = LocalVswitch::connect(&config.ovs_endpoint, config.retry, config.transaction_timeout)
        .await
        .map_err(|e| connection_error("Open vSwitch database unreachable", &config.ovs_endpoint, e))?;
    info!("Connected to the Open vSwitch database at {}", config.ovs_endpoint);

    let driver = Arc::new(Driver::new(
        Arc::new(northbound),
        Arc::new(vswitch),
        Arc::new(NetlinkVeth::new()),
        config.integration_bridge.clone(),
        config.scope,
    ));

    // --- 2. State recovery ---

    let engine = BollardEngine::connect_with_socket(&config.docker_socket)
        .with_context(|| format!("cannot reach the container engine at {}", config.docker_socket.display()))?;
    let report = driver
        .reconcile(&engine)
        .await
        .context("startup reconciliation failed")?;
    info!(
        networks = report.networks,
        endpoints = report.endpoints,
        skipped = report.skipped_endpoints,
        "State restored"
    );

    let monitor = ChangeMonitor::start(driver.northbound().as_ref(), driver.state().clone())
        .await
        .context("failed to start the northbound change monitor")?;

    // --- 3. Plugin API ---

    let server = PluginServer::bind(&config.plugin_socket)?;
    let router = create_router(Arc::clone(&driver));

    tokio::select! {
        res = server.serve(router) => {
            error!("Plugin server exited: {:?}", res);
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    monitor.abort();
    Ok(())
}
