//! Burrow CLI - control sessions over TCP
//!
//! Serve admin commands for a demo service, or connect to a server and drive
//! a service instance through its lifecycle.

use anyhow::{bail, Context, Result};
use burrow_control::{
    CommandRegistry, ControlConfig, Microservice, ServiceFactory, Session, SessionHandle,
    TaskService,
};
use burrow_proto::{Parameters, ServiceStatus};
use burrow_transport::tcp::{TcpConnector, TcpTransportListener};
use burrow_transport::{TransportConnector, TransportListener};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Service type of the demo heartbeat service
const HEARTBEAT_SERVICE: u32 = 1;

const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Burrow - start and stop services across a control session
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "Burrow - start and stop services across a control session")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML file with control settings
    #[arg(long, global = true, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept sessions and serve admin commands
    #[command(long_about = r#"
Accept TCP connections, run the version handshake and serve admin commands.
Service type 1 is a heartbeat that logs every `interval_secs` seconds.

EXAMPLES:
  burrow serve --listen 127.0.0.1:7400
  RUST_LOG=burrow_control=debug burrow serve --listen 0.0.0.0:7400 --config burrow.yaml
    "#)]
    Serve {
        /// Address to listen on
        #[arg(long, env = "BURROW_LISTEN", default_value = "127.0.0.1:7400")]
        listen: SocketAddr,
    },

    /// Start a service instance on the server and keep it alive
    #[command(long_about = r#"
Start a service instance and hold the session open. Instances belong to the
session that started them: when the session ends, the server stops them.
The instance is stopped explicitly on Ctrl+C or after --hold-secs.

EXAMPLES:
  burrow start --connect 127.0.0.1:7400 --service-type 1 --param interval_secs=2
  burrow start --connect 127.0.0.1:7400 --service-type 1 --instance-id 7 --hold-secs 30
    "#)]
    Start {
        /// Server address
        #[arg(long, env = "BURROW_CONNECT")]
        connect: SocketAddr,

        /// Service type to start
        #[arg(long, default_value_t = HEARTBEAT_SERVICE)]
        service_type: u32,

        /// Instance id to use (allocated by the server if not specified)
        #[arg(long)]
        instance_id: Option<u32>,

        /// Service parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        hold_secs: Option<u64>,
    },

    /// List services, then query and stop an instance id, on a fresh session
    Probe {
        /// Server address
        #[arg(long, env = "BURROW_CONNECT")]
        connect: SocketAddr,

        /// Instance id to probe
        #[arg(long)]
        instance_id: u32,
    },
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn load_config(path: Option<&Path>) -> Result<ControlConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => ControlConfig::default(),
    };
    config.validate().context("Invalid control configuration")?;
    debug!("Control configuration: {:?}", config);
    Ok(config)
}

/// Factory offering the heartbeat service
fn demo_factory() -> Result<ServiceFactory> {
    let mut factory = ServiceFactory::new();
    factory
        .register(HEARTBEAT_SERVICE, |parameters| {
            let interval = match parameters.get("interval_secs") {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|e| format!("invalid interval_secs '{}': {}", raw, e))?,
                None => DEFAULT_HEARTBEAT_SECS,
            };
            if interval == 0 {
                return Err("interval_secs must be at least 1".to_string());
            }
            let name = parameters
                .get("name")
                .cloned()
                .unwrap_or_else(|| "heartbeat".to_string());

            Ok(Box::new(TaskService::new(move || {
                let name = name.clone();
                async move {
                    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
                    loop {
                        ticker.tick().await;
                        info!("{} is alive", name);
                    }
                }
            })) as Box<dyn Microservice>)
        })
        .context("Failed to register heartbeat service")?;
    Ok(factory)
}

async fn serve(listen: SocketAddr, config: ControlConfig) -> Result<()> {
    let registry = Arc::new(CommandRegistry::admin().context("Failed to build command table")?);
    let factory = Arc::new(demo_factory()?);
    let listener = TcpTransportListener::bind(listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    info!("Listening on {}", listener.local_addr()?);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let (config, registry, factory) = (config.clone(), registry.clone(), factory.clone());
        tokio::spawn(async move {
            let session = match Session::respond(stream, config, registry, factory).await {
                Ok(session) => session,
                Err(e) => {
                    warn!("Session with {} failed to open: {}", peer, e);
                    return;
                }
            };
            info!("Session with {} open", peer);
            match session.run().await {
                Ok(()) => info!("Session with {} closed", peer),
                Err(e) => error!("Session with {} ended: {}", peer, e),
            }
        });
    }
}

async fn connect(addr: SocketAddr, config: ControlConfig) -> Result<SessionHandle> {
    let stream = TcpConnector::new()
        .with_connect_timeout(Duration::from_secs(10))
        .connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    let registry = Arc::new(CommandRegistry::admin().context("Failed to build command table")?);
    let session = Session::initiate(stream, config, registry, Arc::new(ServiceFactory::new()))
        .await
        .with_context(|| format!("Failed to open session with {}", addr))?;

    let handle = session.handle();
    tokio::spawn(async move {
        if let Err(e) = session.run().await {
            error!("Session ended: {}", e);
        }
    });
    Ok(handle)
}

fn print_status(label: &str, status: &ServiceStatus) {
    let outcome = status
        .status()
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("unknown status {}", status.status_code));
    println!(
        "{}: instance {} (type {}) -> {}",
        label, status.instance_id, status.service_type, outcome
    );
    for (key, value) in &status.parameters {
        println!("  {} = {}", key, value);
    }
}

async fn start(
    addr: SocketAddr,
    config: ControlConfig,
    service_type: u32,
    instance_id: Option<u32>,
    parameters: Parameters,
    hold: Option<Duration>,
) -> Result<()> {
    let handle = connect(addr, config).await?;

    let started = match instance_id {
        Some(id) => handle.start_service_with_id(id, service_type, parameters).await,
        None => handle.start_service(service_type, parameters).await,
    }
    .context("Start request failed")?;
    print_status("started", &started);
    if !started.is_success() {
        bail!("Server refused to start service type {}", service_type);
    }

    match hold {
        Some(hold) => {
            info!("Holding instance {} for {:?}", started.instance_id, hold);
            tokio::time::sleep(hold).await;
        }
        None => {
            info!("Instance {} running, press Ctrl+C to stop", started.instance_id);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for Ctrl+C")?;
        }
    }

    let stopped = handle
        .stop_service(started.instance_id)
        .await
        .context("Stop request failed")?;
    print_status("stopped", &stopped);
    Ok(())
}

async fn probe(addr: SocketAddr, config: ControlConfig, instance_id: u32) -> Result<()> {
    let handle = connect(addr, config).await?;

    let listed = handle
        .list_services()
        .await
        .context("List request failed")?;
    print_status("list", &listed);

    let queried = handle
        .query_service(instance_id)
        .await
        .context("Query request failed")?;
    print_status("query", &queried);

    let stopped = handle
        .stop_service(instance_id)
        .await
        .context("Stop request failed")?;
    print_status("stop", &stopped);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { listen } => {
            info!("Burrow {} ({}) serving", env!("GIT_TAG"), env!("GIT_HASH"));
            serve(listen, config).await
        }
        Commands::Start {
            connect,
            service_type,
            instance_id,
            params,
            hold_secs,
        } => {
            let parameters: Parameters = params.into_iter().collect();
            start(
                connect,
                config,
                service_type,
                instance_id,
                parameters,
                hold_secs.map(Duration::from_secs),
            )
            .await
        }
        Commands::Probe {
            connect,
            instance_id,
        } => probe(connect, config, instance_id).await,
    }
}
