//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the foamcore bridge."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use foam_bridge::{BridgeError, BridgePipeline, BridgeStats, FoamContext};
use foam_common::{init_tracing, FoamConfig, ShutdownSignal, SocketMode};
use foam_store::{load_schema, RedisConnector, StreamKey, StreamSchema};
use foam_supervisor::{StartOutcome, StdinConfirm, SupervisorError, SystemLauncher};
use foam_transport::ZmqConsumer;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Forward acquisition records into Redis streams",
    long_about = None
)]
struct Cli {
    #[arg(value_name = "SCHEMA", help = "Path to the stream schema file")]
    schema: PathBuf,

    #[arg(long, help = "Run in debug mode")]
    debug: bool,

    #[arg(long, value_name = "ENDPOINT", help = "ZeroMQ endpoint to connect to")]
    zmq_endpoint: Option<String>,

    #[arg(long, value_enum, ignore_case = true, help = "ZeroMQ socket type")]
    zmq_sock: Option<SocketMode>,

    #[arg(long, value_name = "HOST", value_parser = parse_host, help = "Hostname of the Redis server")]
    redis_host: Option<String>,

    #[arg(long, value_name = "PORT", help = "Port of the Redis server")]
    redis_port: Option<u16>,

    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
}

fn parse_host(raw: &str) -> std::result::Result<String, String> {
    let host = raw.trim().to_lowercase();
    if host.is_empty() {
        return Err("host must not be empty".to_owned());
    }
    Ok(host)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("foamcore {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("foamcore.toml"));

    let loaded = FoamConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    apply_overrides(&mut config, &cli);
    config.validate()?;
    init_tracing("foamcore", &config.logging, cli.debug)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let schema_file = load_schema(&cli.schema)
        .with_context(|| format!("unable to load schema file {}", cli.schema.display()))?;
    let key = schema_file.key;
    let default_schema = match schema_file.schema {
        Some(schema) => schema,
        None => StreamSchema::envelope(&key)?,
    };

    let shutdown = ShutdownSignal::new();
    let context = Arc::new(
        FoamContext::new(config, Arc::new(RedisConnector)).with_shutdown(shutdown.clone()),
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("termination signal received; shutting down");
        shutdown.trigger();
    });

    let worker = Arc::clone(&context);
    let outcome = tokio::task::spawn_blocking(move || run_bridge(&worker, key, default_schema))
        .await
        .context("bridge worker panicked")?;

    let stopped = context.teardown();
    for record in &stopped {
        info!(name = %record.name, pid = record.pid, state = ?record.state, "store process stopped");
    }

    match outcome {
        Ok(Some(stats)) => {
            info!(
                received = stats.received,
                published = stats.published,
                dropped_timeout = stats.dropped_timeout,
                failed = stats.failed,
                rejected = stats.rejected,
                "bridge finished"
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => Err(err),
    }
}

fn apply_overrides(config: &mut FoamConfig, cli: &Cli) {
    if let Some(endpoint) = &cli.zmq_endpoint {
        config.transport.endpoint = endpoint.clone();
    }
    if let Some(mode) = cli.zmq_sock {
        config.transport.socket = mode;
    }
    if let Some(host) = &cli.redis_host {
        config.store.host = host.clone();
    }
    if let Some(port) = cli.redis_port {
        config.store.port = port;
    }
}

/// Start the store and run the pipeline. `None` when the operator kept an
/// already running store.
fn run_bridge(
    context: &FoamContext,
    key: StreamKey,
    default_schema: StreamSchema,
) -> Result<Option<BridgeStats>> {
    let confirm = StdinConfirm::new(context.shutdown().clone());
    match context.start_store(Arc::new(SystemLauncher), Box::new(confirm)) {
        Ok(StartOutcome::Ready(handle)) => info!(store = ?handle, "Redis server ready"),
        Ok(StartOutcome::Declined) => {
            warn!("existing Redis server kept; exiting");
            return Ok(None);
        }
        Err(BridgeError::Supervisor(SupervisorError::Interrupted)) => {
            info!("startup interrupted from the keyboard");
            return Ok(None);
        }
        Err(err) => return Err(err).context("unable to start the Redis server"),
    }

    let transport = &context.config().transport;
    let consumer = ZmqConsumer::from_config(transport)
        .with_context(|| format!("unable to connect to {}", transport.endpoint))?;
    let mut pipeline = BridgePipeline::new(context, key, default_schema, consumer);
    let stats = pipeline.run().context("bridge stopped")?;
    Ok(Some(stats))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_configuration() {
        let cli = Cli::parse_from([
            "foamcore",
            "schema.json",
            "--zmq-endpoint",
            "tcp://daq:5555",
            "--zmq-sock",
            "pull",
            "--redis-host",
            "LocalHost",
            "--redis-port",
            "6380",
        ]);
        let mut config = FoamConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.transport.endpoint, "tcp://daq:5555");
        assert_eq!(config.transport.socket, SocketMode::Pull);
        assert_eq!(config.store.host, "localhost");
        assert_eq!(config.store.port, 6380);
        assert!(!cli.debug);
    }

    #[test]
    fn schema_path_is_required() {
        assert!(Cli::try_parse_from(["foamcore", "--debug"]).is_err());
    }
}
