//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Store server detection, launch and capacity configuration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Startup supervision of the store server.
//!
//! ```text
//! NoServer -> Checking -> FoundOwnedByOther -> (shutdown) -> NoServer -> ...
//!                      \-> NotFound -> Launching -> Configuring -> Ready
//! ```

use std::sync::Arc;

use foam_common::{ShutdownSignal, StoreConfig};
use foam_store::{
    is_connectivity_error, ConnectionParams, ConnectionRegistry, Connector, StoreHandle,
    StoreSession,
};
use redis::Value;
use tracing::{error, info, warn};

use crate::capacity::{max_memory_bytes, rewrite_output_buffer_limit, BufferLimits};
use crate::host::{operator_identity, HostResources};
use crate::process::{LaunchSpec, Launcher, ProcessTable, ServerProcess};
use crate::prompt::Confirm;
use crate::{Result, SupervisorError};

const WARNING_CHANNEL: &str = "log:warning";
const SHUTDOWN_QUESTION: &str = "\nYou can choose to shut down the Redis server. Please note that \
the owner of the Redis server will be informed (your username and host).\n\n\
Shut down the existing Redis server?";
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Where startup supervision currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing known about the port yet, or a foreign server was just shut down.
    NoServer,
    /// Probing the port.
    Checking,
    /// A server answered on the port.
    FoundOwnedByOther,
    /// Nothing answered; the port is free.
    NotFound,
    /// Server spawned, waiting for it to answer.
    Launching,
    /// Applying capacity policy.
    Configuring,
    /// Server launched and configured.
    Ready,
}

/// Result of [`StoreSupervisor::check_existing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existing {
    /// No server answers on the port.
    Vacant,
    /// A server is running and the operator chose to keep it.
    Declined,
}

/// Result of [`StoreSupervisor::start`].
#[derive(Debug)]
pub enum StartOutcome {
    /// A fresh server is running; the registry is initialised.
    Ready(Arc<StoreHandle>),
    /// The operator kept an existing server; this run should exit cleanly.
    Declined,
}

/// Detects, launches and configures the store server.
pub struct StoreSupervisor {
    config: StoreConfig,
    params: ConnectionParams,
    connector: Arc<dyn Connector>,
    launcher: Arc<dyn Launcher>,
    confirm: Box<dyn Confirm>,
    shutdown: ShutdownSignal,
    host: HostResources,
    state: SupervisorState,
}

impl StoreSupervisor {
    /// Supervisor for the server described by `config`.
    pub fn new(
        config: StoreConfig,
        connector: Arc<dyn Connector>,
        launcher: Arc<dyn Launcher>,
        confirm: Box<dyn Confirm>,
    ) -> Self {
        let params = ConnectionParams::from_config(&config);
        Self {
            config,
            params,
            connector,
            launcher,
            confirm,
            shutdown: ShutdownSignal::new(),
            host: HostResources::probe(),
            state: SupervisorState::NoServer,
        }
    }

    /// Abort waits when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Override the probed host resources.
    pub fn with_host(mut self, host: HostResources) -> Self {
        self.host = host;
        self
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Connection parameters of the supervised server.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Check for an existing server, then launch and configure a new one.
    pub fn start(
        &mut self,
        registry: &ConnectionRegistry,
        processes: &ProcessTable,
    ) -> Result<StartOutcome> {
        self.params.validate()?;
        match self.check_existing()? {
            Existing::Declined => Ok(StartOutcome::Declined),
            Existing::Vacant => Ok(StartOutcome::Ready(self.launch(registry, processes)?)),
        }
    }

    /// Probe the port until it is free. When a server answers the operator
    /// decides whether to ask it to shut down; after a shutdown request the
    /// supervisor waits [`StoreConfig::shutdown_margin`] and probes again.
    pub fn check_existing(&mut self) -> Result<Existing> {
        loop {
            self.state = SupervisorState::Checking;
            let Some(mut session) = self.probe(1)? else {
                self.state = SupervisorState::NotFound;
                return Ok(Existing::Vacant);
            };

            self.state = SupervisorState::FoundOwnedByOther;
            warn!(
                port = self.params.port,
                "Found Redis server already running on this machine using port {}!",
                self.params.port
            );
            if !self.confirm.confirm(SHUTDOWN_QUESTION)? {
                info!(store = %self.params, "keeping the existing Redis server");
                return Ok(Existing::Declined);
            }

            self.request_shutdown(session.as_mut());
            drop(session);
            self.state = SupervisorState::NoServer;

            let margin = self.config.shutdown_margin();
            info!(
                wait_secs = margin.as_secs(),
                "Start new Redis server after {} seconds",
                margin.as_secs()
            );
            if !self.shutdown.sleep(margin) {
                return Err(SupervisorError::Interrupted);
            }
        }
    }

    /// Spawn a server, wait until it answers and apply the capacity policy.
    ///
    /// Exhausting the probe budget is fatal and leaves the server
    /// unconfigured; the port is never changed automatically. A spawned
    /// server that never becomes ready is stopped before the error returns.
    pub fn launch(
        &mut self,
        registry: &ConnectionRegistry,
        processes: &ProcessTable,
    ) -> Result<Arc<StoreHandle>> {
        self.state = SupervisorState::Launching;
        let spec = LaunchSpec::from_config(&self.config);
        let mut process = self.launcher.spawn(&spec)?;

        let handle = match self.await_spawned(registry, process.as_mut()) {
            Ok(handle) => handle,
            Err(err) => {
                stop_spawned(process.as_mut());
                return Err(err);
            }
        };
        info!(store = %self.params, "Redis server started at {}", self.params);
        info!(cpu_count = self.host.cpu_count, total_memory = self.host.total_memory, "{}", self.host);
        processes.register("redis", &spec, process);

        self.apply_capacity(&handle)?;
        self.state = SupervisorState::Ready;
        Ok(handle)
    }

    fn await_spawned(
        &mut self,
        registry: &ConnectionRegistry,
        process: &mut dyn ServerProcess,
    ) -> Result<Arc<StoreHandle>> {
        let attempts = self.config.launch_probe_attempts;
        if self.probe(attempts)?.is_none() {
            error!(
                store = %self.params,
                "Unable to start a Redis server at {}. Please check whether the port is already taken up.",
                self.params
            );
            return Err(SupervisorError::Unreachable {
                addr: self.params.to_string(),
                attempts,
            });
        }
        if let Some(status) = process.try_wait()? {
            error!(store = %self.params, status, "launched Redis server exited; another server owns the port");
            return Err(SupervisorError::ExitedEarly {
                addr: self.params.to_string(),
                status: Some(status),
            });
        }

        self.state = SupervisorState::Configuring;
        Ok(registry.init_connection(self.params.clone())?)
    }

    /// Up to `attempts` PINGs; returns the session that answered.
    fn probe(&self, attempts: u32) -> Result<Option<Box<dyn StoreSession>>> {
        for attempt in 1..=attempts {
            info!(store = %self.params, attempt, "Say hello to Redis server at {}", self.params);
            match self.ping() {
                Ok(session) => {
                    info!(store = %self.params, "Received response from the Redis server");
                    return Ok(Some(session));
                }
                Err(err) => {
                    info!(store = %self.params, error = %err, "No response from the Redis server");
                    if attempt < attempts
                        && !self.shutdown.sleep(self.config.launch_probe_interval)
                    {
                        return Err(SupervisorError::Interrupted);
                    }
                }
            }
        }
        Ok(None)
    }

    fn ping(&self) -> foam_store::Result<Box<dyn StoreSession>> {
        let mut session = self.connector.open(&self.params)?;
        redis::cmd("PING").query::<String>(session.connection())?;
        Ok(session)
    }

    fn request_shutdown(&self, session: &mut dyn StoreSession) {
        let (user, host) = operator_identity();
        let notice = format!("<{user}> from <{host}> will shut down the Redis server immediately!");
        let mut publish = redis::cmd("PUBLISH");
        publish.arg(WARNING_CHANNEL).arg(&notice);
        if let Err(err) = publish.query::<i64>(session.connection()) {
            warn!(error = %err, "failed to notify the owner of the Redis server");
        }

        match redis::cmd("SHUTDOWN").query::<Value>(session.connection()) {
            Err(err) if !is_connectivity_error(&err) => {
                warn!(error = %err, "Redis server refused to shut down")
            }
            _ => info!(store = %self.params, "The old Redis server was shut down!"),
        }
    }

    fn apply_capacity(&self, handle: &StoreHandle) -> Result<()> {
        let bytes = max_memory_bytes(self.config.max_memory_fraction, self.host.total_memory);
        config_set(handle, "maxmemory", &bytes.to_string())?;
        let capped: u64 = config_get(handle, "maxmemory")?
            .parse()
            .map_err(|err| SupervisorError::Configuration(format!("maxmemory: {err}")))?;
        info!(maxmemory = capped, "Redis memory is capped at {:.1} GB", capped as f64 / GIB);

        let current = config_get(handle, "client-output-buffer-limit")?;
        let limits = BufferLimits::from_config(&self.config);
        let rewritten = rewrite_output_buffer_limit(&current, limits)?;
        config_set(handle, "client-output-buffer-limit", &rewritten)?;
        info!(
            hard = limits.hard,
            soft = limits.soft,
            soft_seconds = limits.soft_seconds,
            "pubsub client output buffer limits applied"
        );
        Ok(())
    }
}

fn stop_spawned(process: &mut dyn ServerProcess) {
    if matches!(process.try_wait(), Ok(Some(_))) {
        return;
    }
    if let Err(err) = process.kill() {
        warn!(pid = process.pid(), error = %err, "failed to stop the launched Redis server");
    }
}

fn config_get(handle: &StoreHandle, name: &str) -> Result<String> {
    let mut cmd = redis::cmd("CONFIG");
    cmd.arg("GET").arg(name);
    let reply: Vec<String> = handle
        .query(&cmd)
        .map_err(|err| SupervisorError::Configuration(format!("CONFIG GET {name}: {err}")))?;
    reply
        .chunks(2)
        .find(|pair| pair.len() == 2 && pair[0] == name)
        .map(|pair| pair[1].clone())
        .ok_or_else(|| SupervisorError::Configuration(format!("CONFIG GET {name}: no value")))
}

fn config_set(handle: &StoreHandle, name: &str, value: &str) -> Result<()> {
    let mut cmd = redis::cmd("CONFIG");
    cmd.arg("SET").arg(name).arg(value);
    handle
        .query::<Value>(&cmd)
        .map(|_| ())
        .map_err(|err| SupervisorError::Configuration(format!("CONFIG SET {name}: {err}")))
}
