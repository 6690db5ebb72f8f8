//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared bridge context owning config, store registry and shutdown."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Process-wide state of a bridge run, built once at startup.

use std::sync::Arc;

use foam_common::{FoamConfig, ShutdownSignal};
use foam_store::{ConnectionRegistry, Connector, SchemaRegistry, StreamProducer};
use foam_supervisor::{
    Confirm, Launcher, ProcessTable, StartOutcome, StoreProcessRecord, StoreSupervisor,
};
use tracing::info;

use crate::resolver::SchemaResolver;
use crate::Result;

/// Configuration, connection registry, process table and interrupt flag
/// shared by the supervisor, the resolver and the pipeline.
pub struct FoamContext {
    config: FoamConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<ConnectionRegistry>,
    processes: ProcessTable,
    shutdown: ShutdownSignal,
}

impl FoamContext {
    /// Context opening store sessions through `connector`.
    pub fn new(config: FoamConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = ConnectionRegistry::new(Arc::clone(&connector));
        Self {
            config,
            connector,
            registry,
            processes: ProcessTable::new(),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Use `shutdown` as the operator interrupt flag.
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Effective configuration.
    pub fn config(&self) -> &FoamConfig {
        &self.config
    }

    /// Store connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Processes started by this run.
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Operator interrupt flag.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Supervisor for the configured store.
    pub fn supervisor(&self, launcher: Arc<dyn Launcher>, confirm: Box<dyn Confirm>) -> StoreSupervisor {
        StoreSupervisor::new(
            self.config.store.clone(),
            Arc::clone(&self.connector),
            launcher,
            confirm,
        )
        .with_shutdown(self.shutdown.clone())
    }

    /// Detect, launch and configure the store, initialising the registry.
    pub fn start_store(
        &self,
        launcher: Arc<dyn Launcher>,
        confirm: Box<dyn Confirm>,
    ) -> Result<StartOutcome> {
        let mut supervisor = self.supervisor(launcher, confirm);
        Ok(supervisor.start(&self.registry, &self.processes)?)
    }

    /// Resolver polling at the configured retry interval.
    pub fn resolver(&self) -> SchemaResolver {
        SchemaResolver::new(
            SchemaRegistry::new(&self.registry),
            self.config.resolver.retry_interval,
        )
    }

    /// Producer trimming streams to the configured length.
    pub fn producer(&self) -> StreamProducer {
        StreamProducer::new(&self.registry, self.config.store.stream_maxlen)
    }

    /// Close every subscription and cached session, then stop the processes
    /// this run started.
    pub fn teardown(&self) -> Vec<StoreProcessRecord> {
        let reset = self.registry.reset_all();
        let records = self.processes.terminate_all();
        info!(holders_reset = reset, processes = records.len(), "bridge context torn down");
        records
    }
}

impl std::fmt::Debug for FoamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoamContext")
            .field("registry", &self.registry)
            .field("processes", &self.processes)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}
