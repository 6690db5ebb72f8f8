//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Store supervision scenarios against the in-memory store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use foam_common::{ShutdownSignal, StoreConfig};
use foam_supervisor::{
    max_memory_bytes, FixedAnswer, HostResources, ProcessState, ProcessTable, StartOutcome,
    StoreSupervisor, SupervisorError, SupervisorState,
};
use foam_testharness::{memory_registry, LaunchBehavior, MemoryStore, ScriptedLauncher};

const GIB: u64 = 1024 * 1024 * 1024;
const HOST: HostResources = HostResources {
    cpu_count: 8,
    total_memory: 16 * GIB,
};

fn fast_config() -> StoreConfig {
    StoreConfig {
        launch_probe_attempts: 3,
        launch_probe_interval: Duration::from_millis(1),
        ping_attempts: 1,
        ping_interval: Duration::from_millis(1),
        ..StoreConfig::default()
    }
}

fn supervisor(
    config: StoreConfig,
    store: &MemoryStore,
    launcher: &ScriptedLauncher,
    answer: bool,
) -> StoreSupervisor {
    StoreSupervisor::new(
        config,
        Arc::new(store.clone()),
        Arc::new(launcher.clone()),
        Box::new(FixedAnswer(answer)),
    )
    .with_host(HOST)
}

#[test]
fn declining_keeps_the_existing_server() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);
    let processes = ProcessTable::new();

    let mut supervisor = supervisor(fast_config(), &store, &launcher, false);
    let outcome = supervisor.start(&registry, &processes)?;

    assert!(matches!(outcome, StartOutcome::Declined));
    assert_eq!(supervisor.state(), SupervisorState::FoundOwnedByOther);
    assert_eq!(launcher.spawn_count(), 0);
    assert_eq!(store.shutdowns(), 0);
    assert!(store.is_online());
    assert!(!registry.is_initialized());
    Ok(())
}

#[test]
fn accepting_shuts_down_the_owner_and_relaunches() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);
    let processes = ProcessTable::new();

    let mut supervisor = supervisor(fast_config(), &store, &launcher, true);
    let outcome = supervisor.start(&registry, &processes)?;

    assert!(matches!(outcome, StartOutcome::Ready(_)));
    assert_eq!(supervisor.state(), SupervisorState::Ready);
    assert_eq!(store.shutdowns(), 1);
    assert_eq!(launcher.spawn_count(), 1);

    let notices = store.published("log:warning");
    assert_eq!(notices.len(), 1);
    let notice = String::from_utf8(notices[0].clone())?;
    assert!(notice.ends_with("will shut down the Redis server immediately!"));
    Ok(())
}

#[test]
fn fresh_launch_applies_capacity_policy() -> anyhow::Result<()> {
    let store = MemoryStore::offline();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);
    let processes = ProcessTable::new();

    let config = fast_config();
    let mut supervisor = supervisor(config.clone(), &store, &launcher, false);
    let StartOutcome::Ready(handle) = supervisor.start(&registry, &processes)? else {
        anyhow::bail!("supervisor did not reach Ready");
    };
    assert_eq!(handle.params().port, config.port);
    assert!(registry.is_initialized());

    let expected = max_memory_bytes(config.max_memory_fraction, HOST.total_memory);
    assert_eq!(store.config_value("maxmemory"), Some(expected.to_string()));
    assert_eq!(
        store.config_value("client-output-buffer-limit").as_deref(),
        Some("normal 0 0 0 slave 268435456 67108864 60 pubsub 536870912 134217728 60")
    );

    let spec = &launcher.specs()[0];
    assert_eq!(spec.port, config.port);
    assert!(spec.args().contains(&"--requirepass".to_owned()));

    let records = processes.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "redis");
    assert_eq!(records[0].state, ProcessState::Running);
    assert!(records[0].command.contains(&"***".to_owned()));
    Ok(())
}

#[test]
fn out_of_range_fraction_falls_back() -> anyhow::Result<()> {
    let store = MemoryStore::offline();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);

    let config = StoreConfig {
        max_memory_fraction: 0.6,
        ..fast_config()
    };
    let mut supervisor = supervisor(config, &store, &launcher, false);
    supervisor.start(&registry, &ProcessTable::new())?;

    let expected = max_memory_bytes(0.3, HOST.total_memory);
    assert_eq!(store.config_value("maxmemory"), Some(expected.to_string()));
    Ok(())
}

#[test]
fn unresponsive_launch_is_fatal_and_unconfigured() {
    let store = MemoryStore::offline();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::NeverResponds);
    let registry = memory_registry(&store);
    let processes = ProcessTable::new();

    let mut supervisor = supervisor(fast_config(), &store, &launcher, false);
    let err = supervisor.start(&registry, &processes).unwrap_err();

    assert!(matches!(err, SupervisorError::Unreachable { attempts: 3, .. }));
    assert_eq!(supervisor.state(), SupervisorState::Launching);
    assert!(store.commands().iter().all(|c| !c.starts_with("CONFIG")));
    assert_eq!(store.config_value("maxmemory").as_deref(), Some("0"));
    assert!(!registry.is_initialized());
    assert!(processes.records().is_empty());
    assert_eq!(launcher.kills(), 1);
}

#[test]
fn launched_process_exiting_early_is_fatal() {
    let store = MemoryStore::offline();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::ExitsImmediately(1));
    let registry = memory_registry(&store);

    let mut supervisor = supervisor(fast_config(), &store, &launcher, false);
    let err = supervisor.start(&registry, &ProcessTable::new()).unwrap_err();

    assert!(matches!(err, SupervisorError::ExitedEarly { status: Some(1), .. }));
    assert!(!registry.is_initialized());
}

#[test]
fn unexpected_buffer_limit_format_is_fatal() {
    let store = MemoryStore::offline();
    store.set_config("client-output-buffer-limit", "normal 0 0 0");
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);

    let mut supervisor = supervisor(fast_config(), &store, &launcher, false);
    let err = supervisor.start(&registry, &ProcessTable::new()).unwrap_err();

    assert!(matches!(err, SupervisorError::Configuration(_)));
    assert_eq!(supervisor.state(), SupervisorState::Configuring);
}

#[test]
fn interrupt_during_shutdown_wait_aborts() {
    let store = MemoryStore::new();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();

    let mut supervisor =
        supervisor(fast_config(), &store, &launcher, true).with_shutdown(shutdown);
    let err = supervisor.start(&registry, &ProcessTable::new()).unwrap_err();

    assert!(matches!(err, SupervisorError::Interrupted));
    assert_eq!(store.shutdowns(), 1);
    assert_eq!(launcher.spawn_count(), 0);
}

#[test]
fn interrupt_while_waiting_for_launch_stops_the_server() {
    let store = MemoryStore::offline();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::NeverResponds);
    let registry = memory_registry(&store);
    let processes = ProcessTable::new();
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();

    let mut supervisor =
        supervisor(fast_config(), &store, &launcher, false).with_shutdown(shutdown);
    let err = supervisor.start(&registry, &processes).unwrap_err();

    assert!(matches!(err, SupervisorError::Interrupted));
    assert_eq!(launcher.spawn_count(), 1);
    assert_eq!(launcher.kills(), 1);
    assert!(processes.records().is_empty());
    assert!(!registry.is_initialized());
}

#[test]
fn early_exit_is_not_killed_again() {
    let store = MemoryStore::offline();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::ExitsImmediately(1));
    let processes = ProcessTable::new();

    let mut supervisor = supervisor(fast_config(), &store, &launcher, false);
    let err = supervisor
        .start(&memory_registry(&store), &processes)
        .unwrap_err();

    assert!(matches!(err, SupervisorError::ExitedEarly { .. }));
    assert_eq!(launcher.kills(), 0);
    assert!(processes.records().is_empty());
}

#[test]
fn remote_hosts_are_rejected_before_probing() {
    let store = MemoryStore::new();
    let launcher = ScriptedLauncher::new(store.clone(), LaunchBehavior::Starts);
    let registry = memory_registry(&store);

    let config = StoreConfig {
        host: "10.0.0.5".to_owned(),
        ..fast_config()
    };
    let mut supervisor = supervisor(config, &store, &launcher, true);
    let err = supervisor.start(&registry, &ProcessTable::new()).unwrap_err();

    assert!(matches!(err, SupervisorError::Store(_)));
    assert_eq!(store.sessions_opened(), 0);
}
