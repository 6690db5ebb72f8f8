//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema resolution against the in-memory store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use foam_bridge::{BridgeError, FoamContext};
use foam_common::FoamConfig;
use foam_store::{SchemaRegistry, StreamKey, StreamSchema};
use foam_testharness::{local_params, MemoryStore};
use serde_json::json;

fn context(store: &MemoryStore) -> anyhow::Result<FoamContext> {
    let mut config = FoamConfig::default();
    config.resolver.retry_interval = Duration::from_millis(10);
    let context = FoamContext::new(config, Arc::new(store.clone()));
    context.registry().init_connection(local_params())?;
    Ok(context)
}

fn default_schema() -> StreamSchema {
    StreamSchema::from_json(json!({
        "type": "record",
        "name": "Pulse",
        "fields": [{"name": "train_id", "type": "long"}],
    }))
    .unwrap()
}

#[test]
fn default_is_installed_once_and_read_back() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    let resolver = context.resolver();
    let key = StreamKey::new("SPB_DET_AGIPD1M-1", "pulses");

    let first = resolver.resolve(&key, &default_schema(), context.shutdown())?;
    assert_eq!(first, default_schema());
    assert_eq!(store.command_count("HSET"), 1);

    let second = resolver.resolve(&key, &default_schema(), context.shutdown())?;
    assert_eq!(second, first);
    assert_eq!(store.command_count("HSET"), 1);
    Ok(())
}

#[test]
fn published_schema_wins_over_default() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    let key = StreamKey::new("det", "pulses");
    let published = StreamSchema::from_json(json!({
        "type": "record",
        "name": "Pulse",
        "fields": [
            {"name": "train_id", "type": "long"},
            {"name": "energy", "type": "double"},
        ],
    }))?;
    SchemaRegistry::new(context.registry()).set(&key, &published)?;

    let resolved = context
        .resolver()
        .resolve(&key, &default_schema(), context.shutdown())?;
    assert_eq!(resolved, published);
    assert_eq!(store.command_count("HSET"), 1);
    Ok(())
}

#[test]
fn waits_for_the_store_to_come_online() -> anyhow::Result<()> {
    let store = MemoryStore::offline();
    let context = context(&store)?;
    let key = StreamKey::new("det", "late");

    let starter = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            store.set_online(true);
        })
    };
    let resolved = context
        .resolver()
        .resolve(&key, &default_schema(), context.shutdown())?;
    starter.join().unwrap();

    assert_eq!(resolved, default_schema());
    assert!(store.hash_field("det:late:_schema", "0").is_some());
    Ok(())
}

#[test]
fn unparsable_entry_is_retried_until_replaced() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    let key = StreamKey::new("det", "raw");
    store.put_hash_field("det:raw:_schema", "0", "{not json");

    let published = StreamSchema::from_json(json!({
        "type": "record",
        "name": "Pulse",
        "fields": [
            {"name": "train_id", "type": "long"},
            {"name": "pulse_count", "type": "int"},
        ],
    }))?;
    let writer = {
        let store = store.clone();
        let text = published.to_json_string();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            store.put_hash_field("det:raw:_schema", "0", text);
        })
    };
    let resolved = context
        .resolver()
        .resolve(&key, &default_schema(), context.shutdown())?;
    writer.join().unwrap();

    assert_eq!(resolved, published);
    assert_eq!(store.command_count("HSET"), 0);
    assert!(store.command_count("HGET") >= 2);
    Ok(())
}

#[test]
fn interrupt_ends_the_wait() -> anyhow::Result<()> {
    let store = MemoryStore::offline();
    let context = context(&store)?;
    let key = StreamKey::new("det", "never");

    let shutdown = context.shutdown().clone();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        shutdown.trigger();
    });
    let outcome = context
        .resolver()
        .resolve(&key, &default_schema(), context.shutdown());
    interrupter.join().unwrap();

    assert!(matches!(outcome, Err(BridgeError::Interrupted)));
    Ok(())
}

#[test]
fn uninitialised_registry_is_an_error() {
    let store = MemoryStore::new();
    let context = FoamContext::new(FoamConfig::default(), Arc::new(store.clone()));
    let outcome = context.resolver().resolve(
        &StreamKey::new("det", "raw"),
        &default_schema(),
        context.shutdown(),
    );
    assert!(matches!(
        outcome,
        Err(BridgeError::Store(foam_store::StoreError::NotInitialized))
    ));
    assert_eq!(store.sessions_opened(), 0);
}
