//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bridge pipeline runs against a scripted source and the in-memory store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use apache_avro::types::Value;
use foam_bridge::{BridgeError, BridgePipeline, BridgeState, BridgeStats, FoamContext};
use foam_common::FoamConfig;
use foam_store::schema::ndarray_schema_json;
use foam_store::{StreamConsumer, StreamKey, StreamSchema};
use foam_testharness::{local_params, record, Failure, MemoryStore, ScriptedConsumer, Step};
use foam_transport::TransportError;
use serde_json::json;

fn context(store: &MemoryStore) -> anyhow::Result<FoamContext> {
    let mut config = FoamConfig::default();
    config.resolver.retry_interval = Duration::from_millis(10);
    let context = FoamContext::new(config, Arc::new(store.clone()));
    context.registry().init_connection(local_params())?;
    Ok(context)
}

fn frame_schema() -> StreamSchema {
    StreamSchema::from_json(json!({
        "type": "record",
        "name": "Frame",
        "fields": [
            {"name": "train_id", "type": "long"},
            {"name": "image", "type": ["null", ndarray_schema_json()], "default": null},
        ],
    }))
    .unwrap()
}

fn key() -> StreamKey {
    StreamKey::new("SPB_DET_AGIPD1M-1", "frames")
}

fn frame(train_id: i64) -> Step {
    let row = |a: i64, b: i64| Value::Array(vec![Value::Long(a), Value::Long(b)]);
    Step::Record(record([
        ("train_id", Value::Long(train_id)),
        ("image", Value::Array(vec![row(1, 2), row(3, 4)])),
    ]))
}

fn pipeline(
    context: &FoamContext,
    steps: Vec<Step>,
) -> (BridgePipeline<ScriptedConsumer>, ScriptedConsumer) {
    let consumer = ScriptedConsumer::new(steps).trigger_when_drained(context.shutdown().clone());
    let pipeline = BridgePipeline::new(context, key(), frame_schema(), consumer.clone());
    (pipeline, consumer)
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a Value> {
    match value {
        Value::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
        Value::Union(_, inner) => field(inner, name),
        _ => None,
    }
}

#[test]
fn records_reach_the_stream_as_arrays() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    let (mut pipeline, consumer) = pipeline(&context, vec![frame(1), Step::Timeout, frame(2)]);

    let stats = pipeline.run()?;
    assert_eq!(
        stats,
        BridgeStats {
            received: 2,
            published: 2,
            ..BridgeStats::default()
        }
    );
    assert_eq!(pipeline.state(), BridgeState::Terminated);
    assert!(consumer.is_closed());
    assert_eq!(store.stream_len("SPB_DET_AGIPD1M-1:frames"), 2);

    let mut reader = StreamConsumer::new(context.registry(), key()).starting_after("0");
    let entry = reader
        .next_entry()?
        .ok_or_else(|| anyhow::anyhow!("stream is empty"))?;
    let stored = &entry.records[0];
    assert_eq!(field(stored, "train_id"), Some(&Value::Long(1)));
    let image = field(stored, "image").ok_or_else(|| anyhow::anyhow!("image missing"))?;
    assert_eq!(field(image, "dtype"), Some(&Value::String("<i8".into())));
    assert_eq!(
        field(image, "shape"),
        Some(&Value::Array(vec![Value::Int(2), Value::Int(2)]))
    );
    Ok(())
}

#[test]
fn publication_timeouts_drop_the_record() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    store.fail_next_command("XADD", Failure::Timeout);
    let (mut pipeline, _) = pipeline(&context, vec![frame(1), frame(2)]);

    let stats = pipeline.run()?;
    assert_eq!(stats.received, 2);
    assert_eq!(stats.dropped_timeout, 1);
    assert_eq!(stats.published, 1);
    assert_eq!(store.stream_len("SPB_DET_AGIPD1M-1:frames"), 1);
    Ok(())
}

#[test]
fn store_rejections_are_counted_not_fatal() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    store.fail_next_command(
        "XADD",
        Failure::Response("OOM command not allowed when used memory > 'maxmemory'".into()),
    );
    let (mut pipeline, _) = pipeline(&context, vec![frame(1), frame(2)]);

    let stats = pipeline.run()?;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.published, 1);
    assert_eq!(pipeline.state(), BridgeState::Terminated);
    Ok(())
}

#[test]
fn undecodable_and_misshapen_records_are_rejected() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    let ragged = Step::Record(record([
        ("train_id", Value::Long(3)),
        (
            "image",
            Value::Array(vec![
                Value::Array(vec![Value::Long(1), Value::Long(2)]),
                Value::Array(vec![Value::Long(3)]),
            ]),
        ),
    ]));
    let missing_id = Step::Record(record([("image", Value::Array(Vec::new()))]));
    let (mut pipeline, _) = pipeline(
        &context,
        vec![Step::Malformed("payload is not a record".into()), ragged, missing_id, frame(4)],
    );

    let stats = pipeline.run()?;
    assert_eq!(
        stats,
        BridgeStats {
            received: 3,
            published: 1,
            rejected: 3,
            ..BridgeStats::default()
        }
    );
    Ok(())
}

#[test]
fn closed_transport_is_fatal() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let context = context(&store)?;
    let (mut pipeline, consumer) = pipeline(&context, vec![frame(1), Step::Closed, frame(2)]);

    let outcome = pipeline.run();
    assert!(matches!(
        outcome,
        Err(BridgeError::Transport(TransportError::Closed))
    ));
    assert_eq!(pipeline.state(), BridgeState::Fatal);
    assert_eq!(pipeline.stats().published, 1);
    assert!(consumer.is_closed());
    assert_eq!(consumer.remaining(), 1);
    Ok(())
}

#[test]
fn interrupt_while_waiting_for_schema_terminates() -> anyhow::Result<()> {
    let store = MemoryStore::offline();
    let context = context(&store)?;
    context.shutdown().trigger();
    let (mut pipeline, consumer) = pipeline(&context, vec![frame(1)]);

    let stats = pipeline.run()?;
    assert_eq!(stats, BridgeStats::default());
    assert_eq!(pipeline.state(), BridgeState::Terminated);
    assert_eq!(consumer.calls(), 0);
    assert!(consumer.is_closed());
    Ok(())
}
