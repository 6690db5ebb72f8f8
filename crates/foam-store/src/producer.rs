//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Avro encoding and capped XADD publication into streams."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Stream publishing. Each entry carries one Avro object-container document
//! in its `data` field; streams are trimmed to an approximate length.

use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::{Reader, Writer};
use tracing::trace;

use crate::holder::LazyConnection;
use crate::registry::ConnectionRegistry;
use crate::schema::{StreamKey, StreamSchema};
use crate::schema_registry::SchemaRegistry;
use crate::session::DecodeMode;
use crate::{Result, StoreError};

/// Stream entry field holding the encoded record.
pub const DATA_FIELD: &str = "data";

/// Failure classes of [`StreamProducer::produce`].
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    /// Publication could not be confirmed in time.
    #[error("timed out publishing to the store")]
    Timeout,
    /// The record could not be encoded or the store rejected it.
    #[error("{0}")]
    Runtime(String),
}

impl From<StoreError> for ProduceError {
    fn from(err: StoreError) -> Self {
        if err.is_timeout() {
            ProduceError::Timeout
        } else {
            ProduceError::Runtime(err.to_string())
        }
    }
}

/// Encode `record` as a single-record Avro container.
pub fn encode_record(schema: &StreamSchema, record: Value) -> Result<Vec<u8>> {
    let resolved = record.resolve(schema.avro())?;
    let mut writer = Writer::new(schema.avro(), Vec::new());
    writer.append(resolved)?;
    Ok(writer.into_inner()?)
}

/// Decode every record of an Avro container; the writer schema is embedded.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<Value>> {
    let reader = Reader::new(bytes)?;
    let mut records = Vec::new();
    for record in reader {
        records.push(record?);
    }
    Ok(records)
}

/// Publishes records to streams and exposes the schema registry living in
/// the same store.
#[derive(Debug, Clone)]
pub struct StreamProducer {
    db_raw: Arc<LazyConnection>,
    schema_registry: SchemaRegistry,
    maxlen: usize,
}

impl StreamProducer {
    /// Producer trimming every stream to roughly `maxlen` entries.
    pub fn new(registry: &Arc<ConnectionRegistry>, maxlen: usize) -> Self {
        Self {
            db_raw: LazyConnection::new(registry, DecodeMode::Binary),
            schema_registry: SchemaRegistry::new(registry),
            maxlen,
        }
    }

    /// Schema registry of the store this producer publishes to.
    pub fn schema_registry(&self) -> &SchemaRegistry {
        &self.schema_registry
    }

    /// Approximate stream length cap.
    pub fn maxlen(&self) -> usize {
        self.maxlen
    }

    /// Encode `record` under `schema` and append it to `key`. Returns the
    /// entry id assigned by the store.
    pub fn produce(
        &self,
        key: &StreamKey,
        record: Value,
        schema: &StreamSchema,
    ) -> std::result::Result<String, ProduceError> {
        let encoded = encode_record(schema, record)?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key.to_string())
            .arg("MAXLEN")
            .arg("~")
            .arg(self.maxlen)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(encoded);
        let id: String = self.db_raw.query(&cmd)?;
        trace!(stream = %key, id = %id, "record appended");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> StreamSchema {
        StreamSchema::from_json(json!({
            "type": "record",
            "name": "Sample",
            "fields": [
                {"name": "integer", "type": "long"},
                {"name": "label", "type": ["null", "string"], "default": null},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn container_encoding_embeds_writer_schema() {
        let record = Value::Record(vec![
            ("integer".into(), Value::Long(7)),
            ("label".into(), Value::Union(1, Box::new(Value::String("a".into())))),
        ]);
        let bytes = encode_record(&schema(), record.clone()).unwrap();
        let decoded = decode_records(&bytes).unwrap();
        assert_eq!(decoded, vec![record]);
    }

    #[test]
    fn encoding_rejects_mismatched_record() {
        let record = Value::Record(vec![("integer".into(), Value::String("x".into()))]);
        assert!(matches!(
            encode_record(&schema(), record),
            Err(StoreError::Avro(_))
        ));
    }

    #[test]
    fn timeouts_map_to_produce_timeout() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = ProduceError::from(StoreError::Redis(timed_out.into()));
        assert!(matches!(err, ProduceError::Timeout));

        let rejected = ProduceError::from(StoreError::Schema("bad".into()));
        assert!(matches!(rejected, ProduceError::Runtime(msg) if msg.contains("bad")));
    }
}
