//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Avro and JSON payload deserializers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use apache_avro::Reader;
use foam_common::DeserializerKind;
use tracing::warn;

use crate::record::{json_to_avro, record_from_avro, Record};
use crate::{Result, TransportError};

/// Decodes one transport message into a [`Record`].
pub trait Deserializer: Send {
    /// Decode `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> Result<Record>;

    /// Wire format handled.
    fn kind(&self) -> DeserializerKind;
}

/// Avro object containers; the writer schema travels with every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct AvroDeserializer;

impl Deserializer for AvroDeserializer {
    fn deserialize(&self, bytes: &[u8]) -> Result<Record> {
        let mut reader = Reader::new(bytes)?;
        let first = reader
            .next()
            .ok_or_else(|| TransportError::Malformed("empty avro container".into()))??;
        if reader.next().is_some() {
            warn!("avro container holds more than one record; only the first is used");
        }
        record_from_avro(first)
    }

    fn kind(&self) -> DeserializerKind {
        DeserializerKind::Avro
    }
}

/// UTF-8 JSON objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, bytes: &[u8]) -> Result<Record> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        match json {
            serde_json::Value::Object(map) => Ok(map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_avro(v)))
                .collect()),
            other => Err(TransportError::Malformed(format!(
                "expected a JSON object, found {other}"
            ))),
        }
    }

    fn kind(&self) -> DeserializerKind {
        DeserializerKind::Json
    }
}

/// Deserializer for `kind`.
pub fn create_deserializer(kind: DeserializerKind) -> Box<dyn Deserializer> {
    match kind {
        DeserializerKind::Avro => Box::new(AvroDeserializer),
        DeserializerKind::Json => Box::new(JsonDeserializer),
    }
}
