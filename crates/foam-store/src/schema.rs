//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stream keys, schema files and validated Avro record schemas."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Stream identity and record schemas.

use std::fmt;
use std::fs;
use std::path::Path;

use apache_avro::schema::RecordField;
use apache_avro::Schema;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{Result, StoreError};

/// Name of the record type carrying array payloads.
pub const NDARRAY_NAME: &str = "NDArray";

/// Namespace-qualified destination stream, rendered as `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    namespace: String,
    name: String,
}

impl StreamKey {
    /// Key for `namespace:name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split `namespace:name` at the last colon.
    pub fn parse(key: &str) -> Result<Self> {
        match key.rsplit_once(':') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(StoreError::Schema(format!(
                "stream key '{key}' is not of the form namespace:name"
            ))),
        }
    }

    /// Namespace part.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Logical name part.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

/// A parsed record schema together with the JSON it was parsed from.
///
/// Two schemas are equal when their JSON documents are equal.
#[derive(Debug, Clone)]
pub struct StreamSchema {
    raw: JsonValue,
    avro: Schema,
}

impl StreamSchema {
    /// Parse a JSON schema document; only record schemas are accepted.
    pub fn from_json(raw: JsonValue) -> Result<Self> {
        let avro = Schema::parse(&raw)?;
        match avro {
            Schema::Record(_) => Ok(Self { raw, avro }),
            other => Err(StoreError::Schema(format!(
                "expected a record schema, found {other:?}"
            ))),
        }
    }

    /// Parse schema JSON text.
    pub fn parse_str(text: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// Built-in envelope schema for `key`: one `payload` map whose values
    /// are scalars, bytes or arrays. Stream keys are not valid Avro names,
    /// so the key goes into `doc`.
    pub fn envelope(key: &StreamKey) -> Result<Self> {
        Self::from_json(json!({
            "type": "record",
            "namespace": "foamcore",
            "name": "Envelope",
            "doc": key.to_string(),
            "fields": [{
                "name": "payload",
                "type": {
                    "type": "map",
                    "values": [
                        "null",
                        "boolean",
                        "long",
                        "double",
                        "string",
                        "bytes",
                        ndarray_schema_json(),
                    ],
                },
                "default": {},
            }],
        }))
    }

    /// JSON document of the schema.
    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }

    /// Parsed Avro schema.
    pub fn avro(&self) -> &Schema {
        &self.avro
    }

    /// Compact JSON text as stored in the schema registry.
    pub fn to_json_string(&self) -> String {
        self.raw.to_string()
    }

    /// Top-level record fields.
    pub fn fields(&self) -> &[RecordField] {
        match &self.avro {
            Schema::Record(record) => &record.fields,
            _ => &[],
        }
    }
}

impl PartialEq for StreamSchema {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// JSON definition of the array record: shape, element type string, raw
/// little-endian bytes.
pub fn ndarray_schema_json() -> JsonValue {
    json!({
        "type": "record",
        "name": NDARRAY_NAME,
        "fields": [
            {"name": "shape", "type": {"type": "array", "items": "int"}},
            {"name": "dtype", "type": "string"},
            {"name": "data", "type": "bytes"},
        ],
    })
}

/// Whether `schema` is the array record.
pub fn is_ndarray(schema: &Schema) -> bool {
    match schema {
        Schema::Record(record) => {
            record.name.name == NDARRAY_NAME
                && record
                    .fields
                    .iter()
                    .map(|field| field.name.as_str())
                    .eq(["shape", "dtype", "data"])
        }
        _ => false,
    }
}

/// Contents of a schema file.
#[derive(Debug, Clone)]
pub struct SchemaFile {
    /// Stream the file describes.
    pub key: StreamKey,
    /// Record schema; `None` when the file declares no `fields`.
    pub schema: Option<StreamSchema>,
}

/// Read a JSON schema file. `namespace` and `name` are required; a file
/// without `fields` only names the stream.
pub fn load_schema(path: impl AsRef<Path>) -> Result<SchemaFile> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let raw: JsonValue = serde_json::from_str(&text)?;

    let field = |name: &str| {
        raw.get(name)
            .and_then(JsonValue::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                StoreError::Schema(format!(
                    "schema file {} must contain a '{name}' string",
                    path.display()
                ))
            })
    };
    let key = StreamKey::new(field("namespace")?, field("name")?);

    let schema = if raw.get("fields").is_some() {
        Some(StreamSchema::from_json(raw)?)
    } else {
        None
    };
    debug!(path = %path.display(), stream = %key, has_fields = schema.is_some(), "loaded schema file");
    Ok(SchemaFile { key, schema })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stream_key_formats_and_parses() {
        let key = StreamKey::new("EuXFEL/SPB_DET_AGIPD1M-1", "raw");
        assert_eq!(key.to_string(), "EuXFEL/SPB_DET_AGIPD1M-1:raw");
        assert_eq!(StreamKey::parse(&key.to_string()).unwrap(), key);
        assert!(StreamKey::parse("nocolon").is_err());
        assert!(StreamKey::parse(":raw").is_err());
    }

    #[test]
    fn envelope_is_a_record_with_payload_map() {
        let key = StreamKey::new("EuXFEL/SPB_DET_AGIPD1M-1", "raw");
        let schema = StreamSchema::envelope(&key).unwrap();
        assert_eq!(schema.raw()["doc"], "EuXFEL/SPB_DET_AGIPD1M-1:raw");
        let fields = schema.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "payload");
        assert!(matches!(fields[0].schema, Schema::Map(_)));
        assert_eq!(schema, StreamSchema::envelope(&key).unwrap());
    }

    #[test]
    fn rejects_non_record_schema() {
        let err = StreamSchema::from_json(json!({"type": "array", "items": "int"})).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn ndarray_is_recognised() {
        let schema = Schema::parse(&ndarray_schema_json()).unwrap();
        assert!(is_ndarray(&schema));
        assert!(!is_ndarray(&Schema::Long));
    }

    #[test]
    fn load_schema_with_and_without_fields() {
        let dir = tempfile::tempdir().unwrap();

        let with_fields = dir.path().join("full.json");
        let mut file = fs::File::create(&with_fields).unwrap();
        write!(
            file,
            r#"{{"type": "record", "namespace": "det", "name": "raw",
                "fields": [{{"name": "integer", "type": "long"}}]}}"#
        )
        .unwrap();
        let loaded = load_schema(&with_fields).unwrap();
        assert_eq!(loaded.key.to_string(), "det:raw");
        assert_eq!(loaded.schema.unwrap().fields()[0].name, "integer");

        let bare = dir.path().join("bare.json");
        fs::write(&bare, r#"{"namespace": "det", "name": "processed"}"#).unwrap();
        let loaded = load_schema(&bare).unwrap();
        assert_eq!(loaded.key.to_string(), "det:processed");
        assert!(loaded.schema.is_none());

        let nameless = dir.path().join("nameless.json");
        fs::write(&nameless, r#"{"namespace": "det"}"#).unwrap();
        assert!(matches!(load_schema(&nameless), Err(StoreError::Schema(_))));
    }
}
