//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport record model and Avro record conversion."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use apache_avro::types::Value;
use indexmap::IndexMap;

use crate::{Result, TransportError};

/// A decoded message: field name to value, in arrival order.
pub type Record = IndexMap<String, Value>;

/// Turn a decoded Avro record into a [`Record`].
pub fn record_from_avro(value: Value) -> Result<Record> {
    match value {
        Value::Record(fields) => Ok(fields.into_iter().collect()),
        Value::Map(entries) => Ok(entries.into_iter().collect()),
        other => Err(TransportError::Malformed(format!(
            "expected a record, found {other:?}"
        ))),
    }
}

/// Turn a [`Record`] back into an Avro record value.
pub fn record_into_avro(record: Record) -> Value {
    Value::Record(record.into_iter().collect())
}

/// Schema-less conversion of JSON into Avro values. Integers become
/// `Long`, other numbers `Double`, objects `Map`.
pub fn json_to_avro(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Long(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_avro).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_avro(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_integer_precision() {
        let value = json_to_avro(&json!({"count": 3, "ratio": 0.5, "big": u64::MAX}));
        let Value::Map(map) = value else {
            panic!("expected map");
        };
        assert_eq!(map["count"], Value::Long(3));
        assert_eq!(map["ratio"], Value::Double(0.5));
        assert_eq!(map["big"], Value::Double(u64::MAX as f64));
    }

    #[test]
    fn record_conversion_preserves_field_order() {
        let value = Value::Record(vec![
            ("b".into(), Value::Int(1)),
            ("a".into(), Value::Int(2)),
        ]);
        let record = record_from_avro(value.clone()).unwrap();
        assert_eq!(record.keys().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(record_into_avro(record), value);
        assert!(record_from_avro(Value::Long(1)).is_err());
    }
}
