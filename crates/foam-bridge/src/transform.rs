//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Conversion of transport records into schema-conformant Avro values."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shaping a decoded transport record into a value the stream schema
//! accepts.
//!
//! Lists headed for an `NDArray` slot become `{shape, dtype, data}` with
//! little-endian element bytes: `<i8` for integers, `<f8` once any element
//! is fractional, `|b1` for booleans. Numeric scalars are widened or
//! narrowed to the schema's type. Fields missing from the record take the
//! schema default, then `null` when the field is nullable. Record fields the
//! schema does not name are dropped.

use std::collections::HashMap;

use apache_avro::schema::{RecordField, UnionSchema};
use apache_avro::types::Value;
use apache_avro::Schema;
use foam_store::schema::is_ndarray;
use foam_store::StreamSchema;
use foam_transport::Record;
use tracing::trace;

/// Why a record could not be shaped to the schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// A required field is absent and has no default.
    #[error("field '{0}' is missing and has no default")]
    MissingField(String),
    /// Nested lists of unequal length.
    #[error("array '{0}' is ragged")]
    RaggedArray(String),
    /// An array element that is neither a number nor a boolean.
    #[error("array '{field}' holds a non-numeric element: {element}")]
    NonNumeric {
        /// Field holding the array.
        field: String,
        /// Offending element.
        element: String,
    },
    /// A dimension larger than the shape type can hold.
    #[error("array '{0}' has a dimension that does not fit the shape type")]
    DimensionOverflow(String),
}

type Result<T> = std::result::Result<T, TransformError>;

/// Shape `record` to `schema`.
///
/// A schema made of a single map field (the built-in envelope) takes the
/// whole record as that map unless the record already carries the field.
pub fn conform(mut record: Record, schema: &StreamSchema) -> Result<Value> {
    let fields = schema.fields();
    if let [field] = fields {
        if let Schema::Map(map) = &field.schema {
            if !record.contains_key(&field.name) {
                let payload = record
                    .into_iter()
                    .map(|(name, value)| {
                        let value = conform_value(value, &map.types, &name)?;
                        Ok((name, value))
                    })
                    .collect::<Result<HashMap<_, _>>>()?;
                return Ok(Value::Record(vec![(field.name.clone(), Value::Map(payload))]));
            }
        }
    }

    let mut shaped = Vec::with_capacity(fields.len());
    for field in fields {
        let value = match record.shift_remove(&field.name) {
            Some(value) => conform_value(value, &field.schema, &field.name)?,
            None => default_for(field)?,
        };
        shaped.push((field.name.clone(), value));
    }
    if !record.is_empty() {
        trace!(dropped = ?record.keys().collect::<Vec<_>>(), "record fields not in schema");
    }
    Ok(Value::Record(shaped))
}

fn default_for(field: &RecordField) -> Result<Value> {
    match (&field.default, &field.schema) {
        (Some(default), schema) => conform_value(Value::from(default.clone()), schema, &field.name),
        (None, Schema::Union(union)) if union.is_nullable() => Ok(Value::Null),
        (None, Schema::Null) => Ok(Value::Null),
        (None, _) => Err(TransformError::MissingField(field.name.clone())),
    }
}

fn conform_value(value: Value, schema: &Schema, field: &str) -> Result<Value> {
    match (value, schema) {
        (value, Schema::Union(union)) => conform_union(value, union, field),
        (Value::Array(items), schema) if is_ndarray(schema) => to_ndarray(items, field),
        (Value::Array(items), Schema::Array(array)) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| conform_value(item, &array.items, field))
                .collect::<Result<_>>()?,
        )),
        (Value::Map(entries), Schema::Map(map)) => Ok(Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| Ok((key, conform_value(item, &map.types, field)?)))
                .collect::<Result<_>>()?,
        )),
        (Value::Record(entries), Schema::Map(map)) => Ok(Value::Map(
            entries
                .into_iter()
                .map(|(key, item)| Ok((key, conform_value(item, &map.types, field)?)))
                .collect::<Result<_>>()?,
        )),
        (value, schema) => Ok(convert_numeric(value, schema)),
    }
}

fn conform_union(value: Value, union: &UnionSchema, field: &str) -> Result<Value> {
    let variants = union.variants();
    match value {
        Value::Null => Ok(Value::Null),
        Value::Union(_, inner) => conform_union(*inner, union, field),
        Value::Array(items) => {
            if variants.iter().any(is_ndarray) {
                return to_ndarray(items, field);
            }
            match variants.iter().find(|v| matches!(v, Schema::Array(_))) {
                Some(array) => conform_value(Value::Array(items), array, field),
                None => Ok(Value::Array(items)),
            }
        }
        value @ (Value::Map(_) | Value::Record(_)) => {
            match variants.iter().find(|v| matches!(v, Schema::Map(_))) {
                Some(map) => conform_value(value, map, field),
                None => Ok(value),
            }
        }
        value => {
            let target = numeric_preference(&value)
                .iter()
                .find_map(|kind| variants.iter().find(|variant| kind.matches(variant)));
            Ok(match target {
                Some(schema) => convert_numeric(value, schema),
                None => value,
            })
        }
    }
}

#[derive(Clone, Copy)]
enum Numeric {
    Int,
    Long,
    Float,
    Double,
}

impl Numeric {
    fn matches(self, schema: &Schema) -> bool {
        matches!(
            (self, schema),
            (Numeric::Int, Schema::Int)
                | (Numeric::Long, Schema::Long)
                | (Numeric::Float, Schema::Float)
                | (Numeric::Double, Schema::Double)
        )
    }
}

/// Union variants tried for a numeric scalar, lossless first.
fn numeric_preference(value: &Value) -> &'static [Numeric] {
    match value {
        Value::Int(_) => &[Numeric::Int, Numeric::Long, Numeric::Double, Numeric::Float],
        Value::Long(_) => &[Numeric::Long, Numeric::Double, Numeric::Int],
        Value::Float(_) => &[Numeric::Float, Numeric::Double],
        Value::Double(_) => &[Numeric::Double, Numeric::Float],
        _ => &[],
    }
}

fn convert_numeric(value: Value, schema: &Schema) -> Value {
    match (value, schema) {
        (Value::Int(i), Schema::Long) => Value::Long(i64::from(i)),
        (Value::Long(i), Schema::Int) => match i32::try_from(i) {
            Ok(narrow) => Value::Int(narrow),
            Err(_) => Value::Long(i),
        },
        (Value::Int(i), Schema::Double) => Value::Double(f64::from(i)),
        (Value::Long(i), Schema::Double) => Value::Double(i as f64),
        (Value::Float(f), Schema::Double) => Value::Double(f64::from(f)),
        (Value::Int(i), Schema::Float) => Value::Float(i as f32),
        (Value::Double(f), Schema::Float) => Value::Float(f as f32),
        (value, _) => value,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Dtype {
    Bool,
    Int64,
    Float64,
}

impl Dtype {
    fn as_str(self) -> &'static str {
        match self {
            Dtype::Bool => "|b1",
            Dtype::Int64 => "<i8",
            Dtype::Float64 => "<f8",
        }
    }
}

/// Encode a possibly nested list as an `NDArray` record value.
pub fn to_ndarray(items: Vec<Value>, field: &str) -> Result<Value> {
    let mut shape = Vec::new();
    let mut leaves = Vec::new();
    let mut frozen = false;
    flatten(Value::Array(items), 0, &mut shape, &mut leaves, &mut frozen, field)?;

    let dtype = infer_dtype(&leaves, field)?;
    let width = if dtype == Dtype::Bool { 1 } else { 8 };
    let mut data = Vec::with_capacity(leaves.len() * width);
    for leaf in &leaves {
        match (dtype, leaf) {
            (Dtype::Bool, Value::Boolean(b)) => data.push(u8::from(*b)),
            (Dtype::Int64, Value::Int(i)) => data.extend_from_slice(&i64::from(*i).to_le_bytes()),
            (Dtype::Int64, Value::Long(i)) => data.extend_from_slice(&i.to_le_bytes()),
            (Dtype::Float64, leaf) => match as_f64(leaf) {
                Some(f) => data.extend_from_slice(&f.to_le_bytes()),
                None => return Err(non_numeric(field, leaf)),
            },
            (_, leaf) => return Err(non_numeric(field, leaf)),
        }
    }

    let shape = shape
        .into_iter()
        .map(|dim| {
            i32::try_from(dim)
                .map(Value::Int)
                .map_err(|_| TransformError::DimensionOverflow(field.to_owned()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Record(vec![
        ("shape".to_owned(), Value::Array(shape)),
        ("dtype".to_owned(), Value::String(dtype.as_str().to_owned())),
        ("data".to_owned(), Value::Bytes(data)),
    ]))
}

/// Walk nested lists depth first. The first list seen at each depth fixes
/// that dimension; the first scalar fixes the number of dimensions.
fn flatten(
    value: Value,
    depth: usize,
    shape: &mut Vec<usize>,
    leaves: &mut Vec<Value>,
    frozen: &mut bool,
    field: &str,
) -> Result<()> {
    match value {
        Value::Array(items) => {
            if depth == shape.len() {
                if *frozen {
                    return Err(TransformError::RaggedArray(field.to_owned()));
                }
                shape.push(items.len());
            } else if shape[depth] != items.len() {
                return Err(TransformError::RaggedArray(field.to_owned()));
            }
            for item in items {
                flatten(item, depth + 1, shape, leaves, frozen, field)?;
            }
            Ok(())
        }
        leaf => {
            if depth != shape.len() {
                return Err(TransformError::RaggedArray(field.to_owned()));
            }
            *frozen = true;
            leaves.push(leaf);
            Ok(())
        }
    }
}

fn infer_dtype(leaves: &[Value], field: &str) -> Result<Dtype> {
    if leaves.is_empty() {
        return Ok(Dtype::Float64);
    }
    if leaves.iter().all(|v| matches!(v, Value::Boolean(_))) {
        return Ok(Dtype::Bool);
    }
    if leaves.iter().all(|v| matches!(v, Value::Int(_) | Value::Long(_))) {
        return Ok(Dtype::Int64);
    }
    match leaves.iter().find(|v| as_f64(v).is_none()) {
        Some(leaf) => Err(non_numeric(field, leaf)),
        None => Ok(Dtype::Float64),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(f64::from(*i)),
        Value::Long(i) => Some(*i as f64),
        Value::Float(f) => Some(f64::from(*f)),
        Value::Double(f) => Some(*f),
        _ => None,
    }
}

fn non_numeric(field: &str, element: &Value) -> TransformError {
    TransformError::NonNumeric {
        field: field.to_owned(),
        element: format!("{element:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foam_store::StreamKey;
    use serde_json::json;

    fn record(fields: Vec<(&str, Value)>) -> Record {
        fields
            .into_iter()
            .map(|(name, value)| (name.to_owned(), value))
            .collect()
    }

    fn pulse_schema() -> StreamSchema {
        StreamSchema::from_json(json!({
            "type": "record",
            "name": "Pulse",
            "fields": [
                {"name": "train_id", "type": "long"},
                {"name": "gain", "type": "float", "default": 1.0},
                {"name": "label", "type": ["null", "string"]},
                {"name": "image", "type": ["null", foam_store::schema::ndarray_schema_json()], "default": null},
            ],
        }))
        .unwrap()
    }

    fn field<'a>(value: &'a Value, name: &str) -> &'a Value {
        match value {
            Value::Record(fields) => &fields.iter().find(|(n, _)| n == name).unwrap().1,
            other => panic!("not a record: {other:?}"),
        }
    }

    #[test]
    fn nested_integer_lists_become_int64_arrays() {
        let items = vec![
            Value::Array(vec![Value::Long(1), Value::Long(2), Value::Long(3)]),
            Value::Array(vec![Value::Long(4), Value::Long(5), Value::Long(-1)]),
        ];
        let array = to_ndarray(items, "image").unwrap();
        assert_eq!(field(&array, "shape"), &Value::Array(vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(field(&array, "dtype"), &Value::String("<i8".into()));
        let Value::Bytes(data) = field(&array, "data") else {
            panic!("data is not bytes");
        };
        assert_eq!(data.len(), 48);
        assert_eq!(&data[40..], &(-1i64).to_le_bytes());
    }

    #[test]
    fn mixed_numbers_become_float64() {
        let array = to_ndarray(vec![Value::Long(1), Value::Double(0.5)], "x").unwrap();
        assert_eq!(field(&array, "dtype"), &Value::String("<f8".into()));
        let Value::Bytes(data) = field(&array, "data") else {
            panic!("data is not bytes");
        };
        assert_eq!(&data[..8], &1.0f64.to_le_bytes());
        assert_eq!(&data[8..], &0.5f64.to_le_bytes());
    }

    #[test]
    fn booleans_and_empty_lists() {
        let flags = to_ndarray(vec![Value::Boolean(true), Value::Boolean(false)], "f").unwrap();
        assert_eq!(field(&flags, "dtype"), &Value::String("|b1".into()));
        assert_eq!(field(&flags, "data"), &Value::Bytes(vec![1, 0]));

        let empty = to_ndarray(Vec::new(), "e").unwrap();
        assert_eq!(field(&empty, "shape"), &Value::Array(vec![Value::Int(0)]));
        assert_eq!(field(&empty, "data"), &Value::Bytes(Vec::new()));
    }

    #[test]
    fn ragged_and_non_numeric_lists_are_rejected() {
        let ragged = vec![
            Value::Array(vec![Value::Long(1), Value::Long(2)]),
            Value::Array(vec![Value::Long(3)]),
        ];
        assert_eq!(
            to_ndarray(ragged, "img"),
            Err(TransformError::RaggedArray("img".into()))
        );

        let mixed_depth = vec![Value::Long(1), Value::Array(vec![Value::Long(2)])];
        assert!(matches!(
            to_ndarray(mixed_depth, "img"),
            Err(TransformError::RaggedArray(_))
        ));

        let text = vec![Value::String("a".into())];
        assert!(matches!(
            to_ndarray(text, "img"),
            Err(TransformError::NonNumeric { .. })
        ));
    }

    #[test]
    fn record_takes_defaults_and_drops_unknown_fields() {
        let shaped = conform(
            record(vec![
                ("train_id", Value::Int(10)),
                ("extra", Value::String("ignored".into())),
            ]),
            &pulse_schema(),
        )
        .unwrap();
        let Value::Record(fields) = &shaped else {
            panic!("not a record");
        };
        let names: Vec<_> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["train_id", "gain", "label", "image"]);
        assert_eq!(field(&shaped, "train_id"), &Value::Long(10));
        assert_eq!(field(&shaped, "label"), &Value::Null);
        assert_eq!(field(&shaped, "image"), &Value::Null);

        let schema = pulse_schema();
        assert!(foam_store::encode_record(&schema, shaped).is_ok());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = conform(record(vec![("gain", Value::Double(2.0))]), &pulse_schema()).unwrap_err();
        assert_eq!(err, TransformError::MissingField("train_id".into()));
    }

    #[test]
    fn arrays_fill_ndarray_union_slots() {
        let shaped = conform(
            record(vec![
                ("train_id", Value::Long(1)),
                ("gain", Value::Double(0.5)),
                ("image", Value::Array(vec![Value::Double(1.5)])),
            ]),
            &pulse_schema(),
        )
        .unwrap();
        assert_eq!(field(&shaped, "gain"), &Value::Float(0.5));
        assert_eq!(field(field(&shaped, "image"), "dtype"), &Value::String("<f8".into()));
        assert!(foam_store::encode_record(&pulse_schema(), shaped).is_ok());
    }

    #[test]
    fn envelope_wraps_the_whole_record() {
        let key = StreamKey::new("det", "raw");
        let envelope = StreamSchema::envelope(&key).unwrap();
        let shaped = conform(
            record(vec![
                ("count", Value::Int(3)),
                ("trace", Value::Array(vec![Value::Long(1), Value::Long(2)])),
                ("name", Value::String("agipd".into())),
            ]),
            &envelope,
        )
        .unwrap();
        let Value::Map(payload) = field(&shaped, "payload") else {
            panic!("payload is not a map");
        };
        assert_eq!(payload["count"], Value::Long(3));
        assert_eq!(field(&payload["trace"], "dtype"), &Value::String("<i8".into()));
        assert!(foam_store::encode_record(&envelope, shaped).is_ok());
    }
}
