//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema registry stored in the per-stream schema hash."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::debug;

use crate::holder::LazyConnection;
use crate::registry::ConnectionRegistry;
use crate::schema::{StreamKey, StreamSchema};
use crate::session::DecodeMode;
use crate::Result;

/// Only version "0" exists; schema evolution is not supported.
const SCHEMA_VERSION: &str = "0";

/// Store-hosted lookup of the current schema of each stream, kept in the
/// hash `<stream>:_schema`.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    db: Arc<LazyConnection>,
}

impl SchemaRegistry {
    /// Registry resolving its connection through `registry`.
    pub fn new(registry: &Arc<ConnectionRegistry>) -> Self {
        Self {
            db: LazyConnection::new(registry, DecodeMode::Text),
        }
    }

    /// Hash holding the schema versions of `key`.
    pub fn hash_key(key: &StreamKey) -> String {
        format!("{key}:_schema")
    }

    /// Current schema of `key`, `None` if none was published.
    pub fn get(&self, key: &StreamKey) -> Result<Option<StreamSchema>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(Self::hash_key(key)).arg(SCHEMA_VERSION);
        let stored: Option<String> = self.db.query(&cmd)?;
        match stored {
            Some(text) if !text.is_empty() => Ok(Some(StreamSchema::parse_str(&text)?)),
            _ => Ok(None),
        }
    }

    /// Publish `schema` for `key`, replacing any previous one.
    pub fn set(&self, key: &StreamKey, schema: &StreamSchema) -> Result<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(Self::hash_key(key))
            .arg(SCHEMA_VERSION)
            .arg(schema.to_json_string());
        let _: i64 = self.db.query(&cmd)?;
        debug!(stream = %key, "schema published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_appends_schema_suffix() {
        let key = StreamKey::new("det", "raw");
        assert_eq!(SchemaRegistry::hash_key(&key), "det:raw:_schema");
    }
}
