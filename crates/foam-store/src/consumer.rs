//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Blocking reader decoding Avro entries from a stream."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use apache_avro::types::Value;
use redis::streams::StreamReadReply;

use crate::holder::LazyConnection;
use crate::producer::{decode_records, DATA_FIELD};
use crate::registry::ConnectionRegistry;
use crate::schema::StreamKey;
use crate::session::DecodeMode;
use crate::{Result, StoreError};

/// One decoded stream entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Entry id assigned by the store.
    pub id: String,
    /// Records of the entry's Avro container.
    pub records: Vec<Value>,
}

/// Reads a stream entry by entry, the way data browsers follow a stream.
#[derive(Debug)]
pub struct StreamConsumer {
    db_raw: Arc<LazyConnection>,
    key: StreamKey,
    last_id: String,
    block: Duration,
}

impl StreamConsumer {
    /// Follow `key` from now on (`$`).
    pub fn new(registry: &Arc<ConnectionRegistry>, key: StreamKey) -> Self {
        Self {
            db_raw: LazyConnection::new(registry, DecodeMode::Binary),
            key,
            last_id: "$".to_owned(),
            block: Duration::from_millis(100),
        }
    }

    /// Start after `id` instead; `"0"` replays the whole stream.
    pub fn starting_after(mut self, id: impl Into<String>) -> Self {
        self.last_id = id.into();
        self
    }

    /// How long a read may block waiting for a new entry.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Id of the last entry read.
    pub fn last_id(&self) -> &str {
        &self.last_id
    }

    /// Next entry, or `None` if none arrived within the block time.
    pub fn next_entry(&mut self) -> Result<Option<StreamEntry>> {
        let mut cmd = redis::cmd("XREAD");
        cmd.arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(self.key.to_string())
            .arg(&self.last_id);
        let reply: Option<StreamReadReply> = self.db_raw.query(&cmd)?;
        let Some(entry) = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|stream| stream.ids)
            .next()
        else {
            return Ok(None);
        };

        let data = match entry.map.get(DATA_FIELD) {
            Some(redis::Value::BulkString(bytes)) => bytes.as_slice(),
            _ => {
                return Err(StoreError::Schema(format!(
                    "entry {} of {} has no '{DATA_FIELD}' field",
                    entry.id, self.key
                )))
            }
        };
        let records = decode_records(data)?;
        self.last_id = entry.id.clone();
        Ok(Some(StreamEntry {
            id: entry.id,
            records,
        }))
    }
}
