//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Crate root and error classification for store access."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Everything the bridge needs to talk to the Redis store: the process-wide
//! [`ConnectionRegistry`], lazily resolving handle-holders, the
//! [`StoreProxy`] hash helpers, the schema registry and the stream
//! producer/consumer pair.

pub mod consumer;
pub mod handle;
pub mod holder;
pub mod params;
pub mod producer;
pub mod proxy;
pub mod registry;
pub mod reply;
pub mod schema;
pub mod schema_registry;
pub mod session;

/// Shared result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error enumeration for the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `init_connection` has not succeeded yet.
    #[error("store connection has not been initialised")]
    NotInitialized,
    /// Rejected connection settings (socket files, remote hosts).
    #[error("unsupported store configuration: {0}")]
    Unsupported(String),
    /// Wrapper for errors reported by the Redis client or server.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// Malformed store address.
    #[error("invalid store url: {0}")]
    Url(#[from] url::ParseError),
    /// Schema document that is not a usable record schema.
    #[error("schema error: {0}")]
    Schema(String),
    /// Wrapper for Avro encoding and decoding failures.
    #[error("avro error: {0}")]
    Avro(#[from] apache_avro::Error),
    /// Wrapper for JSON serialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for IO errors while reading schema files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when the store could not be reached at all, as opposed to the
    /// store rejecting a command.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Redis(err) if is_connectivity_error(err))
    }

    /// True when a stored document could not be read as a schema.
    pub fn is_malformed_schema(&self) -> bool {
        matches!(
            self,
            StoreError::Schema(_) | StoreError::Json(_) | StoreError::Avro(_)
        )
    }

    /// True when the failure was a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Redis(err) if err.is_timeout())
    }
}

/// Connectivity class of Redis errors; these never reach helper callers.
pub fn is_connectivity_error(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
}

pub use consumer::{StreamConsumer, StreamEntry};
pub use handle::StoreHandle;
pub use holder::{LazyConnection, Subscriber, SubscriptionTarget};
pub use params::ConnectionParams;
pub use producer::{decode_records, encode_record, ProduceError, StreamProducer, DATA_FIELD};
pub use proxy::StoreProxy;
pub use registry::{ConnectionRegistry, HolderKind, Resettable};
pub use reply::Reply;
pub use schema::{load_schema, SchemaFile, StreamKey, StreamSchema};
pub use schema_registry::SchemaRegistry;
pub use session::{Connector, DecodeMode, PubSubMessage, RedisConnector, StoreSession};
