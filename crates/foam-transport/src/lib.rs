//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Crate root and error type of the acquisition transport."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Receiving side of the bridge: a [`Consumer`] yields one decoded
//! [`Record`] per call or reports an idle [`TransportError::Timeout`].

pub mod consumer;
pub mod deserializer;
pub mod record;
pub mod socket;

/// Shared result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Error enumeration for the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing arrived within the receive timeout.
    #[error("no message received within the timeout")]
    Timeout,
    /// The consumer was closed.
    #[error("consumer is closed")]
    Closed,
    /// Wrapper for socket-level failures.
    #[error("socket error: {0}")]
    Socket(#[from] zmq::Error),
    /// Wrapper for Avro decoding failures.
    #[error("avro decoding error: {0}")]
    Avro(#[from] apache_avro::Error),
    /// Wrapper for JSON decoding failures.
    #[error("json decoding error: {0}")]
    Json(#[from] serde_json::Error),
    /// Payload decoded but is not a record.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the error only concerns the message at hand; the consumer
    /// itself is still usable.
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            TransportError::Avro(_) | TransportError::Json(_) | TransportError::Malformed(_)
        )
    }
}

pub use consumer::Consumer;
pub use deserializer::{create_deserializer, AvroDeserializer, Deserializer, JsonDeserializer};
pub use record::{json_to_avro, record_from_avro, record_into_avro, Record};
pub use socket::ZmqConsumer;
