//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connector seam and Redis-backed store sessions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Seams between the registry and the wire client. [`Connector`] opens
//! [`StoreSession`]s; production code uses [`RedisConnector`], tests plug in
//! an in-memory store.

use std::time::Duration;

use redis::{ConnectionLike, ErrorKind, RedisError, RedisResult, Value};
use tracing::trace;

use crate::params::ConnectionParams;
use crate::Result;

const MIN_PUSH_TIMEOUT: Duration = Duration::from_millis(1);

/// One open session to the store.
pub trait StoreSession: Send {
    /// Request/response access used by commands and pipelines.
    fn connection(&mut self) -> &mut dyn ConnectionLike;

    /// Wait up to `timeout` for an out-of-band pub/sub push.
    /// `Ok(None)` means nothing arrived in time.
    fn recv_push(&mut self, timeout: Duration) -> RedisResult<Option<Value>>;
}

/// Factory for store sessions.
pub trait Connector: Send + Sync {
    /// Open a fresh session using `params`.
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn StoreSession>>;
}

/// [`Connector`] backed by the `redis` crate's synchronous client.
#[derive(Debug, Default, Clone, Copy)]
pub struct RedisConnector;

impl Connector for RedisConnector {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn StoreSession>> {
        let url = params.url()?;
        let client = redis::Client::open(url.as_str())?;
        let connection = client.get_connection_with_timeout(params.timeout)?;
        connection.set_read_timeout(Some(params.timeout))?;
        connection.set_write_timeout(Some(params.timeout))?;
        trace!(store = %params, "opened store session");
        Ok(Box::new(connection))
    }
}

impl StoreSession for redis::Connection {
    fn connection(&mut self) -> &mut dyn ConnectionLike {
        self
    }

    fn recv_push(&mut self, timeout: Duration) -> RedisResult<Option<Value>> {
        self.set_read_timeout(Some(timeout.max(MIN_PUSH_TIMEOUT)))?;
        match self.recv_response() {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_timeout() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// How replies are handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeMode {
    /// Replies must be valid UTF-8 text.
    Text,
    /// Replies are passed through as raw bytes.
    Binary,
}

impl DecodeMode {
    /// Apply the mode to a raw reply.
    pub fn decode(self, value: Value) -> RedisResult<Value> {
        match self {
            DecodeMode::Binary => Ok(value),
            DecodeMode::Text => {
                ensure_text(&value)?;
                Ok(value)
            }
        }
    }
}

fn ensure_text(value: &Value) -> RedisResult<()> {
    match value {
        Value::BulkString(bytes) => std::str::from_utf8(bytes).map(|_| ()).map_err(|err| {
            RedisError::from((
                ErrorKind::TypeError,
                "reply is not valid UTF-8",
                err.to_string(),
            ))
        }),
        Value::Array(items) | Value::Set(items) => items.iter().try_for_each(ensure_text),
        Value::Map(entries) => entries.iter().try_for_each(|(key, value)| {
            ensure_text(key)?;
            ensure_text(value)
        }),
        _ => Ok(()),
    }
}

/// A message delivered to a channel or pattern subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Matching pattern, for pattern subscriptions.
    pub pattern: Option<String>,
    /// Raw message body.
    pub payload: Vec<u8>,
}

impl PubSubMessage {
    /// Parse a `message`/`pmessage` push. Subscription confirmations and
    /// anything else return `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = match value {
            Value::Array(items) => items.as_slice(),
            Value::Push { data, .. } => data.as_slice(),
            _ => return None,
        };
        let kind = items.first().and_then(as_string)?;
        match (kind.as_str(), items.len()) {
            ("message", 3) => Some(Self {
                channel: as_string(&items[1])?,
                pattern: None,
                payload: as_bytes(&items[2])?,
            }),
            ("pmessage", 4) => Some(Self {
                pattern: Some(as_string(&items[1])?),
                channel: as_string(&items[2])?,
                payload: as_bytes(&items[3])?,
            }),
            _ => None,
        }
    }

    /// Payload as UTF-8 text, lossy.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Some(bytes.clone()),
        Value::SimpleString(text) => Some(text.clone().into_bytes()),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    as_bytes(value).and_then(|bytes| String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> Value {
        Value::BulkString(text.as_bytes().to_vec())
    }

    #[test]
    fn text_mode_rejects_invalid_utf8() {
        let raw = Value::Array(vec![bulk("ok"), Value::BulkString(vec![0xff, 0xfe])]);
        assert!(DecodeMode::Binary.decode(raw.clone()).is_ok());
        let err = DecodeMode::Text.decode(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
    }

    #[test]
    fn parses_channel_and_pattern_messages() {
        let message = Value::Array(vec![bulk("message"), bulk("log:warning"), bulk("bye")]);
        let parsed = PubSubMessage::from_value(&message).unwrap();
        assert_eq!(parsed.channel, "log:warning");
        assert_eq!(parsed.payload_text(), "bye");
        assert!(parsed.pattern.is_none());

        let pmessage = Value::Array(vec![
            bulk("pmessage"),
            bulk("log:*"),
            bulk("log:info"),
            bulk("hello"),
        ]);
        let parsed = PubSubMessage::from_value(&pmessage).unwrap();
        assert_eq!(parsed.pattern.as_deref(), Some("log:*"));
        assert_eq!(parsed.channel, "log:info");
    }

    #[test]
    fn ignores_subscription_confirmations() {
        let confirm = Value::Array(vec![bulk("subscribe"), bulk("log:warning"), Value::Int(1)]);
        assert!(PubSubMessage::from_value(&confirm).is_none());
    }
}
