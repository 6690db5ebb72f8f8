//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "ZeroMQ-backed consumer with SUB, PULL and REQ socket handling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! ZeroMQ-backed [`Consumer`].
//!
//! `SUB` sockets subscribe to every topic. `REQ` sockets send a request
//! before receiving; after a timeout the request stays outstanding and the
//! next call keeps waiting for its reply instead of sending another one.

use std::time::Duration;

use foam_common::{DeserializerKind, SocketMode, TransportConfig};
use tracing::{debug, info};

use crate::consumer::Consumer;
use crate::deserializer::{create_deserializer, Deserializer};
use crate::record::Record;
use crate::{Result, TransportError};

const REQUEST_BODY: &[u8] = b"READY";

fn socket_type(mode: SocketMode) -> zmq::SocketType {
    match mode {
        SocketMode::Req => zmq::REQ,
        SocketMode::Pull => zmq::PULL,
        SocketMode::Sub => zmq::SUB,
    }
}

/// Consumer connected to an acquisition endpoint.
pub struct ZmqConsumer {
    endpoint: String,
    mode: SocketMode,
    timeout: Duration,
    deserializer: Box<dyn Deserializer>,
    socket: Option<zmq::Socket>,
    request_pending: bool,
    _context: zmq::Context,
}

impl ZmqConsumer {
    /// Connect using the `[transport]` configuration block.
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        Self::connect(
            &config.endpoint,
            config.socket,
            config.deserializer,
            config.timeout,
        )
    }

    /// Connect to `endpoint`. Receives give up after `timeout`.
    pub fn connect(
        endpoint: &str,
        mode: SocketMode,
        deserializer: DeserializerKind,
        timeout: Duration,
    ) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context.socket(socket_type(mode))?;
        socket.set_rcvtimeo(i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX))?;
        socket.set_linger(0)?;
        if mode == SocketMode::Sub {
            socket.set_subscribe(b"")?;
        }
        socket.connect(endpoint)?;
        info!(endpoint, socket = %mode, deserializer = ?deserializer, timeout_ms = timeout.as_millis() as u64, "transport consumer connected");

        Ok(Self {
            endpoint: endpoint.to_owned(),
            mode,
            timeout,
            deserializer: create_deserializer(deserializer),
            socket: Some(socket),
            request_pending: false,
            _context: context,
        })
    }

    /// Endpoint address.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Socket pattern.
    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    /// Receive timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Consumer for ZmqConsumer {
    fn next(&mut self) -> Result<Record> {
        let socket = self.socket.as_ref().ok_or(TransportError::Closed)?;
        if self.mode == SocketMode::Req && !self.request_pending {
            socket.send(REQUEST_BODY, 0)?;
            self.request_pending = true;
        }
        match socket.recv_bytes(0) {
            Ok(bytes) => {
                self.request_pending = false;
                self.deserializer.deserialize(&bytes)
            }
            Err(zmq::Error::EAGAIN) => Err(TransportError::Timeout),
            Err(err) => Err(err.into()),
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            self.request_pending = false;
            debug!(endpoint = %self.endpoint, "transport consumer closed");
        }
    }

    fn describe(&self) -> String {
        format!("{} {}", self.mode, self.endpoint)
    }
}

impl Drop for ZmqConsumer {
    fn drop(&mut self) {
        self.close();
    }
}
