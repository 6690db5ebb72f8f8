//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared store handle with lazily reopened sessions."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use redis::{Cmd, FromRedisValue, Pipeline, Value};
use tracing::debug;

use crate::params::ConnectionParams;
use crate::session::{Connector, DecodeMode, StoreSession};
use crate::{is_connectivity_error, Result};

/// Process-wide session for one decoding mode.
///
/// The socket is opened on the first command rather than when the handle is
/// created, and dropped again after a connectivity failure so the next
/// command reconnects.
pub struct StoreHandle {
    generation: u64,
    mode: DecodeMode,
    params: ConnectionParams,
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Box<dyn StoreSession>>>,
}

impl StoreHandle {
    pub(crate) fn new(
        generation: u64,
        mode: DecodeMode,
        params: ConnectionParams,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            generation,
            mode,
            params,
            connector,
            session: Mutex::new(None),
        }
    }

    /// Registry generation this handle was created in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Decoding mode of the handle.
    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Connection parameters the handle was created with.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Run a single command.
    pub fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let value = self.with_session(|session| cmd.query::<Value>(session.connection()))?;
        Ok(T::from_redis_value(&self.mode.decode(value)?)?)
    }

    /// Run a pipeline; the reply is the array of per-command results.
    pub fn query_pipeline<T: FromRedisValue>(&self, pipeline: &Pipeline) -> Result<T> {
        let value = self.with_session(|session| pipeline.query::<Value>(session.connection()))?;
        Ok(T::from_redis_value(&self.mode.decode(value)?)?)
    }

    /// Open a separate session with the same parameters, e.g. for
    /// subscriptions that must not share the command session.
    pub fn open_dedicated(&self) -> Result<Box<dyn StoreSession>> {
        self.connector.open(&self.params)
    }

    /// Drop the cached session, if any.
    pub fn close(&self) {
        if self.session.lock().take().is_some() {
            debug!(store = %self.params, mode = ?self.mode, "closed store session");
        }
    }

    fn with_session(
        &self,
        run: impl FnOnce(&mut dyn StoreSession) -> redis::RedisResult<Value>,
    ) -> Result<Value> {
        let mut guard = self.session.lock();
        let mut session = match guard.take() {
            Some(session) => session,
            None => self.connector.open(&self.params)?,
        };
        match run(session.as_mut()) {
            Ok(value) => {
                *guard = Some(session);
                Ok(value)
            }
            Err(err) => {
                if is_connectivity_error(&err) {
                    debug!(store = %self.params, error = %err, "dropping broken store session");
                } else {
                    *guard = Some(session);
                }
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("generation", &self.generation)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
