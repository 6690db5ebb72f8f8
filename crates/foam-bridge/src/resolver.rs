//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Blocking lookup of the stream schema with default installation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use foam_common::ShutdownSignal;
use foam_store::{SchemaRegistry, StreamKey, StreamSchema};
use tracing::{debug, info, warn};

use crate::{BridgeError, Result};

/// Obtains the schema of a stream from the store's schema registry,
/// publishing a default when none exists.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    registry: SchemaRegistry,
    retry_interval: Duration,
}

impl SchemaResolver {
    /// Resolver polling `registry` every `retry_interval`.
    pub fn new(registry: SchemaRegistry, retry_interval: Duration) -> Self {
        Self {
            registry,
            retry_interval,
        }
    }

    /// Delay between registry reads.
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Block until a schema for `key` can be read back.
    ///
    /// When the registry has none, `default` is installed and the registry
    /// is read again after the retry interval. An unreachable store or an
    /// entry that does not parse as a schema is retried the same way. Only `shutdown` ends the wait early.
    pub fn resolve(
        &self,
        key: &StreamKey,
        default: &StreamSchema,
        shutdown: &ShutdownSignal,
    ) -> Result<StreamSchema> {
        loop {
            match self.registry.get(key) {
                Ok(Some(schema)) => {
                    if &schema != default {
                        debug!(stream = %key, "published schema differs from the local default");
                    }
                    info!(stream = %key, "schema resolved");
                    return Ok(schema);
                }
                Ok(None) => {
                    warn!(stream = %key, "No schema has been published for {key}; installing the default");
                    if let Err(err) = self.registry.set(key, default) {
                        if !err.is_unavailable() {
                            return Err(err.into());
                        }
                        warn!(stream = %key, error = %err, "unable to publish the default schema");
                    }
                }
                Err(err) if err.is_unavailable() => {
                    warn!(stream = %key, error = %err, "schema registry unreachable; retrying");
                }
                Err(err) if err.is_malformed_schema() => {
                    warn!(stream = %key, error = %err, "published schema for {key} is not usable yet; retrying");
                }
                Err(err) => return Err(err.into()),
            }
            if !shutdown.sleep(self.retry_interval) {
                return Err(BridgeError::Interrupted);
            }
        }
    }
}
