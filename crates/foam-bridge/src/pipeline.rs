//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Receive, transform and publish loop with per-outcome statistics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The bridge main loop.
//!
//! ```text
//! Init -> SchemaWait -> Running -> Terminated
//!                   \           \-> Fatal
//!                    \-> Terminated | Fatal
//! ```
//!
//! Delivery is at least once from the transport's point of view and at most
//! once into the stream: a record whose publication times out or fails is
//! dropped and counted, never retried.

use foam_common::ShutdownSignal;
use foam_store::{ProduceError, StreamKey, StreamProducer, StreamSchema};
use foam_transport::{Consumer, TransportError};
use tracing::{debug, error, info, warn};

use crate::context::FoamContext;
use crate::resolver::SchemaResolver;
use crate::transform::conform;
use crate::{BridgeError, Result};

/// Where the pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Constructed, not yet running.
    Init,
    /// Waiting for the stream schema.
    SchemaWait,
    /// Moving records.
    Running,
    /// Stopped by the operator.
    Terminated,
    /// Stopped by an unrecoverable error.
    Fatal,
}

/// Per-run counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Records taken from the transport.
    pub received: u64,
    /// Records appended to the stream.
    pub published: u64,
    /// Records dropped because publication timed out.
    pub dropped_timeout: u64,
    /// Records dropped because the store reported a failure.
    pub failed: u64,
    /// Messages that could not be decoded or shaped to the schema.
    pub rejected: u64,
}

/// Moves records from one consumer into one stream.
pub struct BridgePipeline<C: Consumer> {
    key: StreamKey,
    default_schema: StreamSchema,
    consumer: C,
    producer: StreamProducer,
    resolver: SchemaResolver,
    shutdown: ShutdownSignal,
    state: BridgeState,
    stats: BridgeStats,
}

impl<C: Consumer> BridgePipeline<C> {
    /// Pipeline publishing to `key`; `default_schema` is installed when the
    /// registry has none.
    pub fn new(
        context: &FoamContext,
        key: StreamKey,
        default_schema: StreamSchema,
        consumer: C,
    ) -> Self {
        Self {
            key,
            default_schema,
            consumer,
            producer: context.producer(),
            resolver: context.resolver(),
            shutdown: context.shutdown().clone(),
            state: BridgeState::Init,
            stats: BridgeStats::default(),
        }
    }

    /// Destination stream.
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Current state.
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Resolve the schema, then loop until interrupted.
    ///
    /// An operator interrupt is a normal end and returns the counters; only
    /// a dead consumer or an unusable schema registry is an error.
    pub fn run(&mut self) -> Result<BridgeStats> {
        self.state = BridgeState::SchemaWait;
        let schema = match self
            .resolver
            .resolve(&self.key, &self.default_schema, &self.shutdown)
        {
            Ok(schema) => schema,
            Err(BridgeError::Interrupted) => return Ok(self.terminate()),
            Err(err) => return Err(self.fail(err)),
        };

        self.state = BridgeState::Running;
        info!(stream = %self.key, consumer = %self.consumer.describe(), "bridge running");
        while !self.shutdown.is_triggered() {
            if let Err(err) = self.step(&schema) {
                return Err(self.fail(err));
            }
        }
        Ok(self.terminate())
    }

    /// One receive, transform and publish cycle.
    fn step(&mut self, schema: &StreamSchema) -> Result<()> {
        let record = match self.consumer.next() {
            Ok(record) => record,
            Err(TransportError::Timeout) => return Ok(()),
            Err(err) if err.is_message_error() => {
                self.stats.rejected += 1;
                warn!(error = %err, "discarding undecodable message");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        self.stats.received += 1;

        let value = match conform(record, schema) {
            Ok(value) => value,
            Err(err) => {
                self.stats.rejected += 1;
                warn!(stream = %self.key, error = %err, "record does not match the stream schema");
                return Ok(());
            }
        };

        match self.producer.produce(&self.key, value, schema) {
            Ok(id) => {
                self.stats.published += 1;
                info!(stream = %self.key, id = %id, "Published new data to STREAM: {}, {}", self.key, id);
            }
            Err(ProduceError::Timeout) => {
                self.stats.dropped_timeout += 1;
                debug!(stream = %self.key, "publication timed out; record dropped");
            }
            Err(ProduceError::Runtime(reason)) => {
                self.stats.failed += 1;
                warn!(stream = %self.key, reason = %reason, "publication failed; record dropped");
            }
        }
        Ok(())
    }

    fn terminate(&mut self) -> BridgeStats {
        self.consumer.close();
        self.state = BridgeState::Terminated;
        info!(
            received = self.stats.received,
            published = self.stats.published,
            dropped_timeout = self.stats.dropped_timeout,
            failed = self.stats.failed,
            rejected = self.stats.rejected,
            "Bridge terminated from the keyboard"
        );
        self.stats
    }

    fn fail(&mut self, err: BridgeError) -> BridgeError {
        self.consumer.close();
        self.state = BridgeState::Fatal;
        error!(stream = %self.key, error = %err, "bridge stopped");
        err
    }
}
