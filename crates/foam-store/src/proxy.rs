//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Hash, pipeline and pub/sub helpers reporting unreachable stores as replies."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Hash, pipeline and pub/sub helpers.
//!
//! Every helper resolves through a [`LazyConnection`], so it always talks to
//! the registry's current pair. Connectivity failures come back as
//! [`Reply::Unavailable`]; errors reported by the store itself are returned
//! as `Err` so a wrong-type key is not mistaken for a store outage.

use std::collections::HashMap;
use std::sync::Arc;

use redis::{Cmd, FromRedisValue, Pipeline, ToRedisArgs};
use tracing::debug;

use crate::holder::{LazyConnection, Subscriber, SubscriptionTarget};
use crate::registry::{ConnectionRegistry, Resettable};
use crate::reply::Reply;
use crate::session::DecodeMode;
use crate::Result;

/// Text/binary holder pair plus the helpers built on them.
#[derive(Debug, Clone)]
pub struct StoreProxy {
    registry: Arc<ConnectionRegistry>,
    db: Arc<LazyConnection>,
    db_raw: Arc<LazyConnection>,
}

impl StoreProxy {
    /// Register a text and a binary holder with `registry`.
    pub fn new(registry: &Arc<ConnectionRegistry>) -> Self {
        Self {
            registry: Arc::clone(registry),
            db: LazyConnection::new(registry, DecodeMode::Text),
            db_raw: LazyConnection::new(registry, DecodeMode::Binary),
        }
    }

    /// Registry the proxy resolves through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Text-mode holder.
    pub fn db(&self) -> &Arc<LazyConnection> {
        &self.db
    }

    /// Binary-mode holder.
    pub fn db_raw(&self) -> &Arc<LazyConnection> {
        &self.db_raw
    }

    /// Forget both cached handles.
    pub fn reset(&self) {
        self.db.reset();
        self.db_raw.reset();
    }

    /// Run an arbitrary command on the text connection.
    pub fn execute_command<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<Reply<T>> {
        absorb(self.db.query(cmd))
    }

    /// Run an arbitrary command on the binary connection.
    pub fn execute_command_raw<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<Reply<T>> {
        absorb(self.db_raw.query(cmd))
    }

    /// Fresh pipeline to fill and pass to [`execute_pipeline`](Self::execute_pipeline).
    pub fn pipeline(&self) -> Pipeline {
        redis::pipe()
    }

    /// Execute `pipeline` on the text connection.
    pub fn execute_pipeline<T: FromRedisValue>(&self, pipeline: &Pipeline) -> Result<Reply<T>> {
        absorb(self.db.query_pipeline(pipeline))
    }

    /// Publish `message` on `channel`; the reply is the number of receivers.
    pub fn publish<M: ToRedisArgs>(&self, channel: &str, message: M) -> Result<Reply<i64>> {
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(message);
        self.execute_command(&cmd)
    }

    /// Lazily subscribing channel subscriber.
    pub fn subscribe(&self, channel: &str) -> Arc<Subscriber> {
        Subscriber::new(
            &self.registry,
            SubscriptionTarget::Channel(channel.to_owned()),
        )
    }

    /// Lazily subscribing pattern subscriber.
    pub fn psubscribe(&self, pattern: &str) -> Arc<Subscriber> {
        Subscriber::new(
            &self.registry,
            SubscriptionTarget::Pattern(pattern.to_owned()),
        )
    }

    /// `HSET name key value`; the reply is the number of new fields.
    pub fn hset<V: ToRedisArgs>(&self, name: &str, key: &str, value: V) -> Result<Reply<i64>> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(name).arg(key).arg(value);
        self.execute_command(&cmd)
    }

    /// Set several fields at once.
    pub fn hmset<K, V>(&self, name: &str, mapping: &[(K, V)]) -> Result<Reply<i64>>
    where
        K: ToRedisArgs,
        V: ToRedisArgs,
    {
        if mapping.is_empty() {
            return Ok(Reply::Value(0));
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(name);
        for (key, value) in mapping {
            cmd.arg(key).arg(value);
        }
        self.execute_command(&cmd)
    }

    /// `HGET name key`; `Value(None)` for an absent field.
    pub fn hget(&self, name: &str, key: &str) -> Result<Reply<Option<String>>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(name).arg(key);
        self.execute_command(&cmd)
    }

    /// `HGET` on the binary connection.
    pub fn hget_raw(&self, name: &str, key: &str) -> Result<Reply<Option<Vec<u8>>>> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(name).arg(key);
        self.execute_command_raw(&cmd)
    }

    /// `HMGET name keys...`, one slot per requested key.
    pub fn hmget(&self, name: &str, keys: &[&str]) -> Result<Reply<Vec<Option<String>>>> {
        if keys.is_empty() {
            return Ok(Reply::Value(Vec::new()));
        }
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(name).arg(keys);
        self.execute_command(&cmd)
    }

    /// `HDEL name keys...`; the reply is the number of removed fields.
    pub fn hdel(&self, name: &str, keys: &[&str]) -> Result<Reply<i64>> {
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(name).arg(keys);
        self.execute_command(&cmd)
    }

    /// `HGETALL name`; an absent hash is an empty map.
    pub fn hget_all(&self, name: &str) -> Result<Reply<HashMap<String, String>>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(name);
        self.execute_command(&cmd)
    }

    /// `HGETALL` for several hashes in one round trip.
    pub fn hget_all_multi(&self, names: &[&str]) -> Result<Reply<Vec<HashMap<String, String>>>> {
        if names.is_empty() {
            return Ok(Reply::Value(Vec::new()));
        }
        let mut pipeline = self.pipeline();
        for name in names {
            pipeline.cmd("HGETALL").arg(*name);
        }
        self.execute_pipeline(&pipeline)
    }

    /// `HINCRBY`; an absent field starts from zero.
    pub fn hincrease_by(&self, name: &str, key: &str, amount: i64) -> Result<Reply<i64>> {
        let mut cmd = redis::cmd("HINCRBY");
        cmd.arg(name).arg(key).arg(amount);
        self.execute_command(&cmd)
    }

    /// `HINCRBYFLOAT`; an absent field starts from zero.
    pub fn hincrease_by_float(&self, name: &str, key: &str, amount: f64) -> Result<Reply<f64>> {
        let mut cmd = redis::cmd("HINCRBYFLOAT");
        cmd.arg(name).arg(key).arg(amount);
        self.execute_command(&cmd)
    }
}

fn absorb<T>(result: Result<T>) -> Result<Reply<T>> {
    match result {
        Ok(value) => Ok(Reply::Value(value)),
        Err(err) if err.is_unavailable() => {
            debug!(error = %err, "store unavailable");
            Ok(Reply::Unavailable)
        }
        Err(err) => Err(err),
    }
}
