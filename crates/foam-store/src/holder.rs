//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lazy connection and subscriber holders reset on re-initialisation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Handle-holders: capability objects that resolve the registry's current
//! handle on first use and drop it again when the registry resets them.
//!
//! Holders never call into the registry while holding their own lock; the
//! registry resets holders while it holds its write lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use redis::{Cmd, FromRedisValue, Pipeline, Value};
use tracing::{debug, warn};

use crate::handle::StoreHandle;
use crate::registry::{ConnectionRegistry, HolderKind, Resettable};
use crate::reply::Reply;
use crate::session::{DecodeMode, PubSubMessage, StoreSession};
use crate::{is_connectivity_error, Result};

/// Lazily resolved command connection for one decoding mode.
pub struct LazyConnection {
    registry: Arc<ConnectionRegistry>,
    mode: DecodeMode,
    id: AtomicU64,
    cached: Mutex<Option<Arc<StoreHandle>>>,
}

impl LazyConnection {
    /// Create and register a holder. Nothing is resolved until [`get`](Self::get).
    pub fn new(registry: &Arc<ConnectionRegistry>, mode: DecodeMode) -> Arc<Self> {
        let holder = Arc::new(Self {
            registry: Arc::clone(registry),
            mode,
            id: AtomicU64::new(0),
            cached: Mutex::new(None),
        });
        let weak: Weak<dyn Resettable> = Arc::downgrade(&holder) as Weak<dyn Resettable>;
        holder
            .id
            .store(registry.register(HolderKind::Connection, weak), Ordering::SeqCst);
        holder
    }

    /// Decoding mode this holder resolves.
    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Whether a handle is currently cached.
    pub fn is_resolved(&self) -> bool {
        self.cached.lock().is_some()
    }

    /// Cached handle, resolving it from the registry when empty or stale.
    pub fn get(&self) -> Result<Arc<StoreHandle>> {
        let cached = self.cached.lock().clone();
        // A handle read just before a re-init can be cached after the reset.
        if let Some(handle) = cached {
            if handle.generation() == self.registry.generation() {
                return Ok(handle);
            }
        }
        let handle = self.registry.get_connection(self.mode)?;
        *self.cached.lock() = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Run a command on the current handle.
    pub fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        self.get()?.query(cmd)
    }

    /// Run a pipeline on the current handle.
    pub fn query_pipeline<T: FromRedisValue>(&self, pipeline: &Pipeline) -> Result<T> {
        self.get()?.query_pipeline(pipeline)
    }
}

impl Resettable for LazyConnection {
    fn reset(&self) {
        self.cached.lock().take();
    }
}

impl Drop for LazyConnection {
    fn drop(&mut self) {
        self.registry.deregister(*self.id.get_mut());
    }
}

impl fmt::Debug for LazyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyConnection")
            .field("mode", &self.mode)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// What a [`Subscriber`] listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    /// A single channel (`SUBSCRIBE`).
    Channel(String),
    /// A glob pattern (`PSUBSCRIBE`).
    Pattern(String),
}

impl SubscriptionTarget {
    fn command(&self) -> Cmd {
        let (name, arg) = match self {
            SubscriptionTarget::Channel(channel) => ("SUBSCRIBE", channel),
            SubscriptionTarget::Pattern(pattern) => ("PSUBSCRIBE", pattern),
        };
        let mut cmd = redis::cmd(name);
        cmd.arg(arg);
        cmd
    }

    fn kind(&self) -> HolderKind {
        match self {
            SubscriptionTarget::Channel(_) => HolderKind::Subscriber,
            SubscriptionTarget::Pattern(_) => HolderKind::PatternSubscriber,
        }
    }
}

struct Subscription {
    generation: u64,
    session: Box<dyn StoreSession>,
}

/// Channel or pattern subscriber on a dedicated session.
///
/// Subscribes on the first [`get_message`](Self::get_message); a registry
/// reset closes the subscription and the next call subscribes again against
/// the new connection parameters.
pub struct Subscriber {
    registry: Arc<ConnectionRegistry>,
    target: SubscriptionTarget,
    id: AtomicU64,
    subscription: Mutex<Option<Subscription>>,
}

impl Subscriber {
    /// Create and register a subscriber.
    pub fn new(registry: &Arc<ConnectionRegistry>, target: SubscriptionTarget) -> Arc<Self> {
        let holder = Arc::new(Self {
            registry: Arc::clone(registry),
            target,
            id: AtomicU64::new(0),
            subscription: Mutex::new(None),
        });
        let weak: Weak<dyn Resettable> = Arc::downgrade(&holder) as Weak<dyn Resettable>;
        let id = registry.register(holder.target.kind(), weak);
        holder.id.store(id, Ordering::SeqCst);
        holder
    }

    /// Subscription target.
    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Whether a subscription is currently open.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// `Value(None)` means nothing arrived in time; subscription
    /// confirmations are swallowed.
    pub fn get_message(&self, timeout: Duration) -> Result<Reply<Option<PubSubMessage>>> {
        let taken = self.subscription.lock().take();
        let mut subscription = match taken {
            Some(subscription) => subscription,
            None => match self.subscribe()? {
                Reply::Value(subscription) => subscription,
                Reply::Unavailable => return Ok(Reply::Unavailable),
            },
        };

        match subscription.session.recv_push(timeout) {
            Ok(pushed) => {
                self.restore(subscription);
                Ok(Reply::Value(pushed.as_ref().and_then(PubSubMessage::from_value)))
            }
            Err(err) if is_connectivity_error(&err) => {
                warn!(target_channel = ?self.target, error = %err, "subscription lost");
                Ok(Reply::Unavailable)
            }
            Err(err) => {
                self.restore(subscription);
                Err(err.into())
            }
        }
    }

    /// Close the subscription.
    pub fn close(&self) {
        if self.subscription.lock().take().is_some() {
            debug!(target_channel = ?self.target, "subscription closed");
        }
    }

    fn subscribe(&self) -> Result<Reply<Subscription>> {
        let generation = self.registry.generation();
        let handle = self.registry.get_connection(DecodeMode::Text)?;
        let mut session = match handle.open_dedicated() {
            Ok(session) => session,
            Err(err) if err.is_unavailable() => return Ok(Reply::Unavailable),
            Err(err) => return Err(err),
        };
        match self.target.command().query::<Value>(session.connection()) {
            Ok(_) => {
                debug!(target_channel = ?self.target, "subscribed");
                Ok(Reply::Value(Subscription {
                    generation,
                    session,
                }))
            }
            Err(err) if is_connectivity_error(&err) => Ok(Reply::Unavailable),
            Err(err) => Err(err.into()),
        }
    }

    /// Put the subscription back unless a reset happened meanwhile.
    fn restore(&self, subscription: Subscription) {
        if subscription.generation == self.registry.generation() {
            *self.subscription.lock() = Some(subscription);
        }
    }
}

impl Resettable for Subscriber {
    fn reset(&self) {
        self.close();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.registry.deregister(*self.id.get_mut());
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("target", &self.target)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
