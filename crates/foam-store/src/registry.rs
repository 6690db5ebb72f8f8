//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Process-wide connection registry and holder bookkeeping."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Process-wide connection pair and the holder table used to broadcast
//! invalidation when the pair is replaced.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::handle::StoreHandle;
use crate::params::ConnectionParams;
use crate::session::{Connector, DecodeMode};
use crate::{Result, StoreError};

/// Kind of a registered handle-holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKind {
    /// Plain command connection.
    Connection,
    /// Channel subscriber.
    Subscriber,
    /// Pattern subscriber.
    PatternSubscriber,
}

/// Anything the registry can invalidate.
pub trait Resettable: Send + Sync {
    /// Forget the cached handle and close any subscription.
    fn reset(&self);
}

struct HolderEntry {
    id: u64,
    kind: HolderKind,
    holder: Weak<dyn Resettable>,
}

#[derive(Clone)]
struct ConnectionPair {
    text: Arc<StoreHandle>,
    binary: Arc<StoreHandle>,
    params: ConnectionParams,
}

/// Owner of the current text/binary handle pair.
///
/// Built once at startup and shared through `Arc`. Holders register a weak
/// reference on construction and deregister on drop; the registry never
/// keeps a holder alive.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    pair: RwLock<Option<ConnectionPair>>,
    holders: Mutex<Vec<HolderEntry>>,
    next_holder_id: AtomicU64,
    generation: AtomicU64,
}

impl ConnectionRegistry {
    /// Empty registry opening sessions through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            connector,
            pair: RwLock::new(None),
            holders: Mutex::new(Vec::new()),
            next_holder_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
        })
    }

    /// Replace the connection pair.
    ///
    /// Every live holder is reset before the new pair is installed. The new
    /// handles do not touch the network; sockets are opened on first use.
    /// Returns the text-mode handle.
    pub fn init_connection(&self, params: ConnectionParams) -> Result<Arc<StoreHandle>> {
        params.validate()?;

        let mut pair = self.pair.write();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = pair.take() {
            previous.text.close();
            previous.binary.close();
        }
        let reset = self.broadcast_reset();

        let text = Arc::new(StoreHandle::new(
            generation,
            DecodeMode::Text,
            params.clone(),
            Arc::clone(&self.connector),
        ));
        let binary = Arc::new(StoreHandle::new(
            generation,
            DecodeMode::Binary,
            params.clone(),
            Arc::clone(&self.connector),
        ));
        *pair = Some(ConnectionPair {
            text: Arc::clone(&text),
            binary,
            params: params.clone(),
        });

        info!(store = %params, generation, holders_reset = reset, "store connection initialised");
        Ok(text)
    }

    /// Current handle for `mode`.
    pub fn get_connection(&self, mode: DecodeMode) -> Result<Arc<StoreHandle>> {
        let pair = self.pair.read();
        let pair = pair.as_ref().ok_or(StoreError::NotInitialized)?;
        Ok(match mode {
            DecodeMode::Text => Arc::clone(&pair.text),
            DecodeMode::Binary => Arc::clone(&pair.binary),
        })
    }

    /// Parameters of the current pair.
    pub fn params(&self) -> Option<ConnectionParams> {
        self.pair.read().as_ref().map(|pair| pair.params.clone())
    }

    /// Number of times the pair has been replaced.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Whether `init_connection` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.pair.read().is_some()
    }

    /// Track `holder` for invalidation. Returns the id to deregister with.
    pub fn register(&self, kind: HolderKind, holder: Weak<dyn Resettable>) -> u64 {
        let id = self.next_holder_id.fetch_add(1, Ordering::Relaxed);
        self.holders.lock().push(HolderEntry { id, kind, holder });
        id
    }

    /// Stop tracking the holder registered under `id`.
    pub fn deregister(&self, id: u64) {
        self.holders.lock().retain(|entry| entry.id != id);
    }

    /// Number of holders of `kind` that are still alive.
    pub fn live_holders(&self, kind: HolderKind) -> usize {
        self.holders
            .lock()
            .iter()
            .filter(|entry| entry.kind == kind && entry.holder.strong_count() > 0)
            .count()
    }

    /// Reset every live holder without replacing the pair.
    pub fn reset_all(&self) -> usize {
        self.broadcast_reset()
    }

    /// Prunes dead entries, then resets the survivors outside the table lock
    /// so a holder may deregister from inside `reset`.
    fn broadcast_reset(&self) -> usize {
        let live: Vec<Arc<dyn Resettable>> = {
            let mut holders = self.holders.lock();
            holders.retain(|entry| entry.holder.strong_count() > 0);
            holders
                .iter()
                .filter_map(|entry| entry.holder.upgrade())
                .collect()
        };
        for holder in &live {
            holder.reset();
        }
        debug!(count = live.len(), "reset store holders");
        live.len()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("generation", &self.generation())
            .field("params", &self.params())
            .field("holders", &self.holders.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct NeverConnects;

    impl Connector for NeverConnects {
        fn open(&self, _: &ConnectionParams) -> Result<Box<dyn crate::StoreSession>> {
            Err(StoreError::Unsupported("offline".into()))
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Resettable for Counting {
        fn reset(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry() -> Arc<ConnectionRegistry> {
        ConnectionRegistry::new(Arc::new(NeverConnects))
    }

    #[test]
    fn get_connection_requires_init() {
        let registry = registry();
        assert!(matches!(
            registry.get_connection(DecodeMode::Text),
            Err(StoreError::NotInitialized)
        ));
    }

    #[test]
    fn init_creates_independent_pair_without_connecting() {
        let registry = registry();
        let text = registry
            .init_connection(ConnectionParams::new("localhost", 6379))
            .unwrap();
        let binary = registry.get_connection(DecodeMode::Binary).unwrap();
        assert_eq!(text.mode(), DecodeMode::Text);
        assert_eq!(binary.mode(), DecodeMode::Binary);
        assert!(!text.is_connected());
        assert!(Arc::ptr_eq(
            &text,
            &registry.get_connection(DecodeMode::Text).unwrap()
        ));
    }

    #[test]
    fn reinit_resets_live_holders_and_skips_dead_ones() {
        let registry = registry();
        let alive = Arc::new(Counting::default());
        let alive_dyn: Arc<dyn Resettable> = alive.clone();
        registry.register(HolderKind::Connection, Arc::downgrade(&alive_dyn));
        {
            let dead: Arc<dyn Resettable> = Arc::new(Counting::default());
            registry.register(HolderKind::Subscriber, Arc::downgrade(&dead));
        }
        assert_eq!(registry.live_holders(HolderKind::Subscriber), 0);

        registry
            .init_connection(ConnectionParams::new("localhost", 6379))
            .unwrap();
        let reset = registry
            .init_connection(ConnectionParams::new("127.0.0.1", 6380))
            .map(|_| registry.generation())
            .unwrap();
        assert_eq!(reset, 2);
        assert_eq!(alive.0.load(Ordering::SeqCst), 2);
        assert_eq!(registry.holders.lock().len(), 1);
    }

    #[test]
    fn rejects_remote_host_before_touching_state() {
        let registry = registry();
        let err = registry
            .init_connection(ConnectionParams::new("10.1.2.3", 6379))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
        assert_eq!(registry.generation(), 0);
        assert!(!registry.is_initialized());
    }

    #[test]
    fn deregister_removes_entry() {
        let registry = registry();
        let holder: Arc<dyn Resettable> = Arc::new(Counting::default());
        let id = registry.register(HolderKind::Connection, Arc::downgrade(&holder));
        assert_eq!(registry.live_holders(HolderKind::Connection), 1);
        registry.deregister(id);
        assert_eq!(registry.live_holders(HolderKind::Connection), 0);
    }
}
