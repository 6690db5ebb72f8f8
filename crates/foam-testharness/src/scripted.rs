//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Scripted transport consumer and server launcher doubles."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Scripted stand-ins for the message source and the server launcher.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use apache_avro::types::Value;
use foam_common::ShutdownSignal;
use foam_supervisor::{LaunchSpec, Launcher, ServerProcess};
use foam_transport::{Consumer, Record, TransportError};
use parking_lot::Mutex;

use crate::memory_store::MemoryStore;

/// Transport record from `(field, value)` pairs, in order.
pub fn record<'a>(fields: impl IntoIterator<Item = (&'a str, Value)>) -> Record {
    fields
        .into_iter()
        .map(|(name, value)| (name.to_owned(), value))
        .collect()
}

/// One scripted outcome of [`Consumer::next`].
#[derive(Debug, Clone)]
pub enum Step {
    /// A decoded record.
    Record(Record),
    /// No message within the receive timeout.
    Timeout,
    /// A message that failed to decode.
    Malformed(String),
    /// The socket went away.
    Closed,
}

#[derive(Default)]
struct ConsumerScript {
    steps: VecDeque<Step>,
    on_drained: Option<ShutdownSignal>,
    calls: usize,
    closed: bool,
}

/// Consumer replaying a fixed list of steps. Clones share the script, so a
/// test can keep one clone to inspect after handing the other away.
#[derive(Clone, Default)]
pub struct ScriptedConsumer {
    script: Arc<Mutex<ConsumerScript>>,
}

impl ScriptedConsumer {
    /// Consumer replaying `steps` in order, then timing out forever.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let consumer = Self::default();
        consumer.script.lock().steps.extend(steps);
        consumer
    }

    /// Trigger `signal` once every step has been replayed.
    pub fn trigger_when_drained(self, signal: ShutdownSignal) -> Self {
        self.script.lock().on_drained = Some(signal);
        self
    }

    /// Append a step.
    pub fn push(&self, step: Step) {
        self.script.lock().steps.push_back(step);
    }

    /// Calls to `next` so far.
    pub fn calls(&self) -> usize {
        self.script.lock().calls
    }

    /// Steps not yet replayed.
    pub fn remaining(&self) -> usize {
        self.script.lock().steps.len()
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.script.lock().closed
    }
}

impl Consumer for ScriptedConsumer {
    fn next(&mut self) -> foam_transport::Result<Record> {
        let mut script = self.script.lock();
        script.calls += 1;
        if script.closed {
            return Err(TransportError::Closed);
        }
        match script.steps.pop_front() {
            Some(Step::Record(record)) => Ok(record),
            Some(Step::Timeout) => Err(TransportError::Timeout),
            Some(Step::Malformed(reason)) => Err(TransportError::Malformed(reason)),
            Some(Step::Closed) => Err(TransportError::Closed),
            None => {
                if let Some(signal) = &script.on_drained {
                    signal.trigger();
                }
                Err(TransportError::Timeout)
            }
        }
    }

    fn close(&mut self) {
        self.script.lock().closed = true;
    }

    fn describe(&self) -> String {
        "scripted".to_owned()
    }
}

/// How a [`ScriptedLauncher`] server behaves once spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchBehavior {
    /// The store comes online.
    Starts,
    /// The process runs but the store never answers.
    NeverResponds,
    /// The store comes online but the spawned process exits with the code,
    /// as when another server already owns the port.
    ExitsImmediately(i32),
}

struct LaunchLog {
    specs: Vec<LaunchSpec>,
    kills: usize,
}

/// Launcher that flips a [`MemoryStore`] online instead of running a binary.
#[derive(Clone)]
pub struct ScriptedLauncher {
    store: MemoryStore,
    behavior: LaunchBehavior,
    log: Arc<Mutex<LaunchLog>>,
    next_pid: Arc<AtomicU32>,
}

impl ScriptedLauncher {
    /// Launcher driving `store` with `behavior`.
    pub fn new(store: MemoryStore, behavior: LaunchBehavior) -> Self {
        Self {
            store,
            behavior,
            log: Arc::new(Mutex::new(LaunchLog {
                specs: Vec::new(),
                kills: 0,
            })),
            next_pid: Arc::new(AtomicU32::new(4000)),
        }
    }

    /// Number of spawns.
    pub fn spawn_count(&self) -> usize {
        self.log.lock().specs.len()
    }

    /// Specs passed to `spawn`.
    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.log.lock().specs.clone()
    }

    /// Number of kills across every spawned process.
    pub fn kills(&self) -> usize {
        self.log.lock().kills
    }
}

impl Launcher for ScriptedLauncher {
    fn spawn(&self, spec: &LaunchSpec) -> foam_supervisor::Result<Box<dyn ServerProcess>> {
        self.log.lock().specs.push(spec.clone());
        let exit = match self.behavior {
            LaunchBehavior::Starts => {
                self.store.set_online(true);
                None
            }
            LaunchBehavior::NeverResponds => None,
            LaunchBehavior::ExitsImmediately(code) => {
                self.store.set_online(true);
                Some(code)
            }
        };
        Ok(Box::new(ScriptedProcess {
            pid: self.next_pid.fetch_add(1, Ordering::Relaxed),
            exit,
            killed: AtomicBool::new(false),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedProcess {
    pid: u32,
    exit: Option<i32>,
    killed: AtomicBool,
    log: Arc<Mutex<LaunchLog>>,
}

impl ServerProcess for ScriptedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.killed.load(Ordering::Relaxed) {
            return Ok(Some(-1));
        }
        Ok(self.exit)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::Relaxed);
        self.log.lock().kills += 1;
        Ok(())
    }
}
