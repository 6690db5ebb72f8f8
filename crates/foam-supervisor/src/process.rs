//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Launch specs, spawned server handles and the process table."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Spawning the store server and tracking the processes this run owns.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use foam_common::StoreConfig;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{Result, SupervisorError};

/// What to run to start a store server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Server executable.
    pub executable: PathBuf,
    /// Port to listen on.
    pub port: u16,
    /// Value of `--requirepass`.
    pub password: Option<String>,
}

impl LaunchSpec {
    /// Spec from the `[store]` configuration block.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            port: config.port,
            password: config.password.clone(),
        }
    }

    /// Arguments passed to the executable.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--port".to_owned(),
            self.port.to_string(),
            "--loglevel".to_owned(),
            "warning".to_owned(),
        ];
        if let Some(password) = &self.password {
            args.push("--requirepass".to_owned());
            args.push(password.clone());
        }
        args
    }

    /// Full command line with the password masked, for logs and records.
    pub fn display_command(&self) -> Vec<String> {
        let mut command = vec![self.executable.display().to_string()];
        let mut mask_next = false;
        for arg in self.args() {
            if mask_next {
                command.push("***".to_owned());
                mask_next = false;
            } else {
                mask_next = arg == "--requirepass";
                command.push(arg);
            }
        }
        command
    }
}

/// A running (or finished) server process.
pub trait ServerProcess: Send {
    /// Operating-system process id.
    fn pid(&self) -> u32;
    /// Exit code if the process has finished; `-1` when killed by a signal.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
    /// Force-terminate the process.
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts server processes.
pub trait Launcher: Send + Sync {
    /// Spawn a server according to `spec`.
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>>;
}

/// Launches the real executable as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>> {
        if !spec.executable.is_file() {
            return Err(SupervisorError::Executable(spec.executable.clone()));
        }
        let child = Command::new(&spec.executable)
            .args(spec.args())
            .stdin(Stdio::null())
            .spawn()?;
        info!(pid = child.id(), command = ?spec.display_command(), "spawned Redis server");
        Ok(Box::new(ChildProcess(child)))
    }
}

/// [`ServerProcess`] over a `std::process::Child`.
#[derive(Debug)]
pub struct ChildProcess(pub Child);

impl ServerProcess for ChildProcess {
    fn pid(&self) -> u32 {
        self.0.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.0.kill()?;
        self.0.wait().map(|_| ())
    }
}

/// Liveness of a tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Still running.
    Running,
    /// Finished on its own with the given code.
    Exited(i32),
    /// Terminated by [`ProcessTable::terminate_all`].
    Killed,
}

/// Snapshot of a tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreProcessRecord {
    /// Role of the process, e.g. `redis`.
    pub name: String,
    /// Operating-system process id.
    pub pid: u32,
    /// Command line, password masked.
    pub command: Vec<String>,
    /// Liveness when the snapshot was taken.
    pub state: ProcessState,
}

struct TrackedProcess {
    name: String,
    command: Vec<String>,
    state: ProcessState,
    process: Box<dyn ServerProcess>,
}

impl TrackedProcess {
    fn refresh(&mut self) {
        if self.state != ProcessState::Running {
            return;
        }
        match self.process.try_wait() {
            Ok(Some(code)) => self.state = ProcessState::Exited(code),
            Ok(None) => {}
            Err(err) => warn!(name = %self.name, error = %err, "unable to poll process"),
        }
    }

    fn record(&self) -> StoreProcessRecord {
        StoreProcessRecord {
            name: self.name.clone(),
            pid: self.process.pid(),
            command: self.command.clone(),
            state: self.state,
        }
    }
}

/// Processes started by this run, so they can be found and stopped later.
#[derive(Default)]
pub struct ProcessTable {
    entries: Mutex<Vec<TrackedProcess>>,
}

impl ProcessTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `process` under `name`.
    pub fn register(
        &self,
        name: &str,
        spec: &LaunchSpec,
        process: Box<dyn ServerProcess>,
    ) -> StoreProcessRecord {
        let tracked = TrackedProcess {
            name: name.to_owned(),
            command: spec.display_command(),
            state: ProcessState::Running,
            process,
        };
        let record = tracked.record();
        info!(name, pid = record.pid, "registered process");
        self.entries.lock().push(tracked);
        record
    }

    /// Current state of every tracked process.
    pub fn records(&self) -> Vec<StoreProcessRecord> {
        let mut entries = self.entries.lock();
        entries
            .iter_mut()
            .map(|entry| {
                entry.refresh();
                entry.record()
            })
            .collect()
    }

    /// Kill every process that is still running.
    pub fn terminate_all(&self) -> Vec<StoreProcessRecord> {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            entry.refresh();
            if entry.state != ProcessState::Running {
                continue;
            }
            match entry.process.kill() {
                Ok(()) => {
                    entry.state = ProcessState::Killed;
                    info!(name = %entry.name, pid = entry.process.pid(), "terminated process");
                }
                Err(err) => {
                    warn!(name = %entry.name, pid = entry.process.pid(), error = %err, "failed to terminate process")
                }
            }
        }
        entries.iter().map(TrackedProcess::record).collect()
    }
}

impl std::fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTable")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_server_conventions() {
        let spec = LaunchSpec {
            executable: PathBuf::from("/opt/redis-server"),
            port: 6380,
            password: Some("sls2.0".into()),
        };
        assert_eq!(
            spec.args(),
            ["--port", "6380", "--loglevel", "warning", "--requirepass", "sls2.0"]
        );
        assert_eq!(
            spec.display_command(),
            [
                "/opt/redis-server",
                "--port",
                "6380",
                "--loglevel",
                "warning",
                "--requirepass",
                "***"
            ]
        );
    }

    #[test]
    fn missing_executable_is_reported() {
        let spec = LaunchSpec {
            executable: PathBuf::from("/nonexistent/redis-server"),
            port: 6379,
            password: None,
        };
        assert!(matches!(
            SystemLauncher.spawn(&spec),
            Err(SupervisorError::Executable(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn table_terminates_running_children() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let spec = LaunchSpec {
            executable: PathBuf::from("sleep"),
            port: 0,
            password: None,
        };
        let table = ProcessTable::new();
        table.register("sleeper", &spec, Box::new(ChildProcess(child)));
        assert_eq!(table.records()[0].state, ProcessState::Running);

        let records = table.terminate_all();
        assert_eq!(records[0].state, ProcessState::Killed);
    }
}
