//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Discovery and SIGKILL of lingering bridge and store processes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Clean-up of bridge and store processes left behind by a crashed run.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

const PROC_ROOT: &str = "/proc";
const REAP_TIMEOUT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A process seen in the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Operating-system process id.
    pub pid: u32,
    /// Command line arguments.
    pub cmdline: Vec<String>,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} ({})", self.pid, self.cmdline.join(" "))
    }
}

/// Signatures of the processes to reap.
#[derive(Debug, Clone)]
pub struct ReapTargets {
    /// Store server executable; matched as a substring of `argv[0]`.
    pub store_executable: PathBuf,
    /// File names of bridge binaries; matched against `argv[0]`.
    pub bridge_names: Vec<String>,
}

impl ReapTargets {
    /// Targets for the given store executable and the `foamcore` bridge.
    pub fn new(store_executable: impl Into<PathBuf>) -> Self {
        Self {
            store_executable: store_executable.into(),
            bridge_names: vec!["foamcore".to_owned()],
        }
    }

    /// Split `processes` into `(bridges, stores)`, skipping `own_pid`.
    pub fn classify(
        &self,
        processes: &[ProcessInfo],
        own_pid: u32,
    ) -> (Vec<ProcessInfo>, Vec<ProcessInfo>) {
        let executable = self.store_executable.to_string_lossy();
        let mut bridges = Vec::new();
        let mut stores = Vec::new();
        for process in processes.iter().filter(|p| p.pid != own_pid) {
            let Some(argv0) = process.cmdline.first() else {
                continue;
            };
            if argv0.contains(executable.as_ref()) {
                stores.push(process.clone());
            } else if Path::new(argv0)
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.bridge_names.iter().any(|bridge| bridge == name))
            {
                bridges.push(process.clone());
            }
        }
        (bridges, stores)
    }
}

/// Outcome of [`kill_lingering`].
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Processes SIGKILL was sent to, with the failure if sending failed.
    pub signalled: Vec<(ProcessInfo, Option<String>)>,
    /// Processes still alive after the wait.
    pub survivors: Vec<ProcessInfo>,
}

impl ReapReport {
    /// Whether anything matched.
    pub fn found_any(&self) -> bool {
        !self.signalled.is_empty()
    }

    /// Whether every matched process is gone.
    pub fn all_killed(&self) -> bool {
        self.survivors.is_empty()
            && self.signalled.iter().all(|(_, failure)| failure.is_none())
    }
}

/// Every process readable under `/proc`.
pub fn list_processes() -> io::Result<Vec<ProcessInfo>> {
    let mut processes = Vec::new();
    for entry in fs::read_dir(PROC_ROOT)? {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes may exit while scanning.
        let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline: Vec<String> = raw
            .split(|byte| *byte == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        if !cmdline.is_empty() {
            processes.push(ProcessInfo { pid, cmdline });
        }
    }
    Ok(processes)
}

/// Whether `pid` still exists and is not a zombie.
pub fn is_process_running(pid: u32) -> bool {
    match fs::read_to_string(Path::new(PROC_ROOT).join(pid.to_string()).join("stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

fn send_sigkill(pid: u32) -> Option<String> {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return Some(format!("pid {pid} is out of range"));
    };
    // SAFETY: kill(2) takes no pointers.
    if unsafe { libc::kill(raw, libc::SIGKILL) } == 0 {
        None
    } else {
        Some(io::Error::last_os_error().to_string())
    }
}

/// Kill lingering bridges first, then store servers, wait briefly and
/// report what survived.
pub fn kill_lingering(targets: &ReapTargets) -> io::Result<ReapReport> {
    let processes = list_processes()?;
    let (bridges, stores) = targets.classify(&processes, std::process::id());

    let mut report = ReapReport::default();
    for process in bridges.into_iter().chain(stores) {
        let failure = send_sigkill(process.pid);
        debug!(pid = process.pid, failure = ?failure, "sent SIGKILL");
        report.signalled.push((process, failure));
    }

    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        report.survivors = report
            .signalled
            .iter()
            .map(|(process, _)| process)
            .filter(|process| is_process_running(process.pid))
            .cloned()
            .collect();
        if report.survivors.is_empty() || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(report)
}
