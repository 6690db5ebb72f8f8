//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Host CPU and memory probing plus operator identity."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::fs;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
/// Used when `/proc/meminfo` is unavailable.
const FALLBACK_TOTAL_MEMORY: u64 = 4 * 1024 * 1024 * 1024;

/// Host capacity, used for the memory cap and the startup report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostResources {
    /// Logical CPUs available to the process.
    pub cpu_count: usize,
    /// Total physical memory in bytes.
    pub total_memory: u64,
}

impl HostResources {
    /// Inspect the running host.
    pub fn probe() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let total_memory = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|text| parse_meminfo_total(&text))
            .unwrap_or(FALLBACK_TOTAL_MEMORY);
        Self {
            cpu_count,
            total_memory,
        }
    }
}

impl fmt::Display for HostResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CPU count: {}, total memory: {:.1} GB",
            self.cpu_count,
            self.total_memory as f64 / GIB
        )
    }
}

/// `MemTotal` of a `/proc/meminfo` document, in bytes.
fn parse_meminfo_total(text: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib * 1024)
}

/// `(user, host)` of whoever runs this process, for notices sent to other
/// store owners.
pub fn operator_identity() -> (String, String) {
    let user = ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| "unknown".to_owned());
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned());
    (user, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mem_total() {
        let text = "MemTotal:       16318480 kB\nMemFree:         1024 kB\n";
        assert_eq!(parse_meminfo_total(text), Some(16318480 * 1024));
        assert_eq!(parse_meminfo_total("MemFree: 1 kB"), None);
    }

    #[test]
    fn report_is_human_readable() {
        let resources = HostResources {
            cpu_count: 8,
            total_memory: 16 * 1024 * 1024 * 1024,
        };
        assert_eq!(resources.to_string(), "CPU count: 8, total memory: 16.0 GB");
        assert!(HostResources::probe().cpu_count >= 1);
    }
}
