//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator utility for the foamcore bridge and its store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use foam_common::{init_tracing, FoamConfig, LoggingConfig};
use foam_supervisor::{kill_lingering, ReapReport, ReapTargets};
use tracing::debug;

const STORE_CLI: &str = "redis-cli";

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "foamcore operator utility",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,
    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the Redis CLI shipped next to the server executable")]
    RedisCli {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
        args: Vec<String>,
    },
    #[command(about = "Force-kill lingering foamcore and Redis server processes")]
    Kill,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("foamctl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let Some(command) = cli.command else {
        bail!("no command given; see --help");
    };

    let candidates: Vec<PathBuf> = cli.config.into_iter().collect();
    let config = FoamConfig::load_with_source(&candidates)?.config;
    let logging = LoggingConfig {
        file: false,
        ..config.logging.clone()
    };
    init_tracing("foamctl", &logging, false)?;

    match command {
        Commands::RedisCli { args } => {
            let code = run_store_cli(&config.store.executable, &args)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Kill => {
            let report = kill_lingering(&ReapTargets::new(&config.store.executable))
                .context("unable to scan running processes")?;
            print!("{}", render_report(&report));
        }
    }
    Ok(())
}

/// Path of the store CLI living next to `executable`.
fn store_cli_path(executable: &Path) -> PathBuf {
    executable.with_file_name(STORE_CLI)
}

fn run_store_cli(executable: &Path, args: &[String]) -> Result<i32> {
    let cli = store_cli_path(executable);
    if !cli.is_file() {
        bail!("unable to find {}", cli.display());
    }
    debug!(cli = %cli.display(), args = ?args, "running store CLI");
    let status = Command::new(&cli)
        .args(args)
        .status()
        .with_context(|| format!("failed to run {}", cli.display()))?;
    Ok(status.code().unwrap_or(1))
}

fn render_report(report: &ReapReport) -> String {
    if !report.found_any() {
        return "No lingering foamcore or Redis server processes found.\n".to_owned();
    }
    let mut out = String::new();
    for (process, failure) in &report.signalled {
        match failure {
            None => out.push_str(&format!("Sent SIGKILL to {process}\n")),
            Some(reason) => out.push_str(&format!("Failed to kill {process}: {reason}\n")),
        }
    }
    for process in &report.survivors {
        out.push_str(&format!("Still running: {process}\n"));
    }
    if report.all_killed() {
        out.push_str(&format!(
            "All {} process(es) have been killed.\n",
            report.signalled.len()
        ));
    } else {
        let failed = report
            .signalled
            .iter()
            .filter(|(process, failure)| {
                failure.is_some() || report.survivors.iter().any(|s| s.pid == process.pid)
            })
            .count();
        out.push_str(&format!(
            "{failed} of {} process(es) could not be killed.\n",
            report.signalled.len()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use foam_supervisor::ProcessInfo;

    fn process(pid: u32, argv0: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            cmdline: vec![argv0.to_owned()],
        }
    }

    #[test]
    fn store_cli_sits_next_to_the_server() {
        assert_eq!(
            store_cli_path(Path::new("thirdparty/bin/redis-server")),
            PathBuf::from("thirdparty/bin/redis-cli")
        );
    }

    #[test]
    fn redis_cli_keeps_hyphenated_arguments() {
        let cli = Cli::parse_from(["foamctl", "redis-cli", "-p", "6379", "ping"]);
        match cli.command {
            Some(Commands::RedisCli { args }) => assert_eq!(args, ["-p", "6379", "ping"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn report_lists_failures_and_summary() {
        let report = ReapReport {
            signalled: vec![
                (process(10, "foamcore"), None),
                (process(11, "redis-server"), Some("Operation not permitted".into())),
            ],
            survivors: vec![process(11, "redis-server")],
        };
        let text = render_report(&report);
        assert!(text.contains("Sent SIGKILL to pid=10 (foamcore)"));
        assert!(text.contains("Failed to kill pid=11 (redis-server): Operation not permitted"));
        assert!(text.ends_with("1 of 2 process(es) could not be killed.\n"));
    }

    #[test]
    fn empty_report() {
        assert!(render_report(&ReapReport::default()).starts_with("No lingering"));
    }
}
