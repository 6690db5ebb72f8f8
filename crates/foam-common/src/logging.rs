//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing subscriber setup with console and rolling file output."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{info, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "FOAMCORE_LOG";

static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Console log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// One JSON object per event.
    StructuredJson,
    /// Human-readable lines with targets.
    #[default]
    Pretty,
}

/// Install the global subscriber. Later calls leave the first one in place.
///
/// * `FOAMCORE_LOG` overrides the filter (e.g. `info`, `debug,foam_store=trace`).
///   When unset `RUST_LOG` is honoured, finally defaulting to `info`, or
///   `debug` when `debug_mode` is requested on the command line.
/// * A daily rolling JSON file is added next to the console output when
///   `config.file` is enabled.
pub fn init_tracing(service_name: &str, config: &LoggingConfig, debug_mode: bool) -> Result<()> {
    let file = file_layer(service_name, config)?;
    tracing_subscriber::registry()
        .with(env_filter(debug_mode))
        .with(console_layer(config.format))
        .with(file)
        .try_init()
        .ok();

    info!(service = %service_name, format = ?config.format, file = config.file, debug_mode, "tracing initialised");
    Ok(())
}

fn env_filter(debug: bool) -> EnvFilter {
    let fallback = if debug { "debug" } else { "info" };
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive '{directive}' ({err}); using {fallback}");
            EnvFilter::new(fallback)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
    }
}

fn console_layer<S>(format: LogFormat) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(guard);
    let layer = fmt::layer()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.with_target(true).boxed(),
    }
}

fn file_layer<S>(service_name: &str, config: &LoggingConfig) -> Result<Option<BoxedLayer<S>>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    if !config.file {
        return Ok(None);
    }
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let (writer, guard) = tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let _ = FILE_GUARD.set(guard);
    Ok(Some(
        fmt::layer()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(writer)
            .boxed(),
    ))
}
