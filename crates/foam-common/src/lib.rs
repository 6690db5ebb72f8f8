//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Crate root re-exporting configuration, logging and shutdown helpers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the foamcore workspace.
//! This crate exposes configuration loading, tracing setup and the
//! cooperative shutdown flag consumed by the supervisor and the bridge.

pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::{
    DeserializerKind, FoamConfig, LoadedFoamConfig, LoggingConfig, ResolverConfig, SocketMode,
    StoreConfig, TransportConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use shutdown::ShutdownSignal;
