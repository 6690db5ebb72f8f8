//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Connection parameters, local-host validation and store urls."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use foam_common::config::{StoreConfig, LOCAL_HOSTS};
use url::Url;

use crate::{Result, StoreError};

/// Everything needed to open a session to the store.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Hostname or IP address of the store.
    pub host: String,
    /// TCP port of the store.
    pub port: u16,
    /// Password required by the store (`requirepass`).
    pub password: Option<String>,
    /// Socket-file path; present only to be rejected explicitly.
    pub unix_socket: Option<PathBuf>,
    /// Connect, read and write timeout applied to every session.
    pub timeout: Duration,
}

impl ConnectionParams {
    /// Parameters for `host:port` without a password.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            unix_socket: None,
            timeout: Duration::from_secs(2),
        }
    }

    /// Attach a password.
    pub fn with_password(mut self, password: Option<impl Into<String>>) -> Self {
        self.password = password.map(Into::into);
        self
    }

    /// Override the session timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build parameters from the `[store]` configuration block.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
            unix_socket: config.unix_socket.clone(),
            timeout: config.socket_timeout,
        }
    }

    /// Reject socket-file connections and non-local hosts.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.unix_socket {
            return Err(StoreError::Unsupported(format!(
                "unix domain socket connection ({}) is not supported",
                path.display()
            )));
        }
        if !LOCAL_HOSTS.contains(&self.host.as_str()) {
            return Err(StoreError::Unsupported(format!(
                "connecting to remote store '{}' is not supported",
                self.host
            )));
        }
        Ok(())
    }

    /// `redis://` URL including the percent-encoded password.
    pub fn url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("redis://{}:{}/", self.host, self.port))?;
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|_| {
                StoreError::Unsupported(format!("cannot encode password for {}", self))
            })?;
        }
        Ok(url)
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("unix_socket", &self.unix_socket)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_password() {
        let params = ConnectionParams::new("127.0.0.1", 6379).with_password(Some("sls2.0"));
        let url = params.url().unwrap();
        assert_eq!(url.scheme(), "redis");
        assert_eq!(url.password(), Some("sls2.0"));
        assert_eq!(url.port(), Some(6379));
    }

    #[test]
    fn debug_output_redacts_password() {
        let params = ConnectionParams::new("localhost", 6379).with_password(Some("secret"));
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("secret"));
        assert_eq!(params.to_string(), "localhost:6379");
    }

    #[test]
    fn rejects_unsupported_targets() {
        let remote = ConnectionParams::new("db.example.org", 6379);
        assert!(matches!(remote.validate(), Err(StoreError::Unsupported(_))));

        let mut socket = ConnectionParams::new("localhost", 6379);
        socket.unix_socket = Some(PathBuf::from("/tmp/redis.sock"));
        assert!(matches!(socket.validate(), Err(StoreError::Unsupported(_))));

        assert!(ConnectionParams::new("localhost", 6379).validate().is_ok());
    }
}
