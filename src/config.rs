//! Host configuration
//!
//! A host picks a mode and gets back a `Dbms`:
//!   - `standalone`: load `path` into an in-process service
//!   - `daemon`: same, and the host also serves it on `addr`
//!   - `client`: connect to a daemon at `addr`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::{Dbms, LocalDbms, RemoteDbms};
use crate::error::{JqlError, Result};
use crate::osm::Layout;

/// Largest frame either side of the wire accepts
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 50_000_000;
pub const DEFAULT_ADDR: &str = "localhost:9999";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Daemon,
    Client,
    #[default]
    Standalone,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Daemon => "daemon",
            Mode::Client => "client",
            Mode::Standalone => "standalone",
        })
    }
}

impl FromStr for Mode {
    type Err = JqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daemon" => Ok(Mode::Daemon),
            "client" => Ok(Mode::Client),
            "standalone" => Ok(Mode::Standalone),
            other => Err(JqlError::Config(format!("unknown mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub path: Option<PathBuf>,
    pub addr: String,
    pub max_payload_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::default(),
            path: None,
            addr: DEFAULT_ADDR.to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let has_path = self.path.as_ref().is_some_and(|p| !p.as_os_str().is_empty());
        match self.mode {
            Mode::Daemon | Mode::Standalone if !has_path => {
                return Err(JqlError::Config(format!("path must be provided for {} mode", self.mode)));
            }
            Mode::Daemon | Mode::Client if self.addr.is_empty() => {
                return Err(JqlError::Config(format!("address must be provided for {} mode", self.mode)));
            }
            Mode::Client if has_path => {
                return Err(JqlError::Config("path cannot be provided for client mode".to_string()));
            }
            _ => {}
        }
        if let Some(path) = self.path.as_deref().filter(|_| has_path) {
            Layout::of(path)?;
        }
        if self.max_payload_size == 0 {
            return Err(JqlError::Config("max payload size must be positive".to_string()));
        }
        Ok(())
    }

    /// Validate, then build the service this mode calls for
    pub async fn open(&self) -> Result<Arc<dyn Dbms>> {
        self.validate()?;
        match (self.mode, self.path.as_deref()) {
            (Mode::Daemon | Mode::Standalone, Some(path)) => Ok(Arc::new(LocalDbms::open(path)?)),
            (Mode::Client, _) => Ok(Arc::new(RemoteDbms::connect(&self.addr, self.max_payload_size).await?)),
            (mode, None) => Err(JqlError::Config(format!("path must be provided for {mode} mode"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: Mode, path: Option<&str>, addr: &str) -> Config {
        Config {
            mode,
            path: path.map(PathBuf::from),
            addr: addr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_mode_rules() {
        assert!(config(Mode::Standalone, Some("db.json"), "").validate().is_ok());
        assert!(config(Mode::Standalone, None, DEFAULT_ADDR).validate().is_err());
        assert!(config(Mode::Daemon, Some("db.jql"), DEFAULT_ADDR).validate().is_ok());
        assert!(config(Mode::Daemon, Some("db.json"), "").validate().is_err());
        assert!(config(Mode::Daemon, None, DEFAULT_ADDR).validate().is_err());
        assert!(config(Mode::Client, None, DEFAULT_ADDR).validate().is_ok());
        assert!(config(Mode::Client, Some("db.json"), DEFAULT_ADDR).validate().is_err());
        assert!(config(Mode::Client, None, "").validate().is_err());
    }

    #[test]
    fn test_path_suffix_checked() {
        let err = config(Mode::Standalone, Some("db.yaml"), "").validate().unwrap_err();
        assert!(matches!(err, JqlError::Config(_)));
    }

    #[test]
    fn test_mode_parse_and_defaults() {
        assert_eq!("daemon".parse::<Mode>().unwrap(), Mode::Daemon);
        assert!("server".parse::<Mode>().is_err());
        let parsed: Config = serde_json::from_str(r#"{"mode": "client"}"#).unwrap();
        assert_eq!(parsed.mode, Mode::Client);
        assert_eq!(parsed.addr, DEFAULT_ADDR);
        assert_eq!(parsed.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
    }

    #[tokio::test]
    async fn test_open_standalone_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let cfg = Config {
            path: Some(path.clone()),
            ..Default::default()
        };
        let err = cfg.open().await.err().unwrap();
        assert!(matches!(err, JqlError::Config(_)));
        assert!(err.to_string().contains("db.json"), "{err}");

        std::fs::write(&path, r#"{"_schemata": {}}"#).unwrap();
        let dbms = cfg.open().await.unwrap();
        assert!(dbms.address().is_none());
        let tables = dbms
            .list_tables(&tokio_util::sync::CancellationToken::new())
            .await
            .unwrap();
        assert!(tables.is_empty());
    }
}
