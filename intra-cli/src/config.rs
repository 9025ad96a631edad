//! Persistent configuration for the intra client.
//!
//! Config file lives at `~/.config/intra/client.toml`.
//! The message database defaults to `~/.local/share/intra/messages.db`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

/// User configuration (persisted in client.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Chat server address.
    pub host: Option<String>,
    pub port: Option<u16>,
    /// User name to connect as.
    pub identity: Option<String>,
    /// Local message database.
    pub db: Option<PathBuf>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intra")
}

fn config_path() -> PathBuf {
    config_dir().join("client.toml")
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intra")
        .join("messages.db")
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn save(&self) {
        self.save_to(&config_path());
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => return c,
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Bad config file"),
                },
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Can't read config"),
            }
        }
        Self::default()
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match toml::to_string_pretty(self) {
            Ok(s) => {
                if let Err(e) = std::fs::write(path, s) {
                    tracing::warn!(path = %path.display(), error = %e, "Can't save config");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Can't serialize config"),
        }
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub host: String,
    pub port: u16,
    pub identity: String,
    pub db: PathBuf,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Self {
        let host = cli
            .host
            .clone()
            .or_else(|| config.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(config.port).unwrap_or(DEFAULT_PORT);
        let identity = cli
            .identity
            .clone()
            .or_else(|| config.identity.clone())
            .unwrap_or_else(|| whoami::fallible::username().unwrap_or_else(|_| "guest".to_string()));
        let db = cli
            .db
            .clone()
            .or_else(|| config.db.clone())
            .unwrap_or_else(default_db_path);
        Self {
            host,
            port,
            identity,
            db,
        }
    }

    /// Config to write back so the next run starts where this one left off.
    pub fn to_config(&self) -> Config {
        Config {
            host: Some(self.host.clone()),
            port: Some(self.port),
            identity: Some(self.identity.clone()),
            db: Some(self.db.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cli;
    use clap::Parser;

    #[test]
    fn cli_overrides_file() {
        let cli = Cli::parse_from(["intra", "--host", "10.0.0.2", "--identity", "bob"]);
        let config = Config {
            host: Some("192.168.1.5".into()),
            port: Some(9000),
            identity: Some("alice".into()),
            db: Some("/tmp/chat.db".into()),
        };
        let r = Resolved::merge(&cli, &config);
        assert_eq!(r.host, "10.0.0.2");
        assert_eq!(r.port, 9000);
        assert_eq!(r.identity, "bob");
        assert_eq!(r.db, PathBuf::from("/tmp/chat.db"));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cli = Cli::parse_from(["intra", "--identity", "bob"]);
        let r = Resolved::merge(&cli, &Config::default());
        assert_eq!(r.host, DEFAULT_HOST);
        assert_eq!(r.port, DEFAULT_PORT);
        assert!(r.db.ends_with("intra/messages.db"));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.toml");
        let config = Config {
            host: Some("192.168.1.10".into()),
            port: Some(8000),
            identity: Some("bob".into()),
            db: None,
        };
        config.save_to(&path);
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn bad_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}
