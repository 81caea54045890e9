//! Configuration for the mdm binaries.
//!
//! Loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. `MDM_*` environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mdm_accounting::{AccountingSink, LogSink};
use mdm_session::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::cli::LoginArgs;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub logging: LoggingSection,
    pub accounting: AccountingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Where login records go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountingSection {
    /// Write to the system login database. When off, records are only
    /// logged.
    pub enabled: bool,
    pub update_utmp: bool,
    pub wtmp: Option<PathBuf>,
    pub btmp: Option<PathBuf>,
}

impl Default for AccountingSection {
    fn default() -> Self {
        Self {
            enabled: false,
            update_utmp: true,
            wtmp: Some(PathBuf::from("/var/log/wtmp")),
            btmp: Some(PathBuf::from("/var/log/btmp")),
        }
    }
}

impl AccountingSection {
    /// The sink this section describes.
    pub fn sink(&self) -> Arc<dyn AccountingSink> {
        self.system_sink().unwrap_or_else(|| Arc::new(LogSink))
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn system_sink(&self) -> Option<Arc<dyn AccountingSink>> {
        self.enabled.then(|| {
            Arc::new(mdm_accounting::UtmpxSink::new(
                self.update_utmp,
                self.wtmp.clone(),
                self.btmp.clone(),
            )) as Arc<dyn AccountingSink>
        })
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn system_sink(&self) -> Option<Arc<dyn AccountingSink>> {
        if self.enabled {
            tracing::warn!("login database not supported on this platform, logging records only");
        }
        None
    }
}

impl Config {
    /// Loads configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Applies `MDM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an injected environment lookup.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let session = &mut self.session;
        if let Some(program) = lookup("MDM_WORKER_PROGRAM") {
            session.worker_program = PathBuf::from(program);
        }
        if let Some(dir) = lookup("MDM_SOCKET_DIR") {
            session.socket_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some(uid) = lookup("MDM_TRUSTED_UID") {
            session.trusted_uid = parse("MDM_TRUSTED_UID", uid)?;
        }
        if let Some(secs) = lookup("MDM_CONNECT_TIMEOUT") {
            session.connect_timeout_secs = parse("MDM_CONNECT_TIMEOUT", secs)?;
        }
        if let Some(command) = lookup("MDM_XSESSION") {
            session.xsession_command = command;
        }
        if let Some(name) = lookup("MDM_FALLBACK_SESSION") {
            session.fallback_session = name;
        }

        if let Some(enabled) = lookup("MDM_ACCOUNTING") {
            self.accounting.enabled = match enabled.as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "MDM_ACCOUNTING",
                        value: enabled,
                    });
                }
            };
        }

        if let Some(level) = lookup("MDM_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Applies command-line overrides.
    pub fn apply_args(&mut self, args: &LoginArgs) {
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Loads configuration with the full priority chain.
    pub fn load(args: &LoginArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.apply_args(args);
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.accounting.enabled);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_config_partial_json() {
        let json = r#"{
            "session": { "trusted_uid": 1000, "fallback_session": "xfce" },
            "logging": { "level": "debug" }
        }"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.session.trusted_uid, 1000);
        assert_eq!(config.session.fallback_session, "xfce");
        assert_eq!(config.session.connect_timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::from_file(Path::new("/nonexistent/mdm.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("MDM_TRUSTED_UID", "1000"),
                ("MDM_SOCKET_DIR", "/run/mdm"),
                ("MDM_ACCOUNTING", "true"),
                ("MDM_LOG_LEVEL", "trace"),
            ]))
            .unwrap();

        assert_eq!(config.session.trusted_uid, 1000);
        assert_eq!(config.session.socket_dir, Some(PathBuf::from("/run/mdm")));
        assert!(config.accounting.enabled);
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_apply_env_rejects_bad_number() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(env(&[("MDM_CONNECT_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MDM_CONNECT_TIMEOUT",
                ..
            }
        ));
    }

    #[test]
    fn test_args_override_log_level() {
        let mut config = Config::default();
        config.apply_args(&LoginArgs {
            log_level: Some("warn".into()),
            ..LoginArgs::default()
        });
        assert_eq!(config.logging.level, "warn");
    }
}
