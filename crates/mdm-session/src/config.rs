//! Session broker settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_SESSION_DIRS;

/// Configuration shared by every session a broker creates.
///
/// All fields have defaults, so a config file only lists what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// The worker executable spawned by `start_conversation`.
    pub worker_program: PathBuf,
    pub worker_args: Vec<String>,

    /// Environment variable through which the worker learns the endpoint.
    pub address_variable: String,

    /// Directory for endpoint sockets. `None` uses the Linux abstract
    /// namespace.
    pub socket_dir: Option<PathBuf>,

    /// The only uid allowed to connect to an endpoint.
    pub trusted_uid: u32,

    /// How long the worker has to connect back.
    pub connect_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping the worker.
    pub stop_timeout_secs: u64,

    /// Wrapper every session program runs through unless its desktop
    /// entry opts out.
    pub xsession_command: String,

    pub session_dirs: Vec<PathBuf>,

    /// Preferred default session when the user has none saved.
    pub fallback_session: String,

    /// `PATH` of the session program.
    pub default_path: String,

    pub default_layout: String,

    /// `None` probes `LC_ALL`, `LC_MESSAGES` and `LANG`, else `C`.
    pub default_language: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            worker_program: PathBuf::from("/usr/libexec/mdm-session-worker"),
            worker_args: Vec::new(),
            address_variable: "MDM_SESSION_DBUS_ADDRESS".to_string(),
            socket_dir: None,
            trusted_uid: 0,
            connect_timeout_secs: 30,
            stop_timeout_secs: 5,
            xsession_command: "/etc/mdm/Xsession".to_string(),
            session_dirs: DEFAULT_SESSION_DIRS.iter().map(PathBuf::from).collect(),
            fallback_session: "mate".to_string(),
            default_path: "/usr/local/bin:/usr/bin:/bin".to_string(),
            default_layout: "us".to_string(),
            default_language: None,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// The system default language, probing the broker's environment.
    pub fn system_language(&self) -> String {
        self.system_language_from(|key| std::env::var(key).ok())
    }

    /// Like [`system_language`](Self::system_language) with an injected
    /// environment lookup.
    pub fn system_language_from(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        if let Some(language) = &self.default_language {
            return language.clone();
        }
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .into_iter()
            .filter_map(|key| lookup(key))
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| "C".to_string())
    }
}
