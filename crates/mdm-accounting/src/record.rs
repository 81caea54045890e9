//! The data written for one accounting event.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which accounting event a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Login,
    Logout,
    FailedAttempt,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Logout => write!(f, "logout"),
            Self::FailedAttempt => write!(f, "failed-attempt"),
        }
    }
}

/// Who logged in where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    /// Pid of the session leader (or of the worker for failed attempts).
    pub pid: i32,
    pub username: Option<String>,
    /// Remote host for XDMCP-style displays; `None` for local ones.
    pub hostname: Option<String>,
    /// X display name, e.g. `:0`.
    pub display_name: Option<String>,
    /// Terminal device, e.g. `/dev/tty7`.
    pub display_device: Option<String>,
}

impl LoginRecord {
    /// The terminal line: the device without `/dev/`, else the display name.
    pub fn line(&self) -> String {
        match (&self.display_device, &self.display_name) {
            (Some(device), _) if !device.is_empty() => {
                device.strip_prefix("/dev/").unwrap_or(device).to_string()
            }
            (_, Some(display)) => display.clone(),
            _ => String::new(),
        }
    }

    /// The host column: `host:display` for remote displays, else the
    /// display name.
    pub fn host(&self) -> String {
        let display = self.display_name.as_deref().unwrap_or_default();
        match self.hostname.as_deref() {
            Some(host) if !host.is_empty() => {
                if display.starts_with(':') {
                    format!("{host}{display}")
                } else if display.is_empty() {
                    host.to_string()
                } else {
                    format!("{host}:{display}")
                }
            }
            _ => display.to_string(),
        }
    }

    /// The short id column: the last four bytes of the line.
    pub fn id(&self) -> String {
        let line = self.line();
        let start = line
            .char_indices()
            .rev()
            .nth(3)
            .map(|(i, _)| i)
            .unwrap_or(0);
        line[start..].to_string()
    }
}
