//! Lookup of the desktop sessions a user can start.
//!
//! The broker only needs two answers: "what does session `name` run?" and
//! "which session should be the default?". [`SessionCatalog`] asks them;
//! [`DesktopCatalog`] answers from `.desktop` files, [`StaticCatalog`]
//! from a fixed table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Session name the Xsession wrapper accepts without a desktop file.
pub const CUSTOM_SESSION: &str = "custom";

/// Default search path for desktop session files.
pub const DEFAULT_SESSION_DIRS: [&str; 4] = [
    "/etc/X11/sessions",
    "/etc/mdm/Sessions",
    "/usr/share/xsessions",
    "/usr/share/mdm/BuiltInSessions",
];

/// One startable session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: String,
    pub command: String,
    /// Run `command` directly instead of through the Xsession wrapper.
    pub bypass_xsession: bool,
}

impl SessionEntry {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            bypass_xsession: false,
        }
    }
}

/// Source of startable sessions.
pub trait SessionCatalog: Send + Sync + 'static {
    /// Resolves a session by name. `None` if unknown, hidden or not
    /// installed.
    fn lookup(&self, name: &str) -> Option<SessionEntry>;

    /// Picks the default session: `preferred` if it resolves, else the
    /// first available name in sorted order.
    fn fallback(&self, preferred: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// StaticCatalog
// ---------------------------------------------------------------------------

/// An in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: BTreeMap<String, SessionEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entry: SessionEntry) -> Self {
        self.entries.insert(entry.name.clone(), entry);
        self
    }
}

impl SessionCatalog for StaticCatalog {
    fn lookup(&self, name: &str) -> Option<SessionEntry> {
        self.entries
            .get(name)
            .cloned()
            .or_else(|| custom_entry(name))
    }

    fn fallback(&self, preferred: &str) -> Option<String> {
        if self.entries.contains_key(preferred) {
            return Some(preferred.to_string());
        }
        self.entries.keys().next().cloned()
    }
}

fn custom_entry(name: &str) -> Option<SessionEntry> {
    (name == CUSTOM_SESSION).then(|| SessionEntry::new(CUSTOM_SESSION, CUSTOM_SESSION))
}

// ---------------------------------------------------------------------------
// DesktopCatalog
// ---------------------------------------------------------------------------

/// Reads `<dir>/<name>.desktop` from a list of directories; the first
/// directory holding the file wins.
#[derive(Debug, Clone)]
pub struct DesktopCatalog {
    dirs: Vec<PathBuf>,
}

impl Default for DesktopCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_DIRS.iter().map(PathBuf::from))
    }
}

impl DesktopCatalog {
    pub fn new(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            dirs: dirs.into_iter().collect(),
        }
    }

    fn load(&self, name: &str) -> Option<SessionEntry> {
        let file_name = format!("{name}.desktop");
        let text = self
            .dirs
            .iter()
            .find_map(|dir| std::fs::read_to_string(dir.join(&file_name)).ok())?;
        let entry = DesktopEntry::parse(&text);

        if entry.boolean("Hidden") {
            tracing::debug!(session = name, "session is hidden");
            return None;
        }
        if let Some(try_exec) = entry.get("TryExec") {
            if which::which(try_exec).is_err() {
                tracing::debug!(session = name, try_exec, "session program not installed");
                return None;
            }
        }
        let Some(exec) = entry.get("Exec") else {
            tracing::debug!(session = name, "session file has no Exec key");
            return None;
        };

        Some(SessionEntry {
            name: name.to_string(),
            command: exec.to_string(),
            bypass_xsession: entry.boolean("X-MDM-BypassXsession"),
        })
    }

    fn available_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .dirs
            .iter()
            .filter_map(|dir| std::fs::read_dir(dir).ok())
            .flatten()
            .filter_map(Result::ok)
            .filter_map(|entry| desktop_stem(&entry.path()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn desktop_stem(path: &Path) -> Option<String> {
    if path.extension()? != "desktop" {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

impl SessionCatalog for DesktopCatalog {
    fn lookup(&self, name: &str) -> Option<SessionEntry> {
        self.load(name).or_else(|| custom_entry(name))
    }

    fn fallback(&self, preferred: &str) -> Option<String> {
        if self.lookup(preferred).is_some() {
            return Some(preferred.to_string());
        }
        self.available_names()
            .into_iter()
            .find(|name| self.load(name).is_some())
    }
}

/// The `[Desktop Entry]` group of a key file. Localised keys are skipped.
struct DesktopEntry {
    keys: BTreeMap<String, String>,
}

impl DesktopEntry {
    fn parse(text: &str) -> Self {
        let mut keys = BTreeMap::new();
        let mut in_group = false;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                in_group = line == "[Desktop Entry]";
                continue;
            }
            if !in_group {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.contains('[') {
                    keys.entry(key.to_string())
                        .or_insert_with(|| value.trim().to_string());
                }
            }
        }
        Self { keys }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    fn boolean(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(format!("{name}.desktop")), body).unwrap();
    }

    #[test]
    fn test_desktop_lookup_reads_exec_and_bypass() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "mate",
            "[Desktop Entry]\nName=MATE\nName[de]=MATE\nExec=mate-session\n",
        );
        write(
            dir.path(),
            "kiosk",
            "[Desktop Entry]\nExec=kiosk-shell\nX-MDM-BypassXsession=true\n",
        );
        let catalog = DesktopCatalog::new([dir.path().to_path_buf()]);

        let mate = catalog.lookup("mate").unwrap();
        assert_eq!(mate.command, "mate-session");
        assert!(!mate.bypass_xsession);
        assert!(catalog.lookup("kiosk").unwrap().bypass_xsession);
    }

    #[test]
    fn test_desktop_lookup_skips_hidden_and_missing_tryexec() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "gone", "[Desktop Entry]\nExec=gone\nHidden=true\n");
        write(
            dir.path(),
            "absent",
            "[Desktop Entry]\nExec=absent\nTryExec=/nonexistent/bin/absent-session\n",
        );
        write(dir.path(), "noexec", "[Desktop Entry]\nName=Nothing\n");
        let catalog = DesktopCatalog::new([dir.path().to_path_buf()]);

        assert!(catalog.lookup("gone").is_none());
        assert!(catalog.lookup("absent").is_none());
        assert!(catalog.lookup("noexec").is_none());
    }

    #[test]
    fn test_desktop_lookup_first_directory_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write(first.path(), "mate", "[Desktop Entry]\nExec=first\n");
        write(second.path(), "mate", "[Desktop Entry]\nExec=second\n");
        let catalog =
            DesktopCatalog::new([first.path().to_path_buf(), second.path().to_path_buf()]);

        assert_eq!(catalog.lookup("mate").unwrap().command, "first");
    }

    #[test]
    fn test_desktop_fallback_prefers_then_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "xfce", "[Desktop Entry]\nExec=xfce4-session\n");
        write(dir.path(), "icewm", "[Desktop Entry]\nExec=icewm-session\n");
        write(dir.path(), "awesome", "[Desktop Entry]\nExec=x\nHidden=true\n");
        let catalog = DesktopCatalog::new([dir.path().to_path_buf()]);

        assert_eq!(catalog.fallback("xfce").as_deref(), Some("xfce"));
        assert_eq!(catalog.fallback("mate").as_deref(), Some("icewm"));
    }

    #[test]
    fn test_custom_always_resolves() {
        let catalog = DesktopCatalog::new(Vec::new());
        assert_eq!(
            catalog.lookup(CUSTOM_SESSION),
            Some(SessionEntry::new("custom", "custom"))
        );
        assert_eq!(catalog.fallback("mate"), None);
    }

    #[test]
    fn test_static_catalog_fallback() {
        let catalog = StaticCatalog::new()
            .with(SessionEntry::new("xfce", "xfce4-session"))
            .with(SessionEntry::new("lxde", "startlxde"));
        assert_eq!(catalog.fallback("mate").as_deref(), Some("lxde"));
        assert_eq!(catalog.fallback("xfce").as_deref(), Some("xfce"));
        assert!(catalog.lookup("custom").is_some());
    }
}
