//! glibc utmpx login database.
//!
//! Logins and logouts update the live utmp database (`USER_PROCESS` /
//! `DEAD_PROCESS` entries) and are appended to wtmp; failed attempts are
//! appended to btmp. wtmp and btmp are flat arrays of `utmpx` structs.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{AccountingError, AccountingSink, LoginRecord, RecordKind};

/// Default wtmp location.
pub const WTMP_PATH: &str = "/var/log/wtmp";
/// Default btmp location.
pub const BTMP_PATH: &str = "/var/log/btmp";

/// Writes records to the system login database.
#[derive(Debug, Clone)]
pub struct UtmpxSink {
    update_utmp: bool,
    wtmp: Option<PathBuf>,
    btmp: Option<PathBuf>,
}

impl Default for UtmpxSink {
    fn default() -> Self {
        Self {
            update_utmp: true,
            wtmp: Some(PathBuf::from(WTMP_PATH)),
            btmp: Some(PathBuf::from(BTMP_PATH)),
        }
    }
}

impl UtmpxSink {
    /// Creates a sink with explicit targets. `None` skips that file.
    pub fn new(update_utmp: bool, wtmp: Option<PathBuf>, btmp: Option<PathBuf>) -> Self {
        Self {
            update_utmp,
            wtmp,
            btmp,
        }
    }
}

impl AccountingSink for UtmpxSink {
    fn write(&self, kind: RecordKind, record: &LoginRecord) -> Result<(), AccountingError> {
        let entry = build_entry(kind, record);
        match kind {
            RecordKind::Login | RecordKind::Logout => {
                if self.update_utmp {
                    update_utmp(&entry)?;
                }
                if let Some(path) = &self.wtmp {
                    append(path, &entry)?;
                }
            }
            RecordKind::FailedAttempt => {
                if let Some(path) = &self.btmp {
                    append(path, &entry)?;
                }
            }
        }
        Ok(())
    }
}

fn build_entry(kind: RecordKind, record: &LoginRecord) -> libc::utmpx {
    // SAFETY: utmpx is plain old data; all-zero is a valid empty entry.
    let mut entry: libc::utmpx = unsafe { std::mem::zeroed() };

    entry.ut_type = match kind {
        RecordKind::Login | RecordKind::FailedAttempt => libc::USER_PROCESS,
        RecordKind::Logout => libc::DEAD_PROCESS,
    };
    entry.ut_pid = record.pid;
    copy_field(&mut entry.ut_line, &record.line());
    copy_field(&mut entry.ut_id, &record.id());
    copy_field(&mut entry.ut_user, record.username.as_deref().unwrap_or_default());
    copy_field(&mut entry.ut_host, &record.host());

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    entry.ut_tv.tv_sec = now.as_secs() as _;
    entry.ut_tv.tv_usec = now.subsec_micros() as _;

    entry
}

/// Copies `src` into a fixed-size field, truncating. utmp fields are not
/// required to be NUL-terminated when full.
fn copy_field(dst: &mut [libc::c_char], src: &str) {
    for (d, b) in dst.iter_mut().zip(src.bytes()) {
        *d = b as libc::c_char;
    }
}

fn entry_bytes(entry: &libc::utmpx) -> &[u8] {
    // SAFETY: reading the struct's own bytes for its full size.
    unsafe {
        std::slice::from_raw_parts(
            (entry as *const libc::utmpx).cast::<u8>(),
            std::mem::size_of::<libc::utmpx>(),
        )
    }
}

fn append(path: &Path, entry: &libc::utmpx) -> Result<(), AccountingError> {
    let to_error = |source| AccountingError::Append {
        path: path.display().to_string(),
        source,
    };
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(to_error)?;
    file.write_all(entry_bytes(entry)).map_err(to_error)
}

fn update_utmp(entry: &libc::utmpx) -> Result<(), AccountingError> {
    // SAFETY: the utmpx iteration functions are used in the documented
    // setutxent/pututxline/endutxent sequence on a valid entry.
    let written = unsafe {
        libc::setutxent();
        let written = libc::pututxline(entry);
        libc::endutxent();
        written
    };
    if written.is_null() {
        return Err(AccountingError::Database(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LoginRecord {
        LoginRecord {
            pid: 4242,
            username: Some("alice".into()),
            hostname: None,
            display_name: Some(":0".into()),
            display_device: Some("/dev/tty7".into()),
        }
    }

    fn field(src: &[libc::c_char]) -> String {
        src.iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8 as char)
            .collect()
    }

    fn read_entries(path: &Path) -> Vec<libc::utmpx> {
        let bytes = std::fs::read(path).unwrap();
        let size = std::mem::size_of::<libc::utmpx>();
        assert_eq!(bytes.len() % size, 0, "file must hold whole entries");
        bytes
            .chunks(size)
            // SAFETY: each chunk is exactly one utmpx written by `append`.
            .map(|chunk| unsafe { std::ptr::read_unaligned(chunk.as_ptr().cast()) })
            .collect()
    }

    #[test]
    fn test_build_entry_login_fields() {
        let entry = build_entry(RecordKind::Login, &record());
        assert_eq!(entry.ut_type, libc::USER_PROCESS);
        assert_eq!(entry.ut_pid, 4242);
        assert_eq!(field(&entry.ut_user), "alice");
        assert_eq!(field(&entry.ut_line), "tty7");
        assert_eq!(field(&entry.ut_host), ":0");
        assert!(entry.ut_tv.tv_sec > 0);
    }

    #[test]
    fn test_build_entry_logout_is_dead_process() {
        let entry = build_entry(RecordKind::Logout, &record());
        assert_eq!(entry.ut_type, libc::DEAD_PROCESS);
    }

    #[test]
    fn test_copy_field_truncates_long_values() {
        let mut dst = [0 as libc::c_char; 4];
        copy_field(&mut dst, "abcdefgh");
        assert_eq!(dst.map(|c| c as u8), *b"abcd");
    }

    #[test]
    fn test_login_appends_to_wtmp_only() {
        let dir = tempfile::tempdir().unwrap();
        let wtmp = dir.path().join("wtmp");
        let btmp = dir.path().join("btmp");
        let sink = UtmpxSink::new(false, Some(wtmp.clone()), Some(btmp.clone()));

        sink.write(RecordKind::Login, &record()).unwrap();
        sink.write(RecordKind::Logout, &record()).unwrap();

        let entries = read_entries(&wtmp);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].ut_type, libc::USER_PROCESS);
        assert_eq!(entries[1].ut_type, libc::DEAD_PROCESS);
        assert!(!btmp.exists());
    }

    #[test]
    fn test_failed_attempt_appends_to_btmp() {
        let dir = tempfile::tempdir().unwrap();
        let wtmp = dir.path().join("wtmp");
        let btmp = dir.path().join("btmp");
        let sink = UtmpxSink::new(false, Some(wtmp.clone()), Some(btmp.clone()));

        sink.write(RecordKind::FailedAttempt, &record()).unwrap();

        let entries = read_entries(&btmp);
        assert_eq!(entries.len(), 1);
        assert_eq!(field(&entries[0].ut_user), "alice");
        assert!(!wtmp.exists());
    }

    #[test]
    fn test_append_to_unwritable_path_is_error() {
        let sink = UtmpxSink::new(false, Some("/nonexistent/dir/wtmp".into()), None);
        let result = sink.write(RecordKind::Login, &record());
        assert!(matches!(result, Err(AccountingError::Append { .. })));
    }
}
