//! Identity of the display a session logs into.

use mdm_accounting::LoginRecord;

/// Caller-supplied, fixed for the life of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayInfo {
    /// Opaque id of the session object.
    pub session_id: String,
    /// Opaque id of the display the session belongs to.
    pub display_id: String,
    /// X display name, e.g. `:0`.
    pub display_name: Option<String>,
    /// Remote host for XDMCP displays.
    pub hostname: Option<String>,
    /// Terminal device, e.g. `/dev/tty7`.
    pub device: Option<String>,
    /// Authority file the greeter used on this display.
    pub x11_authority_file: Option<String>,
    pub is_local: bool,
}

impl DisplayInfo {
    /// A local display with the given X display name.
    pub fn local(session_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            display_name: Some(display_name.into()),
            is_local: true,
            ..Default::default()
        }
    }

    pub(crate) fn login_record(&self, pid: i32, username: Option<&str>) -> LoginRecord {
        LoginRecord {
            pid,
            username: username.map(str::to_string),
            hostname: self.hostname.clone(),
            display_name: self.display_name.clone(),
            display_device: self.device.clone(),
        }
    }
}
