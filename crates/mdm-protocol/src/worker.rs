//! Messages on the broker ↔ worker channel.
//!
//! The worker is the connecting peer: everything it reports is a
//! [`WorkerCall`] answered with a reply. The broker drives the worker
//! with one-way [`WorkerSignal`]s.

use serde::{Deserialize, Serialize};

use crate::Frame;

/// A frame on the worker channel.
pub type WorkerFrame = Frame<WorkerCall, WorkerSignal>;

/// Worker → broker method calls.
///
/// Every call is acknowledged immediately except `InfoQuery` and
/// `SecretInfoQuery`, whose reply is deferred until the user answers
/// (the reply value is the answer) or the query is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum WorkerCall {
    // -- Phase results --
    SetupComplete,
    SetupFailed { message: String },
    ResetComplete,
    ResetFailed { message: String },
    Authenticated,
    AuthenticationFailed { message: String },
    Authorized,
    AuthorizationFailed { message: String },
    Accredited,
    AccreditationFailed { message: String },
    SessionOpened,
    OpenFailed { message: String },
    SessionStarted { pid: i32 },
    StartFailed { message: String },
    SessionExited { code: i32 },
    SessionDied { signal: i32 },

    // -- Conversation --
    InfoQuery { text: String },
    SecretInfoQuery { text: String },
    Info { text: String },
    Problem { text: String },
    CancelPendingQuery,

    // -- Preferences learned by the worker --
    UsernameChanged { text: String },
    SavedLanguageNameRead { text: String },
    SavedLayoutNameRead { text: String },
    SavedSessionNameRead { text: String },
}

impl WorkerCall {
    /// The method name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetupComplete => "SetupComplete",
            Self::SetupFailed { .. } => "SetupFailed",
            Self::ResetComplete => "ResetComplete",
            Self::ResetFailed { .. } => "ResetFailed",
            Self::Authenticated => "Authenticated",
            Self::AuthenticationFailed { .. } => "AuthenticationFailed",
            Self::Authorized => "Authorized",
            Self::AuthorizationFailed { .. } => "AuthorizationFailed",
            Self::Accredited => "Accredited",
            Self::AccreditationFailed { .. } => "AccreditationFailed",
            Self::SessionOpened => "SessionOpened",
            Self::OpenFailed { .. } => "OpenFailed",
            Self::SessionStarted { .. } => "SessionStarted",
            Self::StartFailed { .. } => "StartFailed",
            Self::SessionExited { .. } => "SessionExited",
            Self::SessionDied { .. } => "SessionDied",
            Self::InfoQuery { .. } => "InfoQuery",
            Self::SecretInfoQuery { .. } => "SecretInfoQuery",
            Self::Info { .. } => "Info",
            Self::Problem { .. } => "Problem",
            Self::CancelPendingQuery => "CancelPendingQuery",
            Self::UsernameChanged { .. } => "UsernameChanged",
            Self::SavedLanguageNameRead { .. } => "SavedLanguageNameRead",
            Self::SavedLayoutNameRead { .. } => "SavedLayoutNameRead",
            Self::SavedSessionNameRead { .. } => "SavedSessionNameRead",
        }
    }

    /// Returns `true` for calls whose reply is deferred.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::InfoQuery { .. } | Self::SecretInfoQuery { .. })
    }
}

/// Broker → worker one-way signals.
///
/// Missing identity fields in `Setup`/`SetupForUser` are sent as empty
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum WorkerSignal {
    Setup {
        service_name: String,
        display_name: String,
        display_device: String,
        display_hostname: String,
        x11_authority_file: String,
    },
    SetupForUser {
        service_name: String,
        display_name: String,
        display_device: String,
        display_hostname: String,
        x11_authority_file: String,
        username: String,
    },
    Authenticate,
    Authorize,
    EstablishCredentials,
    RefreshCredentials,
    OpenSession,
    SetEnvironmentVariable { key: String, value: String },
    SetLanguageName { name: String },
    SetLayoutName { name: String },
    SetSessionName { name: String },
    StartProgram { command: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_call_unit_variant_json_shape() {
        let json = serde_json::to_value(WorkerCall::SetupComplete).unwrap();
        assert_eq!(json, serde_json::json!({ "method": "SetupComplete" }));
    }

    #[test]
    fn test_worker_call_failure_carries_message() {
        let call: WorkerCall = serde_json::from_str(
            r#"{"method":"AuthenticationFailed","message":"bad password"}"#,
        )
        .unwrap();
        assert_eq!(
            call,
            WorkerCall::AuthenticationFailed {
                message: "bad password".into()
            }
        );
    }

    #[test]
    fn test_worker_call_wrong_argument_shape_is_rejected() {
        // pid must be an integer
        let result: Result<WorkerCall, _> =
            serde_json::from_str(r#"{"method":"SessionStarted","pid":"many"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_call_unknown_method_is_rejected() {
        let result: Result<WorkerCall, _> = serde_json::from_str(r#"{"method":"Reboot"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_call_name_matches_wire_tag() {
        let call = WorkerCall::SavedLayoutNameRead { text: "de".into() };
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["method"], call.name());
    }

    #[test]
    fn test_only_queries_are_deferred() {
        assert!(WorkerCall::InfoQuery { text: "login:".into() }.is_query());
        assert!(WorkerCall::SecretInfoQuery { text: "Password:".into() }.is_query());
        assert!(!WorkerCall::Info { text: "hi".into() }.is_query());
        assert!(!WorkerCall::CancelPendingQuery.is_query());
    }

    #[test]
    fn test_setup_for_user_signal_json_shape() {
        let signal = WorkerSignal::SetupForUser {
            service_name: "mdm".into(),
            display_name: ":0".into(),
            display_device: "/dev/tty7".into(),
            display_hostname: "".into(),
            x11_authority_file: "/var/run/mdm/auth".into(),
            username: "alice".into(),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["signal"], "SetupForUser");
        assert_eq!(json["username"], "alice");
        assert_eq!(json["display_hostname"], "");
    }
}
