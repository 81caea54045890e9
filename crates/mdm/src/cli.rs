//! Command-line interface for `mdm-login`.

use std::ffi::OsString;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginArgs {
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Authentication service name.
    pub service: String,
    /// User to log in; asked for by the worker when unset.
    pub user: Option<String>,
    /// X display name.
    pub display: String,
    /// Log level (overrides config).
    pub log_level: Option<String>,
    pub help: bool,
}

impl Default for LoginArgs {
    fn default() -> Self {
        Self {
            config: None,
            service: "mdm".to_string(),
            user: None,
            display: ":0".to_string(),
            log_level: None,
            help: false,
        }
    }
}

/// Argument parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error(transparent)]
    Lexopt(#[from] lexopt::Error),

    #[error("unexpected argument: '{0}'")]
    UnexpectedArgument(String),
}

/// Parses the process arguments.
pub fn parse_args() -> Result<LoginArgs, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parses arguments from an iterator whose first item is the program name.
pub fn parse_args_from<I>(args: I) -> Result<LoginArgs, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = LoginArgs::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => result.help = true,
            Short('c') | Long("config") => result.config = Some(parser.value()?.parse()?),
            Short('s') | Long("service") => result.service = parser.value()?.parse()?,
            Short('u') | Long("user") => result.user = Some(parser.value()?.parse()?),
            Short('d') | Long("display") => result.display = parser.value()?.parse()?,
            Short('l') | Long("log-level") => result.log_level = Some(parser.value()?.parse()?),
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Prints usage.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"mdm-login {version}
Runs one login conversation on the text console

USAGE:
    mdm-login [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file (JSON)
    -s, --service <NAME>    Authentication service [default: mdm]
    -u, --user <USER>       User to log in
    -d, --display <NAME>    X display name [default: :0]
    -l, --log-level <LVL>   Log level (error, warn, info, debug, trace)
    -h, --help              Print help

ENVIRONMENT VARIABLES:
    MDM_WORKER_PROGRAM      Session worker executable
    MDM_SOCKET_DIR          Directory for endpoint sockets
    MDM_TRUSTED_UID         Uid allowed to connect to the endpoint
    MDM_CONNECT_TIMEOUT     Seconds the worker has to connect
    MDM_XSESSION            Session wrapper script
    MDM_FALLBACK_SESSION    Session used when none is saved
    MDM_ACCOUNTING          Write utmp/wtmp/btmp records (true/false)
    MDM_LOG_LEVEL           Log level
    RUST_LOG                Full tracing filter, overrides the log level
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("mdm-login")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert_eq!(result, LoginArgs::default());
        assert_eq!(result.service, "mdm");
        assert_eq!(result.display, ":0");
    }

    #[test]
    fn test_all_options() {
        let result = parse_args_from(args(&[
            "-c",
            "/etc/mdm/mdm.json",
            "--service",
            "mdm-autologin",
            "-u",
            "alice",
            "--display",
            ":1",
            "-l",
            "debug",
        ]))
        .unwrap();

        assert_eq!(result.config, Some(PathBuf::from("/etc/mdm/mdm.json")));
        assert_eq!(result.service, "mdm-autologin");
        assert_eq!(result.user.as_deref(), Some("alice"));
        assert_eq!(result.display, ":1");
        assert_eq!(result.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_help_flag() {
        assert!(parse_args_from(args(&["-h"])).unwrap().help);
        assert!(parse_args_from(args(&["--help"])).unwrap().help);
    }

    #[test]
    fn test_positional_is_rejected() {
        let err = parse_args_from(args(&["alice"])).unwrap_err();
        assert!(matches!(err, ArgsError::UnexpectedArgument(ref a) if a == "alice"));
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        assert!(parse_args_from(args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn test_missing_value_is_rejected() {
        assert!(parse_args_from(args(&["--user"])).is_err());
    }
}
