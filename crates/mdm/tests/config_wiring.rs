//! Integration tests: configuration files flowing into a session.

use std::io::Write;

use mdm::cli::LoginArgs;
use mdm::prelude::*;
use tempfile::NamedTempFile;

fn config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_reads_file_and_applies_args() {
    let file = config_file(r#"{ "logging": { "level": "debug" }, "session": { "default_layout": "de" } }"#);
    let args = LoginArgs {
        config: Some(file.path().to_path_buf()),
        log_level: Some("trace".into()),
        ..LoginArgs::default()
    };

    let config = Config::load(&args).unwrap();

    assert_eq!(config.session.default_layout, "de");
    assert_eq!(config.logging.level, "trace");
}

#[tokio::test]
async fn test_configured_worker_failure_surfaces_as_mdm_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = config_file(&format!(
        r#"{{ "session": {{ "worker_program": "/nonexistent/worker", "socket_dir": "{}" }} }}"#,
        dir.path().display()
    ));
    let config = Config::from_file(file.path()).unwrap();

    let (session, mut events) = DirectSession::builder(DisplayInfo::local("1", ":0"))
        .config(config.session.clone())
        .accounting(config.accounting.sink())
        .spawn();

    let result: Result<(), MdmError> = session.start_conversation().await.map_err(Into::into);

    assert!(matches!(
        result,
        Err(MdmError::Session(SessionError::WorkerUnavailable(_)))
    ));
    assert!(matches!(
        events.recv().await,
        Some(SessionEvent::SetupFailed(_))
    ));
}
