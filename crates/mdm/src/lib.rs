//! # mdm
//!
//! Login session broker for the mdm display manager.
//!
//! This meta crate ties the layers together and adds what a program
//! running sessions needs around them: one error type, configuration
//! loading and logging setup.
//!
//! ```text
//! Session    (mdm-session)     ← Session contract, DirectSession, RelaySession
//! Worker     (mdm-worker)      ← supervised worker process
//! Accounting (mdm-accounting)  ← utmp / wtmp / btmp records
//! Protocol   (mdm-protocol)    ← worker and relay message sets
//! Transport  (mdm-transport)   ← private per-session endpoint
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdm::prelude::*;
//!
//! # async fn run() -> Result<(), MdmError> {
//! let config = Config::default();
//! let (session, mut events) = DirectSession::builder(DisplayInfo::local("1", ":0"))
//!     .config(config.session.clone())
//!     .accounting(config.accounting.sink())
//!     .spawn();
//!
//! session.start_conversation().await?;
//! while let Some(event) = events.recv().await {
//!     if event == SessionEvent::ConversationStarted {
//!         session.setup("mdm").await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
mod error;
pub mod logging;

pub use error::{ConfigError, MdmError};

/// The types most programs need.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::{ConfigError, MdmError};
    pub use mdm_accounting::{AccountingSink, LogSink, LoginRecord, RecordKind};
    pub use mdm_session::{
        CredentialMode, DirectSession, DisplayInfo, PREVIOUS, RelaySession, Selector, Session,
        SessionConfig, SessionError, SessionEvent, SessionEvents, SessionState, run_bridge,
    };
}
