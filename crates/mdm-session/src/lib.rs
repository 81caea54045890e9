//! Login sessions for the mdm display manager.
//!
//! A session carries one login attempt from "who are you?" to a running
//! desktop. The caller drives it through the [`Session`] contract and
//! hears back on a [`SessionEvents`] channel:
//!
//! ```text
//! start_conversation ─► setup ─► authenticate ─► authorize ─► accredit
//!                                                                │
//!         SessionExited / SessionDied ◄─ start_session ◄─ open_session
//! ```
//!
//! Two implementations exist:
//!
//! - [`DirectSession`] spawns a privileged worker process, serves it over a
//!   private endpoint and turns its calls into events.
//! - [`RelaySession`] forwards the same contract across one more endpoint
//!   to a peer, which usually runs [`run_bridge`] against a real session.
//!
//! # How it fits in the stack
//!
//! ```text
//! Daemon / greeter (above)   ← drives a Session, reacts to events
//!     ↕
//! Session Layer (this crate) ← conversation state, preferences, environment
//!     ↕
//! Worker / Protocol / Transport (below)
//! ```

mod bridge;
mod catalog;
mod channel;
mod config;
mod contract;
mod conversation;
mod direct;
mod display;
mod environment;
mod error;
mod peer;
mod preferences;
mod query;
mod relay;
mod state;

pub use bridge::run_bridge;
pub use catalog::{
    CUSTOM_SESSION, DEFAULT_SESSION_DIRS, DesktopCatalog, SessionCatalog, SessionEntry,
    StaticCatalog,
};
pub use config::SessionConfig;
pub use contract::{PREVIOUS, Selector, Session, SessionEvent, SessionEvents};
pub use direct::{DirectSession, DirectSessionBuilder, SessionSnapshot};
pub use display::DisplayInfo;
pub use error::{PeerError, SessionError};
pub use peer::{Peer, RelayPeer, WorkerPeer};
pub use query::QueryKind;
pub use relay::RelaySession;
pub use state::{CredentialMode, Phase, SessionState};
