//! Supervision of the session worker process.
//!
//! A [`WorkerJob`] spawns one child with the broker's endpoint address in
//! its environment and reports how it ends:
//!
//! ```text
//! WorkerJob::start() ──► JobEvent::Started { pid }
//!                    ──► JobEvent::Exited { code } | JobEvent::Died { signal }
//! WorkerJob::stop()  ──► SIGTERM, bounded wait, SIGKILL (no event)
//! ```
//!
//! The job knows nothing about the protocol spoken over that endpoint.

mod error;
mod job;

pub use error::WorkerError;
pub use job::{DEFAULT_STOP_TIMEOUT, JobEvent, JobEvents, JobState, WorkerJob};
