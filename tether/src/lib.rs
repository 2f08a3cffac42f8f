//! `BaseHost`/`Host` capability traits (§3), the error taxonomy they share
//! (§7), and [`AgentClient`] — the bootstrap that turns a bare `BaseHost`
//! into a full `Host` by spawning `tether-agent` on top of it and speaking
//! the wire protocol (§4.4). [`LoggingHost`] adds structured logging over
//! any `Host` without changing its behavior (§4.7).
//!
//! The other two `Host` realizations — the Base-Run shell fallback (§4.5)
//! and the sudo wrapper (§4.6) — live in `tether-shell` and `tether-sudo`
//! respectively, since neither needs anything from this crate but the
//! traits and error types.

pub mod agent;
pub mod error;
pub mod logging;
pub mod traits;

pub use agent::AgentClient;
pub use error::{Cause, Error, PathError, UnknownGroupError, UnknownUserError, path_error_from_status};
pub use logging::LoggingHost;
pub use traits::{BaseHost, ByteSource, DirEntStream, FileReader, GroupRecord, Host, UserRecord, require_absolute};
