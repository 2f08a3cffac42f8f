//! Error taxonomy shared by every [`crate::Host`] implementation: a
//! `PathError` wrapping the cause of a failed path-taking operation, the
//! typed unknown-user/-group errors, and the top-level [`Error`] for
//! construction/bootstrap failures that aren't tied to a single path.

use std::fmt;

/// The cause wrapped by a [`PathError`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Cause {
    /// A POSIX errno, recoverable by the caller via [`PathError::is_errno`].
    Errno(i32),
    /// The path argument did not begin with `/`.
    NotAbsolute,
    /// A transport-level failure (RPC channel broken, stream closed
    /// unexpectedly). Rare, and typically fatal to the `Host` instance.
    Transport(String),
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Errno(errno) => write!(f, "{}", std::io::Error::from_raw_os_error(*errno)),
            Self::NotAbsolute => write!(f, "path must be absolute"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// `(operation, path, cause)` triple carrying an OS-level error up through
/// the host abstraction, e.g. `PathError { op: "Chmod", path: "/tmp", cause:
/// Cause::Errno(EPERM) }`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{op} {path}: {cause}")]
pub struct PathError {
    /// The RPC/operation name, e.g. `"Chmod"`, `"Lstat"`.
    pub op: String,
    /// The path argument that failed.
    pub path: String,
    /// The underlying cause.
    pub cause: Cause,
}

impl PathError {
    /// Builds a `PathError` wrapping a raw errno.
    #[must_use]
    pub fn errno(op: impl Into<String>, path: impl Into<String>, errno: i32) -> Self {
        Self { op: op.into(), path: path.into(), cause: Cause::Errno(errno) }
    }

    /// Builds a `PathError` for a non-absolute path.
    #[must_use]
    pub fn not_absolute(op: impl Into<String>, path: impl Into<String>) -> Self {
        Self { op: op.into(), path: path.into(), cause: Cause::NotAbsolute }
    }

    /// Builds a `PathError` wrapping a transport failure.
    #[must_use]
    pub fn transport(op: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { op: op.into(), path: path.into(), cause: Cause::Transport(message.into()) }
    }

    /// `true` iff this error's cause is the given errno (invariant 2 of the
    /// testable properties: a server-side failure with errno `e` must
    /// reconstruct client-side to a `PathError` whose cause compares equal
    /// to `e`).
    #[must_use]
    pub fn is_errno(&self, errno: i32) -> bool {
        self.cause == Cause::Errno(errno)
    }
}

/// Reconstructs a [`PathError`] from a failed gRPC call, recovering the raw
/// errno (or falling back to the status code's message) from the trailer
/// metadata [`tether_proto::status`] attaches server-side.
#[must_use]
pub fn path_error_from_status(op: &str, path: &str, status: &tonic::Status) -> PathError {
    match tether_proto::errno_from_status(status) {
        Some(errno) => PathError::errno(op, path, errno),
        None if status.code() == tonic::Code::InvalidArgument => PathError::not_absolute(op, path),
        None => PathError::transport(op, path, status.message().to_owned()),
    }
}

/// An unknown-user lookup (`Lookup`) failed: no such user exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown user {username:?}")]
pub struct UnknownUserError {
    /// The username that was queried.
    pub username: String,
}

/// An unknown-group lookup (`LookupGroup`) failed: no such group exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown group {name:?}")]
pub struct UnknownGroupError {
    /// The group name that was queried.
    pub name: String,
}

/// Top-level error for operations that aren't tied to a single path
/// argument: bootstrap failures, transport construction, and lookup misses.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A path-taking operation failed.
    #[error(transparent)]
    Path(#[from] PathError),

    /// `Lookup` found no matching user.
    #[error(transparent)]
    UnknownUser(#[from] UnknownUserError),

    /// `LookupGroup` found no matching group.
    #[error(transparent)]
    UnknownGroup(#[from] UnknownGroupError),

    /// The underlying `BaseHost`'s `Run` failed (bootstrap shell commands,
    /// agent spawn).
    #[error("{0}")]
    Run(String),

    /// The target's OS/architecture has no matching prebuilt agent binary.
    #[error(transparent)]
    UnsupportedTarget(#[from] tether_agent_bin::UnsupportedTargetError),

    /// `key` is a supported target but this build carries no binary for it
    /// (a placeholder was embedded instead, e.g. a `docs.rs` or partial build).
    #[error("no agent binary embedded for target {0:?}")]
    NoAgentBinary(String),

    /// The gRPC transport could not be established over the pipe connection.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A gRPC call failed without a reconstructible path or lookup cause.
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),

    /// An I/O error occurred outside of any single RPC (spawning the agent
    /// process, writing its binary to a temp path, joining pipe closes).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The agent did not reply `"Pong"` to the post-bootstrap `Ping`.
    #[error("agent ping handshake failed: expected \"Pong\", got {0:?}")]
    PingMismatch(String),

    /// Multiple failures occurred together (e.g. a primary error plus a
    /// cleanup error); joined so no partial-resource failure is silent.
    #[error("{0}; additionally: {1}")]
    Joined(Box<Error>, Box<Error>),
}

impl Error {
    /// Joins `self` with a second error that occurred during cleanup,
    /// preserving both instead of discarding the cleanup failure.
    #[must_use]
    pub fn join(self, other: Error) -> Self {
        Self::Joined(Box::new(self), Box::new(other))
    }

    /// Joins an `Ok`/`Err` cleanup result onto an existing result, keeping
    /// both errors if both sides failed.
    pub fn join_result<T>(primary: Result<T, Error>, cleanup: Result<(), Error>) -> Result<T, Error> {
        match (primary, cleanup) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(c)) => Err(e.join(c)),
        }
    }

    /// Folds a sequence of cleanup results into one, keeping every failure
    /// instead of losing all but the first.
    pub fn join_all(results: impl IntoIterator<Item = Result<(), Error>>) -> Result<(), Error> {
        results.into_iter().fold(Ok(()), |acc, r| Self::join_result(acc, r))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn is_errno_matches_only_its_own_errno() {
        let err = PathError::errno("Chmod", "/tmp", libc::EPERM);
        assert!(err.is_errno(libc::EPERM));
        assert!(!err.is_errno(libc::ENOENT));
    }

    #[test]
    fn not_absolute_does_not_match_any_errno() {
        let err = PathError::not_absolute("Chmod", "relative");
        assert!(!err.is_errno(libc::EINVAL));
    }

    #[test]
    fn reconstructs_errno_from_status_metadata() {
        let status = tether_proto::status_for_errno("Lstat", "/nope", libc::ENOENT);
        let err = path_error_from_status("Lstat", "/nope", &status);
        assert!(err.is_errno(libc::ENOENT));
    }

    #[test]
    fn join_result_keeps_both_errors() {
        let primary: Result<(), Error> = Err(Error::Run("boom".to_owned()));
        let cleanup: Result<(), Error> = Err(Error::Run("cleanup failed".to_owned()));
        let joined = Error::join_result(primary, cleanup).unwrap_err();
        assert!(matches!(joined, Error::Joined(_, _)));
    }
}
