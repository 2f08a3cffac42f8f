//! errno <-> gRPC status-code mapping and the trailer metadata that carries
//! the raw errno (or an unknown-user/-group query string) across the wire.
//!
//! The status code alone is lossy — many errnos collapse onto the same
//! `tonic::Code` — so every failing RPC that originates from a syscall also
//! attaches the raw errno as ASCII-binary metadata. The client reconstructs
//! an errno-comparable cause from it instead of pattern-matching on the
//! status code.

use tonic::metadata::{MetadataValue, errors::InvalidMetadataValue};
use tonic::{Code, Status};

/// Metadata key carrying the raw `errno` of a failed syscall.
const ERRNO_KEY: &str = "x-errno-bin";
/// Metadata key carrying the query string of an unknown-user/-group lookup.
const UNKNOWN_QUERY_KEY: &str = "x-unknown-query-bin";

/// Maps a POSIX errno to the `tonic::Code` the server should return.
///
/// Unlisted errnos map to [`Code::Unknown`]; the raw errno is always
/// attached separately via [`status_for_errno`] so no information is lost.
#[must_use]
pub fn code_for_errno(errno: i32) -> Code {
    match errno {
        libc::EACCES | libc::EPERM => Code::PermissionDenied,
        libc::ENOENT => Code::NotFound,
        libc::EEXIST => Code::AlreadyExists,
        libc::ENOTEMPTY => Code::FailedPrecondition,
        libc::EMFILE | libc::EMLINK | libc::EUSERS | libc::EXFULL => Code::ResourceExhausted,
        libc::EINVAL
        | libc::EBADMSG
        | libc::EBADRQC
        | libc::EILSEQ
        | libc::EAFNOSUPPORT
        | libc::EDESTADDRREQ
        | libc::EDOM
        | libc::ESOCKTNOSUPPORT => Code::InvalidArgument,
        libc::ERANGE | libc::E2BIG | libc::EFBIG | libc::EMSGSIZE | libc::ENAMETOOLONG
        | libc::EOVERFLOW | libc::ESPIPE => Code::OutOfRange,
        libc::EAGAIN => Code::Unavailable,
        libc::ECANCELED => Code::Cancelled,
        libc::ETIME | libc::ETIMEDOUT => Code::DeadlineExceeded,
        libc::ECONNABORTED | libc::ENETRESET => Code::Aborted,
        _ => Code::Unknown,
    }
}

/// Builds a [`Status`] for a failed syscall: the status code is derived from
/// `errno` via [`code_for_errno`], and the raw errno is attached as trailer
/// metadata so the client can recover it exactly.
#[must_use]
pub fn status_for_errno(op: &str, path: &str, errno: i32) -> Status {
    let message = format!("{op} {path}: {}", std::io::Error::from_raw_os_error(errno));
    let mut status = Status::new(code_for_errno(errno), message);
    if let Ok(value) = MetadataValue::try_from(errno.to_string()) {
        status.metadata_mut().insert(ERRNO_KEY, value);
    }
    status
}

/// Builds a [`Status`] for an invalid (non-absolute) path argument.
#[must_use]
pub fn status_for_non_absolute_path(op: &str, path: &str) -> Status {
    Status::invalid_argument(format!("{op} {path}: path must be absolute"))
}

/// Builds a [`Status`] for an unknown user/group lookup, carrying the
/// original query string as trailer metadata.
#[must_use]
pub fn status_for_unknown(op: &str, query: &str) -> Status {
    let mut status = Status::not_found(format!("{op}: unknown {query}"));
    if let Ok(value) = MetadataValue::try_from(query.to_owned()) {
        status.metadata_mut().insert(UNKNOWN_QUERY_KEY, value);
    }
    status
}

/// Extracts the raw errno attached by [`status_for_errno`], if present.
#[must_use]
pub fn errno_from_status(status: &Status) -> Option<i32> {
    status
        .metadata()
        .get(ERRNO_KEY)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Extracts the unknown-user/-group query string attached by
/// [`status_for_unknown`], if present.
#[must_use]
pub fn unknown_query_from_status(status: &Status) -> Option<String> {
    status
        .metadata()
        .get(UNKNOWN_QUERY_KEY)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Wraps a metadata-value construction error for callers that need `?`.
#[derive(Debug, thiserror::Error)]
#[error("invalid metadata value: {0}")]
pub struct MetadataError(#[from] pub InvalidMetadataValue);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_errnos() {
        assert_eq!(code_for_errno(libc::ENOENT), Code::NotFound);
        assert_eq!(code_for_errno(libc::EEXIST), Code::AlreadyExists);
        assert_eq!(code_for_errno(libc::EACCES), Code::PermissionDenied);
        assert_eq!(code_for_errno(libc::EPERM), Code::PermissionDenied);
        assert_eq!(code_for_errno(libc::ENOTEMPTY), Code::FailedPrecondition);
        assert_eq!(code_for_errno(libc::EINVAL), Code::InvalidArgument);
        assert_eq!(code_for_errno(libc::ERANGE), Code::OutOfRange);
        assert_eq!(code_for_errno(libc::EAGAIN), Code::Unavailable);
        assert_eq!(code_for_errno(libc::ECANCELED), Code::Cancelled);
        assert_eq!(code_for_errno(libc::ETIMEDOUT), Code::DeadlineExceeded);
        assert_eq!(code_for_errno(libc::ECONNABORTED), Code::Aborted);
    }

    #[test]
    fn unlisted_errno_is_unknown() {
        assert_eq!(code_for_errno(i32::MAX), Code::Unknown);
    }

    #[test]
    fn roundtrips_errno_through_status_metadata() {
        let status = status_for_errno("Lstat", "/nope", libc::ENOENT);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(errno_from_status(&status), Some(libc::ENOENT));
    }

    #[test]
    fn roundtrips_unknown_query_through_status_metadata() {
        let status = status_for_unknown("Lookup", "nosuchuser");
        assert_eq!(unknown_query_from_status(&status).as_deref(), Some("nosuchuser"));
    }

    #[test]
    fn non_absolute_path_is_invalid_argument() {
        let status = status_for_non_absolute_path("Chmod", "relative/path");
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
