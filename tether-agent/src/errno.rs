//! Converts OS-level failures into the [`tonic::Status`] the wire protocol
//! expects, attaching the raw errno via [`tether_proto::status_for_errno`].

use tonic::Status;

/// Converts a [`std::io::Error`] into a [`Status`], attaching its raw errno
/// when the OS supplied one.
pub fn io_status(op: &str, path: &str, err: &std::io::Error) -> Status {
    match err.raw_os_error() {
        Some(errno) => tether_proto::status_for_errno(op, path, errno),
        None => Status::unknown(format!("{op} {path}: {err}")),
    }
}

/// Converts a [`nix::Error`] into a [`Status`], attaching its errno.
pub fn nix_status(op: &str, path: &str, err: nix::Error) -> Status {
    tether_proto::status_for_errno(op, path, err as i32)
}

/// Rejects a non-absolute path argument before any syscall is attempted.
pub fn require_absolute(op: &str, path: &str) -> Result<(), Status> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(tether_proto::status_for_non_absolute_path(op, path))
    }
}
