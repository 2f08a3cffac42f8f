//! Error classification by stderr substring (§4.5): the shell fallback has
//! no channel but a command's stderr text, so a failed operation's cause is
//! recovered by matching known GNU coreutils/`stat`/`sudo` phrasing.

use tether::error::{Cause, PathError};

use crate::capture::Captured;

/// Builds the [`PathError`] for a failed operation, classifying `captured`'s
/// stderr by substring match. Falls back to a transport-cause diagnostic
/// carrying the full command result when nothing matches.
pub(crate) fn path_failure(op: &str, path: &str, captured: &Captured) -> PathError {
    let stderr = String::from_utf8_lossy(&captured.stderr);
    if let Some(errno) = errno_from_stderr(&stderr) {
        return PathError { op: op.to_owned(), path: path.to_owned(), cause: Cause::Errno(errno) };
    }
    PathError {
        op: op.to_owned(),
        path: path.to_owned(),
        cause: Cause::Transport(format!(
            "command exited {:?}; stdout={:?} stderr={:?}",
            captured.status,
            String::from_utf8_lossy(&captured.stdout),
            stderr,
        )),
    }
}

fn errno_from_stderr(stderr: &str) -> Option<i32> {
    if stderr.contains("No such file or directory") || stderr.contains("Directory nonexistent") {
        Some(libc::ENOENT)
    } else if stderr.contains("Permission denied") {
        Some(libc::EACCES)
    } else if stderr.contains("Operation not permitted") {
        Some(libc::EPERM)
    } else if stderr.contains("File exists") {
        Some(libc::EEXIST)
    } else if stderr.contains("Is a directory") {
        Some(libc::EISDIR)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_proto::WaitStatus;

    fn captured(stderr: &str) -> Captured {
        Captured { status: WaitStatus { exit_code: 1, exited: true, signal: String::new() }, stdout: Vec::new(), stderr: stderr.as_bytes().to_vec() }
    }

    #[test]
    fn classifies_known_stderr_phrases() {
        assert!(path_failure("Lstat", "/x", &captured("stat: cannot statx '/x': No such file or directory\n")).is_errno(libc::ENOENT));
        assert!(path_failure("Mkdir", "/x", &captured("mkdir: cannot create directory '/x': File exists\n")).is_errno(libc::EEXIST));
        assert!(path_failure("Chmod", "/x", &captured("chmod: changing permissions of '/x': Operation not permitted\n")).is_errno(libc::EPERM));
        assert!(path_failure("Remove", "/x", &captured("rm: cannot remove '/x': Is a directory\n")).is_errno(libc::EISDIR));
    }

    #[test]
    fn unmatched_stderr_becomes_a_transport_cause() {
        let err = path_failure("Lstat", "/x", &captured("something unexpected\n"));
        assert!(!err.is_errno(libc::ENOENT));
    }
}
