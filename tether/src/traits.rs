//! The two capability tiers (§3): [`BaseHost`], which can only run a
//! process, and [`Host`], the full filesystem/user/exec capability built on
//! top of it. Both are implemented by [`crate::AgentClient`] (the agent
//! path), by `tether-shell`'s Base-Run fallback (the sudo/no-agent path),
//! and `tether-sudo`'s wrapper only implements `BaseHost`.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio_stream::Stream;

use tether_proto::{Cmd, DirEnt, StatT, WaitStatus};

use crate::error::{Error, PathError};

/// A lazy, finite byte stream handed to `WriteFile`/`AppendFile`; the same
/// shape as [`tether_proto::types::StdinSource`] fed to a [`Cmd`].
pub type ByteSource = Pin<Box<dyn AsyncRead + Send>>;

/// A lazily-pulled reader over a remote file's contents, returned by
/// [`Host::read_file`]. Errors raised while opening the file on the target
/// are surfaced before this is ever returned to the caller (§4.4's
/// "ReadFile special case").
pub type FileReader = Pin<Box<dyn AsyncRead + Send>>;

/// One item of a [`Host::read_dir`] stream: either a successfully decoded
/// entry or the error that terminated the listing (mirrors the wire
/// protocol's `DirEntResult`).
pub type DirEntStream = Pin<Box<dyn Stream<Item = Result<DirEnt, PathError>> + Send>>;

/// A resolved user-database record (`Lookup`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct UserRecord {
    /// User id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
    /// Login name.
    pub username: String,
    /// GECOS / full name field.
    pub name: String,
    /// Home directory.
    pub home_dir: String,
    /// Login shell.
    pub shell: String,
}

/// A resolved group-database record (`LookupGroup`).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct GroupRecord {
    /// Group id.
    pub gid: u32,
    /// Group name.
    pub name: String,
}

/// Minimum capability: can run a process on the target and report its own
/// identity. Every `Host` is built by composing a `BaseHost` — either by
/// talking to an agent over it (`AgentClient`), or by expressing every
/// filesystem/user operation as a `Run` of a POSIX command
/// (`tether-shell`'s fallback).
#[async_trait]
pub trait BaseHost: Send + Sync {
    /// Runs `cmd` to completion, streaming its stdio through whatever
    /// sources/sinks `cmd` was built with, and returns its termination
    /// status. A non-zero exit is not an error — it is reported in the
    /// returned [`WaitStatus`]; only a failure to run the command at all
    /// (spawn failure, transport failure) is `Err`.
    async fn run(&self, cmd: Cmd) -> Result<WaitStatus, Error>;

    /// A human-readable identity for this host, e.g. `"ssh:web-1"` or
    /// `"agent over ssh:web-1"`. Never parsed; for logging only.
    fn string(&self) -> String;

    /// A short, stable tag identifying the kind of host this is (`"agent"`,
    /// `"shell"`, `"sudo"`, ...), used by the logging wrapper's structured
    /// fields.
    fn host_type(&self) -> &'static str;

    /// Releases any resources this host owns (connections, temp files,
    /// spawned processes). Idempotent: a second call observes no error.
    async fn close(&self) -> Result<(), Error>;
}

/// Full filesystem/user/exec capability (§3). A superset of [`BaseHost`];
/// every method takes an absolute path where the wire protocol does, and
/// implementations validate that client-side as well (the server validates
/// authoritatively — see spec §4.2).
#[async_trait]
pub trait Host: BaseHost {
    /// The effective user id the host operates as.
    async fn geteuid(&self) -> Result<u32, Error>;

    /// The effective group id the host operates as.
    async fn getegid(&self) -> Result<u32, Error>;

    /// `chmod(2)`: sets `path`'s permission bits. Follows symlinks.
    async fn chmod(&self, path: &str, mode: u32) -> Result<(), Error>;

    /// `lchown(2)`: sets `path`'s owner/group. Does not follow symlinks.
    async fn lchown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error>;

    /// Looks up a user by name in the target's user database.
    async fn lookup(&self, username: &str) -> Result<UserRecord, Error>;

    /// Looks up a group by name in the target's group database.
    async fn lookup_group(&self, name: &str) -> Result<GroupRecord, Error>;

    /// `lstat(2)`: never follows the final symlink component.
    async fn lstat(&self, path: &str) -> Result<StatT, Error>;

    /// Streams the entries of the directory at `path`.
    async fn read_dir(&self, path: &str) -> Result<DirEntStream, Error>;

    /// `mkdir(2)` at exactly `mode`, independent of umask.
    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error>;

    /// Opens `path` for reading, returning a lazy reader over its contents.
    /// Any error opening the file is surfaced here, not on first read.
    async fn read_file(&self, path: &str) -> Result<FileReader, Error>;

    /// `symlink(2)`: creates `newname` pointing at `oldname`.
    async fn symlink(&self, oldname: &str, newname: &str) -> Result<(), Error>;

    /// `readlink(2)`: returns the destination a symlink points at.
    async fn readlink(&self, path: &str) -> Result<String, Error>;

    /// Removes a single file or empty directory.
    async fn remove(&self, path: &str) -> Result<(), Error>;

    /// `mknod(2)`: creates a device, FIFO, or regular file node.
    async fn mknod(&self, path: &str, mode: u32, dev: u64) -> Result<(), Error>;

    /// Creates (or truncates) `path`, writes `data` to it, then applies
    /// `mode` explicitly (to defeat umask).
    async fn write_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error>;

    /// Like [`Host::write_file`] but opens `path` for appending rather than
    /// truncating. `mode` is applied unconditionally, even if the file
    /// already existed (see SPEC_FULL's Open Question decision).
    async fn append_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error>;
}

/// Rejects a non-absolute path before any RPC is attempted. Implementations
/// call this client-side as a fast local check; the server performs the
/// authoritative check regardless (spec §4.2).
pub fn require_absolute(op: &str, path: &str) -> Result<(), Error> {
    if path.starts_with('/') { Ok(()) } else { Err(PathError::not_absolute(op, path).into()) }
}
