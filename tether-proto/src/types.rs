//! Shared value objects: the command descriptor, wait status, stat record,
//! and directory entry types used by every capability tier.

use std::fmt;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// `LANG`/`PATH` used whenever a [`Cmd`]'s `env` is empty.
pub const DEFAULT_ENV: &[&str] = &[
    "LANG=en_US.UTF-8",
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
];

/// Working directory used whenever a [`Cmd`]'s `dir` is empty.
pub const DEFAULT_DIR: &str = "/tmp";

/// A lazy, finite, non-restartable byte source fed to a spawned process's stdin.
pub type StdinSource = Pin<Box<dyn AsyncRead + Send>>;

/// A sink a spawned process's stdout or stderr is copied into.
pub type StdioSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Describes a process to execute on a target host.
///
/// Constructed with [`Cmd::new`] and the builder methods; `stdin`/`stdout`/
/// `stderr` default to `None`, meaning the process sees an empty input and
/// its output is discarded.
pub struct Cmd {
    /// Executable path. Never empty.
    pub path: String,
    /// Argument list. Caller-supplied; conventionally argv\[0\] == the command name.
    pub args: Vec<String>,
    /// `KEY=VALUE` environment. Empty means "use [`DEFAULT_ENV`]".
    pub env: Vec<String>,
    /// Working directory. Empty means [`DEFAULT_DIR`]; non-empty must be absolute.
    pub dir: String,
    /// Optional stdin source.
    pub stdin: Option<StdinSource>,
    /// Optional stdout sink.
    pub stdout: Option<StdioSink>,
    /// Optional stderr sink.
    pub stderr: Option<StdioSink>,
}

impl fmt::Debug for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmd")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("dir", &self.dir)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

impl Cmd {
    /// Creates a command with no arguments, default environment and working
    /// directory, and no stdio wired up.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            env: Vec::new(),
            dir: String::new(),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }

    /// Sets the argument list.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory. Must be absolute if non-empty.
    #[must_use]
    pub fn dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Wires a stdin source.
    #[must_use]
    pub fn stdin(mut self, src: StdinSource) -> Self {
        self.stdin = Some(src);
        self
    }

    /// Wires a stdout sink.
    #[must_use]
    pub fn stdout(mut self, sink: StdioSink) -> Self {
        self.stdout = Some(sink);
        self
    }

    /// Wires a stderr sink.
    #[must_use]
    pub fn stderr(mut self, sink: StdioSink) -> Self {
        self.stderr = Some(sink);
        self
    }

    /// The environment to actually use: `self.env` if non-empty, else [`DEFAULT_ENV`].
    #[must_use]
    pub fn effective_env(&self) -> Vec<String> {
        if self.env.is_empty() {
            DEFAULT_ENV.iter().map(|s| (*s).to_owned()).collect()
        } else {
            self.env.clone()
        }
    }

    /// The working directory to actually use: `self.dir` if non-empty, else [`DEFAULT_DIR`].
    #[must_use]
    pub fn effective_dir(&self) -> &str {
        if self.dir.is_empty() { DEFAULT_DIR } else { &self.dir }
    }
}

/// Process termination record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitStatus {
    /// Exit code, `0..=255` for a clean exit, else `0`.
    pub exit_code: i32,
    /// `true` iff the process terminated by calling `exit`.
    pub exited: bool,
    /// Name of the signal that terminated the process, or empty.
    pub signal: String,
}

impl WaitStatus {
    /// `true` iff the process exited cleanly with code `0`.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exited && self.exit_code == 0
    }
}

/// `(seconds, nanoseconds)` pair mirroring POSIX `struct timespec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timespec {
    /// Seconds component.
    pub sec: i64,
    /// Nanoseconds component.
    pub nsec: i64,
}

/// Platform-stable stat record, mirroring POSIX `struct stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_field_names)]
pub struct StatT {
    /// Device containing the file.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
    /// Number of hard links.
    pub nlink: u64,
    /// File-type bits plus permission bits (low 12 bits).
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Device id, if this is a device file.
    pub rdev: u64,
    /// Size in bytes.
    pub size: i64,
    /// Preferred I/O block size.
    pub blksize: i64,
    /// Number of 512-byte blocks allocated.
    pub blocks: i64,
    /// Last access time.
    pub atim: Timespec,
    /// Last modification time.
    pub mtim: Timespec,
    /// Last status-change time.
    pub ctim: Timespec,
}

/// POSIX `DT_*` directory-entry type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FileType {
    /// `DT_SOCK`.
    Socket,
    /// `DT_LNK`.
    Symlink,
    /// `DT_REG`.
    Regular,
    /// `DT_BLK`.
    Block,
    /// `DT_DIR`.
    Directory,
    /// `DT_CHR`.
    Char,
    /// `DT_FIFO`.
    Fifo,
    /// `DT_UNKNOWN` or any value not otherwise recognized.
    Unknown,
}

impl FileType {
    /// Decodes a raw POSIX `DT_*` value.
    #[must_use]
    pub fn from_dt(dt: u32) -> Self {
        match dt {
            libc::DT_SOCK => Self::Socket,
            libc::DT_LNK => Self::Symlink,
            libc::DT_REG => Self::Regular,
            libc::DT_BLK => Self::Block,
            libc::DT_DIR => Self::Directory,
            libc::DT_CHR => Self::Char,
            libc::DT_FIFO => Self::Fifo,
            _ => Self::Unknown,
        }
    }

    /// Encodes back to a raw POSIX `DT_*` value.
    #[must_use]
    pub fn to_dt(self) -> u32 {
        match self {
            Self::Socket => libc::DT_SOCK,
            Self::Symlink => libc::DT_LNK,
            Self::Regular => libc::DT_REG,
            Self::Block => libc::DT_BLK,
            Self::Directory => libc::DT_DIR,
            Self::Char => libc::DT_CHR,
            Self::Fifo => libc::DT_FIFO,
            Self::Unknown => libc::DT_UNKNOWN,
        }
    }
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEnt {
    /// Inode number.
    pub ino: u64,
    /// Directory-entry type.
    pub file_type: FileType,
    /// Entry name (no path components).
    pub name: String,
}
