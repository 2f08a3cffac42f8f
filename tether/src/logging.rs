//! Logging Wrapper (§4.7): a transparent pass-through that binds a `tracing`
//! span to every call, tagged with the wrapped host's type and name, then
//! delegates unchanged. Never alters behavior, arguments, or results —
//! purely an observability layer, grounded on the `tracing`/`tracing-subscriber`
//! idiom `tether-agent`'s binary already uses for stderr logging.

use async_trait::async_trait;
use tracing::Instrument;

use tether_proto::{Cmd, DirEnt, StatT, WaitStatus};

use crate::error::Error;
use crate::traits::{BaseHost, ByteSource, DirEntStream, FileReader, GroupRecord, Host, UserRecord};

/// Wraps any [`Host`] and logs every method call at `debug` level under a
/// span carrying `host.type`/`host.name` fields. Construct with
/// [`LoggingHost::new`]; the result implements both [`BaseHost`] and
/// [`Host`], so it can replace the wrapped value anywhere one is expected.
#[derive(Debug, Clone, Copy)]
pub struct LoggingHost<H> {
    inner: H,
}

impl<H> LoggingHost<H> {
    /// Wraps `inner`, adding structured logging with no behavior change.
    #[must_use]
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    /// Returns the wrapped host, discarding the logging layer.
    #[must_use]
    pub fn into_inner(self) -> H {
        self.inner
    }
}

macro_rules! call_span {
    ($self:expr, $op:literal) => {
        tracing::debug_span!($op, "host.type" = $self.inner.host_type(), "host.name" = %$self.inner.string())
    };
}

#[async_trait]
impl<H> BaseHost for LoggingHost<H>
where
    H: Host,
{
    async fn run(&self, cmd: Cmd) -> Result<WaitStatus, Error> {
        self.inner.run(cmd).instrument(call_span!(self, "run")).await
    }

    fn string(&self) -> String {
        self.inner.string()
    }

    fn host_type(&self) -> &'static str {
        self.inner.host_type()
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().instrument(call_span!(self, "close")).await
    }
}

#[async_trait]
impl<H> Host for LoggingHost<H>
where
    H: Host,
{
    async fn geteuid(&self) -> Result<u32, Error> {
        self.inner.geteuid().instrument(call_span!(self, "geteuid")).await
    }

    async fn getegid(&self) -> Result<u32, Error> {
        self.inner.getegid().instrument(call_span!(self, "getegid")).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        self.inner.chmod(path, mode).instrument(call_span!(self, "chmod")).await
    }

    async fn lchown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        self.inner.lchown(path, uid, gid).instrument(call_span!(self, "lchown")).await
    }

    async fn lookup(&self, username: &str) -> Result<UserRecord, Error> {
        self.inner.lookup(username).instrument(call_span!(self, "lookup")).await
    }

    async fn lookup_group(&self, name: &str) -> Result<GroupRecord, Error> {
        self.inner.lookup_group(name).instrument(call_span!(self, "lookup_group")).await
    }

    async fn lstat(&self, path: &str) -> Result<StatT, Error> {
        self.inner.lstat(path).instrument(call_span!(self, "lstat")).await
    }

    async fn read_dir(&self, path: &str) -> Result<DirEntStream, Error> {
        self.inner.read_dir(path).instrument(call_span!(self, "read_dir")).await
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error> {
        self.inner.mkdir(path, mode).instrument(call_span!(self, "mkdir")).await
    }

    async fn read_file(&self, path: &str) -> Result<FileReader, Error> {
        self.inner.read_file(path).instrument(call_span!(self, "read_file")).await
    }

    async fn symlink(&self, oldname: &str, newname: &str) -> Result<(), Error> {
        self.inner.symlink(oldname, newname).instrument(call_span!(self, "symlink")).await
    }

    async fn readlink(&self, path: &str) -> Result<String, Error> {
        self.inner.readlink(path).instrument(call_span!(self, "readlink")).await
    }

    async fn remove(&self, path: &str) -> Result<(), Error> {
        self.inner.remove(path).instrument(call_span!(self, "remove")).await
    }

    async fn mknod(&self, path: &str, mode: u32, dev: u64) -> Result<(), Error> {
        self.inner.mknod(path, mode, dev).instrument(call_span!(self, "mknod")).await
    }

    async fn write_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error> {
        self.inner.write_file(path, mode, data).instrument(call_span!(self, "write_file")).await
    }

    async fn append_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error> {
        self.inner.append_file(path, mode, data).instrument(call_span!(self, "append_file")).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, Default)]
    struct CountingHost;

    #[async_trait]
    impl BaseHost for CountingHost {
        async fn run(&self, _cmd: Cmd) -> Result<WaitStatus, Error> {
            Ok(WaitStatus { exit_code: 0, exited: true, signal: String::new() })
        }

        fn string(&self) -> String {
            "counting".to_owned()
        }

        fn host_type(&self) -> &'static str {
            "test"
        }

        async fn close(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[async_trait]
    impl Host for CountingHost {
        async fn geteuid(&self) -> Result<u32, Error> {
            Ok(0)
        }

        async fn getegid(&self) -> Result<u32, Error> {
            Ok(0)
        }

        async fn chmod(&self, _path: &str, _mode: u32) -> Result<(), Error> {
            Ok(())
        }

        async fn lchown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<(), Error> {
            Ok(())
        }

        async fn lookup(&self, username: &str) -> Result<UserRecord, Error> {
            Err(crate::error::UnknownUserError { username: username.to_owned() }.into())
        }

        async fn lookup_group(&self, name: &str) -> Result<GroupRecord, Error> {
            Err(crate::error::UnknownGroupError { name: name.to_owned() }.into())
        }

        async fn lstat(&self, _path: &str) -> Result<StatT, Error> {
            Ok(StatT::default())
        }

        async fn read_dir(&self, _path: &str) -> Result<DirEntStream, Error> {
            Ok(Box::pin(tokio_stream::empty()))
        }

        async fn mkdir(&self, _path: &str, _mode: u32) -> Result<(), Error> {
            Ok(())
        }

        async fn read_file(&self, _path: &str) -> Result<FileReader, Error> {
            Ok(Box::pin(tokio::io::empty()))
        }

        async fn symlink(&self, _oldname: &str, _newname: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn readlink(&self, _path: &str) -> Result<String, Error> {
            Ok(String::new())
        }

        async fn remove(&self, _path: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn mknod(&self, _path: &str, _mode: u32, _dev: u64) -> Result<(), Error> {
            Ok(())
        }

        async fn write_file(&self, _path: &str, _mode: u32, _data: ByteSource) -> Result<(), Error> {
            Ok(())
        }

        async fn append_file(&self, _path: &str, _mode: u32, _data: ByteSource) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn delegates_geteuid_unchanged() {
        let logged = LoggingHost::new(CountingHost);
        assert_eq!(logged.geteuid().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delegates_errors_unchanged() {
        let logged = LoggingHost::new(CountingHost);
        let err = logged.lookup("nobody").await.unwrap_err();
        assert!(matches!(err, Error::UnknownUser(_)));
    }

    #[test]
    fn host_type_and_string_pass_through() {
        let logged = LoggingHost::new(CountingHost);
        assert_eq!(logged.host_type(), "test");
        assert_eq!(logged.string(), "counting");
    }
}
