//! [`ShellHost`]: lifts a bare [`BaseHost`] to the full [`Host`] capability
//! purely through `Run` (§4.5, the Base-Run Shell Fallback). Used when no
//! prebuilt agent binary exists for the target, or when privilege
//! escalation is applied around a `BaseHost` and the full interface is
//! still needed locally — `tether-sudo` elevates only `Run`, and this crate
//! is what lifts a sudo-wrapped `BaseHost` the rest of the way.
//!
//! Every operation is expressed as a carefully quoted POSIX command; errors
//! are recovered from the command's stderr text since a bare `BaseHost`
//! offers no other channel (see `classify`). Grounded on
//! `openssh-rust-openssh`'s `escape.rs`/error-interpretation idiom and
//! `bux-guest/files.rs`'s shell-out-then-parse shape for file operations.

mod capture;
mod classify;
mod passwd;
mod statfmt;

use std::borrow::Cow;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use tether::error::{Error, PathError, UnknownGroupError, UnknownUserError};
use tether::traits::{ByteSource, DirEntStream, FileReader, GroupRecord, Host, UserRecord, require_absolute};
use tether_proto::{Cmd, DirEnt, FileType, StatT, WaitStatus};

fn escape(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

/// Lifts `inner` to the full [`Host`] capability by shelling out POSIX
/// commands through it. Carries no state of its own.
#[derive(Debug, Clone)]
pub struct ShellHost<B> {
    inner: B,
}

impl<B> ShellHost<B> {
    /// Wraps `inner`, a bare [`tether::traits::BaseHost`], as a full [`Host`].
    #[must_use]
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// Gives back the wrapped [`tether::traits::BaseHost`].
    pub fn into_inner(self) -> B {
        self.inner
    }
}

#[async_trait]
impl<B> tether::traits::BaseHost for ShellHost<B>
where
    B: tether::traits::BaseHost,
{
    async fn run(&self, cmd: Cmd) -> Result<WaitStatus, Error> {
        self.inner.run(cmd).await
    }

    fn string(&self) -> String {
        self.inner.string()
    }

    fn host_type(&self) -> &'static str {
        "shell"
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}

#[async_trait]
impl<B> Host for ShellHost<B>
where
    B: tether::traits::BaseHost,
{
    async fn geteuid(&self) -> Result<u32, Error> {
        let captured = capture::run(&self.inner, Cmd::new("id").args(["-u"])).await?;
        parse_id(&captured, "id -u")
    }

    async fn getegid(&self) -> Result<u32, Error> {
        let captured = capture::run(&self.inner, Cmd::new("id").args(["-g"])).await?;
        parse_id(&captured, "id -g")
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        require_absolute("Chmod", path)?;
        let cmd = Cmd::new("chmod").args([format!("{mode:o}"), path.to_owned()]);
        run_for_status("Chmod", path, &self.inner, cmd).await
    }

    async fn lchown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        require_absolute("Lchown", path)?;
        let cmd = Cmd::new("chown").args(["--no-dereference".to_owned(), format!("{uid}.{gid}"), path.to_owned()]);
        run_for_status("Lchown", path, &self.inner, cmd).await
    }

    async fn lookup(&self, username: &str) -> Result<UserRecord, Error> {
        let captured = capture::run(&self.inner, Cmd::new("cat").args(["/etc/passwd"])).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("Lookup", "/etc/passwd", &captured).into());
        }
        let content = String::from_utf8_lossy(&captured.stdout);
        passwd::find_user(&content, username).ok_or_else(|| UnknownUserError { username: username.to_owned() }.into())
    }

    async fn lookup_group(&self, name: &str) -> Result<GroupRecord, Error> {
        let captured = capture::run(&self.inner, Cmd::new("cat").args(["/etc/group"])).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("LookupGroup", "/etc/group", &captured).into());
        }
        let content = String::from_utf8_lossy(&captured.stdout);
        passwd::find_group(&content, name).ok_or_else(|| UnknownGroupError { name: name.to_owned() }.into())
    }

    async fn lstat(&self, path: &str) -> Result<StatT, Error> {
        require_absolute("Lstat", path)?;
        let cmd = Cmd::new("stat").args(["--format", statfmt::FORMAT, path]);
        let captured = capture::run(&self.inner, cmd).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("Lstat", path, &captured).into());
        }
        let line = String::from_utf8_lossy(&captured.stdout);
        Ok(statfmt::parse("Lstat", path, &line)?)
    }

    async fn read_dir(&self, path: &str) -> Result<DirEntStream, Error> {
        require_absolute("ReadDir", path)?;
        let cmd = Cmd::new("find").args([path.to_owned(), "-mindepth".to_owned(), "1".to_owned(), "-maxdepth".to_owned(), "1".to_owned(), "-printf".to_owned(), "%y,%i,%f\\n".to_owned()]);
        let captured = capture::run(&self.inner, cmd).await?;

        let items: Vec<Result<DirEnt, PathError>> = if captured.status.success() {
            String::from_utf8_lossy(&captured.stdout)
                .lines()
                .filter(|l| !l.is_empty())
                .filter_map(|line| parse_dirent(line))
                .map(Ok)
                .collect()
        } else {
            vec![Err(classify::path_failure("ReadDir", path, &captured))]
        };
        Ok(Box::pin(tokio_stream::iter(items)))
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error> {
        require_absolute("Mkdir", path)?;
        let cmd = Cmd::new("mkdir").args([path.to_owned()]);
        let captured = capture::run(&self.inner, cmd).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("Mkdir", path, &captured).into());
        }
        self.chmod(path, mode).await
    }

    async fn read_file(&self, path: &str) -> Result<FileReader, Error> {
        require_absolute("ReadFile", path)?;
        let cmd = Cmd::new("cat").args([path.to_owned()]);
        let captured = capture::run(&self.inner, cmd).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("ReadFile", path, &captured).into());
        }
        Ok(Box::pin(std::io::Cursor::new(captured.stdout)))
    }

    async fn symlink(&self, oldname: &str, newname: &str) -> Result<(), Error> {
        require_absolute("Symlink", newname)?;
        let cmd = Cmd::new("ln").args(["-s".to_owned(), oldname.to_owned(), newname.to_owned()]);
        run_for_status("Symlink", newname, &self.inner, cmd).await
    }

    async fn readlink(&self, path: &str) -> Result<String, Error> {
        require_absolute("Readlink", path)?;
        let cmd = Cmd::new("readlink").args([path.to_owned()]);
        let captured = capture::run(&self.inner, cmd).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("Readlink", path, &captured).into());
        }
        Ok(String::from_utf8_lossy(&captured.stdout).trim_end_matches('\n').to_owned())
    }

    async fn remove(&self, path: &str) -> Result<(), Error> {
        require_absolute("Remove", path)?;
        let captured = capture::run(&self.inner, Cmd::new("rm").args([path.to_owned()])).await?;
        if captured.status.success() {
            return Ok(());
        }
        if String::from_utf8_lossy(&captured.stderr).contains("Is a directory") {
            let retry = capture::run(&self.inner, Cmd::new("rmdir").args([path.to_owned()])).await?;
            if retry.status.success() {
                return Ok(());
            }
            return Err(classify::path_failure("Remove", path, &retry).into());
        }
        Err(classify::path_failure("Remove", path, &captured).into())
    }

    async fn mknod(&self, path: &str, mode: u32, dev: u64) -> Result<(), Error> {
        require_absolute("Mknod", path)?;
        let kind = mode & libc::S_IFMT as u32;
        let mut args = vec![path.to_owned()];
        match kind {
            k if k == libc::S_IFIFO as u32 => args.push("p".to_owned()),
            k if k == libc::S_IFCHR as u32 => {
                let (major, minor) = statfmt::major_minor(dev);
                args.extend(["c".to_owned(), major.to_string(), minor.to_string()]);
            }
            k if k == libc::S_IFBLK as u32 => {
                let (major, minor) = statfmt::major_minor(dev);
                args.extend(["b".to_owned(), major.to_string(), minor.to_string()]);
            }
            _ => args.push("p".to_owned()),
        }
        let captured = capture::run(&self.inner, Cmd::new("mknod").args(args)).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("Mknod", path, &captured).into());
        }
        self.chmod(path, mode & 0o7777).await
    }

    async fn write_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error> {
        require_absolute("WriteFile", path)?;
        let existed = self.lstat(path).await.is_ok();
        let cmd = Cmd::new("sh").args(["-c".to_owned(), format!("cat > {}", escape(path))]).stdin(data);
        let captured = capture::run(&self.inner, cmd).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("WriteFile", path, &captured).into());
        }
        if !existed {
            self.chmod(path, mode).await?;
        }
        Ok(())
    }

    async fn append_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error> {
        require_absolute("AppendFile", path)?;
        let cmd = Cmd::new("sh").args(["-c".to_owned(), format!("cat >> {}", escape(path))]).stdin(data);
        let captured = capture::run(&self.inner, cmd).await?;
        if !captured.status.success() {
            return Err(classify::path_failure("AppendFile", path, &captured).into());
        }
        self.chmod(path, mode).await
    }
}

async fn run_for_status<B>(op: &str, path: &str, host: &B, cmd: Cmd) -> Result<(), Error>
where
    B: tether::traits::BaseHost + ?Sized,
{
    let captured = capture::run(host, cmd).await?;
    if captured.status.success() {
        Ok(())
    } else {
        Err(classify::path_failure(op, path, &captured).into())
    }
}

fn parse_id(captured: &capture::Captured, cmd: &str) -> Result<u32, Error> {
    if !captured.status.success() {
        return Err(Error::Run(format!("{cmd}: {:?}", String::from_utf8_lossy(&captured.stderr))));
    }
    String::from_utf8_lossy(&captured.stdout)
        .trim()
        .parse()
        .map_err(|_| Error::Run(format!("{cmd}: unparseable output {:?}", String::from_utf8_lossy(&captured.stdout))))
}

fn parse_dirent(line: &str) -> Option<DirEnt> {
    let mut parts = line.splitn(3, ',');
    let type_letter = parts.next()?;
    let ino: u64 = parts.next()?.parse().ok()?;
    let name = parts.next()?;
    let file_type = match type_letter {
        "f" => FileType::Regular,
        "d" => FileType::Directory,
        "l" => FileType::Symlink,
        "c" => FileType::Char,
        "b" => FileType::Block,
        "p" => FileType::Fifo,
        "s" => FileType::Socket,
        _ => FileType::Unknown,
    };
    Some(DirEnt { ino, file_type, name: name.to_owned() })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use tether::traits::{BaseHost, Host};
    use tether_local::LocalHost;

    use super::*;

    fn shell() -> ShellHost<LocalHost> {
        ShellHost::new(LocalHost::new())
    }

    #[tokio::test]
    async fn chmod_then_lstat_reports_exact_permission_bits() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let path = file.to_str().unwrap().to_owned();

        let host = shell();
        host.chmod(&path, 0o640).await.unwrap();
        let st = host.lstat(&path).await.unwrap();
        assert_eq!(st.mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn lstat_on_missing_path_is_not_found() {
        let host = shell();
        let err = host.lstat("/definitely/not/here/xyz").await.unwrap_err();
        let Error::Path(path_err) = err else { panic!("expected Error::Path") };
        assert!(path_err.is_errno(libc::ENOENT));
    }

    #[tokio::test]
    async fn mkdir_twice_reports_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("sub").to_str().unwrap().to_owned();

        let host = shell();
        host.mkdir(&target, 0o750).await.unwrap();
        let err = host.mkdir(&target, 0o750).await.unwrap_err();
        let Error::Path(path_err) = err else { panic!("expected Error::Path") };
        assert!(path_err.is_errno(libc::EEXIST));
    }

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f").to_str().unwrap().to_owned();

        let host = shell();
        let data: ByteSource = Box::pin(Cursor::new(b"hello shell fallback".to_vec()));
        host.write_file(&file, 0o640, data).await.unwrap();

        let st = host.lstat(&file).await.unwrap();
        assert_eq!(st.mode & 0o777, 0o640);

        let mut reader = host.read_file(&file).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello shell fallback");
    }

    #[tokio::test]
    async fn remove_dispatches_to_rmdir_on_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("d").to_str().unwrap().to_owned();

        let host = shell();
        host.mkdir(&sub, 0o755).await.unwrap();
        host.remove(&sub).await.unwrap();
        assert!(!std::path::Path::new(&sub).exists());
    }

    #[tokio::test]
    async fn read_dir_lists_entries_with_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let path = dir.path().to_str().unwrap().to_owned();

        let host = shell();
        let mut stream = host.read_dir(&path).await.unwrap();
        let mut entries = Vec::new();
        while let Some(item) = tokio_stream::StreamExt::next(&mut stream).await {
            entries.push(item.unwrap());
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].file_type, FileType::Regular);
        assert_eq!(entries[1].name, "sub");
        assert_eq!(entries[1].file_type, FileType::Directory);
    }

    #[tokio::test]
    async fn read_dir_of_a_missing_path_yields_a_single_not_found_item() {
        let host = shell();
        let mut stream = host.read_dir("/definitely/not/here/xyz").await.unwrap();
        let first = tokio_stream::StreamExt::next(&mut stream).await.unwrap();
        let path_err = first.unwrap_err();
        assert!(path_err.is_errno(libc::ENOENT));
        assert!(tokio_stream::StreamExt::next(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn symlink_and_readlink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target").to_str().unwrap().to_owned();
        let link = dir.path().join("link").to_str().unwrap().to_owned();
        std::fs::write(&target, b"x").unwrap();

        let host = shell();
        host.symlink(&target, &link).await.unwrap();
        assert_eq!(host.readlink(&link).await.unwrap(), target);
    }

    #[tokio::test]
    async fn mknod_creates_a_fifo_with_exact_permission_bits() {
        let dir = tempfile::tempdir().unwrap();
        let fifo = dir.path().join("fifo").to_str().unwrap().to_owned();

        let host = shell();
        host.mknod(&fifo, libc::S_IFIFO as u32 | 0o644, 0).await.unwrap();
        let st = host.lstat(&fifo).await.unwrap();
        assert_eq!(st.mode & libc::S_IFMT as u32, libc::S_IFIFO as u32);
        assert_eq!(st.mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn rejects_non_absolute_paths_without_running_anything() {
        let host = shell();
        let err = host.chmod("relative/path", 0o644).await.unwrap_err();
        let Error::Path(path_err) = err else { panic!("expected Error::Path") };
        assert_eq!(path_err.cause, tether::error::Cause::NotAbsolute);
    }

    #[tokio::test]
    async fn host_type_reports_shell() {
        let host = shell();
        assert_eq!(host.host_type(), "shell");
    }
}
