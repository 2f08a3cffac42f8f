//! [`SudoHost`]: escalates every [`tether::traits::BaseHost::run`] on an
//! inner `BaseHost` through `sudo`, cooperating with a prompt-detection
//! protocol on the child's stdin/stderr so the caller's own stdin is never
//! consumed by sudo's password prompt (§4.6). Remains a `BaseHost` — the
//! lift to a full `Host` is `tether-shell`'s job, since sudo only elevates
//! `Run`.
//!
//! Grounded on the privilege-dropping/process-hardening idiom in
//! `qntx-bux`'s `jail/pre_exec.rs` (interposing on a child's launch without
//! touching the caller's view of it) and `openssh-rust-openssh`'s
//! `escape.rs` for quoting the composed shell script.

mod gate;

use std::borrow::Cow;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::oneshot;

use tether::error::Error;
use tether::traits::BaseHost;
use tether_proto::{Cmd, WaitStatus};

use gate::{Signal, StderrGate, StdinGate};

fn escape(s: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(s)).into_owned()
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Escalates every `Run` on `inner` through `sudo`. Construct with
/// [`SudoHost::connect`], which probes `inner` once for the `PATH` sudo
/// configures (`secure_path`, typically), then injects it into every
/// future invocation that doesn't supply its own environment.
pub struct SudoHost<B> {
    inner: B,
    path: Mutex<String>,
}

impl<B> SudoHost<B>
where
    B: BaseHost,
{
    /// Wraps `inner`, discovering the `PATH` sudo grants commands by
    /// running a bare `env` through it once.
    pub async fn connect(inner: B) -> Result<Self, Error> {
        let path = discover_path(&inner).await?;
        Ok(Self { inner, path: Mutex::new(path) })
    }

    fn discovered_path(&self) -> String {
        self.path.lock().expect("path mutex poisoned").clone()
    }
}

async fn discover_path<B>(inner: &B) -> Result<String, Error>
where
    B: BaseHost,
{
    let ok_marker = random_token();
    let prompt_marker = random_token();
    let script = format!("echo -n {} 1>&2 && exec env", escape(&ok_marker));
    let cmd = rewrite(&prompt_marker, &ok_marker, Cmd::new("sh").args(["-c".to_owned(), script]), None);
    let captured = run_capturing_stdout(inner, cmd).await?;
    captured
        .lines()
        .find_map(|line| line.strip_prefix("PATH=").map(str::to_owned))
        .ok_or_else(|| Error::Run("sudo: `env` probe produced no PATH line".to_owned()))
}

async fn run_capturing_stdout<B>(inner: &B, cmd: Cmd) -> Result<String, Error>
where
    B: BaseHost,
{
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;
    use std::task::Poll;
    use tokio::io::AsyncWrite;

    #[derive(Clone, Default)]
    struct BufSink(Arc<StdMutex<Vec<u8>>>);
    impl AsyncWrite for BufSink {
        fn poll_write(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
            self.0.lock().expect("buf mutex poisoned").extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    let buf = Arc::new(StdMutex::new(Vec::new()));
    let cmd = cmd.stdout(Box::pin(BufSink(Arc::clone(&buf))));
    let status = inner.run(cmd).await?;
    if !status.success() {
        return Err(Error::Run(format!("sudo probe exited {status:?}")));
    }
    Ok(String::from_utf8_lossy(&buf.lock().expect("buf mutex poisoned")).into_owned())
}

/// Rewrites `cmd` into the `sudo --stdin --prompt ... -- sh -c "..."`
/// invocation, gating its stdin/stderr through [`StdinGate`]/[`StderrGate`].
/// `discovered_path` is injected only when `cmd` carries no environment of
/// its own; `None` (the internal PATH self-probe) omits the
/// `env --ignore-environment` prefix entirely.
fn rewrite(prompt_marker: &str, ok_marker: &str, cmd: Cmd, discovered_path: Option<&str>) -> Cmd {
    let dir = cmd.effective_dir().to_owned();
    let (tx, rx) = oneshot::channel();

    let exec_part = match discovered_path {
        None => shell_words(&cmd.path, &cmd.args),
        Some(path) => {
            let env = if cmd.env.is_empty() { vec!["LANG=en_US.UTF-8".to_owned(), format!("PATH={path}")] } else { cmd.env.clone() };
            format!("env --ignore-environment {} {}", env.iter().map(|kv| escape(kv)).collect::<Vec<_>>().join(" "), shell_words(&cmd.path, &cmd.args))
        }
    };

    let script = format!("echo -n {} 1>&2 && cd {} && exec {}", escape(ok_marker), escape(&dir), exec_part);

    let Cmd { stdin, stdout, stderr, .. } = cmd;
    Cmd::new("sudo")
        .args(["--stdin".to_owned(), "--prompt".to_owned(), prompt_marker.to_owned(), "--".to_owned(), "sh".to_owned(), "-c".to_owned(), script])
        .stdin(Box::pin(StdinGate::new(stdin, rx)))
        .stderr(Box::pin(StderrGate::new(prompt_marker.to_owned(), ok_marker.to_owned(), stderr, tx)))
        .stdout_or(stdout)
}

fn shell_words(path: &str, args: &[String]) -> String {
    std::iter::once(path).chain(args.iter().map(String::as_str)).map(escape).collect::<Vec<_>>().join(" ")
}

trait CmdExt {
    fn stdout_or(self, stdout: Option<tether_proto::types::StdioSink>) -> Self;
}

impl CmdExt for Cmd {
    fn stdout_or(self, stdout: Option<tether_proto::types::StdioSink>) -> Self {
        match stdout {
            Some(sink) => self.stdout(sink),
            None => self,
        }
    }
}

#[async_trait]
impl<B> BaseHost for SudoHost<B>
where
    B: BaseHost,
{
    async fn run(&self, cmd: Cmd) -> Result<WaitStatus, Error> {
        let prompt_marker = random_token();
        let ok_marker = random_token();
        let path = self.discovered_path();
        let sudo_cmd = rewrite(&prompt_marker, &ok_marker, cmd, Some(&path));
        let status = self.inner.run(sudo_cmd).await?;

        if status.exited && status.exit_code == 127 {
            return Err(Error::Run("command not found (sudo reported exit 127)".to_owned()));
        }
        Ok(status)
    }

    fn string(&self) -> String {
        format!("sudo over {}", self.inner.string())
    }

    fn host_type(&self) -> &'static str {
        "sudo"
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;
    use std::pin::Pin;

    use tokio::io::{AsyncReadExt, ReadBuf};

    use super::*;

    #[test]
    fn random_tokens_are_distinct_and_fixed_length() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn stdin_gate_blocks_until_unlocked_then_forwards_user_bytes() {
        let (tx, rx) = oneshot::channel();
        let src: tether_proto::types::StdinSource = Box::pin(Cursor::new(b"user payload".to_vec()));
        let mut gate = StdinGate::new(Some(src), rx);

        let mut buf = [0u8; 4];
        let mut read_buf = ReadBuf::new(&mut buf);
        let waker = futures_noop_waker();
        let mut cx = std::task::Context::from_waker(&waker);
        assert!(Pin::new(&mut gate).poll_read(&mut cx, &mut read_buf).is_pending());

        tx.send(Signal::Unlock).unwrap();

        let mut out = Vec::new();
        gate.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"user payload");
    }

    #[tokio::test]
    async fn stdin_gate_emits_password_exactly_once_before_going_transparent() {
        let (tx, rx) = oneshot::channel();
        let src: tether_proto::types::StdinSource = Box::pin(Cursor::new(b"user payload".to_vec()));
        let mut gate = StdinGate::new(Some(src), rx);

        tx.send(Signal::Password("hunter2".to_owned())).unwrap();

        let mut out = Vec::new();
        gate.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hunter2\nuser payload");
    }

    fn futures_noop_waker() -> std::task::Waker {
        use std::task::{RawWaker, RawWakerVTable, Waker};
        fn clone(_: *const ()) -> RawWaker {
            raw()
        }
        fn noop(_: *const ()) {}
        fn raw() -> RawWaker {
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        unsafe { Waker::from_raw(raw()) }
    }

    #[tokio::test]
    async fn stderr_gate_strips_markers_and_forwards_the_rest() {
        let (tx, rx) = oneshot::channel();
        let forwarded = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        #[derive(Clone)]
        struct Capture(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);
        impl tokio::io::AsyncWrite for Capture {
            fn poll_write(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>, buf: &[u8]) -> std::task::Poll<std::io::Result<usize>> {
                self.0.lock().unwrap().extend_from_slice(buf);
                std::task::Poll::Ready(Ok(buf.len()))
            }
            fn poll_flush(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
            fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Ok(()))
            }
        }

        let sink: tether_proto::types::StdioSink = Box::pin(Capture(std::sync::Arc::clone(&forwarded)));
        let mut gate = StderrGate::new("PROMPT".to_owned(), "OK".to_owned(), Some(sink), tx);

        let mut out = Vec::new();
        tokio::io::AsyncWriteExt::write_all(&mut gate, b"before OK after").await.unwrap();
        out.extend_from_slice(&forwarded.lock().unwrap());

        assert_eq!(out, b"before  after");
        assert!(matches!(rx.await.unwrap(), Signal::Unlock));
    }
}
