//! [`LocalHost`]: a [`BaseHost`] that runs commands directly on the current
//! machine via `tokio::process::Command` instead of reaching any remote
//! target. The degenerate case of the `Host` composition — useful on its
//! own for testing the upper layers (`tether`'s `AgentClient`, `tether-shell`,
//! `tether-sudo`) without a real network hop, and as the base a caller can
//! wrap with `tether-sudo::SudoHost` to escalate privileges on the local
//! machine.
//!
//! Grounded on the stdio-multiplexing loop in `tether-agent`'s `Run` RPC
//! driver, which is itself a generalization of the spawn/pipe/wait dance
//! `openssh`'s `process_impl::Command`/`RemoteChild` use for the remote case.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use tether::error::Error;
use tether::traits::BaseHost;
use tether_proto::{Cmd, WaitStatus};

const CHUNK_SIZE: usize = 32 * 1024;

/// Runs commands on the local machine. Carries no state; cheap to construct
/// and to clone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalHost;

impl LocalHost {
    /// Builds a new local host.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BaseHost for LocalHost {
    #[tracing::instrument(skip(self, cmd), fields(path = %cmd.path))]
    async fn run(&self, cmd: Cmd) -> Result<WaitStatus, Error> {
        let Cmd { path, args, env, dir, stdin, stdout, stderr } = cmd;
        drive(path, args, env, dir, stdin, stdout, stderr).await
    }

    fn string(&self) -> String {
        "local".to_owned()
    }

    fn host_type(&self) -> &'static str {
        "local"
    }

    #[tracing::instrument(skip(self))]
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

async fn drive(
    path: String,
    args: Vec<String>,
    env: Vec<String>,
    dir: String,
    mut stdin: Option<tether_proto::types::StdinSource>,
    mut stdout: Option<tether_proto::types::StdioSink>,
    mut stderr: Option<tether_proto::types::StdioSink>,
) -> Result<WaitStatus, Error> {
    let cmd_for_env = Cmd::new(&path).env(env).dir(dir);
    let env = cmd_for_env.effective_env();
    let effective_dir = cmd_for_env.effective_dir().to_owned();

    let mut command = Command::new(&path);
    command.args(&args).env_clear().envs(split_env(&env)).current_dir(&effective_dir).kill_on_drop(true);
    command.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
    command.stdout(if stdout.is_some() { Stdio::piped() } else { Stdio::null() });
    command.stderr(if stderr.is_some() { Stdio::piped() } else { Stdio::null() });

    let mut child = command.spawn().map_err(|e| Error::Run(format!("{path}: {e}")))?;

    let mut child_stdin = child.stdin.take();
    let mut child_stdout = child.stdout.take();
    let mut child_stderr = child.stderr.take();

    let mut stdout_buf = vec![0u8; CHUNK_SIZE];
    let mut stderr_buf = vec![0u8; CHUNK_SIZE];
    let mut stdin_done = stdin.is_none() || child_stdin.is_none();
    let mut stdout_done = child_stdout.is_none();
    let mut stderr_done = child_stderr.is_none();

    loop {
        if stdin_done && stdout_done && stderr_done {
            break;
        }

        tokio::select! {
            n = forward_stdin(&mut stdin, &mut child_stdin), if !stdin_done => {
                match n {
                    Ok(true) => {}
                    Ok(false) | Err(_) => {
                        stdin_done = true;
                        child_stdin = None;
                    }
                }
            }
            n = read_some(&mut child_stdout, &mut stdout_buf), if !stdout_done => {
                match n {
                    Some(Ok(0)) | None => stdout_done = true,
                    Some(Ok(len)) => {
                        if let Some(sink) = stdout.as_mut()
                            && sink.write_all(&stdout_buf[..len]).await.is_err()
                        {
                            stdout_done = true;
                        }
                    }
                    Some(Err(_)) => stdout_done = true,
                }
            }
            n = read_some(&mut child_stderr, &mut stderr_buf), if !stderr_done => {
                match n {
                    Some(Ok(0)) | None => stderr_done = true,
                    Some(Ok(len)) => {
                        if let Some(sink) = stderr.as_mut()
                            && sink.write_all(&stderr_buf[..len]).await.is_err()
                        {
                            stderr_done = true;
                        }
                    }
                    Some(Err(_)) => stderr_done = true,
                }
            }
        }
    }

    drop(child_stdin);
    if let Some(sink) = stdout.as_mut() {
        let _ = sink.flush().await;
    }
    if let Some(sink) = stderr.as_mut() {
        let _ = sink.flush().await;
    }

    let status = child.wait().await.map_err(|e| Error::Run(format!("{path}: {e}")))?;
    Ok(match status.code() {
        Some(code) => WaitStatus { exit_code: code, exited: true, signal: String::new() },
        None => WaitStatus { exit_code: 0, exited: false, signal: signal_name(status.signal()) },
    })
}

/// Reads one buffered chunk from `stdin` and writes it straight through to
/// the child's stdin pipe. Returns `Ok(true)` while there is more to
/// forward, `Ok(false)` once `stdin` is exhausted (the child's stdin is
/// then closed by the caller dropping its handle).
async fn forward_stdin(
    stdin: &mut Option<tether_proto::types::StdinSource>,
    child_stdin: &mut Option<tokio::process::ChildStdin>,
) -> Result<bool, std::io::Error> {
    let Some(src) = stdin.as_mut() else { return Ok(false) };
    let Some(sink) = child_stdin.as_mut() else { return Ok(false) };

    let mut buf = [0u8; CHUNK_SIZE];
    let n = src.read(&mut buf).await?;
    if n == 0 {
        *stdin = None;
        return Ok(false);
    }
    sink.write_all(&buf[..n]).await?;
    Ok(true)
}

async fn read_some(stream: &mut Option<impl tokio::io::AsyncRead + Unpin>, buf: &mut [u8]) -> Option<std::io::Result<usize>> {
    match stream {
        Some(s) => Some(s.read(buf).await),
        None => None,
    }
}

fn split_env(env: &[String]) -> Vec<(String, String)> {
    env.iter().filter_map(|kv| kv.split_once('=')).map(|(k, v)| (k.to_owned(), v.to_owned())).collect()
}

fn signal_name(signal: Option<i32>) -> String {
    match signal {
        Some(sig) => nix::sys::signal::Signal::try_from(sig).map_or_else(|_| sig.to_string(), |s| s.as_str().to_owned()),
        None => String::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncWrite;

    use super::*;

    #[derive(Clone, Default)]
    struct BufSink(Arc<Mutex<Vec<u8>>>);

    impl AsyncWrite for BufSink {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            #[allow(clippy::unwrap_used)]
            self.0.lock().unwrap().extend_from_slice(buf);
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: std::pin::Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn captures_stdout_of_a_spawned_command() {
        let host = LocalHost::new();
        let out = Arc::new(Mutex::new(Vec::new()));
        let cmd = Cmd::new("/bin/echo").args(["hello"]).stdout(Box::pin(BufSink(Arc::clone(&out))));

        let status = host.run(cmd).await.unwrap();
        assert!(status.success());
        assert_eq!(out.lock().unwrap().as_slice(), b"hello\n");
    }

    #[tokio::test]
    async fn reports_non_zero_exit_without_erroring() {
        let host = LocalHost::new();
        let cmd = Cmd::new("/bin/sh").args(["-c", "exit 7"]);

        let status = host.run(cmd).await.unwrap();
        assert!(status.exited);
        assert_eq!(status.exit_code, 7);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let host = LocalHost::new();
        let cmd = Cmd::new("/no/such/executable-xyz");

        assert!(host.run(cmd).await.is_err());
    }

    #[tokio::test]
    async fn close_is_a_harmless_no_op() {
        let host = LocalHost::new();
        host.close().await.unwrap();
        host.close().await.unwrap();
    }
}
