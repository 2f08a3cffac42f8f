//! Runs a [`Cmd`] through a [`BaseHost`] while capturing its stdout/stderr
//! into memory, since every operation this crate realizes needs to inspect
//! the command's output or classify its stderr.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use tether::error::Error;
use tether::traits::BaseHost;
use tether_proto::{Cmd, WaitStatus};

/// The captured result of running a command to completion.
pub(crate) struct Captured {
    pub status: WaitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs `cmd` on `host`, wiring its stdout/stderr into in-memory sinks and
/// returning the full capture once the process exits.
pub(crate) async fn run<B>(host: &B, cmd: Cmd) -> Result<Captured, Error>
where
    B: BaseHost + ?Sized,
{
    let stdout = Arc::new(Mutex::new(Vec::new()));
    let stderr = Arc::new(Mutex::new(Vec::new()));
    let cmd = cmd.stdout(Box::pin(BufSink(Arc::clone(&stdout)))).stderr(Box::pin(BufSink(Arc::clone(&stderr))));

    let status = host.run(cmd).await?;
    Ok(Captured { status, stdout: drain(&stdout), stderr: drain(&stderr) })
}

fn drain(buf: &Mutex<Vec<u8>>) -> Vec<u8> {
    buf.lock().ok().map(|g| g.clone()).unwrap_or_default()
}

#[derive(Clone)]
struct BufSink(Arc<Mutex<Vec<u8>>>);

impl AsyncWrite for BufSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        if let Ok(mut guard) = self.0.lock() {
            guard.extend_from_slice(buf);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
