//! The stdin/stderr barrier (§4.6, §9 "sudo stdin barrier"): sudo's own
//! password prompt and the real child's stdin share one pipe, so the
//! caller's stdin bytes must not be read until sudo has either consumed a
//! password or announced (via the `SUDO_OK` marker) that it needs none.
//!
//! [`StderrGate`] watches the inner `Run`'s stderr for the two per-invocation
//! markers and drives [`StdinGate`] across a one-shot channel; both wrap an
//! otherwise-ordinary sink/source and are otherwise transparent.

use std::future::Future;
use std::io;
use std::os::fd::AsRawFd;
use std::pin::Pin;
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

use tether_proto::types::{StdinSource, StdioSink};

/// What the stderr gate tells the stdin gate once it knows enough to let
/// real stdin bytes through.
pub(crate) enum Signal {
    /// A password was read (fresh or cached) and must be emitted once.
    Password(String),
    /// Sudo proceeded without prompting; no password needed.
    Unlock,
}

fn cached_password() -> &'static Mutex<Option<String>> {
    static CACHE: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(None))
}

/// Reads a password from the controlling terminal in raw (no-echo) mode.
/// Blocking: terminal interaction is inherently synchronous and rare enough
/// that doing it inline in `poll_write` is an acceptable simplification.
fn read_password_from_tty(prompt: &str) -> io::Result<String> {
    use std::io::{BufRead, Write};

    let mut tty = std::fs::OpenOptions::new().read(true).write(true).open("/dev/tty")?;
    write!(tty, "{prompt}")?;
    tty.flush()?;

    let fd = tty.as_raw_fd();
    let to_io = |e: nix::Error| io::Error::from_raw_os_error(e as i32);
    let original = nix::sys::termios::tcgetattr(fd).map_err(to_io)?;
    let mut raw = original.clone();
    raw.local_flags.remove(nix::sys::termios::LocalFlags::ECHO);
    nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &raw).map_err(to_io)?;

    let result = (|| -> io::Result<String> {
        let mut line = String::new();
        io::BufReader::new(&tty).read_line(&mut line)?;
        Ok(line.trim_end_matches('\n').to_owned())
    })();

    let _ = nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &original);
    let _ = writeln!(tty);
    result
}

fn password(prompt: &str) -> io::Result<String> {
    if let Some(cached) = cached_password().lock().expect("cache mutex poisoned").clone() {
        return Ok(cached);
    }
    let pw = read_password_from_tty(prompt)?;
    *cached_password().lock().expect("cache mutex poisoned") = Some(pw.clone());
    Ok(pw)
}

/// Finds the first occurrence of `marker`'s bytes in `haystack`, returning
/// its byte range.
fn find(haystack: &[u8], marker: &str) -> Option<std::ops::Range<usize>> {
    let needle = marker.as_bytes();
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle).map(|start| start..start + needle.len())
}

/// Wraps the caller's (optional) stderr sink, watching for the `PROMPT`/
/// `SUDO_OK` markers this invocation was rewritten with and stripping them
/// before forwarding whatever remains.
pub(crate) struct StderrGate {
    prompt_marker: String,
    prompt_text: String,
    ok_marker: String,
    inner: Option<StdioSink>,
    signal_tx: Option<oneshot::Sender<Signal>>,
    prompt_seen: bool,
}

impl StderrGate {
    pub(crate) fn new(prompt_marker: String, ok_marker: String, inner: Option<StdioSink>, signal_tx: oneshot::Sender<Signal>) -> Self {
        Self { prompt_text: format!("{prompt_marker}: "), prompt_marker, ok_marker, inner, signal_tx: Some(signal_tx), prompt_seen: false }
    }
}

impl AsyncWrite for StderrGate {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut forward = buf.to_vec();

        if !self.prompt_seen
            && let Some(range) = find(&forward, &self.prompt_marker)
        {
            self.prompt_seen = true;
            forward.drain(range);
            if let Some(tx) = self.signal_tx.take() {
                let pw = password(&self.prompt_text).unwrap_or_default();
                let _ = tx.send(Signal::Password(pw));
            }
        }

        if let Some(range) = find(&forward, &self.ok_marker) {
            forward.drain(range);
            if let Some(tx) = self.signal_tx.take() {
                let _ = tx.send(Signal::Unlock);
            }
        }

        if let Some(inner) = self.inner.as_mut()
            && !forward.is_empty()
        {
            match Pin::new(inner).poll_write(cx, &forward) {
                Poll::Ready(Ok(_) | Err(_)) | Poll::Pending => {}
            }
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

enum StdinState {
    Waiting(oneshot::Receiver<Signal>),
    EmittingPassword(Vec<u8>, usize),
    Transparent,
}

/// Wraps the caller's (optional) stdin source, blocking every read until
/// [`StderrGate`] signals either a password to emit or an outright unlock.
pub(crate) struct StdinGate {
    inner: Option<StdinSource>,
    state: StdinState,
}

impl StdinGate {
    pub(crate) fn new(inner: Option<StdinSource>, signal_rx: oneshot::Receiver<Signal>) -> Self {
        Self { inner, state: StdinState::Waiting(signal_rx) }
    }
}

impl AsyncRead for StdinGate {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            match &mut self.state {
                StdinState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(Signal::Unlock) | Err(_)) => self.state = StdinState::Transparent,
                    Poll::Ready(Ok(Signal::Password(pw))) => {
                        let mut bytes = pw.into_bytes();
                        bytes.push(b'\n');
                        self.state = StdinState::EmittingPassword(bytes, 0);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                StdinState::EmittingPassword(bytes, pos) => {
                    if *pos >= bytes.len() {
                        self.state = StdinState::Transparent;
                        continue;
                    }
                    let remaining = &bytes[*pos..];
                    let n = remaining.len().min(buf.remaining());
                    buf.put_slice(&remaining[..n]);
                    *pos += n;
                    return Poll::Ready(Ok(()));
                }
                StdinState::Transparent => {
                    return match self.inner.as_mut() {
                        Some(src) => Pin::new(src).poll_read(cx, buf),
                        None => Poll::Ready(Ok(())),
                    };
                }
            }
        }
    }
}
