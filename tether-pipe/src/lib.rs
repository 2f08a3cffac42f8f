//! Adapts one reader and one writer into a bidirectional [`Connection`] an
//! RPC framework can treat like a socket, plus a single-shot [`Listener`]
//! that hands a server exactly one accepted connection.
//!
//! The agent process talks only through its own stdin/stdout — two separate
//! unidirectional handles. `tonic`'s server expects a `Stream` of
//! full-duplex, `Connected` IO objects. [`Listener`] is a one-element queue
//! preloaded with a single [`Connection`]; the first `poll_next` returns it
//! and every subsequent poll reports the stream as finished, which matches
//! this transport's single-client topology exactly.

use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_stream::Stream;
use tonic::transport::server::Connected;
use tonic::transport::{Channel, Endpoint, Uri};

/// Opaque connection identity. Never compared; exists only to satisfy
/// `tonic`'s `Connected` trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeConnectInfo;

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("pipe transport: {what} not supported"))
}

/// A bidirectional connection built from an independent reader half and
/// writer half. Read and write proceed over unrelated underlying handles
/// (e.g. a spawned process's stdout and stdin), so unlike a socket, closing
/// one direction never implicitly affects the other.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Builds a connection from a reader half and a writer half.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Opaque local address. Never compared.
    #[must_use]
    pub fn local_addr(&self) -> PipeConnectInfo {
        PipeConnectInfo
    }

    /// Opaque remote address. Never compared.
    #[must_use]
    pub fn peer_addr(&self) -> PipeConnectInfo {
        PipeConnectInfo
    }

    /// Pipes have no deadline concept.
    pub fn set_read_timeout(&self, _timeout: Option<std::time::Duration>) -> io::Result<()> {
        Err(unsupported("read timeouts"))
    }

    /// Pipes have no deadline concept.
    pub fn set_write_timeout(&self, _timeout: Option<std::time::Duration>) -> io::Result<()> {
        Err(unsupported("write timeouts"))
    }

    /// Closes both directions, joining any errors.
    ///
    /// Shutting down the writer signals EOF to the peer; this is the only
    /// direction that can meaningfully fail. The reader has no distinct
    /// close operation — it reports EOF once the peer closes its own
    /// writer — so it is simply dropped.
    pub async fn close(mut self) -> io::Result<()> {
        let writer_result = self.writer.shutdown().await;
        drop(self.reader);
        writer_result
    }
}

impl<R, W> AsyncRead for Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: Unpin,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_read(cx, buf)
    }
}

impl<R, W> AsyncWrite for Connection<R, W>
where
    R: Unpin,
    W: AsyncWrite + Unpin,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        Pin::new(&mut this.writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.writer).poll_shutdown(cx)
    }
}

impl<R, W> Connected for Connection<R, W>
where
    R: Send + 'static,
    W: Send + 'static,
{
    type ConnectInfo = PipeConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        PipeConnectInfo
    }
}

/// A single-slot listener: the first `Accept` returns the preloaded
/// connection, every subsequent one observes end-of-stream.
pub struct Listener<R, W> {
    slot: Option<Connection<R, W>>,
}

impl<R, W> Listener<R, W> {
    /// Preloads the listener with the one connection it will ever hand out.
    #[must_use]
    pub fn new(conn: Connection<R, W>) -> Self {
        Self { slot: Some(conn) }
    }

    /// Closes the listener without ever accepting, dropping the preloaded
    /// connection if one was never taken.
    pub fn close(&mut self) {
        self.slot = None;
    }
}

impl<R, W> Stream for Listener<R, W>
where
    R: Unpin,
    W: Unpin,
{
    type Item = io::Result<Connection<R, W>>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().slot.take().map(Ok))
    }
}

/// Builds a [`tonic::transport::Channel`] talking directly to `connection`,
/// without dialing anything: the client-side counterpart of [`Listener`].
///
/// `tonic::transport::Endpoint` normally dials a URI; here the connector
/// closure ignores the URI entirely and hands back the one pipe connection
/// it was given. Like [`Listener`], it is single-shot — `tonic` only
/// invokes the connector once per `Channel` and reuses that connection for
/// every RPC multiplexed over it, which matches this transport's one
/// spawned-agent-per-client topology. A second connect attempt (which
/// should never happen in practice) fails with a clear error instead of
/// panicking.
///
/// # Errors
/// Returns an error if `tonic` rejects the dummy endpoint URI (never
/// happens in practice, since the connector bypasses actual dialing).
pub async fn connect_channel<R, W>(connection: Connection<R, W>) -> Result<Channel, tonic::transport::Error>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let slot = Mutex::new(Some(connection));
    Endpoint::try_from("http://[::]:0")?
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let taken = slot.lock().expect("pipe connector mutex poisoned").take();
            async move {
                match taken {
                    Some(conn) => Ok(conn),
                    None => Err(unsupported("pipe connector invoked more than once")),
                }
            }
        }))
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};

    #[tokio::test]
    async fn connection_reads_and_writes_through_to_halves() {
        let (mut client_side, agent_side) = tokio::io::duplex(64);
        client_side.write_all(b"ping").await.unwrap();

        let (r, w) = tokio::io::split(agent_side);
        let mut conn = Connection::new(r, w);
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        conn.write_all(b"pong").await.unwrap();
        let mut reply = [0u8; 4];
        client_side.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
    }

    #[tokio::test]
    async fn listener_yields_exactly_one_connection_then_ends() {
        let (_client_side, agent_side) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(agent_side);
        let conn = Connection::new(r, w);
        let mut listener = Listener::new(conn);

        let mut stream = Pin::new(&mut listener);
        let first = std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await;
        assert!(first.is_some());

        let second = std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await;
        assert!(second.is_none());
    }
}
