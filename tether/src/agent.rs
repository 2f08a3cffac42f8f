//! [`AgentClient`]: bootstraps the prebuilt `tether-agent` binary onto a
//! [`BaseHost`] and speaks the generated gRPC schema over it, translating
//! every [`Host`] method into one RPC and every failure into a
//! [`crate::error::PathError`] or [`crate::error::UnknownUserError`]/
//! [`crate::error::UnknownGroupError`] reconstructed from trailer metadata.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::io::Read as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tonic::Streaming;
use tonic::transport::Channel;

use tether_proto::pb::{
    ChmodRequest, Chunk, CmdStart, Empty, FileMeta, LchownRequest, LookupGroupRequest, LookupRequest, LstatRequest, MkdirRequest,
    MknodRequest, ReadDirRequest, ReadFileRequest, RemoveRequest, RunRequest, SymlinkRequest, WriteFileRequest, run_request, run_response,
    write_file_request,
};
use tether_proto::{Cmd, WaitStatus};

use crate::error::{Error, path_error_from_status};
use crate::traits::{BaseHost, ByteSource, DirEntStream, FileReader, GroupRecord, Host, UserRecord, require_absolute};

const TEMP_NAME_TEMPLATE: &str = "tether-agent.XXXXXXXX";
const CHUNK_SIZE: usize = 32 * 1024;
const DUPLEX_BUF: usize = 64 * 1024;

/// Talks to a `tether-agent` process spawned on top of an inner
/// [`BaseHost`]. Construct with [`AgentClient::connect`], which performs the
/// full bootstrap sequence: deliver the embedded agent binary, spawn it, and
/// dial a gRPC channel over its stdin/stdout.
pub struct AgentClient<B> {
    base: Arc<B>,
    rpc: tether_proto::AgentClient<Channel>,
    remote_path: String,
    description: String,
    spawned: AsyncMutex<Option<JoinHandle<Result<WaitStatus, Error>>>>,
}

impl<B> AgentClient<B>
where
    B: BaseHost + 'static,
{
    /// Runs the bootstrap sequence (§4.4): copies the matching prebuilt agent
    /// binary onto `base`, spawns it, dials a gRPC channel over its
    /// stdin/stdout, and verifies it is alive with a `Ping`.
    ///
    /// # Errors
    /// Returns an error if any bootstrap step fails: `base`'s target has no
    /// matching embedded binary, delivering or spawning the binary fails, the
    /// transport cannot be established, or the post-connect `Ping` does not
    /// reply `"Pong"`.
    pub async fn connect(base: B) -> Result<Self, Error> {
        let base = Arc::new(base);
        let description = format!("agent over {}", base.string());

        let (_mktemp_status, remote_path) = run_capture(base.as_ref(), "mktemp", &["-t", TEMP_NAME_TEMPLATE]).await?;
        if remote_path.is_empty() {
            return Err(Error::Run(format!("{description}: mktemp produced no path")));
        }

        run_to_success(base.as_ref(), Cmd::new("chmod").args(["0755", remote_path.as_str()])).await?;

        let (_os_status, os) = run_capture(base.as_ref(), "uname", &["-o"]).await?;
        let (_arch_status, arch) = run_capture(base.as_ref(), "uname", &["-m"]).await?;
        let key = tether_agent_bin::os_arch_key(&os, &arch)?;
        let gz = tether_agent_bin::agent_bin(&key).ok_or_else(|| Error::NoAgentBinary(key.clone()))?;

        let mut binary = Vec::new();
        GzDecoder::new(gz).read_to_end(&mut binary).map_err(Error::Io)?;

        let deliver = format!("cat > {}", shell_escape::unix::escape(std::borrow::Cow::Borrowed(remote_path.as_str())));
        let deliver_cmd = Cmd::new("sh").args(["-c", deliver.as_str()]).stdin(Box::pin(SliceSource::new(binary)));
        run_to_success(base.as_ref(), deliver_cmd).await?;

        let (client_writer, agent_stdin) = tokio::io::duplex(DUPLEX_BUF);
        let (agent_stdout, client_reader) = tokio::io::duplex(DUPLEX_BUF);

        let spawn_cmd = Cmd::new(remote_path.clone()).stdin(Box::pin(agent_stdin)).stdout(Box::pin(agent_stdout));
        let spawn_base = Arc::clone(&base);
        let spawned = tokio::spawn(async move { spawn_base.run(spawn_cmd).await });

        let connection = tether_pipe::Connection::new(client_reader, client_writer);
        let channel = tether_pipe::connect_channel(connection).await.map_err(Error::Transport)?;
        let mut rpc = tether_proto::AgentClient::new(channel);

        match rpc.ping(Empty {}).await {
            Ok(reply) if reply.into_inner().message == "Pong" => {}
            Ok(reply) => return Err(Error::PingMismatch(reply.into_inner().message)),
            Err(status) => return Err(Error::Status(status)),
        }

        Ok(Self { base, rpc, remote_path, description, spawned: AsyncMutex::new(Some(spawned)) })
    }

    async fn join_spawned(&self) -> Result<(), Error> {
        let handle = self.spawned.lock().await.take();
        let Some(handle) = handle else {
            return Ok(());
        };
        match handle.await {
            Ok(Ok(_status)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(Error::Run(format!("{}: agent process task panicked: {join_err}", self.description))),
        }
    }
}

#[async_trait]
impl<B> BaseHost for AgentClient<B>
where
    B: BaseHost + 'static,
{
    async fn run(&self, mut cmd: Cmd) -> Result<WaitStatus, Error> {
        let cmd_start = CmdStart {
            path: cmd.path.clone(),
            args: cmd.args.clone(),
            env: cmd.effective_env(),
            dir: cmd.effective_dir().to_owned(),
            stdin_enabled: cmd.stdin.is_some(),
            stdout_enabled: cmd.stdout.is_some(),
            stderr_enabled: cmd.stderr.is_some(),
        };

        let (tx, rx) = mpsc::channel::<RunRequest>(16);
        tx.send(RunRequest { payload: Some(run_request::Payload::Cmd(cmd_start)) })
            .await
            .map_err(|_| Error::Run(format!("{}: Run channel closed before start", self.description)))?;

        let stdin_src = cmd.stdin.take();
        tokio::spawn(forward_stdin(stdin_src, tx));

        let outbound = tokio_stream::wrappers::ReceiverStream::new(rx);
        let response = self.rpc.clone().run(outbound).await.map_err(Error::Status)?;
        let mut inbound = response.into_inner();

        let mut stdout_sink = cmd.stdout.take();
        let mut stderr_sink = cmd.stderr.take();
        let mut wait_status = None;

        while let Some(msg) = inbound.next().await {
            let msg = msg.map_err(Error::Status)?;
            match msg.payload {
                Some(run_response::Payload::StdoutChunk(data)) => {
                    if let Some(sink) = stdout_sink.as_mut() {
                        sink.write_all(&data).await.map_err(Error::Io)?;
                    }
                }
                Some(run_response::Payload::StderrChunk(data)) => {
                    if let Some(sink) = stderr_sink.as_mut() {
                        sink.write_all(&data).await.map_err(Error::Io)?;
                    }
                }
                Some(run_response::Payload::WaitStatus(ws)) => wait_status = Some(WaitStatus::from(ws)),
                None => {}
            }
        }

        if let Some(sink) = stdout_sink.as_mut() {
            sink.flush().await.map_err(Error::Io)?;
        }
        if let Some(sink) = stderr_sink.as_mut() {
            sink.flush().await.map_err(Error::Io)?;
        }

        wait_status.ok_or_else(|| Error::Run(format!("{}: Run stream closed without a final wait status", self.description)))
    }

    fn string(&self) -> String {
        self.description.clone()
    }

    fn host_type(&self) -> &'static str {
        "agent"
    }

    async fn close(&self) -> Result<(), Error> {
        let shutdown_result = self.rpc.clone().shutdown(Empty {}).await.map(|_| ()).map_err(Error::from);
        let join_result = self.join_spawned().await;
        let base_result = self.base.close().await;
        Error::join_all([shutdown_result, join_result, base_result])
    }
}

#[async_trait]
impl<B> Host for AgentClient<B>
where
    B: BaseHost + 'static,
{
    async fn geteuid(&self) -> Result<u32, Error> {
        self.rpc.clone().geteuid(Empty {}).await.map(|r| r.into_inner().uid).map_err(Error::Status)
    }

    async fn getegid(&self) -> Result<u32, Error> {
        self.rpc.clone().getegid(Empty {}).await.map(|r| r.into_inner().gid).map_err(Error::Status)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), Error> {
        require_absolute("Chmod", path)?;
        self.rpc
            .clone()
            .chmod(ChmodRequest { name: path.to_owned(), mode })
            .await
            .map(|_| ())
            .map_err(|status| path_error_from_status("Chmod", path, &status).into())
    }

    async fn lchown(&self, path: &str, uid: u32, gid: u32) -> Result<(), Error> {
        require_absolute("Lchown", path)?;
        self.rpc
            .clone()
            .lchown(LchownRequest { name: path.to_owned(), uid, gid })
            .await
            .map(|_| ())
            .map_err(|status| path_error_from_status("Lchown", path, &status).into())
    }

    async fn lookup(&self, username: &str) -> Result<UserRecord, Error> {
        match self.rpc.clone().lookup(LookupRequest { username: username.to_owned() }).await {
            Ok(reply) => {
                let u = reply.into_inner();
                Ok(UserRecord { uid: u.uid, gid: u.gid, username: u.username, name: u.name, home_dir: u.home_dir, shell: u.shell })
            }
            Err(status) if status.code() == tonic::Code::NotFound => {
                let query = tether_proto::unknown_query_from_status(&status).unwrap_or_else(|| username.to_owned());
                Err(crate::error::UnknownUserError { username: query }.into())
            }
            Err(status) => Err(Error::Status(status)),
        }
    }

    async fn lookup_group(&self, name: &str) -> Result<GroupRecord, Error> {
        match self.rpc.clone().lookup_group(LookupGroupRequest { name: name.to_owned() }).await {
            Ok(reply) => {
                let g = reply.into_inner();
                Ok(GroupRecord { gid: g.gid, name: g.name })
            }
            Err(status) if status.code() == tonic::Code::NotFound => {
                let query = tether_proto::unknown_query_from_status(&status).unwrap_or_else(|| name.to_owned());
                Err(crate::error::UnknownGroupError { name: query }.into())
            }
            Err(status) => Err(Error::Status(status)),
        }
    }

    async fn lstat(&self, path: &str) -> Result<tether_proto::StatT, Error> {
        require_absolute("Lstat", path)?;
        self.rpc
            .clone()
            .lstat(LstatRequest { name: path.to_owned() })
            .await
            .map(|r| r.into_inner().into())
            .map_err(|status| path_error_from_status("Lstat", path, &status).into())
    }

    async fn read_dir(&self, path: &str) -> Result<DirEntStream, Error> {
        require_absolute("ReadDir", path)?;
        let response = self
            .rpc
            .clone()
            .read_dir(ReadDirRequest { name: path.to_owned() })
            .await
            .map_err(|status| path_error_from_status("ReadDir", path, &status))?;

        let path_owned = path.to_owned();
        let mapped: DirEntStream = Box::pin(response.into_inner().map(move |item| match item {
            Ok(entry) => Ok(tether_proto::DirEnt::from(entry)),
            Err(status) => Err(path_error_from_status("ReadDir", &path_owned, &status)),
        }));
        Ok(mapped)
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), Error> {
        require_absolute("Mkdir", path)?;
        self.rpc
            .clone()
            .mkdir(MkdirRequest { name: path.to_owned(), mode })
            .await
            .map(|_| ())
            .map_err(|status| path_error_from_status("Mkdir", path, &status).into())
    }

    async fn read_file(&self, path: &str) -> Result<FileReader, Error> {
        require_absolute("ReadFile", path)?;
        let response = self
            .rpc
            .clone()
            .read_file(ReadFileRequest { name: path.to_owned() })
            .await
            .map_err(|status| path_error_from_status("ReadFile", path, &status))?;

        let mut streaming = response.into_inner();
        let first = streaming.next().await;
        let first_error = match first {
            Some(Ok(_)) | None => None,
            Some(Err(ref status)) => Some(path_error_from_status("ReadFile", path, status)),
        };
        if let Some(err) = first_error {
            return Err(err.into());
        }

        let first_data = match first {
            Some(Ok(chunk)) => Some(chunk.data),
            _ => None,
        };
        let reader: FileReader = Box::pin(ChunkReader { first: first_data, pos: 0, streaming });
        Ok(reader)
    }

    async fn symlink(&self, oldname: &str, newname: &str) -> Result<(), Error> {
        require_absolute("Symlink", newname)?;
        self.rpc
            .clone()
            .symlink(SymlinkRequest { oldname: oldname.to_owned(), newname: newname.to_owned() })
            .await
            .map(|_| ())
            .map_err(|status| path_error_from_status("Symlink", newname, &status).into())
    }

    async fn readlink(&self, path: &str) -> Result<String, Error> {
        require_absolute("Readlink", path)?;
        self.rpc
            .clone()
            .readlink(tether_proto::pb::ReadlinkRequest { name: path.to_owned() })
            .await
            .map(|r| r.into_inner().destination)
            .map_err(|status| path_error_from_status("Readlink", path, &status).into())
    }

    async fn remove(&self, path: &str) -> Result<(), Error> {
        require_absolute("Remove", path)?;
        self.rpc
            .clone()
            .remove(RemoveRequest { name: path.to_owned() })
            .await
            .map(|_| ())
            .map_err(|status| path_error_from_status("Remove", path, &status).into())
    }

    async fn mknod(&self, path: &str, mode: u32, dev: u64) -> Result<(), Error> {
        require_absolute("Mknod", path)?;
        self.rpc
            .clone()
            .mknod(MknodRequest { path: path.to_owned(), mode, dev })
            .await
            .map(|_| ())
            .map_err(|status| path_error_from_status("Mknod", path, &status).into())
    }

    async fn write_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error> {
        self.stream_write_file("WriteFile", path, mode, data, |rpc, stream| async move { rpc.write_file(stream).await }).await
    }

    async fn append_file(&self, path: &str, mode: u32, data: ByteSource) -> Result<(), Error> {
        self.stream_write_file("AppendFile", path, mode, data, |rpc, stream| async move { rpc.append_file(stream).await }).await
    }
}

impl<B> AgentClient<B>
where
    B: BaseHost + 'static,
{
    async fn stream_write_file<F, Fut>(&self, op: &str, path: &str, mode: u32, mut data: ByteSource, call: F) -> Result<(), Error>
    where
        F: FnOnce(tether_proto::AgentClient<Channel>, tokio_stream::wrappers::ReceiverStream<WriteFileRequest>) -> Fut,
        Fut: std::future::Future<Output = Result<tonic::Response<Empty>, tonic::Status>>,
    {
        require_absolute(op, path)?;

        let (tx, rx) = mpsc::channel::<WriteFileRequest>(16);
        tx.send(WriteFileRequest { payload: Some(write_file_request::Payload::Meta(FileMeta { name: path.to_owned(), mode })) })
            .await
            .map_err(|_| Error::Run(format!("{op} channel closed before metadata")))?;

        tokio::spawn(async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match data.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let payload = WriteFileRequest { payload: Some(write_file_request::Payload::Chunk(buf[..n].to_vec())) };
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        let outbound = tokio_stream::wrappers::ReceiverStream::new(rx);
        call(self.rpc.clone(), outbound).await.map(|_| ()).map_err(|status| path_error_from_status(op, path, &status).into())
    }
}

async fn forward_stdin(stdin_src: Option<ByteSource>, tx: mpsc::Sender<RunRequest>) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    if let Some(mut src) = stdin_src {
        loop {
            match src.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = RunRequest { payload: Some(run_request::Payload::StdinChunk(buf[..n].to_vec())) };
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
    let _ = tx.send(RunRequest { payload: Some(run_request::Payload::StdinChunk(Vec::new())) }).await;
}

async fn run_to_success(base: &impl BaseHost, cmd: Cmd) -> Result<WaitStatus, Error> {
    let path = cmd.path.clone();
    let status = base.run(cmd).await?;
    if status.success() { Ok(status) } else { Err(Error::Run(format!("{path}: exited with {status:?}"))) }
}

async fn run_capture(base: &impl BaseHost, path: &str, args: &[&str]) -> Result<(WaitStatus, String), Error> {
    let buf = Arc::new(StdMutex::new(Vec::new()));
    let cmd = Cmd::new(path).args(args.iter().map(|s| (*s).to_owned())).stdout(Box::pin(BufSink(Arc::clone(&buf))));
    let status = run_to_success(base, cmd).await?;
    let bytes = buf.lock().unwrap_or_else(PoisonError::into_inner);
    Ok((status, String::from_utf8_lossy(&bytes).trim().to_owned()))
}

/// An in-memory sink that appends every write to a shared buffer; used to
/// capture the stdout of the small bootstrap commands (`mktemp`, `uname`).
struct BufSink(Arc<StdMutex<Vec<u8>>>);

impl AsyncWrite for BufSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A finite in-memory byte source, fed to the `sh -c "cat > ..."` delivery
/// step as the gunzipped agent binary's stdin.
struct SliceSource {
    data: Vec<u8>,
    pos: usize,
}

impl SliceSource {
    fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl AsyncRead for SliceSource {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Adapts a [`Streaming<Chunk>`] into an [`AsyncRead`], re-playing the one
/// chunk [`AgentClient::read_file`] had to pull eagerly to surface open
/// errors before handing the reader back to the caller.
struct ChunkReader {
    first: Option<Vec<u8>>,
    pos: usize,
    streaming: Streaming<Chunk>,
}

impl AsyncRead for ChunkReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(data) = this.first.as_ref() {
                if this.pos < data.len() {
                    let remaining = &data[this.pos..];
                    let n = remaining.len().min(buf.remaining());
                    buf.put_slice(&remaining[..n]);
                    this.pos += n;
                    return Poll::Ready(Ok(()));
                }
                this.first = None;
                this.pos = 0;
            }

            match Pin::new(&mut this.streaming).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.first = Some(chunk.data);
                    this.pos = 0;
                }
                Poll::Ready(Some(Err(status))) => return Poll::Ready(Err(io::Error::other(status))),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
