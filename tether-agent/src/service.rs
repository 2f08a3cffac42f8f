//! Implements the generated [`Agent`] trait: one method per RPC, each a thin
//! wrapper over [`crate::fsops`], [`crate::users`], or [`crate::exec`].

use std::pin::Pin;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};

use tether_proto::pb::agent_server::Agent;
use tether_proto::pb::{
    ChmodRequest, DirEntry, Empty, GidReply, GroupReply, LchownRequest, LookupGroupRequest, LookupRequest, LstatRequest, MkdirRequest,
    MknodRequest, PingReply, ReadDirRequest, ReadFileRequest, ReadlinkReply, ReadlinkRequest, RemoveRequest, RunRequest, SymlinkRequest,
    UidReply, UserReply, WriteFileRequest, write_file_request,
};

use crate::exec::RunResponseStream;
use crate::fsops;
use crate::shutdown::ShutdownHandle;
use crate::users;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// The one [`Agent`] implementation this binary serves: stateless aside from
/// the handle it signals when a `Shutdown` RPC arrives.
#[derive(Debug, Clone)]
pub struct AgentService {
    shutdown: ShutdownHandle,
}

impl AgentService {
    /// Builds a service that signals `shutdown` once `Shutdown` is called.
    #[must_use]
    pub fn new(shutdown: ShutdownHandle) -> Self {
        Self { shutdown }
    }
}

#[tonic::async_trait]
impl Agent for AgentService {
    type ReadDirStream = Pin<Box<dyn Stream<Item = Result<DirEntry, Status>> + Send>>;
    type ReadFileStream = Pin<Box<dyn Stream<Item = Result<tether_proto::pb::Chunk, Status>> + Send>>;
    type RunStream = RunResponseStream;

    async fn ping(&self, _request: Request<Empty>) -> Result<Response<PingReply>, Status> {
        Ok(Response::new(PingReply { message: "Pong".to_owned() }))
    }

    async fn geteuid(&self, _request: Request<Empty>) -> Result<Response<UidReply>, Status> {
        Ok(Response::new(UidReply { uid: nix::unistd::geteuid().as_raw() }))
    }

    async fn getegid(&self, _request: Request<Empty>) -> Result<Response<GidReply>, Status> {
        Ok(Response::new(GidReply { gid: nix::unistd::getegid().as_raw() }))
    }

    async fn chmod(&self, request: Request<ChmodRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Chmod", &req.name)?;
        tokio::task::spawn_blocking(move || fsops::chmod(&req.name, req.mode)).await.map_err(join_err)??;
        Ok(Response::new(Empty {}))
    }

    async fn lchown(&self, request: Request<LchownRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Lchown", &req.name)?;
        tokio::task::spawn_blocking(move || fsops::lchown(&req.name, req.uid, req.gid)).await.map_err(join_err)??;
        Ok(Response::new(Empty {}))
    }

    async fn lookup(&self, request: Request<LookupRequest>) -> Result<Response<UserReply>, Status> {
        let req = request.into_inner();
        let reply = tokio::task::spawn_blocking(move || users::lookup_user(&req.username)).await.map_err(join_err)??;
        Ok(Response::new(reply))
    }

    async fn lookup_group(&self, request: Request<LookupGroupRequest>) -> Result<Response<GroupReply>, Status> {
        let req = request.into_inner();
        let reply = tokio::task::spawn_blocking(move || users::lookup_group(&req.name)).await.map_err(join_err)??;
        Ok(Response::new(reply))
    }

    async fn lstat(&self, request: Request<LstatRequest>) -> Result<Response<tether_proto::pb::StatReply>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Lstat", &req.name)?;
        let st = tokio::task::spawn_blocking(move || fsops::lstat(&req.name)).await.map_err(join_err)??;
        Ok(Response::new(st.into()))
    }

    async fn read_dir(&self, request: Request<ReadDirRequest>) -> Result<Response<Self::ReadDirStream>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("ReadDir", &req.name)?;
        let name = req.name.clone();
        let dir = tokio::task::spawn_blocking(move || fsops::open_dir(&req.name)).await.map_err(join_err)??;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<DirEntry, Status>>(16);
        tokio::task::spawn_blocking(move || {
            for entry in dir {
                let item = match entry {
                    Ok(entry) => fsops::dirent_of(entry).map(DirEntry::from),
                    Err(e) => Err(crate::errno::io_status("ReadDir", &name, &e)),
                };
                // The receiver side is dropped when the RPC is cancelled;
                // stop reading the rest of the directory immediately.
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let stream: Self::ReadDirStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));
        Ok(Response::new(stream))
    }

    async fn mkdir(&self, request: Request<MkdirRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Mkdir", &req.name)?;
        tokio::task::spawn_blocking(move || fsops::mkdir(&req.name, req.mode)).await.map_err(join_err)??;
        Ok(Response::new(Empty {}))
    }

    async fn read_file(&self, request: Request<ReadFileRequest>) -> Result<Response<Self::ReadFileStream>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("ReadFile", &req.name)?;
        let mut file = fsops::open_for_read(&req.name).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<tether_proto::pb::Chunk, Status>>(4);
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(tether_proto::pb::Chunk { data: buf[..n].to_vec() })).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(crate::errno::io_status("ReadFile", &req.name, &e))).await;
                        return;
                    }
                }
            }
        });

        let stream: Self::ReadFileStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));
        Ok(Response::new(stream))
    }

    async fn symlink(&self, request: Request<SymlinkRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Symlink", &req.newname)?;
        tokio::task::spawn_blocking(move || fsops::symlink(&req.oldname, &req.newname)).await.map_err(join_err)??;
        Ok(Response::new(Empty {}))
    }

    async fn readlink(&self, request: Request<ReadlinkRequest>) -> Result<Response<ReadlinkReply>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Readlink", &req.name)?;
        let destination = tokio::task::spawn_blocking(move || fsops::readlink(&req.name)).await.map_err(join_err)??;
        Ok(Response::new(ReadlinkReply { destination }))
    }

    async fn remove(&self, request: Request<RemoveRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Remove", &req.name)?;
        tokio::task::spawn_blocking(move || fsops::remove(&req.name)).await.map_err(join_err)??;
        Ok(Response::new(Empty {}))
    }

    async fn mknod(&self, request: Request<MknodRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        crate::errno::require_absolute("Mknod", &req.path)?;
        tokio::task::spawn_blocking(move || fsops::mknod(&req.path, req.mode, req.dev)).await.map_err(join_err)??;
        Ok(Response::new(Empty {}))
    }

    async fn run(&self, request: Request<Streaming<RunRequest>>) -> Result<Response<Self::RunStream>, Status> {
        Ok(Response::new(crate::exec::run(request.into_inner())))
    }

    async fn write_file(&self, request: Request<Streaming<WriteFileRequest>>) -> Result<Response<Empty>, Status> {
        receive_file(request.into_inner(), false).await?;
        Ok(Response::new(Empty {}))
    }

    async fn append_file(&self, request: Request<Streaming<WriteFileRequest>>) -> Result<Response<Empty>, Status> {
        receive_file(request.into_inner(), true).await?;
        Ok(Response::new(Empty {}))
    }

    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        // Self-deletion is the first exit action, performed before the
        // response is even sent: the directory entry is gone immediately,
        // though the inode survives until this process actually exits.
        if let Err(e) = crate::unlink_self() {
            tracing::warn!(error = %e, "failed to unlink agent binary during shutdown");
        }
        self.shutdown.signal();
        Ok(Response::new(Empty {}))
    }
}

/// Shared body of `WriteFile`/`AppendFile`: the first message must carry the
/// target name and mode, every subsequent message a chunk of bytes.
async fn receive_file(mut inbound: Streaming<WriteFileRequest>, append: bool) -> Result<(), Status> {
    let meta = match inbound.next().await {
        Some(Ok(WriteFileRequest { payload: Some(write_file_request::Payload::Meta(meta)) })) => meta,
        Some(Ok(_)) => return Err(Status::invalid_argument("WriteFile: first message must carry file metadata")),
        Some(Err(status)) => return Err(status),
        None => return Err(Status::invalid_argument("WriteFile: stream closed before metadata was sent")),
    };
    crate::errno::require_absolute("WriteFile", &meta.name)?;

    let mut file = fsops::open_for_write(&meta.name, meta.mode, append).await?;
    while let Some(msg) = inbound.next().await {
        match msg? {
            WriteFileRequest { payload: Some(write_file_request::Payload::Chunk(data)) } => {
                file.write_all(&data).await.map_err(|e| crate::errno::io_status("WriteFile", &meta.name, &e))?;
            }
            WriteFileRequest { payload: Some(write_file_request::Payload::Meta(_)) } => {
                return Err(Status::invalid_argument("WriteFile: metadata sent more than once"));
            }
            WriteFileRequest { payload: None } => {}
        }
    }
    file.flush().await.map_err(|e| crate::errno::io_status("WriteFile", &meta.name, &e))?;
    Ok(())
}

fn join_err(e: tokio::task::JoinError) -> Status {
    Status::internal(format!("agent worker task panicked: {e}"))
}
