//! Wire protocol for tether host<->agent communication: the generated gRPC
//! schema (`pb`), the shared value types (`types`), and the errno<->status
//! mapping (`status`) that lets an operating-system error cross the wire and
//! be reconstructed exactly on the other side.

pub mod status;
pub mod types;

/// Generated protobuf/gRPC code (`tonic_build` output from `proto/tether.proto`).
pub mod pb {
    tonic::include_proto!("tether.v1");
}

pub use pb::agent_client::AgentClient;
pub use pb::agent_server::{Agent, AgentServer};
pub use status::{code_for_errno, errno_from_status, status_for_errno, status_for_non_absolute_path, status_for_unknown, unknown_query_from_status};
pub use types::{Cmd, DirEnt, FileType, StatT, Timespec, WaitStatus, DEFAULT_DIR, DEFAULT_ENV};

impl From<WaitStatus> for pb::WaitStatusMsg {
    fn from(w: WaitStatus) -> Self {
        Self {
            exit_code: w.exit_code,
            exited: w.exited,
            signal: w.signal,
        }
    }
}

impl From<pb::WaitStatusMsg> for WaitStatus {
    fn from(w: pb::WaitStatusMsg) -> Self {
        Self {
            exit_code: w.exit_code,
            exited: w.exited,
            signal: w.signal,
        }
    }
}

impl From<Timespec> for pb::Timespec {
    fn from(t: Timespec) -> Self {
        Self { sec: t.sec, nsec: t.nsec }
    }
}

impl From<pb::Timespec> for Timespec {
    fn from(t: pb::Timespec) -> Self {
        Self { sec: t.sec, nsec: t.nsec }
    }
}

impl From<StatT> for pb::StatReply {
    fn from(s: StatT) -> Self {
        Self {
            dev: s.dev,
            ino: s.ino,
            nlink: s.nlink,
            mode: s.mode,
            uid: s.uid,
            gid: s.gid,
            rdev: s.rdev,
            size: s.size,
            blksize: s.blksize,
            blocks: s.blocks,
            atim: Some(s.atim.into()),
            mtim: Some(s.mtim.into()),
            ctim: Some(s.ctim.into()),
        }
    }
}

impl From<pb::StatReply> for StatT {
    fn from(s: pb::StatReply) -> Self {
        Self {
            dev: s.dev,
            ino: s.ino,
            nlink: s.nlink,
            mode: s.mode,
            uid: s.uid,
            gid: s.gid,
            rdev: s.rdev,
            size: s.size,
            blksize: s.blksize,
            blocks: s.blocks,
            atim: s.atim.unwrap_or_default().into(),
            mtim: s.mtim.unwrap_or_default().into(),
            ctim: s.ctim.unwrap_or_default().into(),
        }
    }
}

impl From<DirEnt> for pb::DirEntry {
    fn from(d: DirEnt) -> Self {
        Self {
            ino: d.ino,
            file_type: d.file_type.to_dt(),
            name: d.name,
        }
    }
}

impl From<pb::DirEntry> for DirEnt {
    fn from(d: pb::DirEntry) -> Self {
        Self {
            ino: d.ino,
            file_type: FileType::from_dt(d.file_type),
            name: d.name,
        }
    }
}
