//! Agent process: serves the wire protocol over its own stdin/stdout,
//! handles graceful shutdown on `Shutdown`/`SIGTERM`, and implements the
//! `--stop` peer-cleanup CLI mode.

pub mod errno;
pub mod exec;
pub mod fsops;
pub mod service;
pub mod shutdown;
pub mod users;

use std::path::{Path, PathBuf};

use tether_proto::pb::agent_server::AgentServer;
use tonic::transport::Server;

pub use service::AgentService;
pub use shutdown::ShutdownHandle;

/// Runs the agent's single gRPC session to completion over `stdin`/`stdout`,
/// returning once the peer disconnects or a `Shutdown` RPC is served.
///
/// # Errors
/// Returns an error if the transport or RPC server fails irrecoverably.
pub async fn serve_stdio() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let connection = tether_pipe::Connection::new(stdin, stdout);
    let listener = tether_pipe::Listener::new(connection);

    let shutdown = ShutdownHandle::new();
    let service = AgentService::new(shutdown.clone());

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Server::builder()
        .add_service(AgentServer::new(service))
        .serve_with_incoming_shutdown(listener, async move {
            tokio::select! {
                () = shutdown.wait() => {
                    tracing::info!("shutdown RPC received, draining in-flight requests");
                }
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received, draining in-flight requests");
                }
            }
        })
        .await?;

    Ok(())
}

/// Removes the agent's own binary from disk. Safe to call more than once;
/// a second call simply observes `ENOENT`.
///
/// On Linux, unlinking a running executable only removes its directory
/// entry — the inode, and this process's mapping of it, survive until the
/// process exits.
pub fn unlink_self() -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    match std::fs::remove_file(&exe) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// `--stop` mode: signals every other running process whose `/proc/<pid>/exe`
/// resolves to this binary, then unlinks the binary itself.
///
/// # Errors
/// Returns an error if `/proc` cannot be read or the binary cannot be removed.
pub fn stop_peers_and_unlink() -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    let own_pid = std::process::id();

    for pid in peer_pids(&exe, own_pid)? {
        // Best-effort: a peer that exits between the scan and the signal is not an error.
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGTERM);
    }

    unlink_self()
}

/// Lists the pids (other than `own_pid`) of processes whose executable is `exe`.
fn peer_pids(exe: &Path, own_pid: u32) -> std::io::Result<Vec<i32>> {
    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = entry?;
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let link: PathBuf = entry.path().join("exe");
        if std::fs::read_link(&link).ok().as_deref() == Some(exe) {
            pids.push(pid as i32);
        }
    }
    Ok(pids)
}
