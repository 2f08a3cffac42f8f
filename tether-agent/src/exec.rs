//! The bidirectional `Run` RPC: spawns a child process and multiplexes its
//! stdio against the gRPC stream until it exits.

use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::{Status, Streaming};

use tether_proto::WaitStatus;
use tether_proto::pb::{CmdStart, RunRequest, RunResponse, WaitStatusMsg, run_request, run_response};

pub type RunResponseStream = Pin<Box<dyn Stream<Item = Result<RunResponse, Status>> + Send>>;

const CHUNK_SIZE: usize = 32 * 1024;

/// Drives one `Run` RPC: reads `cmd` from the first inbound message, spawns
/// it, and returns the outbound stream of stdout/stderr chunks plus the
/// terminal wait status.
pub fn run(mut inbound: Streaming<RunRequest>) -> RunResponseStream {
    let (tx, rx) = mpsc::channel::<Result<RunResponse, Status>>(16);

    tokio::spawn(async move {
        if let Err(status) = drive(&mut inbound, &tx).await {
            let _ = tx.send(Err(status)).await;
        }
    });

    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

async fn drive(inbound: &mut Streaming<RunRequest>, tx: &mpsc::Sender<Result<RunResponse, Status>>) -> Result<(), Status> {
    let cmd = first_cmd(inbound).await?;

    let mut command = Command::new(&cmd.path);
    command.args(&cmd.args).env_clear().envs(split_env(&cmd.env)).kill_on_drop(true);
    if !cmd.dir.is_empty() {
        command.current_dir(&cmd.dir);
    }
    command.stdin(if cmd.stdin_enabled { Stdio::piped() } else { Stdio::null() });
    command.stdout(if cmd.stdout_enabled { Stdio::piped() } else { Stdio::null() });
    command.stderr(if cmd.stderr_enabled { Stdio::piped() } else { Stdio::null() });

    let mut child = command.spawn().map_err(|e| crate::errno::io_status("Run", &cmd.path, &e))?;

    let mut child_stdin = child.stdin.take();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let mut stdout_buf = vec![0u8; CHUNK_SIZE];
    let mut stderr_buf = vec![0u8; CHUNK_SIZE];
    let mut stdout_done = stdout.is_none();
    let mut stderr_done = stderr.is_none();

    loop {
        if stdout_done && stderr_done {
            break;
        }

        tokio::select! {
            msg = inbound.next(), if child_stdin.is_some() => {
                match msg {
                    Some(Ok(RunRequest { payload: Some(run_request::Payload::StdinChunk(data)) })) => {
                        if data.is_empty() {
                            child_stdin = None;
                        } else if let Some(stdin) = child_stdin.as_mut()
                            && stdin.write_all(&data).await.is_err()
                        {
                            child_stdin = None;
                        }
                    }
                    Some(Ok(_)) | None => child_stdin = None,
                    Some(Err(_)) => {
                        child_stdin = None;
                    }
                }
            }
            n = read_some(&mut stdout, &mut stdout_buf), if !stdout_done => {
                match n {
                    Some(Ok(0)) | None => stdout_done = true,
                    Some(Ok(len)) => {
                        let chunk = RunResponse { payload: Some(run_response::Payload::StdoutChunk(stdout_buf[..len].to_vec())) };
                        if tx.send(Ok(chunk)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(_)) => stdout_done = true,
                }
            }
            n = read_some(&mut stderr, &mut stderr_buf), if !stderr_done => {
                match n {
                    Some(Ok(0)) | None => stderr_done = true,
                    Some(Ok(len)) => {
                        let chunk = RunResponse { payload: Some(run_response::Payload::StderrChunk(stderr_buf[..len].to_vec())) };
                        if tx.send(Ok(chunk)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(_)) => stderr_done = true,
                }
            }
        }
    }

    drop(child_stdin);
    let wait_status = wait(&mut child).await.map_err(|e| crate::errno::io_status("Run", &cmd.path, &e))?;
    let msg = RunResponse { payload: Some(run_response::Payload::WaitStatus(wait_status)) };
    let _ = tx.send(Ok(msg)).await;
    Ok(())
}

async fn read_some(stream: &mut Option<impl tokio::io::AsyncRead + Unpin>, buf: &mut [u8]) -> Option<std::io::Result<usize>> {
    match stream {
        Some(s) => Some(s.read(buf).await),
        None => None,
    }
}

async fn first_cmd(inbound: &mut Streaming<RunRequest>) -> Result<CmdStart, Status> {
    match inbound.next().await {
        Some(Ok(RunRequest { payload: Some(run_request::Payload::Cmd(cmd)) })) => Ok(cmd),
        Some(Ok(_)) => Err(Status::invalid_argument("Run: first message must be a Cmd descriptor")),
        Some(Err(status)) => Err(status),
        None => Err(Status::invalid_argument("Run: stream closed before a Cmd descriptor was sent")),
    }
}

fn split_env(env: &[String]) -> Vec<(String, String)> {
    env.iter().filter_map(|kv| kv.split_once('=')).map(|(k, v)| (k.to_owned(), v.to_owned())).collect()
}

async fn wait(child: &mut tokio::process::Child) -> std::io::Result<WaitStatusMsg> {
    let status = child.wait().await?;
    let wait_status = match status.code() {
        Some(code) => WaitStatus { exit_code: code, exited: true, signal: String::new() },
        None => WaitStatus { exit_code: 0, exited: false, signal: signal_name(status.signal()) },
    };
    Ok(wait_status.into())
}

fn signal_name(signal: Option<i32>) -> String {
    match signal {
        Some(sig) => nix::sys::signal::Signal::try_from(sig).map_or_else(|_| sig.to_string(), |s| s.as_str().to_owned()),
        None => String::new(),
    }
}
