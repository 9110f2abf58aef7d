//! MegaHAL subprocess lifecycle.
//!
//! Spawns the process, feeds its stdin from an ordered write queue, forwards
//! raw stdout chunks to the bridge, and shuts it down gracefully.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use halbridge_core::config::SubprocessConfig;
use halbridge_core::protocol::{self, ControlCommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Size of a single stdout read.
const READ_CHUNK: usize = 4096;

/// Output delivered from the subprocess's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Raw bytes as read; not necessarily whole lines.
    Data(Vec<u8>),
    /// Stdout reached end of stream.
    Closed,
}

/// Instruction for the stdin writer task.
#[derive(Debug)]
pub enum WriterCommand {
    /// A framed payload, written verbatim.
    Frame(String),
    /// Close stdin once every earlier frame is flushed, then acknowledge.
    Close(oneshot::Sender<()>),
}

/// Cheap, cloneable sender for the subprocess's stdin.
///
/// Writes are queued and never wait for the subprocess.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    stdin_tx: mpsc::UnboundedSender<WriterCommand>,
}

impl ProcessHandle {
    /// A handle not attached to any process. The receiver sees exactly what
    /// a writer task would write.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<WriterCommand>) {
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        (Self { stdin_tx }, stdin_rx)
    }

    /// Queue `payload` followed by the blank framing line.
    pub fn send(&self, payload: &str) -> Result<(), SubprocessError> {
        self.stdin_tx
            .send(WriterCommand::Frame(protocol::frame(payload)))
            .map_err(|_| SubprocessError::Closed)
    }

    /// Queue a control command.
    pub fn send_command(&self, command: ControlCommand) -> Result<(), SubprocessError> {
        self.send(&command.wire())
    }

    /// Ask the writer to close stdin after draining; resolves once closed.
    async fn close(&self) -> Result<(), SubprocessError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.stdin_tx
            .send(WriterCommand::Close(ack_tx))
            .map_err(|_| SubprocessError::Closed)?;
        ack_rx.await.map_err(|_| SubprocessError::Closed)
    }
}

/// Owns the running MegaHAL process.
pub struct ProcessSupervisor {
    child: Child,
    handle: ProcessHandle,
    writer: JoinHandle<()>,
    terminate_timeout: Duration,
}

impl ProcessSupervisor {
    /// Spawn the subprocess and start its reader and writer tasks.
    ///
    /// The child's stderr goes to the null device so it never shares the
    /// host's diagnostic stream. Must be called within a tokio runtime.
    pub fn start(
        config: &SubprocessConfig,
    ) -> Result<(Self, mpsc::Receiver<OutputEvent>), SubprocessError> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }

        info!(
            executable = %config.executable.display(),
            args = ?config.args,
            working_dir = ?config.working_directory,
            "Spawning subprocess"
        );
        let mut child = cmd.spawn().map_err(|e| SubprocessError::SpawnFailed {
            executable: config.executable.display().to_string(),
            reason: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SubprocessError::MissingPipe { pipe: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SubprocessError::MissingPipe { pipe: "stdout" })?;

        let (handle, stdin_rx) = ProcessHandle::detached();
        let writer = tokio::spawn(write_stdin(stdin, stdin_rx));

        let (output_tx, output_rx) = mpsc::channel(64);
        tokio::spawn(read_stdout(stdout, output_tx));

        let supervisor = Self {
            child,
            handle,
            writer,
            terminate_timeout: Duration::from_secs(config.terminate_timeout_secs),
        };
        Ok((supervisor, output_rx))
    }

    /// Sender for the subprocess's stdin.
    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Send the quit command, close stdin after every queued write has been
    /// flushed, and wait for the process to exit.
    ///
    /// Falls back to killing the process after the terminate timeout.
    pub async fn quit(mut self) -> Result<ExitStatus, SubprocessError> {
        if let Err(e) = self.handle.send_command(ControlCommand::Quit) {
            warn!(error = %e, "Could not queue quit command");
        }
        if let Err(e) = self.handle.close().await {
            warn!(error = %e, "Stdin writer already gone");
        }
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Stdin writer task failed");
        }

        match tokio::time::timeout(self.terminate_timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(?status, "Subprocess exited");
                Ok(status)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Error waiting for subprocess");
                self.child.kill().await.ok();
                Err(SubprocessError::Wait(e.to_string()))
            }
            Err(_) => {
                warn!("Timeout waiting for graceful shutdown, killing");
                self.child.kill().await.ok();
                self.child
                    .wait()
                    .await
                    .map_err(|e| SubprocessError::Wait(e.to_string()))
            }
        }
    }
}

/// Drain the write queue in order. Stdin is closed only after every frame
/// queued before the close request has been written and flushed.
async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Frame(frame) => {
                if let Err(e) = stdin.write_all(frame.as_bytes()).await {
                    error!("Failed to write to stdin: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    error!("Failed to flush stdin: {}", e);
                    break;
                }
            }
            WriterCommand::Close(ack) => {
                if let Err(e) = stdin.shutdown().await {
                    warn!(error = %e, "Failed to close stdin");
                }
                drop(stdin);
                let _ = ack.send(());
                debug!("Stdin closed");
                return;
            }
        }
    }
    debug!("Stdin writer finished");
}

async fn read_stdout(mut stdout: ChildStdout, tx: mpsc::Sender<OutputEvent>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(OutputEvent::Data(buf[..n].to_vec())).await.is_err() {
                    debug!("Output channel closed");
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read subprocess stdout");
                break;
            }
        }
    }
    info!("Subprocess stdout closed");
    let _ = tx.send(OutputEvent::Closed).await;
}

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to spawn {executable}: {reason}")]
    SpawnFailed { executable: String, reason: String },

    #[error("Failed to capture subprocess {pipe}")]
    MissingPipe { pipe: &'static str },

    #[error("Subprocess input is closed")]
    Closed,

    #[error("Failed waiting for subprocess: {0}")]
    Wait(String),
}
