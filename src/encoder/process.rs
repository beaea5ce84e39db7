//! External encoder process lifecycle
//!
//! The orchestrator talks to the encoder through [`EncoderLauncher`] and
//! [`EncoderProcess`] so tests can replace the real child process.

use std::io::Read;
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use super::command::EncoderCommand;
use super::progress::LineSplitter;
use crate::error::{EncoderError, Result};

/// Result of waiting a bounded time for output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePoll {
    Line(String),
    /// Nothing arrived within the wait
    Idle,
    /// All output streams are closed
    Closed,
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub success: bool,
    pub code: Option<i32>,
}

/// A running encoder
pub trait EncoderProcess: Send {
    /// Next line of combined stdout/stderr, waiting at most `wait`
    fn poll_line(&mut self, wait: Duration) -> LinePoll;

    /// Block until the process exits
    fn wait(&mut self) -> Result<ProcessExit>;

    /// Kill the process and reap it
    fn terminate(&mut self) -> Result<()>;
}

/// Starts encoder processes
pub trait EncoderLauncher: Send + Sync {
    fn launch(&self, command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>>;
}

/// Launcher for the real encoder binary
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl EncoderLauncher for SystemLauncher {
    fn launch(&self, command: &EncoderCommand) -> Result<Box<dyn EncoderProcess>> {
        debug!("Spawning {} {}", command.binary, command.args().join(" "));
        let child = command.to_command().spawn().map_err(|e| EncoderError::SpawnFailed {
            reason: format!("{}: {}", command.binary, e),
        })?;

        Ok(Box::new(SystemProcess::new(child)))
    }
}

/// Drain one output stream on its own thread, forwarding complete lines
fn spawn_reader<R: Read + Send + 'static>(mut stream: R, tx: Sender<String>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    for line in splitter.push(&buf[..n]) {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Encoder output read failed: {}", e);
                    break;
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = tx.send(line);
        }
    })
}

struct SystemProcess {
    child: Child,
    lines: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
    reaped: bool,
}

impl SystemProcess {
    fn new(mut child: Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone()));
        }
        drop(tx);

        Self {
            child,
            lines: rx,
            readers,
            reaped: false,
        }
    }

    fn join_readers(&mut self) {
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                warn!("Encoder output reader panicked");
            }
        }
    }
}

impl EncoderProcess for SystemProcess {
    fn poll_line(&mut self, wait: Duration) -> LinePoll {
        match self.lines.recv_timeout(wait) {
            Ok(line) => LinePoll::Line(line),
            Err(RecvTimeoutError::Timeout) => LinePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => LinePoll::Closed,
        }
    }

    fn wait(&mut self) -> Result<ProcessExit> {
        let status = self.child.wait()?;
        self.reaped = true;
        self.join_readers();
        Ok(ProcessExit {
            success: status.success(),
            code: status.code(),
        })
    }

    fn terminate(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        self.child.wait()?;
        self.reaped = true;
        self.join_readers();
        Ok(())
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!("Encoder process {} dropped while running, killing it", self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
