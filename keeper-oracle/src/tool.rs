//! External-tool invocation with a wall-clock ceiling.
//!
//! Output is captured into an anonymous temp file rather than pipes, so a
//! chatty tool can never block on a full pipe buffer while we poll it.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{io_err, OracleError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Combined stdout + stderr of a finished tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub output: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Seam over process spawning so callers can be tested with canned output.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String], timeout: Duration)
        -> Result<ToolOutput, OracleError>;
}

/// [`ToolRunner`] that spawns real processes.
#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner {
    working_dir: Option<PathBuf>,
}

impl SystemToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, OracleError> {
        let mut capture = tempfile::tempfile().map_err(|e| io_err(std::env::temp_dir(), e))?;
        let stdout = capture.try_clone().map_err(|e| io_err(program, e))?;
        let stderr = capture.try_clone().map_err(|e| io_err(program, e))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OracleError::ToolMissing {
                program: program.display().to_string(),
            },
            _ => io_err(program, e),
        })?;

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait().map_err(|e| io_err(program, e))? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(program = %program.display(), secs = timeout.as_secs(), "tool killed after timeout");
                    return Err(OracleError::ToolTimeout {
                        program: program.display().to_string(),
                        secs: timeout.as_secs(),
                    });
                }
                None => std::thread::sleep(POLL_INTERVAL),
            }
        };

        capture
            .seek(SeekFrom::Start(0))
            .map_err(|e| io_err(program, e))?;
        let mut raw = Vec::new();
        capture
            .read_to_end(&mut raw)
            .map_err(|e| io_err(program, e))?;

        Ok(ToolOutput {
            code: status.code(),
            output: String::from_utf8_lossy(&raw).into_owned(),
        })
    }
}
