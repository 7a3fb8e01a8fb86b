use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::PackError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub trait ToolRunner: Send + Sync {
    /// Runs `program` to completion; non-zero exit is an error.
    fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<(), PackError>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }

    fn resolve_program(program: &str) -> Result<PathBuf, PackError> {
        let path = Path::new(program);
        if path.components().count() > 1 {
            return if path.exists() {
                Ok(path.to_path_buf())
            } else {
                Err(PackError::MissingTool(program.to_string()))
            };
        }
        find_in_path(program).ok_or_else(|| PackError::MissingTool(program.to_string()))
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, program: &str, args: &[String], timeout: Duration) -> Result<(), PackError> {
        let exe = Self::resolve_program(program)?;
        debug!(program = %exe.display(), ?args, "running external tool");

        // stderr goes to a file so a chatty tool cannot block on a full pipe
        let mut stderr_file =
            tempfile::tempfile().map_err(|err| PackError::Filesystem(err.to_string()))?;
        let stderr_handle = stderr_file
            .try_clone()
            .map_err(|err| PackError::Filesystem(err.to_string()))?;

        let mut child = Command::new(&exe)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr_handle))
            .spawn()
            .map_err(|err| PackError::ToolFailed(format!("{program}: {err}")))?;

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PackError::Timeout(format!(
                        "{program} exceeded {}s",
                        timeout.as_secs()
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => return Err(PackError::ToolFailed(format!("{program}: {err}"))),
            }
        };

        if status.success() {
            return Ok(());
        }
        let mut stderr = String::new();
        let _ = stderr_file.seek(SeekFrom::Start(0));
        let _ = stderr_file.read_to_string(&mut stderr);
        let stderr = stderr.trim();
        let message = if stderr.is_empty() {
            format!("{program} exited with {status}")
        } else {
            format!("{program} exited with {status}: {stderr}")
        };
        Err(PackError::ToolFailed(message))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if fs::metadata(&plain).map(|meta| meta.is_file()).unwrap_or(false) {
            return Some(plain);
        }
    }
    None
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn missing_tool_is_reported() {
        let err = SystemToolRunner::new()
            .run("definitely-not-a-real-tool-xyz", &[], Duration::from_secs(1))
            .unwrap_err();
        assert_matches!(err, PackError::MissingTool(_));
    }

    #[test]
    fn non_zero_exit_carries_stderr() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        let err = SystemToolRunner::new()
            .run("sh", &args, Duration::from_secs(10))
            .unwrap_err();
        assert_matches!(err, PackError::ToolFailed(message) if message.contains("boom"));
    }

    #[test]
    fn slow_tool_times_out() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = SystemToolRunner::new()
            .run("sh", &args, Duration::from_millis(300))
            .unwrap_err();
        assert_matches!(err, PackError::Timeout(_));
    }
}
