//! External tool process spawning.
//!
//! Spawns a tool as a child process, drains stdout and stderr on background threads, and
//! waits for completion with an optional deadline. On timeout the child is killed and reaped.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed (code {code}): {stderr}")]
    Failed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

fn drain_stream<R: Read + Send + 'static>(
    reader: R,
    sink: Arc<Mutex<Vec<u8>>>,
    limit: Option<usize>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let mut guard = sink.lock();
            guard.extend_from_slice(&line_buf);
            if let Some(max) = limit
                && guard.len() > max
            {
                let excess = guard.len() - max;
                guard.drain(..excess);
            }
            drop(guard);
            line_buf.clear();
        }
    })
}

/// Run a tool and block until it exits or `timeout` elapses.
pub fn run_tool_blocking(
    program: &Path,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<ToolOutput, RunError> {
    let program_name = program
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string());

    log::debug!(
        target: "lofi::codec::runner",
        "Spawning {}: args={:?}",
        program.display(),
        args
    );

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
        program: program_name.clone(),
        source,
    })?;

    let stdout_buffer = Arc::new(Mutex::new(Vec::new()));
    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
    let stdout_handle = child
        .stdout
        .take()
        .map(|s| drain_stream(s, Arc::clone(&stdout_buffer), None));
    let stderr_handle = child
        .stderr
        .take()
        .map(|s| drain_stream(s, Arc::clone(&stderr_buffer), Some(MAX_STDERR_BYTES)));

    let deadline = timeout.map(|t| Instant::now() + t);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunError::Spawn {
                    program: program_name,
                    source: e,
                });
            }
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            log::warn!(
                target: "lofi::codec::runner",
                "{} exceeded {:?}; killing",
                program_name,
                timeout
            );
            let _ = child.kill();
            let _ = child.wait();
            return Err(RunError::TimedOut {
                program: program_name,
                after: timeout.unwrap_or_default(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(h) = stdout_handle {
        let _ = h.join();
    }
    if let Some(h) = stderr_handle {
        let _ = h.join();
    }

    let stdout = String::from_utf8_lossy(&stdout_buffer.lock()).to_string();
    let stderr = String::from_utf8_lossy(&stderr_buffer.lock()).to_string();

    if status.success() {
        log::debug!(
            target: "lofi::codec::runner",
            "{} completed successfully",
            program_name
        );
        Ok(ToolOutput { stdout, stderr })
    } else {
        let code = status.code().unwrap_or(-1);
        let err_preview = stderr
            .lines()
            .rev()
            .take(3)
            .collect::<Vec<_>>()
            .join("; ");
        log::error!(
            target: "lofi::codec::runner",
            "{} failed (code={}): {}",
            program_name,
            code,
            err_preview
        );
        Err(RunError::Failed {
            program: program_name,
            code,
            stderr,
        })
    }
}
