//! Turn codec tool failures into short, user-facing summaries.
//!
//! Exit codes are from ffmpeg.c: 1 (general), 69 (rate exceeded), 123 (hard exit),
//! 255 (signal). -1 is used when the process was killed without an exit code.

use super::runner::RunError;

/// Short summary for the caller, full stderr for the debug log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolErrorPayload {
    pub summary: String,
    pub detail: String,
}

const ELLIPSIS: &str = "…";
const SUMMARY_MAX_LEN: usize = 120;

pub fn parse_tool_error(stderr: &str, exit_code: Option<i32>) -> ToolErrorPayload {
    let summary = match exit_code {
        Some(code) => known_exit_code_summary(code)
            .map(|known| match last_error_line(stderr) {
                Some(line) => format!("{} {}", known, line),
                None => known.to_string(),
            })
            .unwrap_or_else(|| format!("Codec tool failed (exit code {}).", code)),
        None => first_line_truncated(stderr, SUMMARY_MAX_LEN),
    };
    ToolErrorPayload {
        summary,
        detail: stderr.trim().to_string(),
    }
}

/// One-line summary for any runner failure.
pub fn summarize_run_error(err: &RunError) -> String {
    match err {
        RunError::Failed {
            program,
            code,
            stderr,
        } => {
            let payload = parse_tool_error(stderr, Some(*code));
            if !payload.detail.is_empty() {
                log::debug!(
                    target: "lofi::codec",
                    "{} stderr:\n{}",
                    program,
                    payload.detail
                );
            }
            payload.summary
        }
        other => other.to_string(),
    }
}

fn known_exit_code_summary(code: i32) -> Option<&'static str> {
    match code {
        -1 => Some("Codec tool was killed."),
        1 => Some("Codec tool failed."),
        69 => Some("Encoding rate limit exceeded."),
        123 | 255 => Some("Encoding was stopped."),
        _ => None,
    }
}

/// The most specific line ffmpeg prints is usually the last non-empty one.
fn last_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| truncate(l, SUMMARY_MAX_LEN))
}

fn first_line_truncated(stderr: &str, max_len: usize) -> String {
    let first = stderr
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim())
        .unwrap_or(stderr);
    truncate(first, max_len)
}

fn truncate(line: &str, max_len: usize) -> String {
    if line.len() <= max_len {
        return line.to_string();
    }
    let mut end = max_len.saturating_sub(ELLIPSIS.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &line[..end], ELLIPSIS)
}
