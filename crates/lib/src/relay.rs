//! Output relay: choose the manager stream to show, cap its length, and shape the reply.

use crate::exec::Invocation;

pub const NO_OUTPUT: &str = "(no output)";
pub const DONE: &str = "(done)";
pub const NO_LOGS: &str = "(no logs)";
pub const NO_DATA: &str = "(no data)";

/// Line cap applied to relayed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncate {
    None,
    /// Keep the first N lines.
    Head(usize),
    /// Keep the last N lines.
    Tail(usize),
}

/// Which captured stream(s) to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPick {
    /// stdout on success, stderr otherwise.
    ByExitCode,
    /// stdout if it has content, else stderr (regardless of exit code).
    StdoutElseStderr,
    /// stdout on success, stdout + stderr otherwise.
    CombineOnFailure,
}

/// A reply to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Plain(String),
    /// Rendered as a monospace block.
    Pre(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Plain(t) | Reply::Pre(t) => t,
        }
    }
}

pub fn truncate_lines(text: &str, mode: Truncate) -> String {
    match mode {
        Truncate::None => text.to_string(),
        Truncate::Head(n) => text.lines().take(n).collect::<Vec<_>>().join("\n"),
        Truncate::Tail(n) => {
            let lines: Vec<&str> = text.lines().collect();
            let start = lines.len().saturating_sub(n);
            lines[start..].join("\n")
        }
    }
}

pub fn pick_stream(inv: &Invocation, pick: StreamPick) -> String {
    match pick {
        StreamPick::ByExitCode => {
            if inv.success() {
                inv.stdout.clone()
            } else {
                inv.stderr.clone()
            }
        }
        StreamPick::StdoutElseStderr => {
            if inv.stdout.trim().is_empty() {
                inv.stderr.clone()
            } else {
                inv.stdout.clone()
            }
        }
        StreamPick::CombineOnFailure => {
            if inv.success() {
                inv.stdout.clone()
            } else {
                format!("{}\n{}", inv.stdout, inv.stderr)
            }
        }
    }
}

/// Produce the display text for an invocation: pick, truncate, tidy, and fall back to `placeholder`.
pub fn relay(inv: &Invocation, pick: StreamPick, mode: Truncate, placeholder: &str) -> String {
    let text = truncate_lines(&pick_stream(inv, pick), mode);
    let text = tidy(&text);
    if text.is_empty() {
        placeholder.to_string()
    } else {
        text.to_string()
    }
}

/// Drop leading blank lines and trailing whitespace; indentation of the first line is kept.
fn tidy(text: &str) -> &str {
    let trimmed = text.trim_end();
    let first_content = trimmed
        .lines()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(0);
    let mut offset = 0;
    for line in trimmed.split_inclusive('\n').take(first_content) {
        offset += line.len();
    }
    &trimmed[offset..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {}\n", i)).collect()
    }

    fn ok(stdout: &str) -> Invocation {
        Invocation {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn failed(stdout: &str, stderr: &str) -> Invocation {
        Invocation {
            exit_code: Some(1),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn tail_50_of_60_lines_keeps_last_50_in_order() {
        let out = relay(&ok(&numbered(60)), StreamPick::ByExitCode, Truncate::Tail(50), NO_OUTPUT);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "line 11");
        assert_eq!(lines[49], "line 60");
    }

    #[test]
    fn head_200_caps_from_the_top() {
        let out = truncate_lines(&numbered(250), Truncate::Head(200));
        assert_eq!(out.lines().count(), 200);
        assert_eq!(out.lines().last(), Some("line 200"));
    }

    #[test]
    fn short_output_is_untouched_by_tail() {
        assert_eq!(truncate_lines("a\nb", Truncate::Tail(200)), "a\nb");
    }

    #[test]
    fn failure_reads_stderr() {
        let out = relay(&failed("ignored", "boom\n"), StreamPick::ByExitCode, Truncate::None, DONE);
        assert_eq!(out, "boom");
    }

    #[test]
    fn empty_stream_uses_placeholder() {
        assert_eq!(relay(&ok("  \n"), StreamPick::ByExitCode, Truncate::None, DONE), DONE);
        assert_eq!(
            relay(&failed("out", ""), StreamPick::ByExitCode, Truncate::Tail(200), NO_LOGS),
            NO_LOGS
        );
    }

    #[test]
    fn combine_on_failure_shows_both_streams() {
        let out = relay(
            &failed("Creating demo...\n", "error: name taken\n"),
            StreamPick::CombineOnFailure,
            Truncate::Tail(50),
            NO_OUTPUT,
        );
        assert_eq!(out, "Creating demo...\n\nerror: name taken");
    }

    #[test]
    fn stdout_else_stderr_ignores_exit_code() {
        assert_eq!(pick_stream(&failed("table", "warn"), StreamPick::StdoutElseStderr), "table");
        assert_eq!(pick_stream(&ok(""), StreamPick::StdoutElseStderr), "");
        assert_eq!(pick_stream(&failed("", "warn"), StreamPick::StdoutElseStderr), "warn");
    }

    #[test]
    fn tidy_keeps_indentation_of_first_line() {
        assert_eq!(tidy("\n\n  NAME  STATUS\n  demo  up\n\n"), "  NAME  STATUS\n  demo  up");
    }
}
