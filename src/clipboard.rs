//! Copy text to the OS clipboard through the platform's clipboard command.

use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClipboardError {
    #[error("clipboard command `{0}` not available")]
    Unavailable(String),
    #[error("clipboard command `{0}` failed")]
    Failed(String),
    #[error("no clipboard command found (install wl-copy, xclip, or xsel)")]
    NoBackend,
}

/// Write `text` to the system clipboard.
pub fn copy_to_clipboard(text: &str) -> Result<(), ClipboardError> {
    #[cfg(target_os = "macos")]
    {
        run_with_stdin("pbcopy", &[], text)
    }
    #[cfg(target_os = "windows")]
    {
        run_with_stdin("cmd", &["/C", "clip"], text)
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let candidates: [(&str, &[&str]); 3] = [
            ("wl-copy", &[]),
            ("xclip", &["-selection", "clipboard"]),
            ("xsel", &["--clipboard", "--input"]),
        ];
        for (cmd, args) in candidates {
            match run_with_stdin(cmd, args, text) {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!("Clipboard backend skipped: {}", e),
            }
        }
        Err(ClipboardError::NoBackend)
    }
}

fn run_with_stdin(cmd: &str, args: &[&str], input: &str) -> Result<(), ClipboardError> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|_| ClipboardError::Unavailable(cmd.to_string()))?;

    // Stdin is closed at the end of the arm so the child sees EOF.
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input.as_bytes()),
        None => Ok(()),
    };

    // Always reap the child, even when the write failed.
    match (written, child.wait()) {
        (Ok(()), Ok(status)) if status.success() => Ok(()),
        _ => Err(ClipboardError::Failed(cmd.to_string())),
    }
}
