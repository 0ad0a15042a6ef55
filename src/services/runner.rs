//! Subprocess runner for build steps
//!
//! Runs one step through the configured shell and yields its combined
//! stdout/stderr line by line as the process produces it.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Capacity of the line buffer between the pipe readers and the consumer
const LINE_BUFFER: usize = 256;

/// A running step process
pub struct StepProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
}

/// Launch `command` via `shell -c` in `cwd`
///
/// An empty `cwd` runs in the server's own working directory.
pub fn spawn_step(shell: &str, command: &str, cwd: &Path) -> std::io::Result<StepProcess> {
    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !cwd.as_os_str().is_empty() {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn()?;
    let (tx, rx) = mpsc::channel(LINE_BUFFER);

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx));
    }

    Ok(StepProcess { child, lines: rx })
}

/// Read a pipe until EOF, forwarding each line (newline included)
async fn forward_lines<R>(pipe: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read step output");
                break;
            }
        }
    }
}

impl StepProcess {
    /// Next line of combined output, or `None` once both pipes are closed
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the process to exit and return its exit code
    ///
    /// Termination by signal is reported as `-1`.
    pub async fn wait(mut self) -> std::io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(command: &str) -> (Vec<String>, i32) {
        let mut process = spawn_step("sh", command, Path::new("")).unwrap();
        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        let code = process.wait().await.unwrap();
        (lines, code)
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let (lines, code) = run("echo hello; echo world").await;
        assert_eq!(lines, vec!["hello\n", "world\n"]);
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_merges_stderr() {
        let (lines, code) = run("echo out; echo err 1>&2; exit 3").await;
        assert_eq!(code, 3);
        assert!(lines.contains(&"out\n".to_string()));
        assert!(lines.contains(&"err\n".to_string()));
    }

    #[tokio::test]
    async fn test_unterminated_last_line() {
        let (lines, _) = run("printf 'no newline'").await;
        assert_eq!(lines, vec!["no newline\n"]);
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut process = spawn_step("sh", "pwd", dir.path()).unwrap();
        let line = process.next_line().await.unwrap();
        process.wait().await.unwrap();

        let reported = std::fs::canonicalize(line.trim()).unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(reported, expected);
    }

    #[tokio::test]
    async fn test_missing_working_directory_fails_to_spawn() {
        let result = spawn_step("sh", "true", Path::new("/definitely/not/a/real/dir"));
        assert!(result.is_err());
    }
}
