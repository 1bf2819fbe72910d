use crate::{IndexerError, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time;

/// A stream of raw log lines.
///
/// `next_line` must be cancel-safe: it is polled inside `tokio::select!` and
/// may be dropped at any await point without losing a buffered line.
#[async_trait]
pub trait LogSource: Send {
    /// Next line, or `None` at end of stream.
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Release whatever backs the source. Called once after the last read.
    async fn shutdown(&mut self) {}

    fn describe(&self) -> String;
}

/// Lines from the stdout of a long-running child process such as
/// `journalctl -f -o short`.
pub struct CommandSource {
    argv: Vec<String>,
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    kill_timeout: Duration,
}

impl CommandSource {
    pub fn spawn(argv: &[String], kill_timeout: Duration) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| IndexerError::Source("empty source command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| IndexerError::Source(format!("failed to start {program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IndexerError::Source(format!("{program} has no stdout pipe")))?;

        info!("Started log source: {}", argv.join(" "));
        Ok(Self {
            argv: argv.to_vec(),
            child,
            lines: BufReader::new(stdout).lines(),
            kill_timeout,
        })
    }

    #[cfg(unix)]
    fn terminate(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: plain signal delivery to a child we spawned and still own.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            debug!("SIGTERM to {pid} failed: {}", std::io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self) {}
}

#[async_trait]
impl LogSource for CommandSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    async fn shutdown(&mut self) {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        self.terminate();
        match time::timeout(self.kill_timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Log source exited: {status}"),
            Ok(Err(err)) => warn!("Waiting for log source failed: {err}"),
            Err(_) => {
                warn!(
                    "Log source did not exit within {}ms, killing it",
                    self.kill_timeout.as_millis()
                );
                if let Err(err) = self.child.kill().await {
                    warn!("Failed to kill log source: {err}");
                }
            }
        }
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.argv.join(" "))
    }
}

/// Lines from any buffered async reader (stdin, a file, an in-memory buffer).
pub struct ReaderSource<R> {
    name: String,
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LogSource for ReaderSource<R> {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn reader_source_skips_blank_lines() {
        let data: &[u8] = b"first\n\n   \nsecond\nthird";
        let mut source = ReaderSource::new("memory", data);
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().await.unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["first", "second", "third"]);
        assert_eq!(source.describe(), "memory");
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = CommandSource::spawn(&[], Duration::from_secs(1)).err().unwrap();
        assert!(err.to_string().contains("empty source command"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_source_streams_stdout() {
        let argv = ["printf".to_string(), "a\\n\\nb\\n".to_string()];
        let mut source = CommandSource::spawn(&argv, Duration::from_secs(1)).unwrap();
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("a"));
        assert_eq!(source.next_line().await.unwrap().as_deref(), Some("b"));
        assert_eq!(source.next_line().await.unwrap(), None);
        source.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_stops_long_running_command() {
        let argv = ["sleep".to_string(), "30".to_string()];
        let mut source = CommandSource::spawn(&argv, Duration::from_secs(2)).unwrap();
        source.shutdown().await;
        assert!(matches!(source.child.try_wait(), Ok(Some(_))));
    }
}
