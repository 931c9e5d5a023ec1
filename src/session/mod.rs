//! Interactive session driver
//!
//! A [`Session`] owns one spawned LwM2M CLI and synchronizes against its
//! unstructured output: commands go in as lines, and every wait blocks until a
//! literal substring shows up or the per-session timeout elapses. Waits only
//! ever move forward through the output; text consumed by one match is never
//! seen by the next.

mod buffer;
mod pty;

pub use buffer::{Encoding, OutputBuffer};

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use portable_pty::{Child, MasterPty};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::common::{Error, Result};
use pty::ReaderMsg;

/// Marker printed when a packet arrives at the binary
pub const PACKET_MARKER: &str = "bytes received from";

/// Idle prompt as seen through the terminal (`"\r\n> "` after ONLCR)
pub const PROMPT_MARKER: &str = "\r\r\n>";

/// Command used to probe the output stream after a timed wait
const PROBE_COMMAND: &str = "help";

/// Which binary a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Server,
    Client,
    BootstrapServer,
}

impl Role {
    /// The command that makes this role's binary exit
    pub fn quit_command(self) -> &'static str {
        match self {
            Self::Client => "quit",
            Self::Server | Self::BootstrapServer => "q",
        }
    }

    /// Executable name looked up on PATH when no path is configured
    pub fn default_executable(self) -> &'static str {
        match self {
            Self::Server => "lwm2mserver",
            Self::Client => "lwm2mclient",
            Self::BootstrapServer => "bootstrap_server",
        }
    }

    /// File name of this role's transcript
    pub fn transcript_name(self) -> &'static str {
        match self {
            Self::Server => "lwm2mserver_log.txt",
            Self::Client => "lwm2mclient_log.txt",
            Self::BootstrapServer => "lwm2mbootstrapserver_log.txt",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::BootstrapServer => write!(f, "bootstrap_server"),
        }
    }
}

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub role: Role,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Timeout applied to every expectation
    pub timeout: Duration,
    pub encoding: Encoding,
    /// File receiving every byte the process prints
    pub transcript: Option<PathBuf>,
    /// How long `quit` waits for end-of-stream
    pub quit_timeout: Duration,
}

impl SessionOptions {
    pub fn new(role: Role, program: impl Into<PathBuf>) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(3),
            encoding: Encoding::Utf8,
            transcript: None,
            quit_timeout: Duration::from_secs(5),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript = Some(path.into());
        self
    }
}

/// One driven binary
pub struct Session {
    role: Role,
    program: String,
    timeout: Duration,
    quit_timeout: Duration,
    buffer: OutputBuffer,
    /// Text preceding the last successful match
    before: String,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output_rx: mpsc::UnboundedReceiver<ReaderMsg>,
    reader_thread: Option<std::thread::JoinHandle<()>>,
    eof: bool,
    /// Kept open so the slave side is not hung up under the child
    _master: Box<dyn MasterPty + Send>,
}

impl Session {
    /// Launch the binary on a PTY
    pub fn start(options: SessionOptions) -> Result<Self> {
        let pty::PtyProcess {
            child,
            writer,
            output_rx,
            reader_thread,
            master,
        } = pty::spawn(&options.program, &options.args, options.transcript.clone())?;
        tracing::info!(
            "Started {} session: {}",
            options.role,
            options.program.display()
        );

        Ok(Self {
            role: options.role,
            program: options.program.display().to_string(),
            timeout: options.timeout,
            quit_timeout: options.quit_timeout,
            buffer: OutputBuffer::new(options.encoding),
            before: String::new(),
            child,
            writer,
            output_rx,
            reader_thread,
            eof: false,
            _master: master,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Text that preceded the most recent successful match
    pub fn before(&self) -> &str {
        &self.before
    }

    /// Output received but not yet consumed by a match
    pub fn unconsumed(&self) -> &str {
        self.buffer.as_str()
    }

    /// Whether the process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write a command line to the process
    pub fn send(&mut self, line: &str) -> Result<()> {
        tracing::debug!("[{}] >>> {}", self.role, line);
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Wait for `text` to appear, using the session timeout
    ///
    /// Returns the text received before the match and consumes through it.
    pub async fn expect(&mut self, text: &str) -> Result<String> {
        self.expect_within(text, self.timeout).await
    }

    /// Wait for `text` with an explicit timeout
    pub async fn expect_within(&mut self, text: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(before) = self.buffer.take_through(text) {
                tracing::debug!("[{}] matched {:?}", self.role, text);
                self.before = before.clone();
                return Ok(before);
            }

            if self.eof {
                self.dump_unconsumed(text);
                return Err(Error::SessionClosed {
                    expected: text.to_string(),
                });
            }

            match tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
                Ok(Some(ReaderMsg::Data(bytes))) => self.buffer.push(&bytes),
                Ok(Some(ReaderMsg::Eof)) | Ok(None) => {
                    self.buffer.finish();
                    self.eof = true;
                }
                Err(_) => {
                    self.dump_unconsumed(text);
                    return Err(Error::match_timeout(text, timeout));
                }
            }
        }
    }

    fn dump_unconsumed(&self, expected: &str) {
        tracing::warn!(
            "[{}] {:?} not seen. Actual output:\n----------------------------------------------\n{}\n----------------------------------------------",
            self.role,
            expected,
            self.buffer.as_str()
        );
    }

    /// Wait for `text`, reporting a miss as `false`
    pub async fn wait_for_text(&mut self, text: &str) -> Result<bool> {
        match self.expect(text).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_missed_expectation() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Send `command` and wait for `response`, reporting a miss as `false`
    pub async fn command_response(&mut self, command: &str, response: &str) -> Result<bool> {
        self.send(command)?;
        self.wait_for_text(response).await
    }

    /// Wait for the next inbound packet printout
    ///
    /// Returns the text between the packet announcement and the next prompt.
    pub async fn wait_for_packet(&mut self) -> Result<String> {
        self.expect(PACKET_MARKER).await?;
        self.expect(PROMPT_MARKER).await
    }

    /// Let the process run for `duration`, then return everything it printed
    /// since the previous match
    ///
    /// Output is pushed by the binary at its own pace (Observe notifications,
    /// registration updates), so there is no single marker to wait on. The
    /// window is closed by sending a no-op command and matching its echo.
    pub async fn wait_for_time(&mut self, duration: Duration) -> Result<String> {
        tracing::debug!("[{}] sampling output for {:?}", self.role, duration);
        tokio::time::sleep(duration).await;
        self.send(PROBE_COMMAND)?;
        self.expect(PROBE_COMMAND).await
    }

    /// Quit the binary and wait for it to exit
    ///
    /// A process that already exited is not an error.
    pub async fn quit(mut self) -> Result<()> {
        if !self.eof {
            // The write fails if the process is gone already
            if let Err(e) = self.send(self.role.quit_command()) {
                tracing::debug!("[{}] quit command not delivered: {}", self.role, e);
            }
            let deadline = Instant::now() + self.quit_timeout;
            while !self.eof {
                match tokio::time::timeout_at(deadline, self.output_rx.recv()).await {
                    Ok(Some(ReaderMsg::Data(bytes))) => self.buffer.push(&bytes),
                    Ok(Some(ReaderMsg::Eof)) | Ok(None) => self.eof = true,
                    Err(_) => break,
                }
            }
        }

        if !self.eof {
            tracing::warn!(
                "[{}] {} did not exit within {:?}, killing",
                self.role,
                self.program,
                self.quit_timeout
            );
            let _ = self.child.kill();
        }

        let _ = self.child.wait();
        if let Some(handle) = self.reader_thread.take() {
            if self.eof {
                let _ = handle.join();
            }
        }
        tracing::info!("Stopped {} session", self.role);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_command_per_role() {
        assert_eq!(Role::Client.quit_command(), "quit");
        assert_eq!(Role::Server.quit_command(), "q");
        assert_eq!(Role::BootstrapServer.quit_command(), "q");
    }

    #[test]
    fn test_role_deserializes_snake_case() {
        let role: Role = serde_yaml::from_str("bootstrap_server").unwrap();
        assert_eq!(role, Role::BootstrapServer);
        assert_eq!(role.to_string(), "bootstrap_server");
    }

    #[test]
    fn test_options_builder() {
        let options = SessionOptions::new(Role::Client, "/usr/bin/lwm2mclient")
            .args(["-b", "-n", "apa"])
            .timeout(Duration::from_secs(13))
            .transcript("/tmp/lwm2mclient_log.txt");
        assert_eq!(options.args, vec!["-b", "-n", "apa"]);
        assert_eq!(options.timeout, Duration::from_secs(13));
        assert_eq!(options.encoding, Encoding::Utf8);
        assert!(options.transcript.is_some());
    }

    #[test]
    fn test_launch_failure_for_missing_program() {
        let options = SessionOptions::new(Role::Server, "/nonexistent/lwm2mserver");
        let err = Session::start(options).err().expect("launch should fail");
        assert!(matches!(err, Error::LaunchFailed { .. }));
    }
}
