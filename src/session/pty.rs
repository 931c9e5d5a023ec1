//! Pseudo-terminal process spawning
//!
//! The binaries under test are interactive CLIs that only line-buffer their
//! output when attached to a terminal, so they are run on a PTY. A reader
//! thread moves every byte from the PTY master into a channel and into the
//! session transcript.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::common::{Error, Result};

/// Message from the PTY reader thread
#[derive(Debug)]
pub enum ReaderMsg {
    Data(Vec<u8>),
    Eof,
}

/// A process running on a PTY
pub struct PtyProcess {
    pub child: Box<dyn Child + Send + Sync>,
    pub writer: Box<dyn Write + Send>,
    pub output_rx: mpsc::UnboundedReceiver<ReaderMsg>,
    pub reader_thread: Option<JoinHandle<()>>,
    pub master: Box<dyn MasterPty + Send>,
}

/// Spawn `program` with `args` on a fresh PTY
///
/// When `transcript` is given, every byte read from the process is also
/// appended to that file.
pub fn spawn(program: &Path, args: &[String], transcript: Option<PathBuf>) -> Result<PtyProcess> {
    let display = program.display().to_string();

    let pty_system = portable_pty::native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 24,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| Error::launch_failed(&display, e))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    let cwd = std::env::current_dir().map_err(|e| Error::launch_failed(&display, e))?;
    cmd.cwd(cwd);

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| Error::launch_failed(&display, e))?;
    // The child holds its own handle; ours would keep the PTY open after exit
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| Error::launch_failed(&display, e))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| Error::launch_failed(&display, e))?;

    let sink = match transcript {
        Some(path) => Some(File::create(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?),
        None => None,
    };

    let (tx, output_rx) = mpsc::unbounded_channel();
    let reader_thread = thread::Builder::new()
        .name("lwm2m-pty-reader".to_string())
        .spawn(move || read_loop(reader, sink, tx))
        .map_err(|e| Error::launch_failed(&display, format!("reader thread: {e}")))?;

    tracing::debug!("Spawned {} {:?}", program.display(), args);

    Ok(PtyProcess {
        child,
        writer,
        output_rx,
        reader_thread: Some(reader_thread),
        master: pair.master,
    })
}

fn read_loop(
    mut reader: Box<dyn Read + Send>,
    mut sink: Option<File>,
    tx: mpsc::UnboundedSender<ReaderMsg>,
) {
    let mut buffer = [0u8; 8192];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if let Some(file) = sink.as_mut() {
                    if let Err(e) = file.write_all(&buffer[..n]).and_then(|_| file.flush()) {
                        tracing::warn!("Transcript write failed, disabling: {}", e);
                        sink = None;
                    }
                }
                if tx.send(ReaderMsg::Data(buffer[..n].to_vec())).is_err() {
                    // Session dropped
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO on the master once the child side is closed
            Err(_) => break,
        }
    }
    let _ = tx.send(ReaderMsg::Eof);
}
