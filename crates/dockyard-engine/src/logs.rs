//! Forwarding of executed command output to the configured log sink.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use dockyard_common::config::LogSink;
use dockyard_common::error::{DockyardError, Result};

/// Which stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Stream {
    const fn label(self) -> &'static str {
        match self {
            Self::Stdout => "out",
            Self::Stderr => "err",
        }
    }
}

/// Destination for command output lines.
#[derive(Debug)]
pub enum CommandLog {
    /// Write to the process's standard output.
    Stdout,
    /// Write to the process's standard error.
    Stderr,
    /// Append to an open file.
    File(Mutex<std::fs::File>),
    /// Discard.
    Null,
}

impl CommandLog {
    /// Opens the sink, creating the log file and its directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a file sink cannot be opened.
    pub fn open(sink: &LogSink) -> Result<Self> {
        Ok(match sink {
            LogSink::Stdout => Self::Stdout,
            LogSink::Stderr => Self::Stderr,
            LogSink::Null => Self::Null,
            LogSink::File(path) => Self::File(Mutex::new(open_append(path)?)),
        })
    }

    /// Writes one line, prefixed with its stream. Write failures are
    /// dropped so that a broken sink never fails a build.
    pub fn line(&self, stream: Stream, line: &str) {
        let label = stream.label();
        let _ = match self {
            Self::Stdout => writeln!(std::io::stdout().lock(), "{label}| {line}"),
            Self::Stderr => writeln!(std::io::stderr().lock(), "{label}| {line}"),
            Self::File(file) => match file.lock() {
                Ok(mut file) => writeln!(file, "{label}| {line}"),
                Err(_) => Ok(()),
            },
            Self::Null => Ok(()),
        };
    }
}

fn open_append(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        crate::tree::create_dir(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| DockyardError::io(path, e))
}
