// src/scriptlet/output.rs

//! Line-oriented capture of scriptlet output

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Receives every complete line a scriptlet writes
pub trait OutputSink {
    fn line(&mut self, label: &str, stream: Stream, line: &str);
}

/// Forwards lines to `tracing`: stdout at info, stderr at warn
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&mut self, label: &str, stream: Stream, line: &str) {
        match stream {
            Stream::Stdout => info!(target: "strata::scriptlet", "[{}] {}", label, line),
            Stream::Stderr => warn!(target: "strata::scriptlet", "[{}] {}", label, line),
        }
    }
}

/// Keeps lines in memory, in arrival order
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub lines: Vec<(Stream, String)>,
}

impl CollectingSink {
    pub fn stdout(&self) -> Vec<&str> {
        self.of(Stream::Stdout)
    }

    pub fn stderr(&self) -> Vec<&str> {
        self.of(Stream::Stderr)
    }

    fn of(&self, stream: Stream) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, l)| l.as_str())
            .collect()
    }
}

impl OutputSink for CollectingSink {
    fn line(&mut self, _label: &str, stream: Stream, line: &str) {
        self.lines.push((stream, line.to_string()));
    }
}

/// Splits a byte stream into lines across arbitrary read boundaries
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8], mut emit: impl FnMut(&str)) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            emit(text.trim_end_matches('\r'));
        }
    }

    /// Emit a trailing line that had no newline
    pub(crate) fn finish(&mut self, mut emit: impl FnMut(&str)) {
        if !self.pending.is_empty() {
            let text = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            emit(&text);
        }
    }
}
