//! Bounded capture of child process output.
//!
//! Only the last few lines of a build are ever reported, so the readers keep a
//! line ring instead of the whole stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// How long to wait for a reader after the child has exited or been killed.
pub(crate) const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Longest partial line kept; the front of an over-long line is dropped.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// The last `max_lines` lines of a byte stream.
#[derive(Debug)]
pub(crate) struct TailBuffer {
    max_lines: usize,
    lines: VecDeque<Vec<u8>>,
    partial: Vec<u8>,
    omitted: usize,
}

impl TailBuffer {
    pub(crate) fn new(max_lines: usize) -> Self {
        Self {
            max_lines,
            lines: VecDeque::new(),
            partial: Vec::new(),
            omitted: 0,
        }
    }

    pub(crate) fn push(&mut self, mut bytes: &[u8]) {
        while let Some(pos) = bytes.iter().position(|&b| b == b'\n') {
            self.extend_partial(&bytes[..pos]);
            let line = std::mem::take(&mut self.partial);
            self.push_line(line);
            bytes = &bytes[pos + 1..];
        }
        self.extend_partial(bytes);
    }

    fn extend_partial(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        if self.partial.len() > MAX_LINE_BYTES {
            let excess = self.partial.len() - MAX_LINE_BYTES;
            self.partial.drain(..excess);
        }
    }

    fn push_line(&mut self, line: Vec<u8>) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            self.omitted += 1;
        }
    }

    /// Render the kept lines, prefixed by a marker when earlier lines were dropped.
    pub(crate) fn into_text(mut self) -> String {
        if !self.partial.is_empty() {
            let last = std::mem::take(&mut self.partial);
            self.push_line(last);
        }

        let mut out = String::new();
        if self.omitted > 0 {
            out.push_str(&format!("[... {} earlier lines omitted]\n", self.omitted));
        }
        let lines: Vec<String> = self
            .lines
            .iter()
            .map(|line| {
                String::from_utf8_lossy(line)
                    .trim_end_matches('\r')
                    .to_string()
            })
            .collect();
        out.push_str(&lines.join("\n"));
        out
    }
}

/// Drains one child stream into a shared [`TailBuffer`].
///
/// A grandchild can keep the pipe open after the child dies, so the reader is
/// abandoned after [`DRAIN_GRACE`] and whatever arrived so far is kept.
pub(crate) struct Capture {
    buffer: Arc<Mutex<TailBuffer>>,
    task: Option<JoinHandle<()>>,
}

impl Capture {
    pub(crate) fn start<R>(stream: Option<R>, max_lines: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(TailBuffer::new(max_lines)));
        let task = stream.map(|mut stream| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => match buffer.lock() {
                            Ok(mut tail) => tail.push(&chunk[..n]),
                            Err(_) => break,
                        },
                    }
                }
            })
        });
        Self { buffer, task }
    }

    pub(crate) async fn finish(mut self) -> String {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        let tail = match self.buffer.lock() {
            Ok(mut tail) => std::mem::replace(&mut *tail, TailBuffer::new(0)),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), TailBuffer::new(0)),
        };
        tail.into_text()
    }
}
