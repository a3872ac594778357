//! Circular receive buffer and line extraction.
//!
//! The receiver writes into [`RxBuffer`] continuously, wrapping to offset 0
//! at the end. [`LineExtractor`] follows behind it with two cursors:
//!
//! ```text
//!            begin          end
//!              v             v
//! +-----------+---------------+-------------------+-----------+
//! | 0 0 0 0 0 | +IP: 10.0.0.2 | \r \n O K \r \n   | 0 0 0 0 0 |
//! +-----------+---------------+-------------------+-----------+
//!   consumed     current line    not yet scanned     unwritten
//! ```
//!
//! Consumed bytes are zeroed, so a zero byte always marks space the
//! receiver has not written yet.

use crate::error::AtError;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::trace;

/// Fixed-capacity circular byte buffer filled by the receiver.
#[derive(Debug)]
pub struct RxBuffer {
    data: Box<[u8]>,
    write_pos: usize,
}

impl RxBuffer {
    /// Creates a zeroed buffer of at least one byte.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity.max(1)].into_boxed_slice(),
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Appends received bytes, wrapping at the end of the buffer.
    ///
    /// NUL bytes are dropped since zero marks unwritten space.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().filter(|&&b| b != 0) {
            self.data[self.write_pos] = b;
            self.write_pos = (self.write_pos + 1) % self.data.len();
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Shared handle to a receive buffer.
///
/// Cloned into whatever fills the buffer: a reader thread, an interrupt
/// shim, or a scripted transport in tests.
#[derive(Debug, Clone)]
pub struct RxHandle(Arc<Mutex<RxBuffer>>);

impl RxHandle {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(RxBuffer::new(capacity))))
    }

    /// Writes received bytes into the buffer.
    pub fn fill(&self, bytes: &[u8]) {
        self.0.lock().write(bytes);
    }

    pub fn lock(&self) -> MutexGuard<'_, RxBuffer> {
        self.0.lock()
    }
}

/// Pulls complete lines out of an [`RxBuffer`].
#[derive(Debug)]
pub struct LineExtractor {
    begin: usize,
    end: usize,
    line: Vec<u8>,
    max_line: usize,
}

impl LineExtractor {
    /// Creates an extractor whose scratch buffer holds `max_line` bytes,
    /// terminator included.
    pub fn new(max_line: usize) -> Self {
        Self {
            begin: 0,
            end: 0,
            line: Vec::with_capacity(max_line),
            max_line,
        }
    }

    /// Current `(begin, end)` cursors.
    pub fn cursors(&self) -> (usize, usize) {
        (self.begin, self.end)
    }

    /// Returns the next complete line, without its `\r\n` terminator.
    ///
    /// Scans at most one lap of the buffer. Empty lines are skipped. Returns
    /// `Ok(None)` on reaching unwritten space; the partial line stays in the
    /// buffer for the next call. A line longer than the scratch buffer, or a
    /// full lap with no terminator, is a fatal [`AtError::LineOverflow`].
    pub fn next_line(&mut self, rx: &mut RxBuffer) -> Result<Option<&[u8]>, AtError> {
        let cap = rx.capacity();
        let data = &mut rx.data;
        let mut end = self.end;

        for _ in 0..cap {
            match data[end] {
                0 => {
                    self.end = end;
                    return Ok(None);
                }
                b'\n' => {
                    let span = if self.begin <= end {
                        end - self.begin + 1
                    } else {
                        cap - self.begin + end + 1
                    };
                    if span > self.max_line {
                        return Err(AtError::LineOverflow {
                            len: span,
                            max: self.max_line,
                        });
                    }

                    self.line.clear();
                    if self.begin <= end {
                        self.line.extend_from_slice(&data[self.begin..=end]);
                        data[self.begin..=end].fill(0);
                    } else {
                        // Straddles the wrap point: tail first, then head.
                        self.line.extend_from_slice(&data[self.begin..]);
                        self.line.extend_from_slice(&data[..=end]);
                        data[self.begin..].fill(0);
                        data[..=end].fill(0);
                    }
                    strip_terminator(&mut self.line);

                    end = (end + 1) % cap;
                    self.begin = end;
                    self.end = end;

                    if self.line.is_empty() {
                        continue;
                    }
                    trace!(line = %String::from_utf8_lossy(&self.line), "rx line");
                    return Ok(Some(self.line.as_slice()));
                }
                _ => end = (end + 1) % cap,
            }
        }

        Err(AtError::LineOverflow {
            len: cap,
            max: self.max_line,
        })
    }
}

fn strip_terminator(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}
