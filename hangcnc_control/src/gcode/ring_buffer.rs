//! Fixed-capacity byte ring buffer for incoming serial data.
//!
//! Grounded in `RingBuffer.cpp`. The source hand-rolls a circular array
//! with `_beginningOfString`/`_endOfString` indices mod `INCBUFFERLENGTH`;
//! `heapless::Deque` gives the same fixed-capacity, no-heap-allocation
//! behavior with none of the index bookkeeping.

use hangcnc_common::consts::RING_BUFFER_CAPACITY;
use heapless::Deque;

/// `?` is dropped on write, mirroring the source's "grbl sends them all
/// the time" comment: the status-query character is noise on this wire
/// protocol and never makes it into a line.
const IGNORED: u8 = b'?';

pub struct RingBuffer {
    buf: Deque<u8, RING_BUFFER_CAPACITY>,
}

impl Default for RingBuffer {
    fn default() -> Self {
        RingBuffer { buf: Deque::new() }
    }
}

impl RingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one byte. Returns `Err` on overflow (buffer full), matching
    /// `write`'s nonzero return.
    pub fn write(&mut self, byte: u8) -> Result<(), ()> {
        if byte == IGNORED {
            return Ok(());
        }
        self.buf.push_back(byte).map_err(|_| ())
    }

    pub fn read(&mut self) -> Option<u8> {
        self.buf.pop_front()
    }

    pub fn length(&self) -> usize {
        self.buf.len()
    }

    pub fn space_available(&self) -> usize {
        self.buf.capacity() - self.buf.len()
    }

    pub fn number_of_lines(&self) -> usize {
        self.buf.iter().filter(|&&b| b == b'\n').count()
    }

    /// Pops one `\n`-terminated line, or `None` if no complete line is
    /// buffered yet. Mirrors `readLine`.
    pub fn read_line(&mut self) -> Option<Vec<u8>> {
        if self.number_of_lines() == 0 {
            return None;
        }
        let mut line = Vec::new();
        while let Some(b) = self.read() {
            if b == b'\n' {
                return Some(line);
            }
            line.push(b);
        }
        Some(line)
    }

    /// Pops one line, uppercased with surrounding whitespace trimmed.
    /// Mirrors `prettyReadLine`.
    pub fn pretty_read_line(&mut self) -> Option<String> {
        let line = self.read_line()?;
        let text = String::from_utf8_lossy(&line);
        Some(text.trim().to_uppercase())
    }

    pub fn empty(&mut self) {
        self.buf.clear();
    }
}
