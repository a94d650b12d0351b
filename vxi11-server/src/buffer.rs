//! Fixed capacity byte buffers.
//!
//! Both buffers keep their storage inline, so their size is known at compile time
//! and they never allocate.
use std::{error::Error, fmt::Display};

use heapless::{Deque, Vec};

/// A write did not fit into the remaining capacity of a buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferFull;

impl Display for BufferFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Buffer full")
    }
}

impl Error for BufferFull {}

/// FIFO ring of bytes with all-or-nothing pushes.
#[derive(Debug)]
pub struct CircularBuffer<const N: usize> {
    ring: Deque<u8, N>,
}

impl<const N: usize> CircularBuffer<N> {
    pub const fn new() -> CircularBuffer<N> {
        CircularBuffer { ring: Deque::new() }
    }

    /// Appends all of `data`, or nothing if it does not fit.
    pub fn push(&mut self, data: &[u8]) -> Result<(), BufferFull> {
        if data.len() > N - self.ring.len() {
            return Err(BufferFull);
        }
        for &byte in data {
            // room was checked above
            let _ = self.ring.push_back(byte);
        }
        Ok(())
    }

    /// Removes the oldest byte.
    pub fn pop_one(&mut self) -> Option<u8> {
        self.ring.pop_front()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

impl<const N: usize> Default for CircularBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes appended at the tail and consumed from the head.
///
/// The content is always contiguous; consuming shifts the remainder to the front.
#[derive(Debug)]
pub struct LinearBuffer<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> LinearBuffer<N> {
    pub const fn new() -> LinearBuffer<N> {
        LinearBuffer { buf: Vec::new() }
    }

    /// Appends as many bytes of `data` as fit and returns how many were taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let accepted = data.len().min(self.remaining());
        self.buf.extend(data[..accepted].iter().copied());
        accepted
    }

    /// Replaces the content with the first bytes of `data` that fit.
    pub fn replace(&mut self, data: &[u8]) -> usize {
        self.buf.clear();
        self.append(data)
    }

    /// Removes the first `n` bytes. Consuming more than is stored empties the buffer.
    pub fn consume(&mut self, n: usize) {
        let len = self.buf.len();
        if n >= len {
            self.buf.clear();
            return;
        }
        self.buf.copy_within(n.., 0);
        self.buf.truncate(len - n);
    }

    /// Moves up to `out.len()` bytes from the head into `out`.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.consume(n);
        n
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == N
    }

    pub fn remaining(&self) -> usize {
        N - self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl<const N: usize> Default for LinearBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
