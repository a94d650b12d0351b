//! Reconstruction of records from a byte stream.
use vxi11_protocol::{RecordMarker, error::DecodeError};

use crate::{buffer::LinearBuffer, transport::Transport};

/// Capacity of the reassembly buffer. A record must fit completely.
pub const RX_BUFFER_SIZE: usize = 2048;

/// What to do with a record that can never be extracted.
///
/// This covers a marker without the last-fragment bit and a record larger than
/// [`RX_BUFFER_SIZE`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MarkerPolicy {
    /// Keep the bytes. Extraction reports "not ready" until the buffer is cleared.
    #[default]
    Stall,
    /// Throw away everything buffered so that later records can be extracted.
    Discard,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    buf: LinearBuffer<RX_BUFFER_SIZE>,
    policy: MarkerPolicy,
    stalled: bool,
}

impl Reassembler {
    pub fn new(policy: MarkerPolicy) -> Reassembler {
        Reassembler {
            buf: LinearBuffer::new(),
            policy,
            stalled: false,
        }
    }

    pub fn policy(&self) -> MarkerPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: MarkerPolicy) {
        self.policy = policy;
    }

    /// Polls the transport until it runs dry or the buffer is full.
    /// Returns the number of bytes taken.
    pub fn pull_available_bytes(&mut self, transport: &mut impl Transport) -> usize {
        let mut pulled = 0;
        while !self.buf.is_full() {
            let Some(byte) = transport.poll_byte() else {
                break;
            };
            pulled += self.buf.append(&[byte]);
        }
        pulled
    }

    /// Returns the length (marker included) of the complete record at the head of
    /// the buffer, `Ok(None)` if more bytes are needed.
    ///
    /// A record that can never be extracted is reported as an error and handled
    /// according to the [`MarkerPolicy`].
    pub fn try_extract_record(&mut self) -> Result<Option<usize>, DecodeError> {
        let Some(marker) = RecordMarker::peek(self.buf.as_slice()) else {
            return Ok(None);
        };
        let error = if !marker.is_last_fragment() {
            DecodeError::FragmentedRecord
        } else if marker.record_len() > RX_BUFFER_SIZE {
            DecodeError::RecordTooLarge {
                max: RX_BUFFER_SIZE,
                got: marker.record_len(),
            }
        } else if self.buf.len() < marker.record_len() {
            return Ok(None);
        } else {
            return Ok(Some(marker.record_len()));
        };

        match self.policy {
            MarkerPolicy::Stall => {
                if !self.stalled {
                    log::warn!("Record extraction stalled: {}", error);
                    self.stalled = true;
                }
            }
            MarkerPolicy::Discard => {
                log::warn!("Discarding {} buffered bytes: {}", self.buf.len(), error);
                self.buf.clear();
            }
        }
        Err(error)
    }

    /// The first `len` buffered bytes
    pub fn record(&self, len: usize) -> &[u8] {
        &self.buf.as_slice()[..len.min(self.buf.len())]
    }

    /// Drops the first `n` bytes.
    pub fn consume(&mut self, n: usize) {
        self.buf.consume(n);
    }

    /// Drops everything buffered and ends a stall.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.stalled = false;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
