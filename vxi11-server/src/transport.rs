//! Byte transport used by the core.
//!
//! The core only ever asks a transport for one byte at a time and hands it complete
//! reply records. Serial lines, sockets and test doubles all fit behind [`Transport`].
use crate::buffer::{BufferFull, CircularBuffer};

/// Capacity of each direction of the [`LoopbackTransport`].
pub const LOOPBACK_CAPACITY: usize = 4096;

/// Byte-oriented channel between the core and its peer.
pub trait Transport {
    type Error: std::fmt::Debug;

    /// Returns the next received byte, or `None` if nothing is available right now.
    /// Must not block.
    fn poll_byte(&mut self) -> Option<u8>;

    /// Transmits exactly `data`. Either all bytes are sent or none are.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn poll_byte(&mut self) -> Option<u8> {
        (**self).poll_byte()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).write_all(data)
    }
}

/// A transport made of two bounded rings.
///
/// Another component feeds bytes received from the peer with [`inject_rx`](Self::inject_rx)
/// and collects bytes for the peer with [`drain_tx`](Self::drain_tx).
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    rx: CircularBuffer<LOOPBACK_CAPACITY>,
    tx: CircularBuffer<LOOPBACK_CAPACITY>,
}

impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        LoopbackTransport::default()
    }

    /// Queues bytes that arrived from the peer. Nothing is queued if not all of them fit.
    pub fn inject_rx(&mut self, data: &[u8]) -> Result<(), BufferFull> {
        self.rx.push(data)
    }

    /// Moves up to `out.len()` bytes that are waiting for the peer into `out`.
    pub fn drain_tx(&mut self, out: &mut [u8]) -> usize {
        let mut got = 0;
        while got < out.len() {
            match self.tx.pop_one() {
                Some(byte) => {
                    out[got] = byte;
                    got += 1;
                }
                None => break,
            }
        }
        got
    }

    /// Bytes received from the peer and not yet polled by the core
    pub fn rx_len(&self) -> usize {
        self.rx.len()
    }

    /// Room left for [`inject_rx`](Self::inject_rx)
    pub fn rx_free(&self) -> usize {
        self.rx.capacity() - self.rx.len()
    }

    /// Bytes written by the core and not yet drained
    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }

    pub fn clear(&mut self) {
        self.rx.clear();
        self.tx.clear();
    }
}

impl Transport for LoopbackTransport {
    type Error = BufferFull;

    fn poll_byte(&mut self) -> Option<u8> {
        self.rx.pop_one()
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), BufferFull> {
        if data.is_empty() {
            return Ok(());
        }
        self.tx.push(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rx_is_polled_in_order() {
        let mut transport = LoopbackTransport::new();
        transport.inject_rx(b"ab").unwrap();
        transport.inject_rx(b"c").unwrap();
        assert_eq!(transport.rx_len(), 3);
        assert_eq!(transport.poll_byte(), Some(b'a'));
        assert_eq!(transport.poll_byte(), Some(b'b'));
        assert_eq!(transport.poll_byte(), Some(b'c'));
        assert_eq!(transport.poll_byte(), None);
    }

    #[test]
    fn tx_write_fails_when_full() {
        let mut transport = LoopbackTransport::new();
        transport.write_all(&[1; LOOPBACK_CAPACITY - 2]).unwrap();
        assert_eq!(transport.write_all(&[2; 3]), Err(BufferFull));
        assert_eq!(transport.tx_len(), LOOPBACK_CAPACITY - 2);
        transport.write_all(&[]).unwrap();

        let mut out = [0u8; 16];
        assert_eq!(transport.drain_tx(&mut out), 16);
        assert_eq!(transport.tx_len(), LOOPBACK_CAPACITY - 18);
    }

    #[test]
    fn inject_is_all_or_nothing() {
        let mut transport = LoopbackTransport::new();
        transport.inject_rx(&[0; LOOPBACK_CAPACITY]).unwrap();
        assert_eq!(transport.rx_free(), 0);
        assert_eq!(transport.inject_rx(b"x"), Err(BufferFull));
        assert_eq!(transport.rx_len(), LOOPBACK_CAPACITY);
    }
}
