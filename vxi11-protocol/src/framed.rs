//! Record marking for asynchronous streams.
//!
//! [`RecordCodec`] splits a byte stream into record payloads and prefixes outgoing
//! payloads with a record marker. Only single-fragment records are supported.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::DecodeError,
    protocol::{MARKER_LEN, RecordMarker},
};

#[derive(Debug, Clone)]
pub struct RecordCodec {
    max_record_len: usize,
}

impl RecordCodec {
    /// Creates a codec that refuses records carrying more than `max_record_len` payload bytes.
    pub fn new(max_record_len: usize) -> RecordCodec {
        RecordCodec { max_record_len }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        RecordCodec::new(64 * 1024)
    }
}

impl Decoder for RecordCodec {
    type Item = BytesMut;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(marker) = RecordMarker::peek(src) else {
            return Ok(None);
        };
        if !marker.is_last_fragment() {
            return Err(DecodeError::FragmentedRecord);
        }
        let len = marker.len() as usize;
        if len > self.max_record_len {
            return Err(DecodeError::RecordTooLarge {
                max: self.max_record_len,
                got: len,
            });
        }
        if src.len() < marker.record_len() {
            src.reserve(marker.record_len() - src.len());
            return Ok(None);
        }
        src.advance(MARKER_LEN);
        Ok(Some(src.split_to(len)))
    }
}

impl Encoder<&[u8]> for RecordCodec {
    type Error = DecodeError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > self.max_record_len || payload.len() > RecordMarker::MAX_LEN as usize {
            return Err(DecodeError::RecordTooLarge {
                max: self.max_record_len,
                got: payload.len(),
            });
        }
        dst.reserve(MARKER_LEN + payload.len());
        dst.put_slice(&RecordMarker::last(payload.len() as u32).to_be_bytes());
        dst.put_slice(payload);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn waits_for_complete_record() {
        let mut codec = RecordCodec::default();
        let mut src = BytesMut::from(&[0x80, 0x00, 0x00, 0x03, b'a'][..]);
        assert!(codec.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(b"bc\x80\x00");
        let record = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(&record[..], b"abc");
        assert_eq!(&src[..], &[0x80, 0x00]);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn rejects_fragments() {
        let mut codec = RecordCodec::default();
        let mut src = BytesMut::from(&[0x00, 0x00, 0x00, 0x01, 0xFF][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(DecodeError::FragmentedRecord)
        ));
    }

    #[test]
    fn rejects_oversized_records() {
        let mut codec = RecordCodec::new(8);
        let mut src = BytesMut::from(&[0x80, 0x00, 0x00, 0x09][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(DecodeError::RecordTooLarge { max: 8, got: 9 })
        ));
    }

    #[test]
    fn encode_prefixes_marker() {
        let mut codec = RecordCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(&b"hello"[..], &mut dst).unwrap();
        assert_eq!(&dst[..], b"\x80\x00\x00\x05hello");
    }
}
