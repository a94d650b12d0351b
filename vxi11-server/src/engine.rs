//! The Core channel engine.
//!
//! [`Vxi11Core`] owns every buffer of the channel. One call to [`Vxi11Core::service`]
//! pulls what the transport has, then processes every complete record, sending at
//! most one reply per record. Nothing blocks and nothing allocates.
use std::{fmt::Display, io, mem};

use vxi11_protocol::{
    CALL_HEADER_LEN, CallHeader, CreateLinkParms, DeviceReadParms, DeviceWriteParms, LINK_ID,
    MARKER_LEN, MAX_RECV_SIZE, Procedure, REPLY_HEADER_LEN, ReadReason, Reply, ReplyBody,
    error::DecodeError,
};

use crate::{
    buffer::LinearBuffer,
    context::{ErrorCode, RuntimeContext},
    reassembler::{MarkerPolicy, Reassembler},
    transport::Transport,
};

/// Capacity of the buffer holding SCPI bytes received through device_write.
pub const SCPI_IN_BUFFER_SIZE: usize = 1024;
/// Capacity of the buffer holding SCPI bytes waiting for device_read.
pub const SCPI_OUT_BUFFER_SIZE: usize = 1024;

/// Largest reply record: a device_read reply carrying a full output buffer plus padding.
const REPLY_FRAME_SIZE: usize = MARKER_LEN + REPLY_HEADER_LEN + 12 + SCPI_OUT_BUFFER_SIZE + 3;

/// Reason a call produced no reply, or its reply could not be sent.
#[derive(Debug)]
pub enum CallError<E> {
    /// The record is not a well-formed, supported call.
    Malformed(DecodeError),
    /// device_write or device_read arrived before create_link.
    LinkNotCreated(Procedure),
    /// The transport refused the reply.
    Transport(E),
    /// The reply did not fit the reply frame.
    Encode(io::Error),
}

impl<E: std::fmt::Debug> Display for CallError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Malformed(error) => write!(f, "Malformed call: {}", error),
            CallError::LinkNotCreated(procedure) => {
                write!(f, "Received {} before create_link", procedure)
            }
            CallError::Transport(error) => write!(f, "Transport error: {:?}", error),
            CallError::Encode(error) => write!(f, "Could not encode reply: {}", error),
        }
    }
}

impl<E: std::fmt::Debug> std::error::Error for CallError<E> {}

/// Everything except the reassembly buffer: link state, SCPI buffers and the
/// transport replies go to. Dispatches the calls.
#[derive(Debug)]
struct Channel<T> {
    transport: T,
    scpi_in: LinearBuffer<SCPI_IN_BUFFER_SIZE>,
    scpi_out: LinearBuffer<SCPI_OUT_BUFFER_SIZE>,
    link_created: bool,
    link_id: u32,
    last_error: ErrorCode,
}

fn send_reply<T: Transport>(transport: &mut T, reply: &Reply) -> Result<(), CallError<T::Error>> {
    let mut frame = [0u8; REPLY_FRAME_SIZE];
    let len = reply.record_len();
    let mut writer = &mut frame[..];
    reply.write_record(&mut writer).map_err(CallError::Encode)?;
    log::trace!("Reply record: {:02x?}", &frame[..len]);
    transport.write_all(&frame[..len]).map_err(CallError::Transport)
}

impl<T: Transport> Channel<T> {
    fn new(transport: T) -> Channel<T> {
        Channel {
            transport,
            scpi_in: LinearBuffer::new(),
            scpi_out: LinearBuffer::new(),
            link_created: false,
            link_id: LINK_ID,
            last_error: ErrorCode::None,
        }
    }

    fn malformed(&mut self, error: DecodeError) -> CallError<T::Error> {
        self.last_error = ErrorCode::BadCall;
        CallError::Malformed(error)
    }

    /// Validates one complete record (marker included) and runs its procedure.
    fn process(&mut self, record: &[u8]) -> Result<(), CallError<T::Error>> {
        if record.len() < MARKER_LEN + CALL_HEADER_LEN {
            return Err(self.malformed(DecodeError::TooShort {
                needed: MARKER_LEN + CALL_HEADER_LEN,
                got: record.len(),
            }));
        }
        let payload = &record[MARKER_LEN..];
        let header = CallHeader::from_payload(payload).map_err(|err| self.malformed(err))?;
        let procedure = header.validate().map_err(|err| self.malformed(err))?;
        log::debug!("Received {} call: xid={}", procedure, header.xid);

        match procedure {
            Procedure::CreateLink => self.create_link(header.xid, payload),
            Procedure::DeviceWrite | Procedure::DeviceRead if !self.link_created => {
                self.last_error = ErrorCode::LinkNotCreated;
                Err(CallError::LinkNotCreated(procedure))
            }
            Procedure::DeviceWrite => self.device_write(header.xid, payload),
            Procedure::DeviceRead => self.device_read(header.xid, payload),
        }
    }

    fn create_link(&mut self, xid: u32, payload: &[u8]) -> Result<(), CallError<T::Error>> {
        // The arguments are not checked; they are only logged when readable.
        match CreateLinkParms::from_payload(payload) {
            Ok(parms) => log::info!(
                "Creating link for client {} on device {}",
                parms.client_id,
                std::str::from_utf8(parms.device).unwrap_or("<binary>")
            ),
            Err(_) => log::info!("Creating link"),
        }
        self.link_created = true;
        self.link_id = LINK_ID;

        let reply = Reply::new(
            xid,
            ReplyBody::CreateLink {
                error: 0,
                link_id: self.link_id,
                abort_port: 0,
                max_recv_size: MAX_RECV_SIZE,
            },
        );
        send_reply(&mut self.transport, &reply)
    }

    fn device_write(&mut self, xid: u32, payload: &[u8]) -> Result<(), CallError<T::Error>> {
        let parms = DeviceWriteParms::from_payload(payload).map_err(|err| self.malformed(err))?;
        let requested = parms.data.len();
        let accepted = self.scpi_in.append(parms.data);
        if accepted < requested {
            self.last_error = ErrorCode::Overflow;
            log::warn!(
                "SCPI input buffer full, dropped {} of {} bytes",
                requested - accepted,
                requested
            );
        }
        log::debug!(
            "device_write: {} bytes, {} buffered",
            requested,
            self.scpi_in.len()
        );
        log::trace!("device_write data: {:02x?}", parms.data);

        let reply = Reply::new(
            xid,
            ReplyBody::DeviceWrite {
                error: 0,
                size: requested as u32,
            },
        );
        send_reply(&mut self.transport, &reply)
    }

    fn device_read(&mut self, xid: u32, payload: &[u8]) -> Result<(), CallError<T::Error>> {
        let parms = DeviceReadParms::from_payload(payload).map_err(|err| self.malformed(err))?;
        let requested = match parms.request_size {
            0 => SCPI_OUT_BUFFER_SIZE,
            size => size as usize,
        };
        let available = self.scpi_out.len();
        let send = available.min(requested);
        let reason = if send < available {
            ReadReason::Partial
        } else {
            ReadReason::End
        };
        log::debug!(
            "device_read: requested={}, available={}, sending={}, reason={:?}",
            parms.request_size,
            available,
            send,
            reason
        );

        let reply = Reply::new(
            xid,
            ReplyBody::DeviceRead {
                error: 0,
                reason,
                data: &self.scpi_out.as_slice()[..send],
            },
        );
        send_reply(&mut self.transport, &reply)?;
        // only sent bytes are consumed so that a failed send can be retried
        self.scpi_out.consume(send);
        Ok(())
    }
}

/// A single VXI-11 Core channel with one link.
///
/// The core is driven by calling [`service`](Self::service) repeatedly. The SCPI
/// interpreter sits on the other side of the flow-control buffers and talks to the
/// core through [`drain_input`](Self::drain_input) and
/// [`set_response`](Self::set_response).
///
/// # Example
///
/// ```
/// use vxi11_server::{engine::Vxi11Core, transport::LoopbackTransport};
///
/// let mut core = Vxi11Core::new(LoopbackTransport::new());
/// core.set_response(b"OK\n");
/// assert_eq!(core.service(), 0);
/// assert_eq!(core.response_pending_len(), 3);
/// assert!(!core.context().link_created);
/// ```
#[derive(Debug)]
pub struct Vxi11Core<T: Transport> {
    reassembler: Reassembler,
    channel: Channel<T>,
}

impl<T: Transport> Vxi11Core<T> {
    pub fn new(transport: T) -> Vxi11Core<T> {
        Vxi11Core::with_policy(transport, MarkerPolicy::default())
    }

    pub fn with_policy(transport: T, policy: MarkerPolicy) -> Vxi11Core<T> {
        Vxi11Core {
            reassembler: Reassembler::new(policy),
            channel: Channel::new(transport),
        }
    }

    /// Pulls all available bytes from the transport and processes every complete
    /// record. Returns the number of records taken off the reassembly buffer.
    pub fn service(&mut self) -> usize {
        let mut processed = 0;
        while self.service_one() {
            processed += 1;
        }
        processed
    }

    /// Like [`service`](Self::service), but processes at most one record.
    ///
    /// This lets the interpreter run between two calls that arrived together, so that
    /// a device_read sees the response to the device_write before it.
    /// Returns whether a record was taken off the reassembly buffer.
    pub fn service_one(&mut self) -> bool {
        let pulled = self
            .reassembler
            .pull_available_bytes(&mut self.channel.transport);
        if pulled > 0 {
            log::trace!("Pulled {} bytes from transport", pulled);
        }

        let len = match self.reassembler.try_extract_record() {
            Ok(Some(len)) => len,
            Ok(None) => return false,
            Err(_) => {
                self.channel.last_error = ErrorCode::BadCall;
                return false;
            }
        };
        match self.channel.process(self.reassembler.record(len)) {
            Ok(()) => {}
            Err(err @ CallError::Transport(_)) | Err(err @ CallError::Encode(_)) => {
                log::error!("Reply not sent: {}", err)
            }
            Err(err) => log::warn!("Dropping call without reply: {}", err),
        }
        self.reassembler.consume(len);
        true
    }

    /// Current state of link, buffers and last error
    pub fn context(&self) -> RuntimeContext {
        RuntimeContext {
            link_created: self.channel.link_created,
            link_id: self.channel.link_id,
            rx_bytes: self.reassembler.len(),
            scpi_in_bytes: self.channel.scpi_in.len(),
            scpi_out_bytes: self.channel.scpi_out.len(),
            last_error: self.channel.last_error,
        }
    }

    /// Returns to the initial state: no link, empty buffers, no error.
    /// The transport is kept as it is.
    pub fn reset(&mut self) {
        self.reassembler.clear();
        self.channel.scpi_in.clear();
        self.channel.scpi_out.clear();
        self.channel.link_created = false;
        self.channel.link_id = LINK_ID;
        self.channel.last_error = ErrorCode::None;
    }

    /// Discards every byte in the reassembly buffer, ending a stall on a malformed record.
    pub fn clear_reassembly(&mut self) {
        self.reassembler.clear();
    }

    pub fn marker_policy(&self) -> MarkerPolicy {
        self.reassembler.policy()
    }

    pub fn set_marker_policy(&mut self, policy: MarkerPolicy) {
        self.reassembler.set_policy(policy);
    }

    pub fn transport(&self) -> &T {
        &self.channel.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.channel.transport
    }

    /// Binds another transport and returns the previous one.
    pub fn replace_transport(&mut self, transport: T) -> T {
        mem::replace(&mut self.channel.transport, transport)
    }

    pub fn into_transport(self) -> T {
        self.channel.transport
    }

    /// Moves up to `out.len()` received SCPI bytes into `out`, oldest first.
    pub fn drain_input(&mut self, out: &mut [u8]) -> usize {
        self.channel.scpi_in.drain_into(out)
    }

    /// Received SCPI bytes, without consuming them
    pub fn pending_input(&self) -> &[u8] {
        self.channel.scpi_in.as_slice()
    }

    pub fn peek_input_len(&self) -> usize {
        self.channel.scpi_in.len()
    }

    /// Replaces the response returned by the following device_read calls.
    ///
    /// An empty response clears the output buffer. A response larger than
    /// [`SCPI_OUT_BUFFER_SIZE`] is truncated and recorded as an overflow.
    /// Returns the number of bytes stored.
    pub fn set_response(&mut self, data: &[u8]) -> usize {
        let stored = self.channel.scpi_out.replace(data);
        if stored < data.len() {
            self.channel.last_error = ErrorCode::Overflow;
            log::warn!(
                "SCPI response truncated from {} to {} bytes",
                data.len(),
                stored
            );
        }
        stored
    }

    pub fn response_pending_len(&self) -> usize {
        self.channel.scpi_out.len()
    }

    pub fn clear_input(&mut self) {
        self.channel.scpi_in.clear();
    }

    pub fn clear_output(&mut self) {
        self.channel.scpi_out.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{buffer::BufferFull, transport::LoopbackTransport};
    use vxi11_protocol::{
        Call, CreateLinkParms, DeviceReadParms, DeviceWriteParms, MSG_CALL, RecordMarker,
    };

    fn record(xid: u32, call: &Call) -> Vec<u8> {
        let mut payload = Vec::new();
        call.write_to(xid, &mut payload).unwrap();
        let mut out = RecordMarker::last(payload.len() as u32)
            .to_be_bytes()
            .to_vec();
        out.extend(payload);
        out
    }

    fn create_link() -> Vec<u8> {
        record(
            1,
            &Call::CreateLink(CreateLinkParms {
                client_id: 0,
                lock_device: false,
                lock_timeout: 0,
                device: b"inst0",
            }),
        )
    }

    fn device_write(xid: u32, data: &[u8]) -> Vec<u8> {
        record(
            xid,
            &Call::DeviceWrite(DeviceWriteParms {
                link_id: 0,
                io_timeout: 0,
                lock_timeout: 0,
                flags: 0,
                data,
            }),
        )
    }

    fn device_read(xid: u32, request_size: u32) -> Vec<u8> {
        record(
            xid,
            &Call::DeviceRead(DeviceReadParms {
                link_id: 0,
                request_size,
                io_timeout: 0,
                lock_timeout: 0,
                flags: 0,
                term_char: 0,
            }),
        )
    }

    fn drain(core: &mut Vxi11Core<LoopbackTransport>) -> Vec<u8> {
        let mut out = vec![0u8; 8192];
        let n = core.transport_mut().drain_tx(&mut out);
        out.truncate(n);
        out
    }

    fn exchange(core: &mut Vxi11Core<LoopbackTransport>, request: &[u8]) -> Vec<u8> {
        core.transport_mut().inject_rx(request).unwrap();
        core.service();
        drain(core)
    }

    fn linked_core() -> Vxi11Core<LoopbackTransport> {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        assert_eq!(exchange(&mut core, &create_link()).len(), 48);
        core
    }

    fn word(frame: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes(frame[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn create_link_reply_is_bit_exact() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        let reply = exchange(&mut core, &create_link());

        let mut expected = vec![0x80, 0, 0, 44, 0, 0, 0, 1, 0, 0, 0, 1];
        expected.extend_from_slice(&[0; 32]);
        expected.extend_from_slice(&[0, 0, 2, 0]);
        assert_eq!(reply, expected);

        let context = core.context();
        assert!(context.link_created);
        assert_eq!(context.link_id, 0);
        assert_eq!(context.last_error, ErrorCode::None);
    }

    #[test]
    fn create_link_ignores_arguments() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        let mut request = create_link();
        request.truncate(4 + 40);
        request[..4].copy_from_slice(&RecordMarker::last(40).to_be_bytes());
        let reply = exchange(&mut core, &request);
        assert_eq!(reply.len(), 48);
        assert_eq!(word(&reply, 44), 512);
    }

    #[test]
    fn write_before_link_is_dropped() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        assert!(exchange(&mut core, &device_write(2, b"*RST\n")).is_empty());
        assert!(exchange(&mut core, &device_read(3, 0)).is_empty());
        let context = core.context();
        assert_eq!(context.scpi_in_bytes, 0);
        assert_eq!(context.last_error, ErrorCode::LinkNotCreated);
        assert_eq!(context.rx_bytes, 0);
    }

    #[test]
    fn write_fills_input_buffer() {
        let mut core = linked_core();
        let reply = exchange(&mut core, &device_write(5, b"*IDN?\n"));
        assert_eq!(reply.len(), 40);
        assert_eq!(word(&reply, 0), 0x8000_0024);
        assert_eq!(word(&reply, 4), 5);
        assert_eq!(word(&reply, 32), 0);
        assert_eq!(word(&reply, 36), 6);
        assert_eq!(core.pending_input(), b"*IDN?\n");

        let mut out = [0u8; 4];
        assert_eq!(core.drain_input(&mut out), 4);
        assert_eq!(&out, b"*IDN");
        assert_eq!(core.peek_input_len(), 2);
    }

    #[test]
    fn write_overflow_truncates_and_still_succeeds() {
        let mut core = linked_core();
        exchange(&mut core, &device_write(2, &[b'a'; 1000]));
        let reply = exchange(&mut core, &device_write(3, &[b'b'; 100]));
        assert_eq!(word(&reply, 32), 0);
        assert_eq!(word(&reply, 36), 100);

        let context = core.context();
        assert_eq!(context.scpi_in_bytes, SCPI_IN_BUFFER_SIZE);
        assert_eq!(context.last_error, ErrorCode::Overflow);
        assert_eq!(&core.pending_input()[998..1002], b"aabb");
    }

    #[test]
    fn short_write_is_dropped() {
        let mut core = linked_core();
        let mut request = device_write(2, b"abcdefgh");
        // declare 8 data bytes but deliver only 4
        request.truncate(4 + 64);
        request[..4].copy_from_slice(&RecordMarker::last(64).to_be_bytes());
        assert!(exchange(&mut core, &request).is_empty());
        assert_eq!(core.context().last_error, ErrorCode::BadCall);
        assert_eq!(core.peek_input_len(), 0);
    }

    #[test]
    fn read_returns_padded_response() {
        let mut core = linked_core();
        core.set_response(b"OK\n");
        let reply = exchange(&mut core, &device_read(7, 10));
        assert_eq!(reply.len(), 48);
        assert_eq!(word(&reply, 0), 0x8000_002C);
        assert_eq!(word(&reply, 4), 7);
        assert_eq!(word(&reply, 36), ReadReason::End as u32);
        assert_eq!(word(&reply, 40), 3);
        assert_eq!(&reply[44..], b"OK\n\0");
        assert_eq!(core.response_pending_len(), 0);
    }

    #[test]
    fn read_streams_in_chunks() {
        let mut core = linked_core();
        core.set_response(b"XYZ");

        let first = exchange(&mut core, &device_read(8, 2));
        assert_eq!(word(&first, 36), ReadReason::Partial as u32);
        assert_eq!(word(&first, 40), 2);
        assert_eq!(&first[44..], b"XY\0\0");

        let second = exchange(&mut core, &device_read(9, 2));
        assert_eq!(word(&second, 36), ReadReason::End as u32);
        assert_eq!(word(&second, 40), 1);
        assert_eq!(&second[44..], b"Z\0\0\0");
        assert_eq!(core.response_pending_len(), 0);
    }

    #[test]
    fn read_with_zero_size_returns_everything() {
        let mut core = linked_core();
        core.set_response(&[b'r'; SCPI_OUT_BUFFER_SIZE]);
        let reply = exchange(&mut core, &device_read(4, 0));
        assert_eq!(word(&reply, 40), SCPI_OUT_BUFFER_SIZE as u32);
        assert_eq!(word(&reply, 36), ReadReason::End as u32);
        assert_eq!(reply.len(), 44 + SCPI_OUT_BUFFER_SIZE);
    }

    #[test]
    fn read_of_empty_buffer_ends() {
        let mut core = linked_core();
        let reply = exchange(&mut core, &device_read(4, 16));
        assert_eq!(reply.len(), 44);
        assert_eq!(word(&reply, 36), ReadReason::End as u32);
        assert_eq!(word(&reply, 40), 0);
    }

    #[test]
    fn failed_read_keeps_response() {
        let mut core = linked_core();
        core.set_response(b"DATA");
        // leave no room for the reply
        let filler = [0u8; crate::transport::LOOPBACK_CAPACITY - 8];
        core.transport_mut().write_all(&filler).unwrap();
        core.transport_mut().inject_rx(&device_read(6, 0)).unwrap();
        assert_eq!(core.service(), 1);
        assert_eq!(core.response_pending_len(), 4);

        drain(&mut core);
        let reply = exchange(&mut core, &device_read(7, 0));
        assert_eq!(&reply[44..], b"DATA");
        assert_eq!(core.response_pending_len(), 0);
    }

    #[test]
    fn rejects_foreign_calls() {
        let mut core = linked_core();
        let mut request = device_read(3, 0);
        // program number
        request[16..20].copy_from_slice(&0x0006_07B0u32.to_be_bytes());
        assert!(exchange(&mut core, &request).is_empty());
        assert_eq!(core.context().last_error, ErrorCode::BadCall);

        let mut request = device_read(3, 0);
        // message type
        request[8..12].copy_from_slice(&1u32.to_be_bytes());
        assert!(exchange(&mut core, &request).is_empty());

        let mut request = device_read(3, 0);
        // procedure 23 (destroy_link) is not served
        request[24..28].copy_from_slice(&23u32.to_be_bytes());
        assert!(exchange(&mut core, &request).is_empty());
        assert_eq!(core.context().last_error, ErrorCode::BadCall);
        assert_eq!(core.context().rx_bytes, 0);
    }

    #[test]
    fn short_record_is_dropped() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        let mut request = RecordMarker::last(8).to_be_bytes().to_vec();
        request.extend_from_slice(&1u32.to_be_bytes());
        request.extend_from_slice(&MSG_CALL.to_be_bytes());
        assert!(exchange(&mut core, &request).is_empty());
        assert_eq!(core.context().last_error, ErrorCode::BadCall);
        assert_eq!(core.context().rx_bytes, 0);
    }

    #[test]
    fn processes_every_buffered_record() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        let mut requests = create_link();
        requests.extend(device_write(2, b"MEAS?\n"));
        requests.extend(device_read(3, 0));
        core.transport_mut().inject_rx(&requests).unwrap();
        assert_eq!(core.service(), 3);
        assert_eq!(drain(&mut core).len(), 48 + 40 + 44);
    }

    #[test]
    fn service_one_lets_interpreter_answer_in_between() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        let mut requests = create_link();
        requests.extend(device_write(2, b"MEAS?\n"));
        requests.extend(device_read(3, 0));
        core.transport_mut().inject_rx(&requests).unwrap();

        assert!(core.service_one());
        assert!(core.service_one());
        assert_eq!(core.pending_input(), b"MEAS?\n");
        core.clear_input();
        core.set_response(b"+1.0\n");
        assert!(core.service_one());
        assert!(!core.service_one());

        let replies = drain(&mut core);
        assert_eq!(replies.len(), 48 + 40 + 44 + 8);
        assert_eq!(&replies[88 + 44..88 + 49], b"+1.0\n");
    }

    #[test]
    fn fragmented_marker_stalls_until_cleared() {
        let mut core = linked_core();
        let mut request = device_write(2, b"A");
        request[0] &= 0x7F;
        assert!(exchange(&mut core, &request).is_empty());
        assert!(exchange(&mut core, &device_write(3, b"B")).is_empty());
        assert_eq!(core.context().last_error, ErrorCode::BadCall);
        assert!(core.context().rx_bytes > 0);

        core.clear_reassembly();
        assert_eq!(exchange(&mut core, &device_write(4, b"C")).len(), 40);
        assert_eq!(core.pending_input(), b"C");
    }

    #[test]
    fn marker_policy_can_be_switched() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        assert_eq!(core.marker_policy(), MarkerPolicy::Stall);
        let mut request = create_link();
        request[0] &= 0x7F;
        assert!(exchange(&mut core, &request).is_empty());
        assert_eq!(core.context().rx_bytes, request.len());

        core.set_marker_policy(MarkerPolicy::Discard);
        assert_eq!(core.marker_policy(), MarkerPolicy::Discard);
        assert_eq!(core.service(), 0);
        assert_eq!(core.context().rx_bytes, 0);
        assert_eq!(exchange(&mut core, &create_link()).len(), 48);
    }

    #[test]
    fn discard_policy_recovers() {
        let mut core = Vxi11Core::with_policy(LoopbackTransport::new(), MarkerPolicy::Discard);
        let mut request = create_link();
        request[0] &= 0x7F;
        assert!(exchange(&mut core, &request).is_empty());
        assert_eq!(core.context().rx_bytes, 0);
        assert_eq!(exchange(&mut core, &create_link()).len(), 48);
    }

    #[test]
    fn set_response_overflow_and_clear() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        assert_eq!(
            core.set_response(&[0; SCPI_OUT_BUFFER_SIZE + 1]),
            SCPI_OUT_BUFFER_SIZE
        );
        assert_eq!(core.context().last_error, ErrorCode::Overflow);
        core.set_response(b"");
        assert_eq!(core.response_pending_len(), 0);
    }

    #[test]
    fn reset_forgets_link() {
        let mut core = linked_core();
        core.set_response(b"1");
        exchange(&mut core, &device_write(2, b"x"));
        core.reset();
        assert_eq!(core.context(), RuntimeContext::default());
        assert!(exchange(&mut core, &device_read(3, 0)).is_empty());
    }

    #[test]
    fn replace_transport_returns_previous() {
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        core.transport_mut().inject_rx(b"abc").unwrap();
        let previous = core.replace_transport(LoopbackTransport::new());
        assert_eq!(previous.rx_len(), 3);
        assert_eq!(core.transport().rx_len(), 0);

        exchange(&mut core, &create_link());
        core.transport_mut().inject_rx(b"xyz").unwrap();
        let transport = core.into_transport();
        assert_eq!(transport.rx_len(), 3);
        assert_eq!(transport.tx_len(), 0);
    }

    struct RefusingTransport;

    impl Transport for RefusingTransport {
        type Error = BufferFull;

        fn poll_byte(&mut self) -> Option<u8> {
            None
        }

        fn write_all(&mut self, _data: &[u8]) -> Result<(), BufferFull> {
            Err(BufferFull)
        }
    }

    #[test]
    fn write_failure_keeps_side_effects() {
        let mut channel = Channel::new(RefusingTransport);
        assert!(matches!(
            channel.process(&create_link()),
            Err(CallError::Transport(BufferFull))
        ));
        assert!(channel.link_created);
        assert!(matches!(
            channel.process(&device_write(2, b"abc")),
            Err(CallError::Transport(BufferFull))
        ));
        assert_eq!(channel.scpi_in.as_slice(), b"abc");
        assert_eq!(channel.last_error, ErrorCode::None);
    }
}
