use std::fmt::Display;

use crate::error::DecodeError;

/// ONC RPC program number of the VXI-11 Core channel.
pub const PROGRAM_CORE: u32 = 0x0006_07AF;
/// The only supported version of the Core program.
pub const VERSION_CORE: u32 = 1;
/// ONC RPC protocol version.
pub const RPC_VERSION: u32 = 2;

pub const MSG_CALL: u32 = 0;
pub const MSG_REPLY: u32 = 1;
pub const REPLY_ACCEPTED: u32 = 0;
pub const ACCEPT_SUCCESS: u32 = 0;
pub const AUTH_NULL: u32 = 0;

/// Size of the record marker that prefixes every record.
pub const MARKER_LEN: usize = 4;
/// Size of an AUTH_NULL call header: xid, message type, rpc version, program,
/// version, procedure, credential and verifier (flavor + length each).
pub const CALL_HEADER_LEN: usize = 40;
/// Size of the reply header following the marker: xid, message type, reply status,
/// verifier flavor, verifier length, accept status and the common error word.
pub const REPLY_HEADER_LEN: usize = 28;

/// Largest device-write payload advertised by create-link. Not negotiable.
pub const MAX_RECV_SIZE: u32 = 512;
/// Identifier of the one and only link.
pub const LINK_ID: u32 = 0;

/// The 4 byte marker in front of each record.
///
/// The top bit flags the last fragment of a record, the remaining 31 bits
/// hold the number of payload bytes that follow.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordMarker {
    last_fragment: bool,
    len: u32,
}

impl RecordMarker {
    pub const LAST_FRAGMENT: u32 = 0x8000_0000;
    pub const MAX_LEN: u32 = 0x7FFF_FFFF;

    /// Marker for a complete (unfragmented) record carrying `len` payload bytes.
    pub fn last(len: u32) -> RecordMarker {
        RecordMarker {
            last_fragment: true,
            len: len & Self::MAX_LEN,
        }
    }

    /// Whether the last-fragment bit is set
    pub fn is_last_fragment(&self) -> bool {
        self.last_fragment
    }

    /// Number of payload bytes following the marker
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total size of the record, marker included
    pub fn record_len(&self) -> usize {
        MARKER_LEN + self.len as usize
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> RecordMarker {
        let raw = u32::from_be_bytes(bytes);
        RecordMarker {
            last_fragment: raw & Self::LAST_FRAGMENT != 0,
            len: raw & Self::MAX_LEN,
        }
    }

    pub fn to_be_bytes(&self) -> [u8; 4] {
        let flag = if self.last_fragment {
            Self::LAST_FRAGMENT
        } else {
            0
        };
        (flag | self.len).to_be_bytes()
    }

    /// Reads the marker at the start of `buf`, if at least 4 bytes are present.
    pub fn peek(buf: &[u8]) -> Option<RecordMarker> {
        buf.first_chunk::<MARKER_LEN>()
            .map(|bytes| RecordMarker::from_be_bytes(*bytes))
    }
}

/// The procedures of the Core channel that this implementation serves.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Procedure {
    CreateLink = 10,
    DeviceWrite = 11,
    DeviceRead = 12,
}

impl TryFrom<u32> for Procedure {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Procedure::CreateLink),
            11 => Ok(Procedure::DeviceWrite),
            12 => Ok(Procedure::DeviceRead),
            other => Err(DecodeError::UnknownProcedure(other)),
        }
    }
}

impl Display for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Procedure::CreateLink => write!(f, "create_link"),
            Procedure::DeviceWrite => write!(f, "device_write"),
            Procedure::DeviceRead => write!(f, "device_read"),
        }
    }
}

/// Why a device-read reply ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadReason {
    /// More response data is waiting for another device-read.
    Partial = 2,
    /// The response buffer was drained by this transfer.
    End = 4,
}

impl TryFrom<u32> for ReadReason {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ReadReason::Partial),
            4 => Ok(ReadReason::End),
            other => Err(DecodeError::InvalidReason(other)),
        }
    }
}

/// The fixed fields at the start of every call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CallHeader {
    pub xid: u32,
    pub msg_type: u32,
    pub rpc_version: u32,
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

impl CallHeader {
    /// Header of a well-formed Core channel call.
    pub fn new(xid: u32, procedure: Procedure) -> CallHeader {
        CallHeader {
            xid,
            msg_type: MSG_CALL,
            rpc_version: RPC_VERSION,
            program: PROGRAM_CORE,
            version: VERSION_CORE,
            procedure: procedure as u32,
        }
    }

    /// Checks message type, RPC version, program and version, in that order,
    /// and resolves the procedure number.
    pub fn validate(&self) -> Result<Procedure, DecodeError> {
        if self.msg_type != MSG_CALL {
            return Err(DecodeError::InvalidMessageType(self.msg_type));
        }
        if self.rpc_version != RPC_VERSION {
            return Err(DecodeError::UnsupportedRpcVersion(self.rpc_version));
        }
        if self.program != PROGRAM_CORE {
            return Err(DecodeError::UnknownProgram(self.program));
        }
        if self.version != VERSION_CORE {
            return Err(DecodeError::UnsupportedVersion(self.version));
        }
        Procedure::try_from(self.procedure)
    }
}

/// Arguments of create_link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CreateLinkParms<'a> {
    pub client_id: u32,
    pub lock_device: bool,
    pub lock_timeout: u32,
    /// Name of the logical device, e.g. `inst0`
    pub device: &'a [u8],
}

/// Arguments of device_write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceWriteParms<'a> {
    pub link_id: u32,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: u32,
    pub data: &'a [u8],
}

impl DeviceWriteParms<'_> {
    /// Offset of the data length word, counted from the start of the call header.
    pub const DATA_LEN_OFFSET: usize = 56;
    /// Smallest payload that can hold a device_write call.
    pub const MIN_PAYLOAD_LEN: usize = 60;
}

/// Arguments of device_read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceReadParms {
    pub link_id: u32,
    /// Maximum number of bytes the caller accepts. Zero requests everything available.
    pub request_size: u32,
    pub io_timeout: u32,
    pub lock_timeout: u32,
    pub flags: u32,
    pub term_char: u8,
}

impl DeviceReadParms {
    /// Offset of the request size word, counted from the start of the call header.
    pub const REQUEST_SIZE_OFFSET: usize = 44;
    /// Size of a complete device_read payload.
    pub const PAYLOAD_LEN: usize = 64;
}

/// A call from the client to the instrument.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Call<'a> {
    CreateLink(CreateLinkParms<'a>),
    DeviceWrite(DeviceWriteParms<'a>),
    DeviceRead(DeviceReadParms),
}

impl Call<'_> {
    pub fn procedure(&self) -> Procedure {
        match self {
            Call::CreateLink(_) => Procedure::CreateLink,
            Call::DeviceWrite(_) => Procedure::DeviceWrite,
            Call::DeviceRead(_) => Procedure::DeviceRead,
        }
    }
}

/// The procedure specific part of a reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplyBody<'a> {
    CreateLink {
        error: u32,
        link_id: u32,
        abort_port: u32,
        max_recv_size: u32,
    },
    DeviceWrite {
        error: u32,
        /// Number of bytes the caller asked to write
        size: u32,
    },
    DeviceRead {
        error: u32,
        reason: ReadReason,
        data: &'a [u8],
    },
}

/// An accepted reply as the instrument sends it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Reply<'a> {
    pub xid: u32,
    /// The error word of the common header
    pub error: u32,
    pub body: ReplyBody<'a>,
}

impl<'a> Reply<'a> {
    /// Successful reply with the given body
    pub fn new(xid: u32, body: ReplyBody<'a>) -> Reply<'a> {
        Reply { xid, error: 0, body }
    }

    pub fn procedure(&self) -> Procedure {
        match self.body {
            ReplyBody::CreateLink { .. } => Procedure::CreateLink,
            ReplyBody::DeviceWrite { .. } => Procedure::DeviceWrite,
            ReplyBody::DeviceRead { .. } => Procedure::DeviceRead,
        }
    }

    /// Number of bytes following the record marker.
    pub fn payload_len(&self) -> usize {
        REPLY_HEADER_LEN
            + match self.body {
                ReplyBody::CreateLink { .. } => 16,
                ReplyBody::DeviceWrite { .. } => 8,
                ReplyBody::DeviceRead { data, .. } => 12 + padded_len(data.len()),
            }
    }

    /// Number of bytes of the complete record, marker included.
    pub fn record_len(&self) -> usize {
        MARKER_LEN + self.payload_len()
    }
}

/// Length of opaque data rounded up to the next multiple of 4.
pub fn padded_len(len: usize) -> usize {
    len.next_multiple_of(4)
}

#[test]
fn marker_masks_length_to_31_bits() {
    let marker = RecordMarker::last(0xFFFF_FFFF);
    assert!(marker.is_last_fragment());
    assert_eq!(marker.len(), RecordMarker::MAX_LEN);
}

#[test]
fn marker_bytes() {
    assert_eq!(RecordMarker::last(44).to_be_bytes(), [0x80, 0x00, 0x00, 0x2C]);
    let fragment = RecordMarker::from_be_bytes([0x00, 0x00, 0x00, 0x2C]);
    assert!(!fragment.is_last_fragment());
    assert_eq!(fragment.len(), 44);
    assert_eq!(RecordMarker::peek(&[0x80, 0x00, 0x01]), None);
}

#[test]
fn header_validation_order() {
    let mut header = CallHeader::new(7, Procedure::DeviceRead);
    assert_eq!(header.validate().unwrap(), Procedure::DeviceRead);

    header.procedure = 13;
    assert!(matches!(
        header.validate(),
        Err(DecodeError::UnknownProcedure(13))
    ));

    header.version = 2;
    assert!(matches!(
        header.validate(),
        Err(DecodeError::UnsupportedVersion(2))
    ));

    header.msg_type = MSG_REPLY;
    assert!(matches!(
        header.validate(),
        Err(DecodeError::InvalidMessageType(MSG_REPLY))
    ));
}

#[test]
fn reply_sizes() {
    let link = Reply::new(
        1,
        ReplyBody::CreateLink {
            error: 0,
            link_id: LINK_ID,
            abort_port: 0,
            max_recv_size: MAX_RECV_SIZE,
        },
    );
    assert_eq!(link.record_len(), 48);

    let write = Reply::new(1, ReplyBody::DeviceWrite { error: 0, size: 9 });
    assert_eq!(write.record_len(), 40);

    let read = Reply::new(
        1,
        ReplyBody::DeviceRead {
            error: 0,
            reason: ReadReason::End,
            data: b"OK\n",
        },
    );
    assert_eq!(read.record_len(), 48);
}
