use std::{error::Error, fmt::Display, io};

use crate::protocol::Procedure;

/// Errors that may occur when decoding records, calls or replies.
#[derive(Debug)]
pub enum DecodeError {
    IoError(io::Error),
    /// The buffer ends before a field that must be present.
    TooShort { needed: usize, got: usize },
    /// The record marker does not have the last-fragment bit set.
    FragmentedRecord,
    RecordTooLarge { max: usize, got: usize },
    InvalidMessageType(u32),
    UnsupportedRpcVersion(u32),
    UnknownProgram(u32),
    UnsupportedVersion(u32),
    UnknownProcedure(u32),
    InvalidReason(u32),
    /// The server did not accept the call.
    ReplyRejected { reply_stat: u32, accept_stat: u32 },
    XidMismatch { expected: u32, got: u32 },
    /// The reply body belongs to a different procedure than the call.
    UnexpectedReply(Procedure),
}

impl From<io::Error> for DecodeError {
    fn from(value: io::Error) -> Self {
        DecodeError::IoError(value)
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IoError(error) => write!(f, "{}", error),
            DecodeError::TooShort { needed, got } => {
                write!(f, "Message too short! Needed {} bytes, but got {}", needed, got)
            }
            DecodeError::FragmentedRecord => {
                write!(f, "Fragmented records are not supported")
            }
            DecodeError::RecordTooLarge { max, got } => {
                write!(f, "Record too large! Maximum is {}, but got {}", max, got)
            }
            DecodeError::InvalidMessageType(msg_type) => {
                write!(f, "Invalid message type {}", msg_type)
            }
            DecodeError::UnsupportedRpcVersion(version) => {
                write!(f, "Unsupported RPC version {}", version)
            }
            DecodeError::UnknownProgram(program) => write!(f, "Unknown program {:#010x}", program),
            DecodeError::UnsupportedVersion(version) => {
                write!(f, "Unsupported program version {}", version)
            }
            DecodeError::UnknownProcedure(procedure) => {
                write!(f, "Unknown procedure {}", procedure)
            }
            DecodeError::InvalidReason(reason) => write!(f, "Invalid read reason {}", reason),
            DecodeError::ReplyRejected {
                reply_stat,
                accept_stat,
            } => write!(
                f,
                "Call was not accepted (reply_stat={}, accept_stat={})",
                reply_stat, accept_stat
            ),
            DecodeError::XidMismatch { expected, got } => {
                write!(f, "Reply for xid {} while waiting for xid {}", got, expected)
            }
            DecodeError::UnexpectedReply(procedure) => {
                write!(f, "Reply does not answer a {} call", procedure)
            }
        }
    }
}

impl Error for DecodeError {}
