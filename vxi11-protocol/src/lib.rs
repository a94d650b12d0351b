//! # VXI-11 Protocol Library
//!
//! This crate provides a Rust implementation of the wire format of the VXI-11 "Core"
//! channel, the ONC RPC program that test-and-measurement instruments use to exchange
//! SCPI commands with a controller.
//!
//! ## Overview
//!
//! VXI-11 wraps instrument I/O in ONC RPC calls. Every call and reply travels as a
//! single *record*: a 4 byte big-endian record marker followed by the RPC message.
//! This library implements the subset needed by a minimal instrument, allowing you to:
//!
//! - Decode and encode record markers
//! - Decode and validate call headers against the fixed Core program
//! - Decode and encode the arguments of `create_link`, `device_write` and `device_read`
//! - Encode and decode bit-exact replies
//!
//! ## Protocol Features
//!
//! - **Program**: `0x000607AF`, version 1, reached without a portmapper
//! - **Authentication**: AUTH_NULL only
//! - **Records**: single fragment only; the last-fragment bit must be set
//! - **Procedures**:
//!   - `CreateLink` (10): open the one and only link (id 0)
//!   - `DeviceWrite` (11): send SCPI bytes to the instrument
//!   - `DeviceRead` (12): fetch SCPI response bytes from the instrument
//!
//! ## Basic Usage
//!
//! ### Decoding a Call
//!
//! ```
//! use vxi11_protocol::{Call, DeviceWriteParms, Procedure};
//!
//! let call = Call::DeviceWrite(DeviceWriteParms {
//!     link_id: 0,
//!     io_timeout: 1000,
//!     lock_timeout: 0,
//!     flags: 0,
//!     data: b"*IDN?\n",
//! });
//! let mut payload = Vec::new();
//! call.write_to(1, &mut payload).expect("Writing to vector shouldn't fail");
//!
//! let (header, decoded) = Call::from_payload(&payload).expect("Call should parse");
//! assert_eq!(header.xid, 1);
//! assert_eq!(decoded.procedure(), Procedure::DeviceWrite);
//! ```
//!
//! ### Writing a Reply Record
//!
//! ```
//! use vxi11_protocol::{ReadReason, Reply, ReplyBody};
//!
//! let reply = Reply::new(1, ReplyBody::DeviceRead {
//!     error: 0,
//!     reason: ReadReason::End,
//!     data: b"OK\n",
//! });
//! let mut record = Vec::new();
//! reply.write_record(&mut record).expect("Writing to vector shouldn't fail");
//! assert_eq!(&record[..4], &[0x80, 0x00, 0x00, 44]);
//! assert_eq!(&record[44..], b"OK\n\0");
//! ```
//!
//! ## Message Format
//!
//! All integers are big-endian 32 bit words:
//!
//! - **Record**: `<marker = 0x80000000 | payload_len><payload>`
//! - **Call header**: `<xid><0><2><0x000607AF><1><procedure><0><0><0><0>`
//! - **Reply header**: `<xid><1><0><0><0><0><error>`
//! - **create_link reply**: `<error><link id><abort port><max recv size = 512>`
//! - **device_write reply**: `<error><requested size>`
//! - **device_read reply**: `<error><reason><len><data, zero padded to 4>`
//!
//! ## Error Handling
//!
//! This library uses the [`error::DecodeError`] type for protocol parsing errors.
//!
//! ## Async Framing
//!
//! With the `tokio` feature enabled, [`framed::RecordCodec`] plugs record marking into
//! `tokio_util::codec`.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framed;
