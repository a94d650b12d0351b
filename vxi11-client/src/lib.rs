//! # VXI-11 Client
//!
//! An async client for instruments that serve the VXI-11 Core channel, for sending
//! SCPI commands and reading back their responses.
//!
//! ## Overview
//!
//! The client speaks the subset of the Core channel that small instruments
//! implement: `create_link`, `device_write` and `device_read`, over a single TCP
//! connection to the fixed Core port. No portmapper lookup is done.
//!
//! Every call carries a fresh transaction id and the reply is checked against it.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use vxi11_client::Vxi11Client;
//!
//! let mut client = Vxi11Client::connect("127.0.0.1:9009").await?;
//! client.create_link("inst0").await?;
//!
//! let idn = client.query("*IDN?").await?;
//! println!("Connected to {}", String::from_utf8_lossy(&idn));
//! ```
//!
//! ### Reading in Chunks
//!
//! ```ignore
//! client.device_write(b"MEAS:WAV?\n").await?;
//! loop {
//!     let (reason, chunk) = client.device_read(64).await?;
//!     process(&chunk);
//!     if reason == ReadReason::End {
//!         break;
//!     }
//! }
//! ```
//!
//! ## Related Crates
//!
//! - `vxi11-server` - Server implementation
//! - `vxi11-protocol` - Record and call encoding
use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_util::codec::{Decoder, Encoder};
use vxi11_protocol::{
    Call, CreateLinkParms, DeviceReadParms, DeviceWriteParms, LINK_ID, Procedure, ReadReason,
    Reply, ReplyBody, error::DecodeError, framed::RecordCodec,
};

/// Largest reply the client accepts
const MAX_REPLY_LEN: usize = 16 * 1024;

fn created_link(reply: Reply) -> Result<u32, DecodeError> {
    let ReplyBody::CreateLink { link_id, .. } = reply.body else {
        return Err(DecodeError::UnexpectedReply(Procedure::CreateLink));
    };
    Ok(link_id)
}

fn written_size(reply: Reply) -> Result<u32, DecodeError> {
    let ReplyBody::DeviceWrite { size, .. } = reply.body else {
        return Err(DecodeError::UnexpectedReply(Procedure::DeviceWrite));
    };
    Ok(size)
}

fn read_data(reply: Reply) -> Result<(ReadReason, Vec<u8>), DecodeError> {
    let ReplyBody::DeviceRead { reason, data, .. } = reply.body else {
        return Err(DecodeError::UnexpectedReply(Procedure::DeviceRead));
    };
    Ok((reason, data.to_vec()))
}

/// VXI-11 Core channel client.
pub struct Vxi11Client {
    tcp: TcpStream,
    codec: RecordCodec,
    buffer: BytesMut,
    next_xid: u32,
    link_id: Option<u32>,
}

impl Vxi11Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Vxi11Client> {
        Ok(Vxi11Client {
            tcp: TcpStream::connect(addr).await?,
            codec: RecordCodec::new(MAX_REPLY_LEN),
            buffer: BytesMut::new(),
            next_xid: 1,
            link_id: None,
        })
    }

    /// The link returned by [`create_link`](Self::create_link), if any
    pub fn link_id(&self) -> Option<u32> {
        self.link_id
    }

    /// Opens the link to `device` (e.g. `inst0`) and returns its id.
    pub async fn create_link(&mut self, device: &str) -> Result<u32, DecodeError> {
        let call = Call::CreateLink(CreateLinkParms {
            client_id: 0,
            lock_device: false,
            lock_timeout: 0,
            device: device.as_bytes(),
        });
        let payload = self.call(&call).await?;
        let link_id = created_link(Reply::from_payload(&payload, Procedure::CreateLink)?)?;
        self.link_id = Some(link_id);
        Ok(link_id)
    }

    /// Sends `data` to the instrument.
    ///
    /// # Returns
    ///
    /// The number of bytes the instrument acknowledged.
    pub async fn device_write(&mut self, data: &[u8]) -> Result<u32, DecodeError> {
        let call = Call::DeviceWrite(DeviceWriteParms {
            link_id: self.link_id.unwrap_or(LINK_ID),
            io_timeout: 0,
            lock_timeout: 0,
            flags: 0,
            data,
        });
        let payload = self.call(&call).await?;
        written_size(Reply::from_payload(&payload, Procedure::DeviceWrite)?)
    }

    /// Reads at most `request_size` bytes of the pending response. Zero asks for
    /// as much as the instrument is willing to send.
    pub async fn device_read(
        &mut self,
        request_size: u32,
    ) -> Result<(ReadReason, Vec<u8>), DecodeError> {
        let call = Call::DeviceRead(DeviceReadParms {
            link_id: self.link_id.unwrap_or(LINK_ID),
            request_size,
            io_timeout: 0,
            lock_timeout: 0,
            flags: 0,
            term_char: b'\n',
        });
        let payload = self.call(&call).await?;
        read_data(Reply::from_payload(&payload, Procedure::DeviceRead)?)
    }

    /// Writes `command`, terminated by a newline, and reads the complete response.
    pub async fn query(&mut self, command: &str) -> Result<Vec<u8>, DecodeError> {
        let mut data = command.as_bytes().to_vec();
        if !data.ends_with(b"\n") {
            data.push(b'\n');
        }
        self.device_write(&data).await?;

        let mut response = Vec::new();
        loop {
            let (reason, chunk) = self.device_read(0).await?;
            response.extend_from_slice(&chunk);
            if reason == ReadReason::End {
                return Ok(response);
            }
        }
    }

    /// Sends a call and waits for the reply with the same xid. Returns the reply payload.
    async fn call(&mut self, call: &Call<'_>) -> Result<BytesMut, DecodeError> {
        let xid = self.next_xid;
        self.next_xid = self.next_xid.wrapping_add(1);

        let mut payload = Vec::new();
        call.write_to(xid, &mut payload)?;
        let mut out = BytesMut::new();
        self.codec.encode(&payload[..], &mut out)?;
        self.tcp.write_all(&out).await?;

        let reply = self.read_record().await?;
        let got = reply
            .get(..4)
            .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
            .ok_or(DecodeError::TooShort {
                needed: 4,
                got: reply.len(),
            })?;
        if got != xid {
            return Err(DecodeError::XidMismatch { expected: xid, got });
        }
        Ok(reply)
    }

    async fn read_record(&mut self) -> Result<BytesMut, DecodeError> {
        loop {
            if let Some(record) = self.codec.decode(&mut self.buffer)? {
                return Ok(record);
            }
            if self.tcp.read_buf(&mut self.buffer).await? == 0 {
                return Err(io::Error::new(ErrorKind::UnexpectedEof, "Connection closed").into());
            }
        }
    }
}
