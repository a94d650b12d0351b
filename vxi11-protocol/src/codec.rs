/// Read and write implementations for the protocol messages
use std::io::{self, Write};

use crate::{
    error::DecodeError,
    protocol::{
        ACCEPT_SUCCESS, AUTH_NULL, CALL_HEADER_LEN, Call, CallHeader, CreateLinkParms,
        DeviceReadParms, DeviceWriteParms, MSG_REPLY, Procedure, REPLY_ACCEPTED, ReadReason,
        RecordMarker, Reply, ReplyBody, padded_len,
    },
};

const PADDING: [u8; 3] = [0; 3];

fn put_word(writer: &mut impl Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Variable length opaque data: length word, bytes, zero padding up to 4 byte alignment.
fn put_opaque(writer: &mut impl Write, data: &[u8]) -> io::Result<()> {
    put_word(writer, data.len() as u32)?;
    writer.write_all(data)?;
    writer.write_all(&PADDING[..padded_len(data.len()) - data.len()])
}

/// Cursor over big-endian words of a borrowed payload.
struct Words<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Words<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Words<'a> {
        Words { buf, pos }
    }

    fn too_short(&self, needed: usize) -> DecodeError {
        DecodeError::TooShort {
            needed,
            got: self.buf.len(),
        }
    }

    fn word(&mut self) -> Result<u32, DecodeError> {
        let buf = self.buf;
        let bytes = buf
            .get(self.pos..)
            .and_then(|rest| rest.first_chunk::<4>())
            .ok_or_else(|| self.too_short(self.pos + 4))?;
        self.pos += 4;
        Ok(u32::from_be_bytes(*bytes))
    }

    /// Reads length-prefixed opaque data. Trailing padding is skipped when present
    /// but not required.
    fn opaque(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.word()? as usize;
        let end = self.pos.saturating_add(len);
        let buf = self.buf;
        let data = buf
            .get(self.pos..end)
            .ok_or_else(|| self.too_short(end))?;
        self.pos = self.pos.saturating_add(padded_len(len)).min(buf.len());
        Ok(data)
    }
}

impl CallHeader {
    /// Decodes the header at the start of a record payload (the bytes after the marker).
    /// Credential and verifier are not interpreted.
    pub fn from_payload(payload: &[u8]) -> Result<CallHeader, DecodeError> {
        if payload.len() < CALL_HEADER_LEN {
            return Err(DecodeError::TooShort {
                needed: CALL_HEADER_LEN,
                got: payload.len(),
            });
        }
        let mut words = Words::at(payload, 0);
        Ok(CallHeader {
            xid: words.word()?,
            msg_type: words.word()?,
            rpc_version: words.word()?,
            program: words.word()?,
            version: words.word()?,
            procedure: words.word()?,
        })
    }

    /// Writes the header followed by AUTH_NULL credential and verifier.
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for word in [
            self.xid,
            self.msg_type,
            self.rpc_version,
            self.program,
            self.version,
            self.procedure,
            AUTH_NULL,
            0,
            AUTH_NULL,
            0,
        ] {
            put_word(writer, word)?;
        }
        Ok(())
    }
}

impl<'a> CreateLinkParms<'a> {
    pub fn from_payload(payload: &'a [u8]) -> Result<CreateLinkParms<'a>, DecodeError> {
        let mut words = Words::at(payload, CALL_HEADER_LEN);
        Ok(CreateLinkParms {
            client_id: words.word()?,
            lock_device: words.word()? != 0,
            lock_timeout: words.word()?,
            device: words.opaque()?,
        })
    }
}

impl<'a> DeviceWriteParms<'a> {
    /// Decodes the arguments of a device_write call. The payload must hold the
    /// fixed 60 byte block and every declared data byte.
    pub fn from_payload(payload: &'a [u8]) -> Result<DeviceWriteParms<'a>, DecodeError> {
        if payload.len() < Self::MIN_PAYLOAD_LEN {
            return Err(DecodeError::TooShort {
                needed: Self::MIN_PAYLOAD_LEN,
                got: payload.len(),
            });
        }
        let mut words = Words::at(payload, CALL_HEADER_LEN);
        Ok(DeviceWriteParms {
            link_id: words.word()?,
            io_timeout: words.word()?,
            lock_timeout: words.word()?,
            flags: words.word()?,
            data: words.opaque()?,
        })
    }
}

impl DeviceReadParms {
    pub fn from_payload(payload: &[u8]) -> Result<DeviceReadParms, DecodeError> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(DecodeError::TooShort {
                needed: Self::PAYLOAD_LEN,
                got: payload.len(),
            });
        }
        let mut words = Words::at(payload, CALL_HEADER_LEN);
        Ok(DeviceReadParms {
            link_id: words.word()?,
            request_size: words.word()?,
            io_timeout: words.word()?,
            lock_timeout: words.word()?,
            flags: words.word()?,
            term_char: words.word()? as u8,
        })
    }
}

impl<'a> Call<'a> {
    /// Decodes and validates a complete call payload.
    pub fn from_payload(payload: &'a [u8]) -> Result<(CallHeader, Call<'a>), DecodeError> {
        let header = CallHeader::from_payload(payload)?;
        let call = match header.validate()? {
            Procedure::CreateLink => Call::CreateLink(CreateLinkParms::from_payload(payload)?),
            Procedure::DeviceWrite => Call::DeviceWrite(DeviceWriteParms::from_payload(payload)?),
            Procedure::DeviceRead => Call::DeviceRead(DeviceReadParms::from_payload(payload)?),
        };
        Ok((header, call))
    }

    /// Writes the call payload (without record marker).
    pub fn write_to(&self, xid: u32, writer: &mut impl Write) -> io::Result<()> {
        CallHeader::new(xid, self.procedure()).write_to(writer)?;
        match self {
            Call::CreateLink(parms) => {
                put_word(writer, parms.client_id)?;
                put_word(writer, parms.lock_device as u32)?;
                put_word(writer, parms.lock_timeout)?;
                put_opaque(writer, parms.device)
            }
            Call::DeviceWrite(parms) => {
                put_word(writer, parms.link_id)?;
                put_word(writer, parms.io_timeout)?;
                put_word(writer, parms.lock_timeout)?;
                put_word(writer, parms.flags)?;
                put_opaque(writer, parms.data)
            }
            Call::DeviceRead(parms) => {
                for word in [
                    parms.link_id,
                    parms.request_size,
                    parms.io_timeout,
                    parms.lock_timeout,
                    parms.flags,
                    parms.term_char as u32,
                ] {
                    put_word(writer, word)?;
                }
                Ok(())
            }
        }
    }
}

impl<'a> Reply<'a> {
    /// Writes the reply payload (without record marker).
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for word in [
            self.xid,
            MSG_REPLY,
            REPLY_ACCEPTED,
            AUTH_NULL,
            0,
            ACCEPT_SUCCESS,
            self.error,
        ] {
            put_word(writer, word)?;
        }
        match self.body {
            ReplyBody::CreateLink {
                error,
                link_id,
                abort_port,
                max_recv_size,
            } => {
                put_word(writer, error)?;
                put_word(writer, link_id)?;
                put_word(writer, abort_port)?;
                put_word(writer, max_recv_size)
            }
            ReplyBody::DeviceWrite { error, size } => {
                put_word(writer, error)?;
                put_word(writer, size)
            }
            ReplyBody::DeviceRead {
                error,
                reason,
                data,
            } => {
                put_word(writer, error)?;
                put_word(writer, reason as u32)?;
                put_opaque(writer, data)
            }
        }
    }

    /// Writes the complete record. The marker always carries the last-fragment bit.
    pub fn write_record(&self, writer: &mut impl Write) -> io::Result<()> {
        let marker = RecordMarker::last(self.payload_len() as u32);
        writer.write_all(&marker.to_be_bytes())?;
        self.write_to(writer)
    }

    /// Decodes a reply payload to a call of the given procedure.
    pub fn from_payload(
        payload: &'a [u8],
        procedure: Procedure,
    ) -> Result<Reply<'a>, DecodeError> {
        let mut words = Words::at(payload, 0);
        let xid = words.word()?;
        let msg_type = words.word()?;
        if msg_type != MSG_REPLY {
            return Err(DecodeError::InvalidMessageType(msg_type));
        }
        let reply_stat = words.word()?;
        if reply_stat != REPLY_ACCEPTED {
            return Err(DecodeError::ReplyRejected {
                reply_stat,
                accept_stat: 0,
            });
        }
        let _verifier_flavor = words.word()?;
        let _verifier = words.opaque()?;
        let accept_stat = words.word()?;
        if accept_stat != ACCEPT_SUCCESS {
            return Err(DecodeError::ReplyRejected {
                reply_stat,
                accept_stat,
            });
        }
        let error = words.word()?;
        let body = match procedure {
            Procedure::CreateLink => ReplyBody::CreateLink {
                error: words.word()?,
                link_id: words.word()?,
                abort_port: words.word()?,
                max_recv_size: words.word()?,
            },
            Procedure::DeviceWrite => ReplyBody::DeviceWrite {
                error: words.word()?,
                size: words.word()?,
            },
            Procedure::DeviceRead => ReplyBody::DeviceRead {
                error: words.word()?,
                reason: ReadReason::try_from(words.word()?)?,
                data: words.opaque()?,
            },
        };
        Ok(Reply { xid, error, body })
    }
}
