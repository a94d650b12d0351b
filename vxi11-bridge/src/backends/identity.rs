//! # Identity Backend
//!
//! A minimal IEEE 488.2 device: it identifies itself, acknowledges the common
//! commands and keeps an error queue for everything it does not understand.
//!
//! ## Example Usage
//!
//! ```ignore
//! use vxi11_server::server::{Server, Config};
//!
//! let backend = IdentityBackend::new("ACME,DEMO,0,1.0");
//! let mut server = Server::new(backend, Config::default());
//! server.listen("127.0.0.1:9009").await?;
//! ```
use std::collections::VecDeque;

use vxi11_server::Instrument;

const NO_ERROR: &[u8] = b"0,\"No error\"\n";
const UNDEFINED_HEADER: &[u8] = b"-113,\"Undefined header\"\n";
const MAX_QUEUED_ERRORS: usize = 16;

pub struct IdentityBackend {
    idn: String,
    errors: VecDeque<&'static [u8]>,
}

impl IdentityBackend {
    pub fn new(idn: impl Into<String>) -> IdentityBackend {
        IdentityBackend {
            idn: idn.into(),
            errors: VecDeque::new(),
        }
    }

    fn push_error(&mut self, error: &'static [u8]) {
        if self.errors.len() == MAX_QUEUED_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }
}

impl Instrument for IdentityBackend {
    fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>> {
        let header = command.to_ascii_uppercase();
        match &header[..] {
            b"*IDN?" => {
                let mut response = self.idn.clone().into_bytes();
                response.push(b'\n');
                Some(response)
            }
            b"*OPC?" => Some(b"1\n".to_vec()),
            b"*CLS" => {
                self.errors.clear();
                None
            }
            b"*RST" | b"*OPC" | b"*WAI" => None,
            b"SYST:ERR?" | b"SYSTEM:ERROR?" | b"SYST:ERR:NEXT?" | b"SYSTEM:ERROR:NEXT?" => {
                Some(self.errors.pop_front().unwrap_or(NO_ERROR).to_vec())
            }
            _ => {
                log::warn!("Undefined header {:?}", String::from_utf8_lossy(command));
                self.push_error(UNDEFINED_HEADER);
                None
            }
        }
    }
}
