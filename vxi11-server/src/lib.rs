//! # VXI-11 Server Library
//!
//! This crate provides the VXI-11 Core channel of an instrument: the engine that turns
//! a byte stream into calls, answers them, and hands SCPI bytes to a command
//! interpreter.
//!
//! ## Overview
//!
//! VXI-11 lets a controller talk SCPI to a test-and-measurement instrument through ONC
//! RPC. This library implements the minimal Core channel that small devices need:
//! one permanent link, AUTH_NULL, single fragment records and a fixed program number
//! that is reached without a portmapper.
//!
//! ## Architecture
//!
//! The crate is built around these components:
//!
//! - **[`transport::Transport`] Trait**: "poll one byte" and "write these bytes".
//!   [`transport::LoopbackTransport`] implements it with two bounded rings.
//! - **[`reassembler::Reassembler`]**: collects bytes and extracts complete records
//! - **[`engine::Vxi11Core`]**: validates calls, runs `create_link`, `device_write` and
//!   `device_read`, builds the replies and owns the SCPI flow-control buffers
//! - **[`context::RuntimeContext`]**: read-only snapshot of link state, buffer
//!   occupancy and last internal error
//! - **[`server::Server`]**: a TCP server that drives a core for each client and
//!   passes complete commands to an [`Instrument`]
//!
//! ## How It Works
//!
//! 1. Bytes arrive through the transport
//! 2. [`engine::Vxi11Core::service`] moves them into the reassembly buffer and
//!    processes every complete record
//! 3. `device_write` data lands in the SCPI input buffer
//! 4. The interpreter drains the input and stores its answer with
//!    [`engine::Vxi11Core::set_response`]
//! 5. `device_read` calls stream the answer back, in as many chunks as the client asks for
//!
//! ## Basic Usage
//!
//! ### Implementing an Instrument
//!
//! ```
//! use vxi11_server::Instrument;
//!
//! struct Multimeter;
//!
//! impl Instrument for Multimeter {
//!     fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>> {
//!         match command {
//!             b"*IDN?" => Some(b"ACME,DMM1,0,1.0\n".to_vec()),
//!             b"MEAS:VOLT?" => Some(b"+1.234E+00\n".to_vec()),
//!             _ => None,
//!         }
//!     }
//! }
//! ```
//!
//! ### Starting the Server
//!
//! ```ignore
//! use vxi11_server::server::{Config, Server};
//!
//! let mut server = Server::new(Multimeter, Config::default());
//! server.listen("127.0.0.1:9009").await?;
//! ```
//!
//! ### Driving the Core Directly
//!
//! ```
//! use vxi11_server::{engine::Vxi11Core, transport::LoopbackTransport};
//!
//! let mut core = Vxi11Core::new(LoopbackTransport::new());
//! loop {
//!     // feed received bytes with core.transport_mut().inject_rx(..)
//!     core.service();
//!     // drain core.transport_mut().drain_tx(..) to the peer
//!     # break;
//! }
//! ```
//!
//! ## Error Handling
//!
//! Rejected calls are never answered on the wire. The reason is logged and stored as
//! the last [`context::ErrorCode`]. Buffer overflows truncate the data, are recorded
//! the same way, and are still acknowledged as successful to the client.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Enable logging to see:
//! - Client connections and link creation
//! - Every call and its sizes
//! - Dropped calls, overflows and transport errors
//!
//! ## Thread Model
//!
//! The core is single threaded and never blocks. Every operation takes `&mut self`,
//! so sharing a core between threads requires external serialisation. The server
//! processes client connections sequentially.
pub mod buffer;
pub mod context;
pub mod engine;
pub mod reassembler;
pub mod server;
pub mod transport;

/// The SCPI command interpreter behind the Core channel.
///
/// The server splits the bytes received through `device_write` into newline
/// terminated commands and hands each one to [`execute`](Instrument::execute).
pub trait Instrument {
    /// Execute a single command.
    ///
    /// # Arguments
    ///
    /// * `command` - The command without its line terminator and surrounding whitespace
    ///
    /// # Returns
    ///
    /// The response for queries. It replaces whatever response was still pending and
    /// is returned by the following `device_read` calls. Commands that produce no
    /// response return `None`.
    fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>>;
}

impl<I: Instrument + ?Sized> Instrument for Box<I> {
    fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>> {
        (**self).execute(command)
    }
}
