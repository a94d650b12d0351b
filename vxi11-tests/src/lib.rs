//! Helpers shared by the end-to-end tests.
use std::net::SocketAddr;

use tokio::net::TcpListener;
use vxi11_server::{Instrument, server::{Builder, Server}};

/// Answers `*IDN?` and a query that produces a long response.
#[derive(Default)]
pub struct TestInstrument {
    pub executed: Vec<Vec<u8>>,
}

pub const IDN: &[u8] = b"VXI11-RS,TEST,0,1.0\n";

impl Instrument for TestInstrument {
    fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>> {
        self.executed.push(command.to_vec());
        match command {
            b"*IDN?" => Some(IDN.to_vec()),
            b"WAV?" => Some(waveform()),
            _ => None,
        }
    }
}

/// 300 bytes of ascending data terminated by a newline.
pub fn waveform() -> Vec<u8> {
    let mut data: Vec<u8> = (0..299).map(|i| b'0' + (i % 10) as u8).collect();
    data.push(b'\n');
    data
}

/// Starts `server` on an ephemeral loopback port and returns its address.
pub async fn spawn_server<I>(mut server: Server<I>) -> SocketAddr
where
    I: Instrument + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move { server.serve(listener).await });
    addr
}

/// Starts a server with default settings around a [`TestInstrument`].
pub async fn spawn_test_server() -> SocketAddr {
    spawn_server(Builder::new().build(TestInstrument::default())).await
}
