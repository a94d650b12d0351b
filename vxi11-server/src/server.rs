use std::{
    io::{self, ErrorKind},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    time::timeout,
};

use crate::{
    Instrument,
    engine::{SCPI_IN_BUFFER_SIZE, Vxi11Core},
    reassembler::MarkerPolicy,
    transport::{LOOPBACK_CAPACITY, LoopbackTransport},
};

#[derive(Debug, Clone)]
pub struct Config {
    pub read_write_timeout: Duration,
    pub marker_policy: MarkerPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_write_timeout: Duration::from_secs(30),
            marker_policy: MarkerPolicy::Stall,
        }
    }
}

#[derive(Debug)]
pub struct Server<I: Instrument> {
    instrument: I,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use vxi11_server::server::Builder;
/// use vxi11_server::reassembler::MarkerPolicy;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .rw_timeout(Duration::from_secs(20))
///     .marker_policy(MarkerPolicy::Discard)
///     .build(my_instrument);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    /// Set how records that can never be extracted are handled
    pub fn marker_policy(mut self, policy: MarkerPolicy) -> Self {
        self.config.marker_policy = policy;
        self
    }

    /// Build and return the server
    pub fn build<I: Instrument>(self, instrument: I) -> Server<I> {
        Server::new(instrument, self.config)
    }
}

fn timed_out() -> io::Error {
    io::Error::new(ErrorKind::TimedOut, "Client write timeout")
}

impl<I: Instrument> Server<I> {
    pub fn new(instrument: I, config: Config) -> Server<I> {
        Server { instrument, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    pub async fn listen(&mut self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accepts clients from `listener`, one after another.
    pub async fn serve(&mut self, listener: TcpListener) -> io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((tcp, addr)) => {
                    log::info!("New client connection from {}", addr);
                    if let Err(e) = self.handle_client(tcp).await {
                        log::error!("Client error: {}", e);
                    }
                    log::info!("Client {} disconnected", addr);
                }
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
    }

    async fn handle_client(&mut self, mut tcp: TcpStream) -> io::Result<()> {
        // every connection starts without a link
        let mut core = Vxi11Core::with_policy(LoopbackTransport::new(), self.config.marker_policy);
        let mut incoming = [0u8; LOOPBACK_CAPACITY / 4];

        loop {
            let n = match timeout(self.config.read_write_timeout, tcp.read(&mut incoming)).await {
                Err(_) => {
                    log::error!("Client read timeout, closing connection");
                    break;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(err))
                    if err.kind() == ErrorKind::ConnectionAborted
                        || err.kind() == ErrorKind::ConnectionReset =>
                {
                    break;
                } // Client disconnected
                Ok(Err(err)) => return Err(err),
            };
            log::trace!("Received {} bytes: {:02x?}", n, &incoming[..n]);

            if core.transport_mut().inject_rx(&incoming[..n]).is_err() {
                // make room by letting the core take what it can
                self.process_records(&mut core);
                core.transport_mut()
                    .inject_rx(&incoming[..n])
                    .map_err(|_| io::Error::other("Receive buffer overrun"))?;
            }
            self.process_records(&mut core);
            self.flush(&mut core, &mut tcp).await?;
        }
        Ok(())
    }

    /// Processes the buffered records one by one. The instrument runs after each of
    /// them, so a device_read sees the response to a device_write in the same segment.
    fn process_records(&mut self, core: &mut Vxi11Core<LoopbackTransport>) {
        while core.service_one() {
            self.execute_commands(core);
        }
    }

    /// Hands every complete line in the SCPI input buffer to the instrument.
    ///
    /// Bytes stay in the input buffer until their line is complete. A full buffer
    /// without a line terminator can never complete and is discarded.
    fn execute_commands(&mut self, core: &mut Vxi11Core<LoopbackTransport>) {
        let mut line = [0u8; SCPI_IN_BUFFER_SIZE];
        while let Some(end) = core.pending_input().iter().position(|&byte| byte == b'\n') {
            let n = core.drain_input(&mut line[..=end]);
            let command = line[..n].trim_ascii();
            if command.is_empty() {
                continue;
            }
            log::debug!("Executing {:?}", String::from_utf8_lossy(command));
            if let Some(response) = self.instrument.execute(command) {
                log::trace!("Response: {:?}", String::from_utf8_lossy(&response));
                core.set_response(&response);
            }
        }

        if core.peek_input_len() == SCPI_IN_BUFFER_SIZE {
            log::warn!(
                "Discarding {} bytes of input without a line terminator",
                SCPI_IN_BUFFER_SIZE
            );
            core.clear_input();
        }
    }

    async fn flush(
        &self,
        core: &mut Vxi11Core<LoopbackTransport>,
        tcp: &mut TcpStream,
    ) -> io::Result<()> {
        let mut outgoing = [0u8; LOOPBACK_CAPACITY / 4];
        loop {
            let n = core.transport_mut().drain_tx(&mut outgoing);
            if n == 0 {
                return Ok(());
            }
            timeout(
                self.config.read_write_timeout,
                tcp.write_all(&outgoing[..n]),
            )
            .await
            .map_err(|_| timed_out())??;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use vxi11_protocol::{Call, CreateLinkParms, DeviceReadParms, DeviceWriteParms, RecordMarker};

    #[derive(Default)]
    struct Recorder {
        executed: Vec<Vec<u8>>,
    }

    impl Instrument for Recorder {
        fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>> {
            self.executed.push(command.to_vec());
            command.ends_with(b"?").then(|| b"42\n".to_vec())
        }
    }

    fn record(xid: u32, call: &Call) -> Vec<u8> {
        let mut payload = Vec::new();
        call.write_to(xid, &mut payload).unwrap();
        let mut out = RecordMarker::last(payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&payload);
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

    fn device_read(xid: u32) -> Vec<u8> {
        record(
            xid,
            &Call::DeviceRead(DeviceReadParms {
                link_id: 0,
                request_size: 0,
                io_timeout: 0,
                lock_timeout: 0,
                flags: 0,
                term_char: 0,
            }),
        )
    }

    fn receive(
        server: &mut Server<Recorder>,
        core: &mut Vxi11Core<LoopbackTransport>,
        data: &[u8],
    ) -> Vec<u8> {
        core.transport_mut().inject_rx(data).unwrap();
        server.process_records(core);
        let mut out = vec![0u8; LOOPBACK_CAPACITY];
        let n = core.transport_mut().drain_tx(&mut out);
        out.truncate(n);
        out
    }

    fn setup() -> (Server<Recorder>, Vxi11Core<LoopbackTransport>) {
        let mut server = Builder::new().build(Recorder::default());
        let mut core = Vxi11Core::new(LoopbackTransport::new());
        assert_eq!(receive(&mut server, &mut core, &create_link()).len(), 48);
        (server, core)
    }

    #[test]
    fn unterminated_input_stays_bounded() {
        let (mut server, mut core) = setup();
        for xid in 0..100 {
            let reply = receive(&mut server, &mut core, &device_write(xid, &[b'a'; 512]));
            assert_eq!(reply.len(), 40);
            assert!(core.peek_input_len() <= SCPI_IN_BUFFER_SIZE);
        }
        assert!(server.instrument().executed.is_empty());

        receive(&mut server, &mut core, &device_write(200, b"*RST\n"));
        assert_eq!(server.instrument().executed, vec![b"*RST".to_vec()]);
    }

    #[test]
    fn command_split_across_writes_runs_once_complete() {
        let (mut server, mut core) = setup();
        receive(&mut server, &mut core, &device_write(2, b"VOLT "));
        assert!(server.instrument().executed.is_empty());
        assert_eq!(core.pending_input(), b"VOLT ");

        receive(&mut server, &mut core, &device_write(3, b"1.5\n  \nOUTP ON\n"));
        assert_eq!(
            server.instrument().executed,
            vec![b"VOLT 1.5".to_vec(), b"OUTP ON".to_vec()]
        );
        assert_eq!(core.peek_input_len(), 0);
    }

    #[test]
    fn read_in_same_segment_sees_response() {
        let (mut server, mut core) = setup();
        let mut segment = device_write(2, b"MEAS?\n");
        segment.extend(device_read(3));

        let replies = receive(&mut server, &mut core, &segment);
        assert_eq!(replies.len(), 40 + 44 + 4);
        assert_eq!(&replies[40 + 36..40 + 40], &[0, 0, 0, 4]);
        assert_eq!(&replies[40 + 44..], b"42\n\0");
        assert_eq!(server.instrument().executed, vec![b"MEAS?".to_vec()]);
    }
}
