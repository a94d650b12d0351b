//! # Echo Backend
//!
//! Answers every query with the query itself. Useful to check a client's read and
//! write path without an actual instrument.
use vxi11_server::Instrument;

#[derive(Default)]
pub struct EchoBackend;

impl Instrument for EchoBackend {
    fn execute(&mut self, command: &[u8]) -> Option<Vec<u8>> {
        if !command.ends_with(b"?") {
            log::debug!("Ignoring command {:?}", String::from_utf8_lossy(command));
            return None;
        }
        let mut response = command.to_vec();
        response.push(b'\n');
        Some(response)
    }
}

#[test]
fn echoes_queries_only() {
    let mut backend = EchoBackend;
    assert_eq!(backend.execute(b"MEAS?").unwrap(), b"MEAS?\n".to_vec());
    assert_eq!(backend.execute(b"OUTP ON"), None);
}
