//! # VXI-11 Bridge
//!
//! Exposes a demo instrument through the VXI-11 Core channel over TCP.
//!
//! ## Overview
//!
//! This binary wraps [`vxi11_server`] with a command line and a couple of
//! instruments to test VXI-11 clients against: one that identifies itself and
//! answers the IEEE 488.2 common commands, and one that echoes every query.
pub mod backends;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use vxi11_server::{Instrument, reassembler::MarkerPolicy, server::Builder};

use crate::backends::{echo::EchoBackend, identity::IdentityBackend};

const DEFAULT_IDN: &str = "VXI11-RS,BRIDGE,0,0.1";

#[derive(Parser, Eq, PartialEq, Clone)]
enum InstrumentImpl {
    /// Answer *IDN? and the other common commands
    Identify {
        #[arg(long, help = "The *IDN? response", default_value = DEFAULT_IDN)]
        idn: String,
    },
    /// Answer every query with the query itself
    Echo,
}

#[derive(Parser)]
#[command(about = "VXI-11 Core channel server for SCPI instruments", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "9009")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(short, long, help = "TCP read and write timeout in seconds", default_value = "30")]
    timeout_secs: u64,

    #[arg(
        long,
        help = "Drop buffered bytes when a record can never be extracted instead of stalling"
    )]
    discard_malformed: bool,

    #[clap(subcommand)]
    instrument: Option<InstrumentImpl>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting VXI-11 server");

    let args = Args::parse();
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let instrument: Box<dyn Instrument> = match args.instrument {
        Some(InstrumentImpl::Identify { idn }) => {
            log::info!("Serving identity instrument \"{}\"", idn);
            Box::new(IdentityBackend::new(idn))
        }
        Some(InstrumentImpl::Echo) => {
            log::info!("Serving echo instrument");
            Box::new(EchoBackend)
        }
        None => {
            log::info!("No instrument selected, serving the identity instrument");
            Box::new(IdentityBackend::new(DEFAULT_IDN))
        }
    };

    let policy = if args.discard_malformed {
        MarkerPolicy::Discard
    } else {
        MarkerPolicy::Stall
    };
    let mut server = Builder::new()
        .rw_timeout(Duration::from_secs(args.timeout_secs))
        .marker_policy(policy)
        .build(instrument);
    log::debug!(
        "Server config: timeout={:?}, marker_policy={:?}",
        server.config().read_write_timeout,
        server.config().marker_policy
    );

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    tokio::select! {
        result = server.listen(addr) => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }
    Ok(())
}
