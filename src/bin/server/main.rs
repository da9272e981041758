use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use datetime_responder::{
    Config, ConnectionHandler,
    protocol::{Framing, MAX_REQUEST_BYTES},
};
use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset; `RUST_LOG=debug` adds connection state transitions.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    ip: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// How responses are framed
    #[arg(short, long, value_enum, default_value_t = Framing::Framed)]
    framing: Framing,

    /// Read timeout in seconds. Reads block forever if unset.
    #[arg(short = 't', long, value_parser = clap::value_parser!(u64).range(1..))]
    read_timeout: Option<u64>,

    /// Largest request head accepted, in bytes
    #[arg(long, default_value_t = MAX_REQUEST_BYTES)]
    max_request_bytes: u64,

    /// Stop after this many connections
    #[arg(short, long)]
    connections: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();
    let config = Config {
        addr: SocketAddr::new(args.ip, args.port),
        framing: args.framing,
        read_timeout: args.read_timeout.map(Duration::from_secs),
        max_request_bytes: args.max_request_bytes,
        connections: args.connections,
    };

    let mut handler = ConnectionHandler::bind(config).context("failed to start server")?;
    handler.run().context("server stopped")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_read_timeout_is_rejected() {
        assert!(Args::try_parse_from(["server", "--read-timeout", "0"]).is_err());

        let args = Args::try_parse_from(["server", "--read-timeout", "5"]).unwrap();
        assert_eq!(args.read_timeout, Some(5));
    }

    #[test]
    fn default_log_filter_is_info() {
        let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );

        let filter = EnvFilter::try_new("debug").unwrap();
        assert_eq!(
            filter.max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::DEBUG)
        );
    }
}
