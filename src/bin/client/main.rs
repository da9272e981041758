use std::{
    io::{BufReader, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream},
};

use anyhow::Context;
use clap::Parser;
use datetime_responder::protocol::{Deserialize, Response};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// IP address of the server.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    ip: IpAddr,

    /// Port of the server.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// The number of sequential requests, each on its own connection.
    #[arg(short = 'n', long, default_value_t = 1)]
    requests: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let addr = SocketAddr::new(args.ip, args.port);

    let mut previous: Option<Response> = None;
    let mut ordered = true;
    for i in 0..args.requests {
        let response = fetch(addr).with_context(|| format!("request {i} to {addr} failed"))?;
        println!("{}", response.timestamp);

        if let Some(prev) = &previous {
            if response.timestamp < prev.timestamp {
                tracing::warn!(previous = %prev.timestamp, current = %response.timestamp, "time went backwards");
                ordered = false;
            }
        }
        previous = Some(response);
    }

    if args.requests > 1 {
        println!("timestamps non-decreasing: {ordered}");
    }
    Ok(())
}

fn fetch(addr: SocketAddr) -> anyhow::Result<Response> {
    let mut stream = TcpStream::connect(addr).context("failed to connect")?;
    stream.set_nodelay(true)?;

    let request = format!("GET / HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes())?;

    let response = Response::deserialize(&mut BufReader::new(stream))?;
    tracing::debug!(framing = ?response.framing, "received response");
    Ok(response)
}
