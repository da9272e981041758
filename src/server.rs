use std::{
    io::{self, BufReader, Stdout, Write},
    net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpListener, TcpStream},
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::protocol::{Framing, MAX_REQUEST_BYTES, RequestLines, Response, Serialize};
use crate::{Error, Result};

pub struct Config {
    /// The address to bind to.
    pub addr: SocketAddr,

    /// How responses are framed.
    pub framing: Framing,

    /// How long a read may block before the request is abandoned.
    pub read_timeout: Option<Duration>,

    /// The largest request head accepted, in bytes.
    pub max_request_bytes: u64,

    /// The number of accept cycles to run before returning.
    pub connections: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 8080).into(),
            framing: Framing::default(),
            read_timeout: None,
            max_request_bytes: MAX_REQUEST_BYTES,
            connections: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Accepted,
    ReadingRequest,
    Responding,
    Closed,
}

/// An accepted client socket, used for exactly one exchange.
///
/// The socket is shut down and released when the connection is dropped.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnState,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        debug!(%peer, state = ?ConnState::Accepted, "connection state");
        Self {
            stream,
            peer,
            state: ConnState::Accepted,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    fn transition(&mut self, state: ConnState) {
        debug!(peer = %self.peer, from = ?self.state, to = ?state, "connection state");
        self.state = state;
    }

    /// Reads the request head lazily from the connection.
    pub fn request_lines(&self, limit: u64) -> RequestLines<BufReader<&TcpStream>> {
        RequestLines::new(BufReader::new(&self.stream), limit)
    }

    /// Writes the whole response to the peer.
    pub fn send_response(&mut self, response: Response) -> Result<()> {
        response.serialize(&mut self.stream).map_err(Error::Write)
    }

    /// Consumes the connection; `Drop` shuts the socket down and releases it.
    pub fn close(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.transition(ConnState::Closed);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // The peer may already be gone.
            debug!(peer = %self.peer, error = %e, "shutdown failed");
        }
    }
}

/// Accepts connections one at a time, echoes each request head to `sink` and
/// answers with the current time.
pub struct ConnectionHandler<W> {
    listener: TcpListener,
    framing: Framing,
    read_timeout: Option<Duration>,
    max_request_bytes: u64,
    connections: Option<u64>,
    sink: W,
}

impl ConnectionHandler<Stdout> {
    /// Binds the listener and echoes request lines to standard output.
    pub fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(config.addr).map_err(|source| Error::Bind {
            addr: config.addr,
            source,
        })?;
        Ok(Self::new(listener, config, io::stdout()))
    }
}

impl<W: Write> ConnectionHandler<W> {
    /// Wraps an already bound listener. `config.addr` is ignored.
    ///
    /// A zero read timeout means no timeout.
    pub fn new(listener: TcpListener, config: Config, sink: W) -> Self {
        Self {
            listener,
            framing: config.framing,
            read_timeout: config.read_timeout.filter(|t| !t.is_zero()),
            max_request_bytes: config.max_request_bytes,
            connections: config.connections,
            sink,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::Accept)
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Runs the accept loop until the connection limit is reached or a fatal
    /// error occurs.
    pub fn run(&mut self) -> Result<()> {
        let addr = self.local_addr()?;
        self.echo(&format!(
            "Listening for connections on port {} ...",
            addr.port()
        ));
        info!(%addr, framing = ?self.framing, "accepting connections");

        let mut cycles = 0u64;
        while self.connections.is_none_or(|max| cycles < max) {
            cycles += 1;

            let conn = match self.accept_connection() {
                Ok(conn) => conn,
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, cause = ?std::error::Error::source(&e), "accept failed");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, cause = ?std::error::Error::source(&e), "accept failed");
                    return Err(e);
                }
            };

            let peer = conn.peer();
            match self.handle(conn) {
                Ok(response) => info!(%peer, body = %response.body(), "responded"),
                Err(e) => {
                    warn!(%peer, error = %e, cause = ?std::error::Error::source(&e), "request failed")
                }
            }
        }

        Ok(())
    }

    /// Blocks until a client connects.
    pub fn accept_connection(&self) -> Result<Connection> {
        let (stream, peer) = self.listener.accept().map_err(Error::Accept)?;
        Ok(Connection::new(stream, peer))
    }

    /// Runs one exchange on `conn` and closes it on every path.
    pub fn handle(&mut self, mut conn: Connection) -> Result<Response> {
        let result = self.exchange(&mut conn);
        conn.close();
        result
    }

    /// Reads the request head from `conn` and answers it, leaving the
    /// connection open. `conn.state()` tells how far the exchange got.
    pub fn exchange(&mut self, conn: &mut Connection) -> Result<Response> {
        conn.transition(ConnState::ReadingRequest);
        conn.stream
            .set_read_timeout(self.read_timeout)
            .map_err(Error::Read)?;

        let mut lines = conn.request_lines(self.max_request_bytes);
        for line in lines.by_ref() {
            self.echo(&line?);
        }
        lines.finish()?;

        conn.transition(ConnState::Responding);
        let response = self.build_response();
        conn.send_response(response.clone())?;
        Ok(response)
    }

    pub fn build_response(&self) -> Response {
        Response::new(self.framing)
    }

    fn echo(&mut self, line: &str) {
        let result = writeln!(self.sink, "{line}").and_then(|_| self.sink.flush());
        if let Err(e) = result {
            warn!(error = %e, "failed to write to output");
        }
    }
}
