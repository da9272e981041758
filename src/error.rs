use std::{io, net::SocketAddr};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind listener to {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection")]
    Accept(#[source] io::Error),

    #[error("failed to read request")]
    Read(#[source] io::Error),

    #[error("failed to write response")]
    Write(#[source] io::Error),

    /// The peer closed the stream before sending the blank line.
    #[error("connection closed after {lines} request line(s) without a blank line")]
    IncompleteRequest { lines: usize },

    #[error("request head exceeds {limit} bytes")]
    RequestTooLarge { limit: u64 },
}

impl Error {
    /// Whether the error ends the accept loop rather than a single connection.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Bind { .. } => true,
            Error::Accept(e) => !matches!(
                e.kind(),
                io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
