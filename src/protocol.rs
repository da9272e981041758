use std::io::{BufRead, Error as IoError, ErrorKind, Read, Result, Write};

use chrono::{DateTime, FixedOffset, Utc};
use clap::ValueEnum;

use crate::{Error, get_time};

pub const STATUS_LINE: &str = "HTTP/1.1 200 OK";

/// Default upper bound on the size of a request head.
pub const MAX_REQUEST_BYTES: u64 = 8192;

pub trait Serialize<T> {
    fn serialize(self, bytes: &mut T) -> Result<()>;
}

pub trait Deserialize<T> {
    fn deserialize(bytes: &mut T) -> Result<Self>
    where
        Self: Sized;
}

/// Lazily reads request lines up to the first empty line.
///
/// Lines are decoded lossily and stripped of their `\r\n` or `\n` terminator.
/// Iteration ends at the blank line, at stream end, or after the first error.
pub struct RequestLines<R> {
    reader: R,

    /// Bytes of request head still allowed.
    remaining: u64,
    limit: u64,

    /// The number of non-empty lines yielded so far.
    count: usize,

    /// Whether the blank line ending the head has been read.
    complete: bool,
    done: bool,
}

impl<R: BufRead> RequestLines<R> {
    pub fn new(reader: R, limit: u64) -> Self {
        Self {
            reader,
            remaining: limit,
            limit,
            count: 0,
            complete: false,
            done: false,
        }
    }

    /// Returns the number of lines read, or an error if the stream ended
    /// before the blank line.
    pub fn finish(self) -> crate::Result<usize> {
        if self.complete {
            Ok(self.count)
        } else {
            Err(Error::IncompleteRequest { lines: self.count })
        }
    }
}

impl<R: BufRead> Iterator for RequestLines<R> {
    type Item = crate::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = Vec::new();
        let n = match self
            .reader
            .by_ref()
            .take(self.remaining)
            .read_until(b'\n', &mut buf)
        {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(Error::Read(e)));
            }
        };
        self.remaining -= n as u64;

        if buf.last() != Some(&b'\n') {
            // Either the limit cut the line short or the peer went away.
            self.done = true;
            if self.remaining == 0 {
                return Some(Err(Error::RequestTooLarge { limit: self.limit }));
            }
            if buf.is_empty() {
                return None;
            }
        } else {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.is_empty() {
                self.complete = true;
                self.done = true;
                return None;
            }
        }

        self.count += 1;
        Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// How the response message is framed on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Framing {
    /// A conformant message with `Date`, `Content-Type`, `Content-Length`
    /// and `Connection: close` headers.
    #[default]
    Framed,

    /// The bare `HTTP/1.1 200 OK\r\n\r\n<body>` shape with no headers.
    Legacy,
}

/// The fixed 200 OK response carrying the current time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// The time the response was constructed.
    pub timestamp: DateTime<FixedOffset>,

    pub framing: Framing,
}

impl Response {
    /// Captures the current time and builds the response around it.
    pub fn new(framing: Framing) -> Self {
        Self {
            timestamp: get_time(),
            framing,
        }
    }

    pub fn body(&self) -> String {
        self.timestamp.to_rfc2822()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body();
        let message = match self.framing {
            Framing::Legacy => format!("{STATUS_LINE}\r\n\r\n{body}"),
            Framing::Framed => {
                let date = self
                    .timestamp
                    .with_timezone(&Utc)
                    .format("%a, %d %b %Y %H:%M:%S GMT");
                format!(
                    "{STATUS_LINE}\r\n\
                     Date: {date}\r\n\
                     Content-Type: text/plain; charset=utf-8\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\
                     \r\n\
                     {body}",
                    body.len()
                )
            }
        };
        message.into_bytes()
    }
}

impl<T: Write> Serialize<T> for Response {
    fn serialize(self, bytes: &mut T) -> Result<()> {
        bytes.write_all(&self.to_bytes())?;
        bytes.flush()?;
        Ok(())
    }
}

impl<T: BufRead> Deserialize<T> for Response {
    fn deserialize(bytes: &mut T) -> Result<Self> {
        let mut line = String::new();
        if bytes.read_line(&mut line)? == 0 {
            return Err(ErrorKind::UnexpectedEof.into());
        }
        let status = line.trim_end_matches(['\r', '\n']);
        if status != STATUS_LINE {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("unexpected status line: {status:?}"),
            ));
        }

        let mut headers = 0;
        let mut content_length = None;
        loop {
            line.clear();
            if bytes.read_line(&mut line)? == 0 {
                return Err(ErrorKind::UnexpectedEof.into());
            }
            let header = line.trim_end_matches(['\r', '\n']);
            if header.is_empty() {
                break;
            }
            headers += 1;

            let Some((name, value)) = header.split_once(':') else {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    format!("malformed header: {header:?}"),
                ));
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
                content_length = Some(len);
            }
        }

        let body = match content_length {
            Some(len) => {
                let mut body = Vec::new();
                bytes.by_ref().take(len as u64).read_to_end(&mut body)?;
                if body.len() != len {
                    return Err(ErrorKind::UnexpectedEof.into());
                }
                body
            }
            None => {
                let mut body = Vec::new();
                bytes.read_to_end(&mut body)?;
                body
            }
        };
        let body = String::from_utf8(body).map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
        let timestamp = DateTime::parse_from_rfc2822(body.trim())
            .map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;

        let framing = if headers == 0 {
            Framing::Legacy
        } else {
            Framing::Framed
        };
        Ok(Self { timestamp, framing })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read_all(input: &[u8], limit: u64) -> (Vec<crate::Result<String>>, crate::Result<usize>) {
        let mut lines = RequestLines::new(Cursor::new(input), limit);
        let items = lines.by_ref().collect::<Vec<_>>();
        (items, lines.finish())
    }

    #[test]
    fn reads_lines_until_blank_line() {
        let (items, done) = read_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nignored body", 1024);
        let lines = items.into_iter().map(|l| l.unwrap()).collect::<Vec<_>>();
        assert_eq!(lines, ["GET / HTTP/1.1", "Host: x"]);
        assert_eq!(done.unwrap(), 2);
    }

    #[test]
    fn blank_request_yields_no_lines() {
        let (items, done) = read_all(b"\r\n", 1024);
        assert!(items.is_empty());
        assert_eq!(done.unwrap(), 0);
    }

    #[test]
    fn accepts_bare_newlines() {
        let (items, done) = read_all(b"a\nb\n\n", 1024);
        assert_eq!(items.len(), 2);
        assert_eq!(done.unwrap(), 2);
    }

    #[test]
    fn stream_end_before_blank_line_is_incomplete() {
        let (items, done) = read_all(b"GET / HTTP/1.1\r\nHost:", 1024);
        let lines = items.into_iter().map(|l| l.unwrap()).collect::<Vec<_>>();
        assert_eq!(lines, ["GET / HTTP/1.1", "Host:"]);
        assert!(matches!(done, Err(Error::IncompleteRequest { lines: 2 })));

        let (items, done) = read_all(b"", 1024);
        assert!(items.is_empty());
        assert!(matches!(done, Err(Error::IncompleteRequest { lines: 0 })));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let (items, done) = read_all(b"GET /aaaaaaaaaaaaaaaa HTTP/1.1\r\n\r\n", 16);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(Error::RequestTooLarge { limit: 16 })));
        assert!(done.is_err());
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let (items, done) = read_all(b"caf\xff\r\n\r\n", 1024);
        assert_eq!(items[0].as_ref().unwrap(), "caf\u{fffd}");
        assert_eq!(done.unwrap(), 1);
    }

    #[test]
    fn legacy_response_has_no_headers() {
        let response = Response::new(Framing::Legacy);
        let expected = format!("HTTP/1.1 200 OK\r\n\r\n{}", response.body());
        assert_eq!(response.to_bytes(), expected.into_bytes());
    }

    #[test]
    fn framed_response_declares_body_length() {
        let response = Response::new(Framing::Framed);
        let text = String::from_utf8(response.to_bytes()).unwrap();
        let (head, body) = text.split_once("\r\n\r\n").unwrap();

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
        assert!(head.contains("Connection: close"));
        assert!(DateTime::parse_from_rfc2822(body).is_ok());
    }

    #[test]
    fn deserializes_both_framings() {
        for framing in [Framing::Framed, Framing::Legacy] {
            let response = Response::new(framing);
            let mut buf = Vec::new();
            response.clone().serialize(&mut buf).unwrap();

            let decoded = Response::deserialize(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded.framing, framing);
            // RFC 2822 drops sub-second precision.
            assert_eq!(decoded.timestamp.timestamp(), response.timestamp.timestamp());
        }
    }

    #[test]
    fn oversized_content_length_is_not_preallocated() {
        let mut input = Cursor::new(
            b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nshort".to_vec(),
        );
        let err = Response::deserialize(&mut input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_unexpected_status() {
        let mut input = Cursor::new(b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec());
        let err = Response::deserialize(&mut input).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
