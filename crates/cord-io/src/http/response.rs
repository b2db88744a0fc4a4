//! Streaming HTTP/1.1 response parser

use serde::de::DeserializeOwned;

use super::error::ParseError;
use super::request::Headers;

/// Longest status or header line accepted
pub const MAX_LINE: usize = 16 * 1024;

/// A complete response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Minor version: 1 for HTTP/1.1, 0 for HTTP/1.0
    pub version: u8,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the connection may carry another exchange
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("Connection").map(str::to_ascii_lowercase);
        match connection.as_deref() {
            Some(value) if value.contains("close") => false,
            Some(value) if value.contains("keep-alive") => true,
            _ => self.version >= 1,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StatusLine,
    Headers,
    Body { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailers,
    UntilClose,
    Complete,
}

/// Incremental response parser
///
/// Feed bytes as they arrive; [`ResponseParser::feed`] stops at the end of
/// the current response so the caller can hand any remainder to the next one.
#[derive(Debug)]
pub struct ResponseParser {
    state: State,
    line: Vec<u8>,
    started: bool,
    version: u8,
    status: u16,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
    /// The response answers a HEAD request and carries no body
    head: bool,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: State::StatusLine,
            line: Vec::new(),
            started: false,
            version: 1,
            status: 0,
            reason: String::new(),
            headers: Headers::new(),
            body: Vec::new(),
            head: false,
        }
    }

    /// Record whether the response being parsed answers a HEAD request
    ///
    /// Such a response ends with its headers whatever `Content-Length` says.
    /// Reset by [`ResponseParser::take`].
    pub fn set_head_request(&mut self, head: bool) {
        self.head = head;
    }

    /// Consume bytes, returning how many were used
    ///
    /// Fewer than `data.len()` bytes are used only when the response completed.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;
        if !data.is_empty() && self.state != State::Complete {
            self.started = true;
        }
        while pos < data.len() && self.state != State::Complete {
            match self.state {
                State::StatusLine
                | State::Headers
                | State::ChunkSize
                | State::ChunkDataEnd
                | State::Trailers => {
                    let Some(line) = self.take_line(data, &mut pos)? else {
                        break;
                    };
                    self.on_line(&line)?;
                }
                State::Body { remaining } => {
                    let n = remaining.min(data.len() - pos);
                    self.body.extend_from_slice(&data[pos..pos + n]);
                    pos += n;
                    self.state = if n == remaining {
                        State::Complete
                    } else {
                        State::Body {
                            remaining: remaining - n,
                        }
                    };
                }
                State::ChunkData { remaining } => {
                    let n = remaining.min(data.len() - pos);
                    self.body.extend_from_slice(&data[pos..pos + n]);
                    pos += n;
                    self.state = if n == remaining {
                        State::ChunkDataEnd
                    } else {
                        State::ChunkData {
                            remaining: remaining - n,
                        }
                    };
                }
                State::UntilClose => {
                    self.body.extend_from_slice(&data[pos..]);
                    pos = data.len();
                }
                State::Complete => {}
            }
        }
        Ok(pos)
    }

    /// The peer closed the stream; completes a close-delimited body
    pub fn finish_eof(&mut self) -> bool {
        if self.state == State::UntilClose {
            self.state = State::Complete;
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// No byte of a response has been seen yet
    pub fn is_idle(&self) -> bool {
        !self.started
    }

    /// Take the finished response and reset for the next one
    pub fn take(&mut self) -> Option<HttpResponse> {
        if !self.is_complete() {
            return None;
        }
        let done = std::mem::take(self);
        Some(HttpResponse {
            version: done.version,
            status: done.status,
            reason: done.reason,
            headers: done.headers,
            body: done.body,
        })
    }

    fn take_line(&mut self, data: &[u8], pos: &mut usize) -> Result<Option<Vec<u8>>, ParseError> {
        let rest = &data[*pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => {
                self.line.extend_from_slice(&rest[..i]);
                *pos += i + 1;
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            None => {
                self.line.extend_from_slice(rest);
                *pos = data.len();
                if self.line.len() > MAX_LINE {
                    return Err(ParseError::LineTooLong(self.line.len()));
                }
                Ok(None)
            }
        }
    }

    fn on_line(&mut self, line: &[u8]) -> Result<(), ParseError> {
        let text = String::from_utf8_lossy(line);
        match self.state {
            State::StatusLine => {
                // tolerate stray blank lines between pipelined responses
                if !text.is_empty() {
                    self.parse_status_line(&text)?;
                    self.state = State::Headers;
                }
            }
            State::Headers => {
                if text.is_empty() {
                    self.end_of_headers()?;
                } else {
                    let (name, value) = text
                        .split_once(':')
                        .ok_or_else(|| ParseError::InvalidHeader(text.to_string()))?;
                    self.headers.append(name.trim(), value.trim());
                }
            }
            State::ChunkSize => {
                let size = text.split(';').next().unwrap_or_default().trim();
                let size = usize::from_str_radix(size, 16)
                    .map_err(|_| ParseError::InvalidChunkSize(text.to_string()))?;
                self.state = if size == 0 {
                    State::Trailers
                } else {
                    State::ChunkData { remaining: size }
                };
            }
            State::ChunkDataEnd => {
                if !text.is_empty() {
                    return Err(ParseError::InvalidChunkSize(text.to_string()));
                }
                self.state = State::ChunkSize;
            }
            State::Trailers => {
                if text.is_empty() {
                    self.state = State::Complete;
                }
            }
            State::Body { .. } | State::ChunkData { .. } | State::UntilClose | State::Complete => {}
        }
        Ok(())
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), ParseError> {
        let invalid = || ParseError::InvalidStatusLine(line.to_string());
        let mut parts = line.splitn(3, ' ');

        let version = parts.next().ok_or_else(invalid)?;
        self.version = match version {
            "HTTP/1.1" => 1,
            "HTTP/1.0" => 0,
            _ => return Err(invalid()),
        };
        self.status = parts
            .next()
            .and_then(|s| s.parse().ok())
            .filter(|s| (100..1000).contains(s))
            .ok_or_else(invalid)?;
        self.reason = parts.next().unwrap_or_default().to_string();
        Ok(())
    }

    fn end_of_headers(&mut self) -> Result<(), ParseError> {
        if (100..200).contains(&self.status) && self.status != 101 {
            // interim response; the real one follows
            self.headers = Headers::new();
            self.state = State::StatusLine;
            return Ok(());
        }
        if self.head || self.status == 101 || self.status == 204 || self.status == 304 {
            self.state = State::Complete;
            return Ok(());
        }

        let chunked = self
            .headers
            .get("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            self.state = State::ChunkSize;
            return Ok(());
        }

        match self.headers.get("Content-Length") {
            Some(raw) => {
                let len: usize = raw
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))?;
                self.state = if len == 0 {
                    State::Complete
                } else {
                    State::Body { remaining: len }
                };
            }
            None => self.state = State::UntilClose,
        }
        Ok(())
    }
}
