//! Incremental HTTP/1.x message decoder.
//!
//! # Responsibilities
//! - Decode a request or response from arbitrarily chunked bytes
//! - Expose the parsed start line, headers and body to the engine
//! - Re-serialize a message to wire bytes, optionally gzip-encoded
//!
//! # Design Decisions
//! - No I/O: callers push bytes in with `feed` and inspect `state`
//! - Unconsumed tails are kept and prefixed to the next chunk
//! - Header keys are lowercased on the way in; last write wins
//! - `GET` requests never carry a body

use std::collections::HashMap;

use crate::http::encoding;

/// Whether the message is a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// Decoder progress. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseState {
    /// Waiting for a request line or status line.
    Start,
    /// Reading header lines until the blank line.
    Headers,
    /// Reading `content-length` body bytes.
    Body,
    /// Fully decoded.
    End,
}

/// One HTTP request or response.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    state: ParseState,
    headers: HashMap<String, String>,
    method: String,
    uri: String,
    version: String,
    status_code: u16,
    status_text: String,
    content_length: usize,
    body: Vec<u8>,
    /// Start line without its line terminator, kept verbatim.
    start_line: Vec<u8>,
    /// Bytes of an incomplete line carried over to the next `feed`.
    residual: Vec<u8>,
    /// Bytes of the accepted start line and header lines so far.
    head_len: usize,
}

impl Message {
    /// Create an empty message of the given kind in the `Start` state.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            state: ParseState::Start,
            headers: HashMap::new(),
            method: String::new(),
            uri: String::new(),
            version: String::new(),
            status_code: 0,
            status_text: String::new(),
            content_length: 0,
            body: Vec::new(),
            start_line: Vec::new(),
            residual: Vec::new(),
            head_len: 0,
        }
    }

    pub fn request() -> Self {
        Self::new(MessageKind::Request)
    }

    pub fn response() -> Self {
        Self::new(MessageKind::Response)
    }

    /// Push a chunk of bytes through the decoder.
    ///
    /// Advances through as many states as the buffered bytes allow. A
    /// malformed line is consumed and dropped without advancing the state.
    pub fn feed(&mut self, data: &[u8]) {
        if self.state == ParseState::End {
            return;
        }

        let mut buffer = std::mem::take(&mut self.residual);
        buffer.extend_from_slice(data);
        let mut position = 0;

        if self.state == ParseState::Start && !self.parse_start_line(&buffer, &mut position) {
            self.residual = buffer.split_off(position);
            return;
        }

        if self.state == ParseState::Headers && !self.parse_headers(&buffer, &mut position) {
            self.residual = buffer.split_off(position);
            return;
        }

        if self.state == ParseState::Body {
            self.body.extend_from_slice(&buffer[position..]);
            if self.content_length == 0 || self.body.len() >= self.content_length {
                self.state = ParseState::End;
            }
        }
    }

    /// Returns `true` once a complete line was consumed as a valid start line.
    fn parse_start_line(&mut self, buffer: &[u8], position: &mut usize) -> bool {
        let Some(line) = next_line(buffer, position) else {
            return false;
        };

        let Some(first) = line.iter().position(|&b| b == b' ') else {
            tracing::debug!(line = %String::from_utf8_lossy(line), "Dropping malformed start line");
            return false;
        };
        let Some(second) = line[first + 1..].iter().position(|&b| b == b' ') else {
            tracing::debug!(line = %String::from_utf8_lossy(line), "Dropping malformed start line");
            return false;
        };
        let second = first + 1 + second;

        let head = ascii(&line[..first]);
        let middle = ascii(&line[first + 1..second]);
        let tail = ascii(&line[second + 1..]);

        match self.kind {
            MessageKind::Request => {
                self.method = head;
                self.uri = middle;
                self.version = tail;
            }
            MessageKind::Response => {
                let Ok(status_code) = middle.parse::<u16>() else {
                    tracing::debug!(status = %middle, "Dropping status line with non-numeric code");
                    return false;
                };
                self.version = head;
                self.status_code = status_code;
                self.status_text = tail;
            }
        }

        self.start_line = line.to_vec();
        self.head_len += line.len();
        self.state = ParseState::Headers;
        true
    }

    /// Returns `true` once the blank line ending the header block was consumed.
    fn parse_headers(&mut self, buffer: &[u8], position: &mut usize) -> bool {
        loop {
            let Some(line) = next_line(buffer, position) else {
                return false;
            };

            if line.is_empty() {
                self.state = if self.kind == MessageKind::Request && self.method == "GET" {
                    ParseState::End
                } else {
                    ParseState::Body
                };
                return true;
            }

            let Some(colon) = line.iter().position(|&b| b == b':') else {
                tracing::debug!(line = %String::from_utf8_lossy(line), "Dropping header line without colon");
                return false;
            };

            self.head_len += line.len();
            let key = ascii(&line[..colon]).trim().to_ascii_lowercase();
            let value = ascii(&line[colon + 1..]).trim().to_string();
            self.insert_header(key, value);
        }
    }

    fn insert_header(&mut self, key: String, value: String) {
        if key == "content-length" {
            // Non-numeric values leave the declared length unchanged.
            if let Ok(length) = value.parse::<usize>() {
                self.content_length = length;
            }
        }
        self.headers.insert(key, value);
    }

    /// Whether the connection should stay open after this exchange.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection");
        match self.version.as_str() {
            "HTTP/1.0" => connection.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive")),
            "HTTP/1.1" => !connection.is_some_and(|v| v.eq_ignore_ascii_case("close")),
            _ => false,
        }
    }

    /// Set a header, lowercasing its name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.insert_header(name.to_ascii_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::End
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Bytes held by the decoder so far: start line, header lines, the
    /// carried-over tail and the body.
    pub fn buffered_len(&self) -> usize {
        self.head_len + self.residual.len() + self.body.len()
    }

    /// Gzip the body in place if the message qualifies.
    ///
    /// Requires `accept-encoding` to mention gzip and a compressible
    /// `content-type`. Returns `false`, leaving the message untouched, when
    /// any precondition fails.
    pub fn gzip(&mut self) -> bool {
        let accepts_gzip = self
            .header("accept-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("gzip"));
        if !accepts_gzip {
            return false;
        }
        if !self.header("content-type").is_some_and(encoding::is_compressible) {
            return false;
        }

        let compressed = match encoding::gzip(&self.body) {
            Ok(compressed) => compressed,
            Err(e) => {
                tracing::warn!(error = %e, "Gzip encoding failed, sending identity body");
                return false;
            }
        };

        self.body = compressed;
        self.set_header("content-encoding", "gzip");
        self.set_header("content-length", self.body.len().to_string());
        self.remove_header("transfer-encoding");
        true
    }

    /// Encode to wire bytes. With `compress`, a gzip-encoded copy is
    /// serialized when the message qualifies; `self` is never modified.
    pub fn serialize(&self, compress: bool) -> Vec<u8> {
        if compress {
            let mut encoded = self.clone();
            if encoded.gzip() {
                return encoded.write_wire();
            }
        }
        self.write_wire()
    }

    fn write_wire(&self) -> Vec<u8> {
        let headers_len: usize = self.headers.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
        let mut out = Vec::with_capacity(self.start_line.len() + 2 + headers_len + 2 + self.body.len());

        out.extend_from_slice(&self.start_line);
        out.extend_from_slice(b"\r\n");
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// Take the next `\n`-terminated line starting at `position`, without its
/// trailing CR/LF. Leaves `position` untouched if no full line is buffered.
fn next_line<'a>(buffer: &'a [u8], position: &mut usize) -> Option<&'a [u8]> {
    let rest = &buffer[*position..];
    let end = rest.iter().position(|&b| b == b'\n')?;
    *position += end + 1;

    let line = &rest[..end];
    Some(line.strip_suffix(b"\r").unwrap_or(line))
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
