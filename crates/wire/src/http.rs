//! Minimal HTTP/1.1 request parsing and response encoding.
//!
//! Only what the handshake traffic needs: a request line, headers, and
//! an optional `Content-Length` body. The parser tolerates partial
//! reads — it returns `Ok(None)` until the header terminator (and any
//! declared body) has fully arrived.

use std::collections::HashMap;

use crate::WireError;

/// A parsed HTTP request. Immutable once parsed.
///
/// Header names are lowercased at parse time so lookups are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    /// Tries to parse a complete request from the front of `buf`.
    ///
    /// Returns `Ok(Some((request, consumed)))` once the empty line
    /// terminating the headers — and the body, when `Content-Length`
    /// declares one — is present, `Ok(None)` while more bytes are
    /// needed, and [`WireError::Malformed`] for requests that can never
    /// become valid.
    pub fn parse(buf: &[u8]) -> Result<Option<(Request, usize)>, WireError> {
        let Some(head_len) = find_terminator(buf) else {
            return Ok(None);
        };

        let head = std::str::from_utf8(&buf[..head_len])
            .map_err(|_| WireError::Malformed("request head is not valid UTF-8".into()))?;

        let mut lines = head.split("\r\n");
        let request_line = lines
            .next()
            .ok_or_else(|| WireError::Malformed("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let (method, path, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v)) if parts.next().is_none() => (m, p, v),
            _ => {
                return Err(WireError::Malformed(format!(
                    "invalid request line: {request_line:?}"
                )));
            }
        };
        if !version.starts_with("HTTP/1.") {
            return Err(WireError::Malformed(format!(
                "unsupported HTTP version: {version}"
            )));
        }

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| WireError::Malformed(format!("invalid header line: {line:?}")))?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let body_len = match headers.get("content-length") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| WireError::Malformed(format!("invalid Content-Length: {v:?}")))?,
            None => 0,
        };

        let body_start = head_len + 4;
        let total = body_start + body_len;
        if buf.len() < total {
            return Ok(None);
        }

        Ok(Some((
            Request {
                method: method.to_string(),
                path: path.to_string(),
                headers,
                body: buf[body_start..total].to_vec(),
            },
            total,
        )))
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Byte offset of the `\r\n\r\n` header terminator, if present.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// An HTTP response: status line, headers, body. Written once then
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code and reason phrase, e.g. `"200 OK"`.
    pub status: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body.into();
        self
    }

    /// Serializes the response.
    ///
    /// `Content-Length` is set from the body length, except on
    /// `101 Switching Protocols` — a switching response has no body and
    /// some clients reject the header there.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(b"HTTP/1.1 ");
        out.extend_from_slice(self.status.as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if !self.status.starts_with("101") {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}
