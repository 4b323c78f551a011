//! Minimal HTTP/1.1 exchange over a fresh TCP connection.
//!
//! Every call opens its own socket, sends `Connection: close`, writes the
//! request and reads until the peer hangs up. There is no keep-alive, no
//! chunked decoding, no redirects and no TLS. Deadlines belong to the caller.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ComfyError, Result};

const CRLF: &str = "\r\n";

/// Request payload. Text is sent as its UTF-8 bytes; binary is sent as-is.
#[derive(Debug, Clone)]
pub enum Body {
    Text(String),
    Binary(Vec<u8>),
}

impl Body {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Text(s) => s.as_bytes(),
            Body::Binary(b) => b,
        }
    }
}

/// A single HTTP request to be sent by [`HttpTransport::exchange`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: &'static str,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    /// When false (the default) any status outside 200..300 becomes [`ComfyError::Http`].
    pub allow_errors: bool,
}

impl HttpRequest {
    pub fn new(method: &'static str, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            allow_errors: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    /// Add a caller header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a textual body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Body::Text(body.into()));
        self
    }

    /// Attach a binary body, sent verbatim.
    pub fn binary(mut self, body: Vec<u8>) -> Self {
        self.body = Some(Body::Binary(body));
        self
    }

    /// Treat non-2xx responses as data instead of errors.
    pub fn allow_errors(mut self) -> Self {
        self.allow_errors = true;
        self
    }

    /// Render the request line and headers, including the blank line terminator.
    pub(crate) fn encode_head(&self, host_header: &str) -> String {
        let mut head = format!("{} {} HTTP/1.1{CRLF}", self.method, self.path);
        head.push_str(&format!("Host: {host_header}{CRLF}"));
        head.push_str(&format!("Connection: close{CRLF}"));
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}{CRLF}"));
        }
        if let Some(body) = &self.body {
            head.push_str(&format!("Content-Length: {}{CRLF}", body.as_bytes().len()));
        }
        head.push_str(CRLF);
        head
    }
}

/// Status code and raw body of a completed exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Connection parameters for a ComfyUI server. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    host: String,
    port: u16,
}

impl HttpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` as used in the `Host` header and error messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send one request on a new connection and read the whole response.
    pub async fn exchange(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let addr = self.address();
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| ComfyError::Connection {
                addr: addr.clone(),
                source: e,
            })?;

        let head = request.encode_head(&addr);
        let write_err = |e: std::io::Error| {
            ComfyError::io(format!("Failed to send {} {}", request.method, request.path), e)
        };
        stream.write_all(head.as_bytes()).await.map_err(write_err)?;
        if let Some(body) = &request.body {
            stream.write_all(body.as_bytes()).await.map_err(write_err)?;
        }
        stream.flush().await.map_err(write_err)?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.map_err(|e| {
            ComfyError::io(format!("Failed to read response for {}", request.path), e)
        })?;

        let response = parse_response(&raw)?;
        tracing::debug!(
            method = request.method,
            path = %request.path,
            status = response.status,
            bytes = response.body.len(),
            "HTTP exchange complete"
        );

        if !request.allow_errors && !response.is_success() {
            return Err(ComfyError::Http {
                status: response.status,
                path: request.path.clone(),
                body: response.text(),
            });
        }
        Ok(response)
    }
}

/// Split a raw response on the first blank line and read the status code.
///
/// A status line that does not look like `HTTP/x.y NNN` yields status 0.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ComfyError::Protocol("Malformed HTTP response.".into()))?;

    let head = String::from_utf8_lossy(&raw[..split]);
    let status_line = head.split(CRLF).next().unwrap_or("");
    Ok(HttpResponse {
        status: parse_status(status_line),
        body: raw[split + 4..].to_vec(),
    })
}

fn parse_status(status_line: &str) -> u16 {
    let Some(rest) = status_line.strip_prefix("HTTP/") else {
        return 0;
    };
    let mut parts = rest.split_whitespace();
    let version = parts.next().unwrap_or("").as_bytes();
    let version_ok = version.len() == 3
        && version[0].is_ascii_digit()
        && version[1] == b'.'
        && version[2].is_ascii_digit();
    if !version_ok {
        return 0;
    }
    parts
        .next()
        .map(|code| {
            code.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_head_with_body() {
        let req = HttpRequest::post("/prompt")
            .header("Content-Type", "application/json")
            .text("{\"a\":\"é\"}");
        let head = req.encode_head("127.0.0.1:8188");
        assert_eq!(
            head,
            "POST /prompt HTTP/1.1\r\n\
             Host: 127.0.0.1:8188\r\n\
             Connection: close\r\n\
             Content-Type: application/json\r\n\
             Content-Length: 10\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_head_without_body() {
        let head = HttpRequest::get("/history/abc").encode_head("localhost:8188");
        assert!(!head.contains("Content-Length"));
        assert!(head.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_parse_response_splits_on_first_blank_line() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n\r\n\x89PNG\r\n\r\nrest";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"\x89PNG\r\n\r\nrest");
    }

    #[test]
    fn test_parse_response_malformed() {
        let err = parse_response(b"HTTP/1.1 200 OK\r\nno terminator").unwrap_err();
        assert!(matches!(err, ComfyError::Protocol(_)));
    }

    #[test]
    fn test_parse_status_variants() {
        assert_eq!(parse_status("HTTP/1.1 404 Not Found"), 404);
        assert_eq!(parse_status("HTTP/1.0   204"), 204);
        assert_eq!(parse_status("garbage"), 0);
        assert_eq!(parse_status("HTTP/2 200"), 0);
    }

    #[test]
    fn test_body_bytes() {
        assert_eq!(Body::Text("hé".into()).as_bytes(), "hé".as_bytes());
        assert_eq!(Body::Binary(vec![0, 255]).as_bytes(), &[0, 255]);
    }
}
