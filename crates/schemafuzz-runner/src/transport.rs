//! Case execution over HTTP

use std::collections::BTreeMap;
use std::error::Error as _;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderName, HeaderValue};
use schemafuzz_core::case::Case;
use schemafuzz_core::outcome::{ErrorCause, ErrorKind, Response};

/// Executes one case. Implementations never retry.
pub trait Transport: Send + Sync {
    /// Send the request described by `case` and wait for the full response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response was received.
    fn execute(&self, case: &Case) -> Result<Response, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Invalid request: {0}")]
    Request(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Request(_) => ErrorKind::InvalidRequest,
            Self::Other(_) => ErrorKind::Transport,
        }
    }

    #[must_use]
    pub fn to_cause(&self) -> ErrorCause {
        ErrorCause::new(self.kind(), self.to_string())
    }
}

/// `reqwest` error with its source chain, e.g. "error sending request: connection refused".
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Blocking HTTP transport with a hard per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    basic_auth: Option<(String, String)>,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`TransportError::Other`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("HTTP client: {}", describe(&e))))?;
        Ok(Self {
            client,
            timeout,
            basic_auth: None,
        })
    }

    /// Attach basic credentials to every request.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }

    fn classify(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if err.is_connect() {
            TransportError::Connect(describe(err))
        } else if err.is_builder() {
            TransportError::Request(describe(err))
        } else {
            TransportError::Other(describe(err))
        }
    }
}

impl Transport for HttpTransport {
    fn execute(&self, case: &Case) -> Result<Response, TransportError> {
        let method = reqwest::Method::from_bytes(case.method.as_bytes())
            .map_err(|_| TransportError::Request(format!("invalid HTTP method '{}'", case.method)))?;

        let mut req = self.client.request(method, case.url());
        for (name, value) in case.header_pairs() {
            // Values that are invalid in HTTP (\0, \r\n) never reach the server
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) else {
                continue;
            };
            req = req.header(name, value);
        }
        let query = case.query_pairs();
        if !query.is_empty() {
            req = req.query(&query);
        }
        if let Some(body) = &case.body {
            req = req.json(body);
        }
        if let Some((username, password)) = &self.basic_auth {
            req = req.basic_auth(username, Some(password));
        }

        let start = Instant::now();
        let resp = req.send().map_err(|e| self.classify(&e))?;
        let status_code = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let text = resp.text().map_err(|e| self.classify(&e))?;
        let elapsed = start.elapsed();

        Ok(Response {
            status_code,
            headers,
            body: (!text.is_empty()).then_some(text),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(TransportError::Connect("refused".into()).kind(), ErrorKind::Connection);
        assert_eq!(TransportError::Timeout { timeout_ms: 5 }.kind(), ErrorKind::Timeout);
        let cause = TransportError::Timeout { timeout_ms: 5000 }.to_cause();
        assert_eq!(cause.to_string(), "timeout: Request timed out after 5000ms");
    }

    #[test]
    fn invalid_method_is_request_error() {
        let transport = HttpTransport::new(Duration::from_secs(1)).unwrap();
        let case = Case::new("GE T", "/", "http://127.0.0.1:9");
        let err = transport.execute(&case).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn closed_port_is_connection_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        let case = Case::new("GET", "/", format!("http://127.0.0.1:{port}"));
        let err = transport.execute(&case).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection, "{err}");
    }
}
