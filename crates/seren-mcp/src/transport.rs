//! Transport layer for tool-server communication.
//!
//! Local servers run as child processes speaking Content-Length framed
//! JSON-RPC over stdio. Remote servers take each request as an HTTP POST.

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Endpoint URL of the server.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries for requests that fail to send.
    pub retries: u32,
    /// Extra headers, e.g. authentication.
    pub headers: Vec<(String, String)>,
}

impl HttpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(30),
            retries: 3,
            headers: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Transport for one tool-server connection.
pub enum Transport {
    /// Child process reached over stdin/stdout.
    Stdio {
        child: Child,
        stdin: BufWriter<ChildStdin>,
        stdout: BufReader<ChildStdout>,
    },
    /// Remote server reached over HTTP POST.
    Http {
        client: reqwest::blocking::Client,
        config: HttpConfig,
    },
}

impl Transport {
    /// Spawn a child process and wire up its pipes.
    pub fn spawn_stdio(command: &str, args: &[String], env: &[(String, String)]) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;

        Ok(Self::Stdio {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    /// Build an HTTP transport for the given endpoint.
    pub fn connect_http(config: HttpConfig) -> Result<Self> {
        url::Url::parse(&config.url)
            .map_err(|e| McpError::transport(format!("invalid URL: {e}")))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(
            url = %config.url,
            timeout_secs = config.timeout.as_secs(),
            "created HTTP transport"
        );

        Ok(Self::Http { client, config })
    }

    /// Send a request and wait for its response.
    pub fn send_request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        match self {
            Self::Stdio { .. } => {
                self.write_framed(&serde_json::to_string(request)?)?;
                self.read_framed()
            }
            Self::Http { client, config } => {
                let json = serde_json::to_string(request)?;
                let mut attempts_left = config.retries;
                loop {
                    let mut req = client
                        .post(&config.url)
                        .header("Content-Type", "application/json")
                        .body(json.clone());
                    for (key, value) in &config.headers {
                        req = req.header(key, value);
                    }

                    match req.send() {
                        Ok(resp) => {
                            if !resp.status().is_success() {
                                let status = resp.status();
                                let body = resp.text().unwrap_or_default();
                                return Err(McpError::transport(format!(
                                    "HTTP error {status}: {body}"
                                )));
                            }
                            let body = resp.text().map_err(|e| {
                                McpError::transport(format!("failed to read response body: {e}"))
                            })?;
                            return Ok(serde_json::from_str(&body)?);
                        }
                        Err(e) if attempts_left > 0 => {
                            attempts_left -= 1;
                            tracing::warn!(
                                error = %e,
                                retries_remaining = attempts_left,
                                "HTTP request failed, retrying"
                            );
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        Err(e) => {
                            return Err(McpError::transport(format!("HTTP request failed: {e}")));
                        }
                    }
                }
            }
        }
    }

    /// Send a notification. No response is read.
    pub fn send_notification(&mut self, notification: &JsonRpcNotification) -> Result<()> {
        match self {
            Self::Stdio { .. } => self.write_framed(&serde_json::to_string(notification)?),
            Self::Http { client, config } => {
                let json = serde_json::to_string(notification)?;
                let mut req = client
                    .post(&config.url)
                    .header("Content-Type", "application/json")
                    .body(json);
                for (key, value) in &config.headers {
                    req = req.header(key, value);
                }
                let _ = req.send();
                Ok(())
            }
        }
    }

    /// Write a Content-Length framed message to the child's stdin.
    fn write_framed(&mut self, json: &str) -> Result<()> {
        let Self::Stdio { stdin, .. } = self else {
            return Err(McpError::protocol("framed write on HTTP transport"));
        };

        write!(stdin, "Content-Length: {}\r\n\r\n", json.len())?;
        stdin.write_all(json.as_bytes())?;
        stdin.flush()?;

        tracing::trace!(content_length = json.len(), "sent framed message");
        Ok(())
    }

    /// Read one Content-Length framed response from the child's stdout.
    fn read_framed(&mut self) -> Result<JsonRpcResponse> {
        let Self::Stdio { stdout, .. } = self else {
            return Err(McpError::protocol("framed read on HTTP transport"));
        };

        let mut content_length: Option<usize> = None;
        let mut line = String::new();

        loop {
            line.clear();
            if stdout.read_line(&mut line)? == 0 {
                return Err(McpError::ConnectionClosed);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                // End of headers
                break;
            }
            if let Some(len) = trimmed.strip_prefix("Content-Length:") {
                content_length = Some(len.trim().parse().map_err(|e| {
                    McpError::protocol(format!("invalid Content-Length: {e}"))
                })?);
            }
        }

        let content_length =
            content_length.ok_or_else(|| McpError::protocol("missing Content-Length header"))?;

        let mut body = vec![0u8; content_length];
        stdout.read_exact(&mut body)?;

        let json = String::from_utf8(body)
            .map_err(|e| McpError::protocol(format!("invalid UTF-8 in response: {e}")))?;

        tracing::trace!(content_length, "received framed message");
        Ok(serde_json::from_str(&json)?)
    }

    /// Tear the connection down. Kills the child for stdio transports.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Self::Stdio { child, .. } = self {
            let _ = child.kill();
            let _ = child.wait();
        }
        Ok(())
    }

    /// Whether the peer is still reachable.
    pub fn is_connected(&mut self) -> bool {
        match self {
            Self::Stdio { child, .. } => matches!(child.try_wait(), Ok(None)),
            // HTTP is stateless
            Self::Http { .. } => true,
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
