//! One-shot loopback listener for the OAuth redirect.
//!
//! Binds `127.0.0.1` on an ephemeral port, answers requests until one
//! carries `code` (or `error`), then closes. The listener is consumed by
//! [`LoopbackListener::wait_for_code`] so it is released exactly once.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::debug;

const SUCCESS_PAGE: &str = "You can close this tab now. <script>window.close()</script>";
const MISSING_CODE: &str = "No `code` found in the URL.";

/// How long a connection may take to send its request line and headers
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Failed to start callback listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Callback listener failed: {0}")]
    Io(#[from] std::io::Error),

    /// The provider redirected with `error=...`
    #[error("Authorization failed: {0}")]
    Denied(String),

    #[error("Timed out after {0}s waiting for the browser callback")]
    Timeout(u64),
}

/// What a single redirect request carried
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code(String),
    Error(String),
    Missing,
}

fn parse_callback(target: &str) -> Callback {
    let url = match Url::parse(&format!("http://127.0.0.1{}", target)) {
        Ok(url) => url,
        Err(_) => return Callback::Missing,
    };

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Callback::Error(error),
        (Some(code), None) => Callback::Code(code),
        (None, None) => Callback::Missing,
    }
}

/// Local HTTP listener waiting for the consent redirect
pub struct LoopbackListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl LoopbackListener {
    /// Bind `127.0.0.1` on an ephemeral port
    pub async fn bind() -> Result<Self, CallbackError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(CallbackError::Bind)?;
        let addr = listener.local_addr().map_err(CallbackError::Bind)?;
        debug!(%addr, "Callback listener bound");
        Ok(Self { listener, addr })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    /// Wait for the redirect carrying `code`. `None` waits forever.
    pub async fn wait_for_code(self, timeout: Option<Duration>) -> Result<String, CallbackError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.accept_code())
                .await
                .map_err(|_| CallbackError::Timeout(limit.as_secs()))?,
            None => self.accept_code().await,
        }
    }

    /// Reads run concurrently so an idle connection (browser preconnect)
    /// cannot hold up the redirect arriving on another one.
    async fn accept_code(&self) -> Result<String, CallbackError> {
        let mut reads = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (mut stream, peer) = accepted?;
                    reads.spawn(async move {
                        let target =
                            tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream))
                                .await;
                        (stream, peer, target)
                    });
                }
                Some(joined) = reads.join_next(), if !reads.is_empty() => {
                    let (mut stream, peer, target) = match joined {
                        Ok(read) => read,
                        Err(e) => {
                            debug!(error = %e, "Callback read task failed");
                            continue;
                        }
                    };
                    let target = match target {
                        Ok(Ok(target)) => target,
                        Ok(Err(e)) => {
                            debug!(%peer, error = %e, "Ignoring unreadable callback request");
                            continue;
                        }
                        Err(_) => {
                            debug!(%peer, "Dropping idle callback connection");
                            continue;
                        }
                    };

                    match parse_callback(&target) {
                        Callback::Code(code) => {
                            respond(&mut stream, 200, "OK", SUCCESS_PAGE).await?;
                            return Ok(code);
                        }
                        Callback::Error(error) => {
                            respond(&mut stream, 400, "Bad Request", &error).await?;
                            return Err(CallbackError::Denied(error));
                        }
                        Callback::Missing => {
                            debug!(%target, "Callback request without code");
                            if let Err(e) = respond(&mut stream, 400, "Bad Request", MISSING_CODE).await {
                                debug!(%peer, error = %e, "Failed to answer callback request");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Read the request line and headers, returning the request target
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    loop {
        let mut header = String::new();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header.trim().is_empty() {
            break;
        }
    }

    request_line
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed request line"))
}

async fn respond(stream: &mut TcpStream, status: u16, reason: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}
