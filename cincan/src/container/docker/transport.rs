//! Docker Engine API transport.
//!
//! hyper HTTP/1.1 client connections over the daemon Unix socket, one
//! connection per request. The engine is synchronous, so calls are driven on
//! a private tokio runtime with `block_on`.

use bytes::{Buf, Bytes};
use cincan_shared::errors::{CincanError, CincanResult};
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, HeaderMap, HeaderName, HeaderValue, UPGRADE, USER_AGENT};
use hyper::{Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::runtime::Runtime;
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::container::AttachStream;

/// A request about to be sent.
pub struct ApiRequest {
    method: Method,
    path: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.push((name, HeaderValue::from_static(value)));
        self
    }

    pub fn json(self, body: Vec<u8>) -> Self {
        self.payload("application/json", body)
    }

    pub fn tar(self, body: Vec<u8>) -> Self {
        self.payload("application/x-tar", body)
    }

    fn payload(mut self, content_type: &'static str, body: Vec<u8>) -> Self {
        self.body = Bytes::from(body);
        self.header(CONTENT_TYPE, content_type)
    }

    fn into_hyper(self) -> CincanResult<hyper::Request<Full<Bytes>>> {
        let mut builder = hyper::Request::builder()
            .method(self.method)
            .uri(self.path.as_str())
            .header(HOST, "docker")
            .header(USER_AGENT, "cincan");
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(Full::new(self.body))
            .map_err(|e| CincanError::Internal(format!("Bad request {}: {}", self.path, e)))
    }
}

/// Status, headers and the whole body of a response.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Daemon error message from a JSON `{"message": ...}` body.
    pub fn error_message(&self) -> String {
        let message = serde_json::from_slice::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).trim().to_string());
        if message.is_empty() {
            format!("HTTP status {}", self.status)
        } else {
            message
        }
    }
}

/// Response whose body is read lazily.
pub enum Streamed {
    Body {
        headers: HeaderMap,
        reader: Box<dyn Read + Send>,
    },
    /// Non-2xx answer, body already collected.
    Failed(Reply),
}

#[derive(Clone, Debug)]
pub struct DaemonClient {
    socket_path: PathBuf,
    runtime: Arc<Runtime>,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> CincanResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("cincan-docker")
            .enable_all()
            .build()
            .map_err(|e| CincanError::Internal(format!("Failed to start the I/O runtime: {}", e)))?;
        Ok(Self {
            socket_path: socket_path.into(),
            runtime: Arc::new(runtime),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and collect the whole response.
    pub fn send(&self, request: ApiRequest) -> CincanResult<Reply> {
        self.runtime.block_on(self.exchange(request))
    }

    /// Like [`send`](Self::send), but `None` when no complete response
    /// arrived within `timeout`.
    pub fn send_timed(&self, request: ApiRequest, timeout: Duration) -> CincanResult<Option<Reply>> {
        self.runtime.block_on(async {
            match tokio::time::timeout(timeout, self.exchange(request)).await {
                Ok(reply) => reply.map(Some),
                Err(_) => Ok(None),
            }
        })
    }

    /// Send a request and hand the body back as a blocking reader.
    pub fn stream(&self, request: ApiRequest) -> CincanResult<Streamed> {
        let response = self.runtime.block_on(async {
            let response = self.round_trip(request, false).await?;
            if response.status().is_success() {
                Ok::<_, CincanError>(Ok(response))
            } else {
                collect(response).await.map(Err)
            }
        })?;
        let response = match response {
            Ok(response) => response,
            Err(reply) => return Ok(Streamed::Failed(reply)),
        };

        let (parts, body) = response.into_parts();
        let chunks = body.into_data_stream().map_err(io::Error::other);
        let reader = SyncIoBridge::new_with_handle(StreamReader::new(chunks), self.runtime.handle().clone());
        Ok(Streamed::Body {
            headers: parts.headers,
            reader: Box::new(reader),
        })
    }

    /// Send a connection upgrade request and take over the raw socket.
    pub fn upgrade(&self, request: ApiRequest) -> CincanResult<UpgradedStream> {
        let request = request.header(CONNECTION, "Upgrade").header(UPGRADE, "tcp");
        self.runtime.block_on(async {
            let response = self.round_trip(request, true).await?;
            if response.status() != StatusCode::SWITCHING_PROTOCOLS {
                let reply = collect(response).await?;
                return Err(CincanError::Container(format!("attach: {}", reply.error_message())));
            }
            let upgraded = hyper::upgrade::on(response)
                .await
                .map_err(|e| CincanError::Protocol(format!("Connection upgrade failed: {}", e)))?;
            let parts = upgraded
                .downcast::<TokioIo<UnixStream>>()
                .map_err(|_| CincanError::Protocol("Upgraded connection is not a Unix socket".to_string()))?;
            let stream = parts
                .io
                .into_inner()
                .into_std()
                .map_err(|e| CincanError::Protocol(format!("Failed to detach the attach socket: {}", e)))?;
            stream
                .set_nonblocking(false)
                .map_err(|e| CincanError::Protocol(format!("Failed to detach the attach socket: {}", e)))?;
            tracing::debug!("attach socket upgraded, {} bytes buffered", parts.read_buf.len());
            Ok(UpgradedStream::new(parts.read_buf, stream))
        })
    }

    async fn connect(&self, upgrades: bool) -> CincanResult<http1::SendRequest<Full<Bytes>>> {
        tracing::debug!("Connecting via Unix: {}", self.socket_path.display());
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            CincanError::Container(format!(
                "Couldn't connect to Docker at {}, is it running and can you access the socket? ({})",
                self.socket_path.display(),
                e
            ))
        })?;
        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| CincanError::Protocol(format!("HTTP handshake failed: {}", e)))?;
        if upgrades {
            tokio::spawn(async move {
                if let Err(e) = connection.with_upgrades().await {
                    tracing::debug!("daemon connection closed: {}", e);
                }
            });
        } else {
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!("daemon connection closed: {}", e);
                }
            });
        }
        Ok(sender)
    }

    async fn round_trip(&self, request: ApiRequest, upgrades: bool) -> CincanResult<Response<Incoming>> {
        let method = request.method.clone();
        let path = request.path.clone();
        let request = request.into_hyper()?;
        let mut sender = self.connect(upgrades).await?;
        sender
            .send_request(request)
            .await
            .map_err(|e| CincanError::Container(format!("{} {} failed: {}", method, path, e)))
    }

    async fn exchange(&self, request: ApiRequest) -> CincanResult<Reply> {
        let response = self.round_trip(request, false).await?;
        collect(response).await
    }
}

async fn collect(response: Response<Incoming>) -> CincanResult<Reply> {
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| CincanError::Container(format!("Failed to read response body: {}", e)))?
        .to_bytes();
    Ok(Reply {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

/// Raw attach socket after the HTTP upgrade.
///
/// Bytes hyper had already read past the response head are served first.
pub struct UpgradedStream {
    buffered: Bytes,
    stream: StdUnixStream,
}

impl UpgradedStream {
    pub fn new(buffered: Bytes, stream: StdUnixStream) -> Self {
        Self { buffered, stream }
    }
}

impl Read for UpgradedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffered.has_remaining() {
            let n = buf.len().min(self.buffered.remaining());
            self.buffered.copy_to_slice(&mut buf[..n]);
            return Ok(n);
        }
        self.stream.read(buf)
    }
}

impl Write for UpgradedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl AsFd for UpgradedStream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AttachStream for UpgradedStream {
    fn shutdown_write(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Write)
    }

    fn has_buffered(&self) -> bool {
        self.buffered.has_remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(status: u16, body: &'static [u8]) -> Reply {
        Reply {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_error_message() {
        let r = reply(404, br#"{"message":"No such container: abc"}"#);
        assert!(!r.is_success());
        assert_eq!(r.error_message(), "No such container: abc");

        assert_eq!(reply(500, b"  plain text\n").error_message(), "plain text");
        assert_eq!(
            reply(409, b"").error_message(),
            "HTTP status 409 Conflict"
        );
    }

    #[test]
    fn test_request_headers() {
        let request = ApiRequest::new(Method::PUT, "/containers/abc/archive?path=%2Fwork")
            .tar(vec![0u8; 4])
            .into_hyper()
            .unwrap();
        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.uri().path(), "/containers/abc/archive");
        assert_eq!(request.uri().query(), Some("path=%2Fwork"));
        assert_eq!(request.headers()[HOST], "docker");
        assert_eq!(request.headers()[CONTENT_TYPE], "application/x-tar");
    }

    #[test]
    fn test_upgraded_stream_serves_buffered_bytes_first() {
        let (local, mut peer) = StdUnixStream::pair().unwrap();
        let mut stream = UpgradedStream::new(Bytes::from_static(b"hello "), local);
        assert!(stream.has_buffered());

        peer.write_all(b"world").unwrap();
        drop(peer);

        let mut first = [0u8; 4];
        stream.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"hell");

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"o world");
        assert!(!stream.has_buffered());
    }

    #[test]
    fn test_upgraded_stream_half_close() {
        let (local, mut peer) = StdUnixStream::pair().unwrap();
        let mut stream = UpgradedStream::new(Bytes::new(), local);
        stream.write_all(b"input").unwrap();
        stream.shutdown_write().unwrap();

        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"input");
    }
}
