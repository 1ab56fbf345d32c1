//! Control client for the session daemon
//!
//! Every control call opens its own connection, writes one request line and
//! reads one response line. Attach connections stay open and yield
//! [`StreamMessage`]s until the daemon closes them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use sessiond_protocol::{
    new_stream_id, AckRequest, AttachRequest, BacklogRequest, BacklogResponse,
    BootstrapResponse, ClientCodec, CodecError, ControlRequest, ControlResponse, CreateRequest,
    CreateResponse, InfoResponse, ListResponse, Method, OwnerRequest, OwnerResponse,
    ResizeRequest, SendRequest, SessionInfo, SessionRequest, ShutdownRequest, SnapshotResponse,
    StreamMessage,
};
use sessiond_utils::{socket_path, Result, SessiondError};

/// Timeout for establishing a connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for server responses
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one daemon socket
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Client for the default socket location
    pub fn with_default_socket() -> Self {
        Self::new(socket_path())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn connect(&self) -> Result<UnixStream> {
        let path = &self.socket_path;
        if !path.exists() {
            return Err(SessiondError::ServerNotRunning { path: path.clone() });
        }

        match timeout(CONNECT_TIMEOUT, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(SessiondError::connection(format!(
                "Failed to connect to {}: {}",
                path.display(),
                e
            ))),
            Err(_) => Err(SessiondError::ConnectionTimeout {
                seconds: CONNECT_TIMEOUT.as_secs(),
            }),
        }
    }

    /// Send one request and wait for its response; `ok:false` becomes
    /// [`SessiondError::Remote`]
    pub async fn request(&self, req: ControlRequest) -> Result<ControlResponse> {
        let stream = self.connect().await?;
        let mut framed = Framed::new(stream, ClientCodec::<ControlResponse>::new());

        debug!(method = %req.method, "request");
        framed
            .send(req)
            .await
            .map_err(|e| SessiondError::connection(format!("Failed to send: {}", e)))?;

        let resp = match timeout(RESPONSE_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(resp))) => resp,
            Ok(Some(Err(e))) => return Err(recv_error(e)),
            Ok(None) => return Err(SessiondError::ConnectionClosed),
            Err(_) => {
                return Err(SessiondError::ConnectionTimeout {
                    seconds: RESPONSE_TIMEOUT.as_secs(),
                })
            }
        };

        if !resp.ok {
            return Err(SessiondError::Remote(resp.error_message()));
        }
        Ok(resp)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        params: &impl Serialize,
    ) -> Result<T> {
        let req = ControlRequest::new(method, params)
            .map_err(|e| SessiondError::InvalidMessage(e.to_string()))?;
        let resp = self.request(req).await?;
        resp.result()
            .map_err(|e| SessiondError::protocol(format!("bad {} result: {}", method, e)))
    }

    async fn call_unit(&self, method: Method, params: &impl Serialize) -> Result<()> {
        let req = ControlRequest::new(method, params)
            .map_err(|e| SessiondError::InvalidMessage(e.to_string()))?;
        self.request(req).await.map(|_| ())
    }

    /// Liveness check; older daemons without `ping` are probed with `list`
    pub async fn ping(&self) -> Result<()> {
        match self.request(ControlRequest::bare(Method::Ping)).await {
            Err(SessiondError::Remote(msg)) if msg.starts_with("unknown method") => {
                self.list().await.map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    pub async fn create(&self, session_id: &str, cwd: &str) -> Result<CreateResponse> {
        let params = CreateRequest {
            session_id: session_id.to_string(),
            cwd: cwd.to_string(),
        };
        self.call(Method::Create, &params).await
    }

    /// Write input; `owner` must match the lease holder when one is set
    pub async fn send(&self, session_id: &str, data: &str, owner: &str) -> Result<()> {
        let params = SendRequest {
            session_id: session_id.to_string(),
            data: data.to_string(),
            owner: owner.to_string(),
        };
        self.call_unit(Method::Send, &params).await
    }

    pub async fn resize(&self, session_id: &str, cols: u16, rows: u16) -> Result<()> {
        let params = ResizeRequest {
            session_id: session_id.to_string(),
            cols,
            rows,
        };
        self.call_unit(Method::Resize, &params).await
    }

    pub async fn stop(&self, session_id: &str) -> Result<()> {
        self.call_unit(Method::Stop, &session_request(session_id)).await
    }

    pub async fn backlog(&self, session_id: &str, since: i64) -> Result<BacklogResponse> {
        let params = BacklogRequest {
            session_id: session_id.to_string(),
            since,
        };
        self.call(Method::Backlog, &params).await
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SnapshotResponse> {
        self.call(Method::Snapshot, &session_request(session_id)).await
    }

    pub async fn bootstrap(&self, session_id: &str) -> Result<BootstrapResponse> {
        self.call(Method::Bootstrap, &session_request(session_id)).await
    }

    /// Return flow-control credit; non-positive byte counts are not sent
    pub async fn ack(&self, session_id: &str, stream_id: &str, bytes: i64) -> Result<()> {
        if bytes <= 0 {
            return Ok(());
        }
        let params = AckRequest {
            session_id: session_id.to_string(),
            stream_id: stream_id.to_string(),
            bytes,
        };
        self.call_unit(Method::Ack, &params).await
    }

    pub async fn list(&self) -> Result<Vec<SessionInfo>> {
        let resp: ListResponse = self.call(Method::List, &serde_json::Value::Null).await?;
        Ok(resp.sessions)
    }

    pub async fn info(&self) -> Result<InfoResponse> {
        self.call(Method::Info, &serde_json::Value::Null).await
    }

    /// Take, refresh or (with an empty owner) release the write lease
    pub async fn set_owner(&self, session_id: &str, owner: &str) -> Result<String> {
        let params = OwnerRequest {
            session_id: session_id.to_string(),
            owner: owner.to_string(),
        };
        let resp: OwnerResponse = self.call(Method::SetOwner, &params).await?;
        Ok(resp.owner)
    }

    pub async fn get_owner(&self, session_id: &str) -> Result<String> {
        let resp: OwnerResponse = self
            .call(Method::GetOwner, &session_request(session_id))
            .await?;
        Ok(resp.owner)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_reason("unknown", "").await
    }

    /// Ask the daemon to exit, identifying this process in its log
    pub async fn shutdown_with_reason(&self, source: &str, reason: &str) -> Result<()> {
        let executable = std::env::current_exe()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let params = ShutdownRequest {
            source: source.to_string(),
            reason: reason.to_string(),
            pid: std::process::id(),
            executable,
        };
        self.call_unit(Method::Shutdown, &params).await
    }

    /// Open a stream connection; an empty `stream_id` gets a generated one
    pub async fn attach(
        &self,
        session_id: &str,
        stream_id: &str,
        since: i64,
        with_buffer: bool,
    ) -> Result<Stream> {
        let stream_id = match stream_id.trim() {
            "" => new_stream_id(),
            id => id.to_string(),
        };

        let stream = self.connect().await?;
        let mut framed = Framed::new(stream, ClientCodec::<StreamMessage>::new());
        framed
            .send(AttachRequest::new(session_id, &stream_id, since, with_buffer))
            .await
            .map_err(|e| SessiondError::connection(format!("Failed to send attach: {}", e)))?;

        debug!(session_id, stream_id = %stream_id, "attached");
        Ok(Stream {
            id: stream_id,
            framed,
        })
    }
}

/// An open attach connection
pub struct Stream {
    id: String,
    framed: Framed<UnixStream, ClientCodec<StreamMessage>>,
}

impl Stream {
    /// Stream id the daemon uses for this connection's credit window
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next stream message, or `None` once the daemon hangs up
    pub async fn next(&mut self) -> Option<Result<StreamMessage>> {
        self.framed.next().await.map(|r| r.map_err(recv_error))
    }
}

fn session_request(session_id: &str) -> SessionRequest {
    SessionRequest {
        session_id: session_id.to_string(),
    }
}

fn recv_error(e: CodecError) -> SessiondError {
    match e {
        CodecError::Io(e) => SessiondError::connection(format!("Failed to receive: {}", e)),
        other => SessiondError::protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessiond_protocol::{InboundFrame, ServerCodec, StreamMessageType};
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    /// Serve each connection with `reply`, returning the request it saw
    fn mock_daemon<F>(dir: &TempDir, reply: F) -> (PathBuf, tokio::sync::mpsc::UnboundedReceiver<InboundFrame>)
    where
        F: Fn(&InboundFrame) -> ControlResponse + Send + 'static,
    {
        let path = dir.path().join("mock.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut framed = Framed::new(stream, ServerCodec::new());
                if let Some(Ok(frame)) = framed.next().await {
                    let resp = reply(&frame);
                    let _ = tx.send(frame);
                    let _ = framed.send(resp).await;
                }
            }
        });
        (path, rx)
    }

    fn method_of(frame: &InboundFrame) -> String {
        match frame {
            InboundFrame::Control(req) => req.method.clone(),
            other => panic!("expected control frame, got {:?}", other),
        }
    }

    // ==================== Connection Tests ====================

    #[tokio::test]
    async fn test_missing_socket_is_server_not_running() {
        let dir = TempDir::new().unwrap();
        let client = Client::new(dir.path().join("absent.sock"));
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, SessiondError::ServerNotRunning { .. }));
    }

    #[tokio::test]
    async fn test_remote_error_surfaces_message() {
        let dir = TempDir::new().unwrap();
        let (path, _rx) = mock_daemon(&dir, |_| ControlResponse::error("session not found"));
        let client = Client::new(path);

        let err = client.stop("ghost").await.unwrap_err();
        assert_eq!(err.to_string(), "session not found");
    }

    #[tokio::test]
    async fn test_ping_falls_back_to_list() {
        let dir = TempDir::new().unwrap();
        let (path, mut rx) = mock_daemon(&dir, |frame| match method_of(frame).as_str() {
            "ping" => ControlResponse::error("unknown method \"ping\""),
            _ => ControlResponse::with_result(&ListResponse::default()),
        });
        let client = Client::new(path);

        client.ping().await.unwrap();
        assert_eq!(method_of(&rx.recv().await.unwrap()), "ping");
        assert_eq!(method_of(&rx.recv().await.unwrap()), "list");
    }

    // ==================== Request Tests ====================

    #[tokio::test]
    async fn test_create_sends_params_and_decodes_result() {
        let dir = TempDir::new().unwrap();
        let (path, mut rx) = mock_daemon(&dir, |_| {
            ControlResponse::with_result(&CreateResponse {
                session_id: "ws".into(),
                existing: true,
            })
        });
        let client = Client::new(path);

        let created = client.create("ws", "/tmp").await.unwrap();
        assert!(created.existing);

        let InboundFrame::Control(req) = rx.recv().await.unwrap() else {
            panic!("expected control frame");
        };
        assert_eq!(req.method, "create");
        let params: CreateRequest = req.params().unwrap();
        assert_eq!(params.session_id, "ws");
        assert_eq!(params.cwd, "/tmp");
    }

    #[tokio::test]
    async fn test_ack_skips_non_positive() {
        let dir = TempDir::new().unwrap();
        let (path, mut rx) = mock_daemon(&dir, |_| ControlResponse::ok());
        let client = Client::new(path);

        client.ack("ws", "s1", 0).await.unwrap();
        client.ack("ws", "s1", -5).await.unwrap();
        client.ack("ws", "s1", 10).await.unwrap();

        let InboundFrame::Control(req) = rx.recv().await.unwrap() else {
            panic!("expected control frame");
        };
        let params: AckRequest = req.params().unwrap();
        assert_eq!(params.bytes, 10);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_identifies_caller() {
        let dir = TempDir::new().unwrap();
        let (path, mut rx) = mock_daemon(&dir, |_| ControlResponse::ok());
        let client = Client::new(path);

        client.shutdown_with_reason("ctl", "upgrade").await.unwrap();

        let InboundFrame::Control(req) = rx.recv().await.unwrap() else {
            panic!("expected control frame");
        };
        let params: ShutdownRequest = req.params().unwrap();
        assert_eq!(params.source, "ctl");
        assert_eq!(params.reason, "upgrade");
        assert_eq!(params.pid, std::process::id());
        assert!(!params.executable.is_empty());
    }

    #[tokio::test]
    async fn test_owner_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (path, _rx) = mock_daemon(&dir, |_| {
            ControlResponse::with_result(&OwnerResponse {
                session_id: "ws".into(),
                owner: "alice".into(),
            })
        });
        let client = Client::new(path);

        assert_eq!(client.set_owner("ws", "alice").await.unwrap(), "alice");
        assert_eq!(client.get_owner("ws").await.unwrap(), "alice");
    }

    // ==================== Attach Tests ====================

    #[tokio::test]
    async fn test_attach_generates_stream_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mock.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, ServerCodec::new());
            let Some(Ok(InboundFrame::Attach(req))) = framed.next().await else {
                panic!("expected attach frame");
            };
            framed
                .send(StreamMessage::closed(&req.session_id, &req.stream_id))
                .await
                .unwrap();
            req
        });

        let client = Client::new(&path);
        let mut stream = client.attach("ws", "  ", 7, false).await.unwrap();
        assert!(stream.id().starts_with("stream-"));

        let msg = stream.next().await.unwrap().unwrap();
        assert_eq!(msg.kind, StreamMessageType::Closed);
        assert_eq!(msg.stream_id, stream.id());

        let req = server.await.unwrap();
        assert_eq!(req.stream_id, stream.id());
        assert_eq!(req.since, 7);
        assert!(!req.with_buffer);
        assert!(stream.next().await.is_none());
    }
}
