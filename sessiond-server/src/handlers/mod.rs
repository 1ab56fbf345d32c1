//! Request handlers for daemon connections
//!
//! The first line of a connection decides its role: `{"type":"attach"}`
//! turns it into a one-way event stream, anything else is a control
//! connection answering one [`ControlResponse`] per request.

mod attach;
mod control;

pub use control::binary_hash;

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use sessiond_protocol::{ControlResponse, InboundFrame, ServerCodec, PROTOCOL_VERSION};
use sessiond_utils::{Result, SessiondError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionOptions;
use crate::registry::SessionRegistry;

/// Shared state for every connection
pub struct HandlerContext {
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Cancelled when the daemon should stop accepting connections
    pub shutdown: CancellationToken,
}

/// Result of handling a control request
#[derive(Debug)]
pub enum HandlerResult {
    /// Reply and keep serving
    Response(ControlResponse),
    /// Reply, then shut the daemon down
    ResponseThenShutdown(ControlResponse),
}

impl HandlerResult {
    fn error(err: impl std::fmt::Display) -> Self {
        Self::Response(ControlResponse::error(err.to_string()))
    }

    pub fn response(&self) -> &ControlResponse {
        match self {
            Self::Response(resp) | Self::ResponseThenShutdown(resp) => resp,
        }
    }
}

impl From<Result<ControlResponse>> for HandlerResult {
    fn from(result: Result<ControlResponse>) -> Self {
        match result {
            Ok(resp) => Self::Response(resp),
            Err(e) => Self::error(e),
        }
    }
}

impl HandlerContext {
    pub fn new(registry: Arc<SessionRegistry>, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }

    pub fn options(&self) -> &SessionOptions {
        self.registry.options()
    }

    fn check_version(&self, client: u32) -> Result<()> {
        if self.options().check_protocol_version && client != PROTOCOL_VERSION {
            return Err(SessiondError::ProtocolMismatch {
                client,
                server: PROTOCOL_VERSION,
            });
        }
        Ok(())
    }

    /// Serve one accepted connection until the peer hangs up or the daemon
    /// shuts down
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(stream, ServerCodec::new());

        let first = tokio::select! {
            frame = framed.next() => frame,
            _ = self.shutdown.cancelled() => return,
        };
        let mut pending = match first {
            Some(Ok(InboundFrame::Attach(req))) => {
                self.handle_attach(&mut framed, req).await;
                return;
            }
            Some(Ok(frame)) => Some(frame),
            Some(Err(e)) => {
                debug!(error = %e, "connection read failed");
                return;
            }
            None => return,
        };

        loop {
            let frame = match pending.take() {
                Some(frame) => frame,
                None => {
                    let next = tokio::select! {
                        frame = framed.next() => frame,
                        _ = self.shutdown.cancelled() => return,
                    };
                    match next {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            debug!(error = %e, "control connection read failed");
                            return;
                        }
                        None => return,
                    }
                }
            };

            let result = match frame {
                InboundFrame::Control(req) => self.handle_control(req).await,
                InboundFrame::Attach(_) => HandlerResult::error(SessiondError::InvalidMessage(
                    "attach must be the first request on a connection".into(),
                )),
                InboundFrame::Malformed(msg) => HandlerResult::error(msg),
            };

            match result {
                HandlerResult::Response(resp) => {
                    if let Err(e) = framed.send(resp).await {
                        debug!(error = %e, "control response not written");
                        return;
                    }
                }
                HandlerResult::ResponseThenShutdown(resp) => {
                    if let Err(e) = framed.send(resp).await {
                        warn!(error = %e, "shutdown ack not written");
                    }
                    info!("shutdown acknowledged");
                    self.shutdown.cancel();
                    let registry = self.registry.clone();
                    tokio::spawn(async move { registry.close_all().await });
                    return;
                }
            }
        }
    }
}
