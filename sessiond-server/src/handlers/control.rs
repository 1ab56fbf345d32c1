//! Control method handlers
//!
//! Handles: ping, create, send, resize, stop, backlog, snapshot, bootstrap,
//! ack, list, info, shutdown, set_owner, get_owner

use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use sessiond_protocol::{
    AckRequest, BacklogRequest, ControlRequest, ControlResponse, CreateRequest, CreateResponse,
    InfoResponse, ListResponse, Method, OwnerRequest, OwnerResponse, ResizeRequest, SendRequest,
    SessionRequest, ShutdownRequest,
};
use sessiond_utils::{Result, SessiondError};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{HandlerContext, HandlerResult};
use crate::session::Session;

/// SHA-256 of a file as lowercase hex
pub fn binary_hash(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| SessiondError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| SessiondError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn decode_params<T: DeserializeOwned>(req: &ControlRequest) -> Result<T> {
    req.params().map_err(|e| SessiondError::InvalidMessage(e.to_string()))
}

impl HandlerContext {
    /// Route a control request to its handler
    pub async fn handle_control(&self, req: ControlRequest) -> HandlerResult {
        if let Err(e) = self.check_version(req.protocol_version) {
            return HandlerResult::error(e);
        }
        let method = match req.method.parse::<Method>() {
            Ok(method) => method,
            Err(unknown) => return HandlerResult::error(SessiondError::UnknownMethod(unknown)),
        };
        debug!(method = %method, "control request");

        match method {
            Method::Ping => HandlerResult::Response(ControlResponse::ok()),
            Method::Create => self.handle_create(&req).await.into(),
            Method::Send => self.handle_send(&req).into(),
            Method::Resize => self.handle_resize(&req).into(),
            Method::Stop => self.handle_stop(&req).await.into(),
            Method::Backlog => self.handle_backlog(&req).into(),
            Method::Snapshot => self.handle_snapshot(&req).into(),
            Method::Bootstrap => self.handle_bootstrap(&req).into(),
            Method::Ack => self.handle_ack(&req).into(),
            Method::List => self.handle_list(),
            Method::Info => self.handle_info().await.into(),
            Method::SetOwner => self.handle_set_owner(&req).into(),
            Method::GetOwner => self.handle_get_owner(&req).into(),
            Method::Shutdown => self.handle_shutdown(&req),
        }
    }

    fn session(&self, id: &str) -> Result<Arc<Session>> {
        self.registry
            .get(id)
            .ok_or_else(|| SessiondError::session_not_found(id))
    }

    async fn handle_create(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: CreateRequest = decode_params(req)?;
        let (session, existing) = self
            .registry
            .get_or_create(&params.session_id, &params.cwd)
            .await?;
        Ok(ControlResponse::with_result(&CreateResponse {
            session_id: session.id().to_string(),
            existing,
        }))
    }

    fn handle_send(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: SendRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        session.write_for_owner(params.data.as_bytes(), &params.owner)?;
        Ok(ControlResponse::ok())
    }

    fn handle_resize(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: ResizeRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        session.resize(params.cols, params.rows)?;
        Ok(ControlResponse::ok())
    }

    async fn handle_stop(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: SessionRequest = decode_params(req)?;
        self.registry.stop(&params.session_id).await;
        Ok(ControlResponse::ok())
    }

    fn handle_backlog(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: BacklogRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        Ok(ControlResponse::with_result(&session.backlog(params.since)?))
    }

    fn handle_snapshot(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: SessionRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        Ok(ControlResponse::with_result(&session.snapshot()))
    }

    fn handle_bootstrap(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: SessionRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        Ok(ControlResponse::with_result(&session.bootstrap()?))
    }

    fn handle_ack(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: AckRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        session.ack(&params.stream_id, params.bytes)?;
        Ok(ControlResponse::ok())
    }

    fn handle_list(&self) -> HandlerResult {
        let sessions = self.registry.list();
        HandlerResult::Response(ControlResponse::with_result(&ListResponse { sessions }))
    }

    async fn handle_info(&self) -> Result<ControlResponse> {
        let exe = std::env::current_exe()?;
        let hash_path = exe.clone();
        let hash = tokio::task::spawn_blocking(move || binary_hash(&hash_path))
            .await
            .map_err(|e| SessiondError::internal(format!("hash task failed: {}", e)))??;
        Ok(ControlResponse::with_result(&InfoResponse {
            executable: exe.display().to_string(),
            binary_hash: hash,
        }))
    }

    fn handle_set_owner(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: OwnerRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        let owner = session.set_owner(&params.owner);
        Ok(ControlResponse::with_result(&OwnerResponse {
            session_id: params.session_id,
            owner,
        }))
    }

    fn handle_get_owner(&self, req: &ControlRequest) -> Result<ControlResponse> {
        let params: OwnerRequest = decode_params(req)?;
        let session = self.session(&params.session_id)?;
        Ok(ControlResponse::with_result(&OwnerResponse {
            owner: session.owner(),
            session_id: params.session_id,
        }))
    }

    fn handle_shutdown(&self, req: &ControlRequest) -> HandlerResult {
        let params: ShutdownRequest = decode_params(req).unwrap_or_else(|e| {
            warn!(error = %e, "shutdown params not decoded");
            ShutdownRequest::default()
        });
        let source = non_empty_or_unknown(&params.source);
        let executable = non_empty_or_unknown(&params.executable);
        info!(
            source = %source,
            reason = %params.reason.trim(),
            pid = params.pid,
            executable = %executable,
            "shutdown requested"
        );
        HandlerResult::ResponseThenShutdown(ControlResponse::ok())
    }
}

fn non_empty_or_unknown(value: &str) -> &str {
    match value.trim() {
        "" => "unknown",
        trimmed => trimmed,
    }
}
