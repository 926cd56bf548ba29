//! Backend HTTP API.
//!
//! ```text
//! POST /session/init                      {video_url, pipeline_configuration} -> {session_id}
//! POST /session/{id}/initialize_pipeline  -> 200
//! POST /session/reset                     -> {message}
//! POST /upload_file                       multipart "video" -> {file_path}
//! ```
//!
//! Non-2xx bodies carry `{detail}`; when it is missing the per-operation
//! generic message is used instead.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{OverlayError, OverlayResult};
use crate::session::{LifecycleOutcome, LifecycleRequest, SessionId};
use crate::tools::ToolSettings;

pub const SESSION_INIT_FAILED: &str = "Session init failed";
pub const PIPELINE_INIT_FAILED: &str = "Pipeline init failed";
pub const SESSION_RESET_FAILED: &str = "Session reset failed";
pub const UPLOAD_FAILED: &str = "File upload failed";

/// Multipart field name the upload endpoint expects.
pub const UPLOAD_FIELD: &str = "video";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub tool_settings: ToolSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionInitRequest {
    pub video_url: String,
    pub pipeline_configuration: PipelineConfiguration,
}

impl SessionInitRequest {
    pub fn new(video_url: impl Into<String>, tool_settings: ToolSettings) -> Self {
        Self {
            video_url: video_url.into(),
            pipeline_configuration: PipelineConfiguration { tool_settings },
        }
    }
}

/// Session endpoints of the analysis backend.
pub trait SessionApi: Send + Sync {
    fn create_session(&self, request: &SessionInitRequest) -> OverlayResult<SessionId>;

    fn initialize_pipeline(&self, session: &SessionId) -> OverlayResult<()>;

    /// Returns the backend's acknowledgement message.
    fn reset_session(&self) -> OverlayResult<String>;

    /// Uploads a local video; returns the server-side path to use as the
    /// session's video url.
    fn upload_file(&self, path: &Path) -> OverlayResult<String>;
}

/// Runs one lifecycle request to completion against `api`.
pub fn execute(api: &dyn SessionApi, request: &LifecycleRequest) -> LifecycleOutcome {
    match request {
        LifecycleRequest::CreateSession { ticket, request } => LifecycleOutcome::SessionCreated {
            ticket: *ticket,
            result: api.create_session(request),
        },
        LifecycleRequest::InitializePipeline { ticket, session } => {
            LifecycleOutcome::PipelineInitialized {
                ticket: *ticket,
                result: api.initialize_pipeline(session),
            }
        }
        LifecycleRequest::ResetSession { .. } => LifecycleOutcome::SessionReset {
            result: api.reset_session(),
        },
    }
}

pub struct BackendClient {
    agent: ureq::Agent,
    api_base: Url,
}

impl BackendClient {
    pub fn new(api_base: Url, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent, api_base }
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.as_str().trim_end_matches('/'), path)
    }

    fn post_json(&self, path: &str, body: Option<&Value>, generic: &str) -> OverlayResult<Value> {
        let url = self.endpoint(path);
        log::debug!("POST {}", url);
        let request = self
            .agent
            .post(&url)
            .set("Content-Type", "application/json");
        let result = match body {
            Some(body) => request.send_string(&body.to_string()),
            None => request.send_string("{}"),
        };
        read_json(result, generic)
    }
}

impl SessionApi for BackendClient {
    fn create_session(&self, request: &SessionInitRequest) -> OverlayResult<SessionId> {
        let body = serde_json::to_value(request)
            .map_err(|e| OverlayError::config(format!("encode session request: {}", e)))?;
        let response = self.post_json("session/init", Some(&body), SESSION_INIT_FAILED)?;
        match response.get("session_id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(SessionId::new(id.as_str())),
            Some(Value::Number(id)) => Ok(SessionId::new(id.to_string())),
            _ => Err(OverlayError::backend(SESSION_INIT_FAILED)),
        }
    }

    fn initialize_pipeline(&self, session: &SessionId) -> OverlayResult<()> {
        let path = format!("session/{}/initialize_pipeline", session);
        self.post_json(&path, None, PIPELINE_INIT_FAILED)?;
        Ok(())
    }

    fn reset_session(&self) -> OverlayResult<String> {
        let response = self.post_json("session/reset", None, SESSION_RESET_FAILED)?;
        Ok(response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("session reset")
            .to_string())
    }

    fn upload_file(&self, path: &Path) -> OverlayResult<String> {
        let bytes = std::fs::read(path)
            .map_err(|e| OverlayError::config(format!("read {}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.bin");
        let boundary = multipart_boundary();
        let body = multipart_body(&boundary, UPLOAD_FIELD, filename, &bytes);

        let url = self.endpoint("upload_file");
        log::debug!("POST {} ({} bytes)", url, bytes.len());
        let result = self
            .agent
            .post(&url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body);
        let response = read_json(result, UPLOAD_FAILED)?;
        response
            .get("file_path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| OverlayError::backend(UPLOAD_FAILED))
    }
}

fn read_json(
    result: Result<ureq::Response, ureq::Error>,
    generic: &str,
) -> OverlayResult<Value> {
    match result {
        Ok(response) => {
            let text = response
                .into_string()
                .map_err(|e| OverlayError::backend(format!("{}: {}", generic, e)))?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
        }
        Err(ureq::Error::Status(code, response)) => {
            let body = response.into_string().unwrap_or_default();
            let message = error_detail(&body).unwrap_or_else(|| generic.to_string());
            log::warn!("backend returned {}: {}", code, message);
            Err(OverlayError::backend(message))
        }
        Err(ureq::Error::Transport(transport)) => {
            log::warn!("backend unreachable: {}", transport);
            Err(OverlayError::backend(format!("{}: {}", generic, transport)))
        }
    }
}

/// `detail` field of an error body, when the body is JSON and has one.
pub fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) if !detail.trim().is_empty() => Some(detail.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("----overlay-{:x}", nanos)
}

fn multipart_body(boundary: &str, field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field,
            filename.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
