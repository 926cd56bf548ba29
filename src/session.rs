//! Session lifecycle state machine.
//!
//! ```text
//! Idle --begin--> Creating --created--> PipelineLoading --initialized--> Ready
//! Ready --start--> Streaming --media lost--> Ready
//! {Creating, PipelineLoading} --failure--> Error --> Idle
//! any --reset--> Idle
//! ```
//!
//! The controller performs no I/O. Transitions that need the backend return
//! a [`LifecycleRequest`]; the caller runs it and feeds the result back with
//! the request's ticket. `reset` invalidates the outstanding ticket, so a
//! completion that arrives after it is discarded.

use std::fmt;

use crate::backend::SessionInitRequest;
use crate::error::{OverlayError, OverlayResult};
use crate::tools::{ToolMode, ToolSettings};

/// Backend-issued session identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Creating,
    PipelineLoading,
    Ready,
    Streaming,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Creating => "creating",
            SessionState::PipelineLoading => "pipeline_loading",
            SessionState::Ready => "ready",
            SessionState::Streaming => "streaming",
            SessionState::Error => "error",
        }
    }

    /// A backend round trip is outstanding.
    pub fn is_in_flight(self) -> bool {
        matches!(self, SessionState::Creating | SessionState::PipelineLoading)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start and stop of the media and metadata channels for a session.
pub trait StreamControl {
    fn start(&mut self, session: &SessionId) -> OverlayResult<()>;

    /// Must be a no-op when nothing is streaming.
    fn stop(&mut self);
}

pub type Ticket = u64;

/// Backend work the caller must run on the controller's behalf.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleRequest {
    CreateSession {
        ticket: Ticket,
        request: SessionInitRequest,
    },
    InitializePipeline {
        ticket: Ticket,
        session: SessionId,
    },
    /// Best-effort; the local teardown has already happened.
    ResetSession { session: Option<SessionId> },
}

impl LifecycleRequest {
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            LifecycleRequest::CreateSession { ticket, .. }
            | LifecycleRequest::InitializePipeline { ticket, .. } => Some(*ticket),
            LifecycleRequest::ResetSession { .. } => None,
        }
    }
}

/// Result of a [`LifecycleRequest`].
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleOutcome {
    SessionCreated {
        ticket: Ticket,
        result: OverlayResult<SessionId>,
    },
    PipelineInitialized {
        ticket: Ticket,
        result: OverlayResult<()>,
    },
    SessionReset { result: OverlayResult<String> },
}

/// One observed state change.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub session: Option<SessionId>,
    pub error: Option<OverlayError>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Reject `begin_session` when no tool is enabled.
    pub require_tool: bool,
    pub tool_mode: ToolMode,
}

type Observer = Box<dyn FnMut(&Transition)>;

pub struct SessionController {
    policy: SessionPolicy,
    state: SessionState,
    session: Option<SessionId>,
    pending: Option<Ticket>,
    next_ticket: Ticket,
    streaming: bool,
    settings: Option<ToolSettings>,
    last_error: Option<OverlayError>,
    observers: Vec<Observer>,
}

impl SessionController {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            state: SessionState::Idle,
            session: None,
            pending: None,
            next_ticket: 1,
            streaming: false,
            settings: None,
            last_error: None,
            observers: Vec::new(),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Tool settings of the current or in-flight session.
    pub fn settings(&self) -> Option<&ToolSettings> {
        self.settings.as_ref()
    }

    pub fn last_error(&self) -> Option<&OverlayError> {
        self.last_error.as_ref()
    }

    pub fn pending_ticket(&self) -> Option<Ticket> {
        self.pending
    }

    /// Observers run synchronously after each transition, in the order they
    /// were registered.
    pub fn subscribe(&mut self, observer: impl FnMut(&Transition) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Validates locally and asks for a backend session. Nothing here talks
    /// to the network, so a rejected call has no remote effect.
    pub fn begin_session(
        &mut self,
        video_url: &str,
        settings: ToolSettings,
    ) -> OverlayResult<LifecycleRequest> {
        if self.state != SessionState::Idle {
            return Err(OverlayError::conflict(format!(
                "a session is already {}",
                self.state
            )));
        }
        let video_url = video_url.trim();
        if video_url.is_empty() {
            return Err(OverlayError::config("video url is required"));
        }
        if settings.is_empty() {
            if self.policy.require_tool {
                return Err(OverlayError::config("at least one tool must be enabled"));
            }
            log::warn!("no tool enabled; session will stream without analysis");
        }
        settings.validate()?;
        settings.validate_mode(self.policy.tool_mode)?;

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending = Some(ticket);
        self.last_error = None;
        self.settings = Some(settings.clone());
        self.transition(SessionState::Creating, None);
        Ok(LifecycleRequest::CreateSession {
            ticket,
            request: SessionInitRequest::new(video_url, settings),
        })
    }

    /// Feeds back any outcome; returns the follow-up request, if any.
    pub fn handle_outcome(&mut self, outcome: LifecycleOutcome) -> Option<LifecycleRequest> {
        match outcome {
            LifecycleOutcome::SessionCreated { ticket, result } => {
                self.on_session_created(ticket, result)
            }
            LifecycleOutcome::PipelineInitialized { ticket, result } => {
                self.on_pipeline_initialized(ticket, result);
                None
            }
            LifecycleOutcome::SessionReset { result } => {
                match result {
                    Ok(message) => log::info!("backend reset acknowledged: {}", message),
                    Err(err) => log::warn!("backend reset failed (ignored): {}", err),
                }
                None
            }
        }
    }

    pub fn on_session_created(
        &mut self,
        ticket: Ticket,
        result: OverlayResult<SessionId>,
    ) -> Option<LifecycleRequest> {
        if !self.is_current(ticket, SessionState::Creating) {
            log::debug!("discarding stale session-created result (ticket {})", ticket);
            // The backend holds a session nobody owns any more.
            return result
                .ok()
                .map(|session| LifecycleRequest::ResetSession {
                    session: Some(session),
                });
        }
        match result {
            Ok(session) => {
                self.session = Some(session.clone());
                self.transition(SessionState::PipelineLoading, None);
                Some(LifecycleRequest::InitializePipeline { ticket, session })
            }
            Err(err) => {
                self.fail(err);
                None
            }
        }
    }

    pub fn on_pipeline_initialized(&mut self, ticket: Ticket, result: OverlayResult<()>) {
        if !self.is_current(ticket, SessionState::PipelineLoading) {
            log::debug!("discarding stale pipeline result (ticket {})", ticket);
            return;
        }
        match result {
            Ok(()) => {
                self.pending = None;
                self.transition(SessionState::Ready, None);
            }
            Err(err) => self.fail(err),
        }
    }

    /// Opens the stream for the ready session. On failure the state stays
    /// `Ready` so the caller can retry.
    pub fn start_streaming(&mut self, stream: &mut dyn StreamControl) -> OverlayResult<()> {
        let session = match (self.state, self.session.clone()) {
            (SessionState::Ready, Some(session)) => session,
            (state, _) => {
                return Err(OverlayError::InvalidState {
                    action: "start streaming",
                    state: state.to_string(),
                })
            }
        };
        stream.start(&session)?;
        self.streaming = true;
        self.transition(SessionState::Streaming, None);
        Ok(())
    }

    /// The media feed dropped; the session itself is still usable.
    pub fn on_stream_lost(&mut self, err: OverlayError) {
        if self.state == SessionState::Streaming {
            self.last_error = Some(err.clone());
            self.transition(SessionState::Ready, Some(err));
        }
    }

    /// Tears everything down locally and returns to `Idle`. Legal in every
    /// state; calling it twice is the same as calling it once.
    pub fn reset(&mut self, stream: &mut dyn StreamControl) -> Option<LifecycleRequest> {
        if let Some(ticket) = self.pending.take() {
            log::debug!("abandoning lifecycle ticket {}", ticket);
        }
        if self.streaming {
            stream.stop();
            self.streaming = false;
        }
        let session = self.session.take();
        self.settings = None;
        if self.state != SessionState::Idle {
            self.transition(SessionState::Idle, None);
        }
        session.map(|session| LifecycleRequest::ResetSession {
            session: Some(session),
        })
    }

    fn is_current(&self, ticket: Ticket, expected: SessionState) -> bool {
        self.pending == Some(ticket) && self.state == expected
    }

    fn fail(&mut self, err: OverlayError) {
        log::warn!("session {} failed: {}", self.state, err);
        self.pending = None;
        self.session = None;
        self.settings = None;
        self.last_error = Some(err.clone());
        self.transition(SessionState::Error, Some(err));
        self.transition(SessionState::Idle, None);
    }

    fn transition(&mut self, to: SessionState, error: Option<OverlayError>) {
        let from = self.state;
        self.state = to;
        log::info!("session state {} -> {}", from, to);
        let event = Transition {
            from,
            to,
            session: self.session.clone(),
            error,
        };
        for observer in self.observers.iter_mut() {
            observer(&event);
        }
    }
}
