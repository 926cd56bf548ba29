//! Single-threaded overlay event loop.
//!
//! All overlay state lives here and is only touched from the thread that
//! calls [`OverlayApp::run_with`] / [`OverlayApp::handle`]. Backend round
//! trips and channel readers run on helper threads that post
//! [`OverlayEvent`]s back through an mpsc channel.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use kurbo::{Point, Size};

use crate::backend::{self, SessionApi};
use crate::config::OverlayConfig;
use crate::error::{OverlayError, OverlayResult};
use crate::event_log::{ControlState, EventLog, LogSource, PendingWork, StatusIndicator};
use crate::geometry::{GeometryMapper, Viewport};
use crate::render::AnnotationRenderer;
use crate::session::{
    LifecycleOutcome, LifecycleRequest, SessionController, SessionPolicy, SessionState,
    Transition,
};
use crate::stream::{FeedConnector, StreamCoordinator, StreamEnvelope, StreamNotice};
use crate::surface::DrawSurface;
use crate::tools::{Tool, ToolConfigBuilder};

#[derive(Clone, Debug, PartialEq)]
pub enum UserAction {
    SetVideoUrl(String),
    Upload(PathBuf),
    SetTool(Tool, bool),
    SetVocabulary(String),
    SetConfidence(f64),
    InitSession,
    StartStream,
    Reset,
}

#[derive(Debug)]
pub enum OverlayEvent {
    Stream(StreamEnvelope),
    Lifecycle(LifecycleOutcome),
    Uploaded(OverlayResult<String>),
    PointerMoved(Option<Point>),
    Resized(Size),
    User(UserAction),
    Shutdown,
}

pub struct OverlayApp<S: DrawSurface, C: FeedConnector> {
    api: Arc<dyn SessionApi>,
    tx: Sender<OverlayEvent>,
    rx: Receiver<OverlayEvent>,
    controller: SessionController,
    stream: StreamCoordinator<S, C>,
    tools: ToolConfigBuilder,
    video_url: String,
    log: EventLog,
    transitions: Rc<RefCell<Vec<Transition>>>,
    upload_pending: bool,
    resets_in_flight: usize,
    stream_failed: bool,
    error_latched: bool,
    shut_down: bool,
}

impl<S: DrawSurface, C: FeedConnector> OverlayApp<S, C> {
    pub fn new(
        config: &OverlayConfig,
        api: Arc<dyn SessionApi>,
        connector: C,
        surface: S,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let stream_tx = tx.clone();
        let deliver = Arc::new(move |envelope: StreamEnvelope| {
            stream_tx.send(OverlayEvent::Stream(envelope)).is_ok()
        });
        let container = surface.size();
        let viewport = Viewport::new(
            GeometryMapper::with_fallback(config.fallback_native),
            container,
        );
        let stream = StreamCoordinator::new(
            connector,
            config.endpoints()?,
            deliver,
            AnnotationRenderer::new(surface),
            viewport,
        );

        let mut controller = SessionController::new(SessionPolicy {
            require_tool: config.require_tool,
            tool_mode: config.tool_mode,
        });
        let transitions = Rc::new(RefCell::new(Vec::new()));
        let sink = transitions.clone();
        controller.subscribe(move |t: &Transition| sink.borrow_mut().push(t.clone()));

        Ok(Self {
            api,
            tx,
            rx,
            controller,
            stream,
            tools: ToolConfigBuilder::new(
                config.tool_mode,
                config.detection_key,
                config.tools.clone(),
            ),
            video_url: String::new(),
            log: EventLog::new(config.event_log_capacity),
            transitions,
            upload_pending: false,
            resets_in_flight: 0,
            stream_failed: false,
            error_latched: false,
            shut_down: false,
        })
    }

    /// Handle for posting events from other threads (signal handlers, UI).
    pub fn sender(&self) -> Sender<OverlayEvent> {
        self.tx.clone()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn stream(&self) -> &StreamCoordinator<S, C> {
        &self.stream
    }

    pub fn tools(&self) -> &ToolConfigBuilder {
        &self.tools
    }

    pub fn video_url(&self) -> &str {
        &self.video_url
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn status(&self) -> StatusIndicator {
        if self.error_latched {
            return StatusIndicator::Error;
        }
        match self.controller.state() {
            SessionState::Streaming if self.stream.is_media_ready() => StatusIndicator::Live,
            state => StatusIndicator::for_state(state),
        }
    }

    pub fn controls(&self) -> ControlState {
        ControlState::derive(self.controller.state(), self.pending(), self.stream_failed)
    }

    fn pending(&self) -> PendingWork {
        PendingWork {
            upload: self.upload_pending,
            reset: self.resets_in_flight > 0,
        }
    }

    /// Processes events until `done` holds, the app shuts down, or
    /// `timeout` elapses. Returns whether `done` was reached.
    pub fn run_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(self) {
                return true;
            }
            if self.shut_down {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.rx.recv_timeout(remaining) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => return done(self),
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Blocking loop. `after_event` runs after every event; returning false
    /// stops the loop.
    pub fn run_with(&mut self, mut after_event: impl FnMut(&mut Self) -> bool) {
        while !self.shut_down {
            let Ok(event) = self.rx.recv() else {
                break;
            };
            self.handle(event);
            if !after_event(self) {
                break;
            }
        }
    }

    pub fn handle(&mut self, event: OverlayEvent) {
        match event {
            OverlayEvent::Stream(envelope) => self.on_stream(envelope),
            OverlayEvent::Lifecycle(outcome) => {
                if let LifecycleOutcome::SessionReset { .. } = outcome {
                    self.resets_in_flight = self.resets_in_flight.saturating_sub(1);
                }
                if let Some(next) = self.controller.handle_outcome(outcome) {
                    self.dispatch(next);
                }
                self.drain_transitions();
            }
            OverlayEvent::Uploaded(result) => {
                self.upload_pending = false;
                match result {
                    Ok(path) => {
                        self.log
                            .info(LogSource::System, format!("Uploaded video to {}", path));
                        self.video_url = path;
                    }
                    Err(err) => self.report(err),
                }
            }
            OverlayEvent::PointerMoved(pointer) => self.stream.pointer_moved(pointer),
            OverlayEvent::Resized(container) => self.stream.resize(container),
            OverlayEvent::User(action) => {
                if let Err(err) = self.perform(action) {
                    self.report(err);
                }
                self.drain_transitions();
            }
            OverlayEvent::Shutdown => self.shutdown(),
        }
    }

    fn perform(&mut self, action: UserAction) -> OverlayResult<()> {
        match action {
            UserAction::SetVideoUrl(url) => {
                self.video_url = url.trim().to_string();
            }
            UserAction::SetTool(tool, on) => {
                for off in self.tools.set_enabled(tool, on) {
                    self.log
                        .info(LogSource::Ui, format!("{} disabled", off.name()));
                }
            }
            UserAction::SetVocabulary(raw) => self.tools.set_vocabulary(raw),
            UserAction::SetConfidence(conf) => {
                if !(0.0..=1.0).contains(&conf) {
                    return Err(OverlayError::validation(format!(
                        "confidence must be within [0, 1], got {}",
                        conf
                    )));
                }
                self.tools.set_confidence(conf);
            }
            UserAction::Upload(path) => {
                if self.upload_pending {
                    return Err(OverlayError::conflict("an upload is already in progress"));
                }
                if self.pending().reset {
                    return Err(OverlayError::conflict("wait for the session reset to finish"));
                }
                if self.controller.state() != SessionState::Idle {
                    return Err(OverlayError::InvalidState {
                        action: "upload",
                        state: self.controller.state().to_string(),
                    });
                }
                self.error_latched = false;
                self.upload(path)?;
            }
            UserAction::InitSession => {
                if self.upload_pending {
                    return Err(OverlayError::conflict("wait for the upload to finish"));
                }
                if self.pending().reset {
                    return Err(OverlayError::conflict("wait for the session reset to finish"));
                }
                let settings = self.tools.build()?;
                let request = self.controller.begin_session(&self.video_url, settings)?;
                self.error_latched = false;
                self.stream_failed = false;
                self.log.info(
                    LogSource::System,
                    format!("Initializing session for {}", self.video_url),
                );
                self.dispatch(request);
            }
            UserAction::StartStream => {
                self.controller.start_streaming(&mut self.stream)?;
                self.error_latched = false;
                self.stream_failed = false;
                self.log.info(LogSource::System, "Stream started");
            }
            UserAction::Reset => self.reset(),
        }
        Ok(())
    }

    fn reset(&mut self) {
        let request = self.controller.reset(&mut self.stream);
        self.error_latched = false;
        self.stream_failed = false;
        self.log.info(LogSource::System, "Session reset");
        if let Some(request) = request {
            self.dispatch(request);
        }
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        if let Some(request) = self.controller.reset(&mut self.stream) {
            // The process is about to exit; a detached worker would be lost.
            let outcome = backend::execute(self.api.as_ref(), &request);
            self.controller.handle_outcome(outcome);
        }
        self.drain_transitions();
        self.log.info(LogSource::System, "Shut down");
        self.shut_down = true;
    }

    fn on_stream(&mut self, envelope: StreamEnvelope) {
        let Some(notice) = self.stream.handle(envelope) else {
            return;
        };
        match notice {
            StreamNotice::MediaReady { width, height } => {
                self.log.info(
                    LogSource::System,
                    format!("Media ready ({}x{})", width, height),
                );
            }
            StreamNotice::MediaError(err) => self.stream_lost(err),
            StreamNotice::ChannelOpen => self.log.info(LogSource::Ws, "Connected"),
            StreamNotice::ChannelMessage { .. } => {}
            StreamNotice::ChannelError(err) => self.log.warn(LogSource::Ws, err.to_string()),
            StreamNotice::ChannelClosed => {
                self.log.info(LogSource::Ws, "Disconnected");
                self.stream_lost(OverlayError::transport("metadata channel closed"));
            }
        }
    }

    /// Either channel dropped. The session survives; the user may retry the
    /// stream without creating a new one.
    fn stream_lost(&mut self, err: OverlayError) {
        if self.controller.state() != SessionState::Streaming {
            return;
        }
        self.stream_failed = true;
        self.controller.on_stream_lost(err.clone());
        self.report(err);
        self.drain_transitions();
    }

    fn dispatch(&mut self, request: LifecycleRequest) {
        if let LifecycleRequest::ResetSession { .. } = request {
            self.resets_in_flight += 1;
        }
        let api = self.api.clone();
        let tx = self.tx.clone();
        let name = match &request {
            LifecycleRequest::CreateSession { .. } => "session-init",
            LifecycleRequest::InitializePipeline { .. } => "pipeline-init",
            LifecycleRequest::ResetSession { .. } => "session-reset",
        };
        let worker_request = request.clone();
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let outcome = backend::execute(api.as_ref(), &worker_request);
                let _ = tx.send(OverlayEvent::Lifecycle(outcome));
            });
        if let Err(err) = spawned {
            log::error!("failed to spawn {} worker: {}", name, err);
            let failure = OverlayError::transport(format!("spawn {} worker: {}", name, err));
            let outcome = match request {
                LifecycleRequest::CreateSession { ticket, .. } => {
                    LifecycleOutcome::SessionCreated {
                        ticket,
                        result: Err(failure),
                    }
                }
                LifecycleRequest::InitializePipeline { ticket, .. } => {
                    LifecycleOutcome::PipelineInitialized {
                        ticket,
                        result: Err(failure),
                    }
                }
                LifecycleRequest::ResetSession { .. } => LifecycleOutcome::SessionReset {
                    result: Err(failure),
                },
            };
            let _ = self.tx.send(OverlayEvent::Lifecycle(outcome));
        }
    }

    fn upload(&mut self, path: PathBuf) -> OverlayResult<()> {
        let api = self.api.clone();
        let tx = self.tx.clone();
        self.log
            .info(LogSource::System, format!("Uploading {}", path.display()));
        std::thread::Builder::new()
            .name("upload".to_string())
            .spawn(move || {
                let result = api.upload_file(&path);
                let _ = tx.send(OverlayEvent::Uploaded(result));
            })
            .map_err(|e| OverlayError::transport(format!("spawn upload worker: {}", e)))?;
        self.upload_pending = true;
        Ok(())
    }

    fn report(&mut self, err: OverlayError) {
        self.error_latched = true;
        if err.is_user_correctable() {
            self.log.warn(LogSource::Ui, err.to_string());
        } else {
            self.log.error(err.to_string());
        }
    }

    fn drain_transitions(&mut self) {
        let transitions: Vec<Transition> = self.transitions.borrow_mut().drain(..).collect();
        for transition in transitions {
            match (transition.to, transition.error) {
                (SessionState::Error, Some(err)) => self.report(err),
                (SessionState::PipelineLoading, _) => {
                    if let Some(session) = &transition.session {
                        self.log.info(
                            LogSource::System,
                            format!("Session {} created; loading pipeline", session),
                        );
                    }
                }
                (SessionState::Ready, None) if transition.from == SessionState::PipelineLoading => {
                    self.log.info(LogSource::System, "Pipeline ready");
                }
                _ => {}
            }
        }
    }
}
