use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use annotation_overlay::backend::{execute, SessionApi, SessionInitRequest};
use annotation_overlay::tools::{DetectionSettings, Trigger};
use annotation_overlay::{
    LifecycleOutcome, LifecycleRequest, OverlayError, OverlayResult, SessionController,
    SessionId, SessionPolicy, SessionState, StreamControl, Tool, ToolConfigBuilder, ToolMode,
    ToolSettings,
};

/// Counts calls; every call succeeds.
#[derive(Default)]
struct CountingApi {
    calls: AtomicUsize,
}

impl CountingApi {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SessionApi for CountingApi {
    fn create_session(&self, _request: &SessionInitRequest) -> OverlayResult<SessionId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SessionId::new("session-1"))
    }

    fn initialize_pipeline(&self, _session: &SessionId) -> OverlayResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset_session(&self) -> OverlayResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Session reset".to_string())
    }

    fn upload_file(&self, _path: &Path) -> OverlayResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("/tmp/video.mp4".to_string())
    }
}

#[derive(Default)]
struct RecordingStream {
    starts: usize,
    stops: usize,
}

impl StreamControl for RecordingStream {
    fn start(&mut self, _session: &SessionId) -> OverlayResult<()> {
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.stops += 1;
    }
}

/// Runs requests synchronously until the controller has nothing left to ask.
fn drive(controller: &mut SessionController, api: &CountingApi, first: LifecycleRequest) {
    let mut next = Some(first);
    while let Some(request) = next.take() {
        let outcome = execute(api, &request);
        next = controller.handle_outcome(outcome);
    }
}

fn detection_with(vocabulary: Vec<&str>) -> ToolSettings {
    ToolSettings {
        ov_detection: Some(DetectionSettings {
            vocabulary: vocabulary.into_iter().map(String::from).collect(),
            imgsz: Some(416),
            conf_threshold: 0.25,
            trigger: Trigger::Stride { value: 3 },
        }),
        ..ToolSettings::default()
    }
}

#[test]
fn no_tools_yields_empty_settings_and_session_proceeds() {
    let builder = ToolConfigBuilder::new(
        ToolMode::Exclusive,
        Default::default(),
        Default::default(),
    );
    let settings = builder.build().unwrap();
    assert!(settings.is_empty());
    assert_eq!(serde_json::to_value(&settings).unwrap(), serde_json::json!({}));

    let api = CountingApi::default();
    let mut controller = SessionController::new(SessionPolicy::default());
    let request = controller.begin_session("video.mp4", settings).unwrap();
    match &request {
        LifecycleRequest::CreateSession { request, .. } => {
            assert!(request.pipeline_configuration.tool_settings.is_empty());
        }
        other => panic!("unexpected request {:?}", other),
    }
    drive(&mut controller, &api, request);
    assert_eq!(controller.state(), SessionState::Ready);
    assert_eq!(api.calls(), 2);
}

#[test]
fn empty_vocabulary_fails_validation_without_network() {
    let api = CountingApi::default();
    let mut controller = SessionController::new(SessionPolicy::default());

    let err = controller
        .begin_session("video.mp4", detection_with(vec![]))
        .unwrap_err();
    assert!(matches!(err, OverlayError::Validation(_)));
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(api.calls(), 0);

    let mut builder = ToolConfigBuilder::new(
        ToolMode::Exclusive,
        Default::default(),
        Default::default(),
    );
    builder.set_enabled(Tool::Detection, true);
    builder.set_vocabulary(" , ,");
    assert!(matches!(builder.build(), Err(OverlayError::Validation(_))));
}

#[test]
fn second_begin_while_creating_conflicts() {
    let mut controller = SessionController::new(SessionPolicy::default());
    let first = controller
        .begin_session("video.mp4", detection_with(vec!["person"]))
        .unwrap();
    let ticket = first.ticket().unwrap();

    let err = controller
        .begin_session("other.mp4", detection_with(vec!["car"]))
        .unwrap_err();
    assert!(matches!(err, OverlayError::Conflict(_)));
    assert_eq!(controller.state(), SessionState::Creating);
    assert_eq!(controller.pending_ticket(), Some(ticket));

    let follow_up = controller.on_session_created(ticket, Ok(SessionId::new("session-1")));
    assert!(matches!(
        follow_up,
        Some(LifecycleRequest::InitializePipeline { .. })
    ));
    assert_eq!(controller.state(), SessionState::PipelineLoading);
}

#[test]
fn reset_from_streaming_stops_stream_once() {
    let api = CountingApi::default();
    let mut stream = RecordingStream::default();
    let mut controller = SessionController::new(SessionPolicy::default());

    let request = controller
        .begin_session("video.mp4", detection_with(vec!["person"]))
        .unwrap();
    drive(&mut controller, &api, request);
    controller.start_streaming(&mut stream).unwrap();
    assert_eq!(controller.state(), SessionState::Streaming);

    let reset = controller.reset(&mut stream);
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.session().is_none());
    assert_eq!(stream.stops, 1);
    assert_eq!(
        reset,
        Some(LifecycleRequest::ResetSession {
            session: Some(SessionId::new("session-1"))
        })
    );

    controller.reset(&mut stream);
    assert_eq!(stream.stops, 1);
}

#[test]
fn backend_failure_returns_to_idle_and_allows_retry() {
    let mut controller = SessionController::new(SessionPolicy::default());
    let request = controller
        .begin_session("video.mp4", detection_with(vec!["person"]))
        .unwrap();
    let follow_up = controller.handle_outcome(LifecycleOutcome::SessionCreated {
        ticket: request.ticket().unwrap(),
        result: Err(OverlayError::backend("Model not found")),
    });
    assert!(follow_up.is_none());
    assert_eq!(controller.state(), SessionState::Idle);
    assert!(controller.session().is_none());
    assert_eq!(
        controller.last_error().map(ToString::to_string).as_deref(),
        Some("backend error: Model not found")
    );

    let api = CountingApi::default();
    let retry = controller
        .begin_session("video.mp4", detection_with(vec!["person"]))
        .unwrap();
    drive(&mut controller, &api, retry);
    assert_eq!(controller.state(), SessionState::Ready);
}

#[test]
fn exclusive_mode_rejects_multi_tool_payload() {
    let mut settings = detection_with(vec!["person"]);
    settings.captioning = Some(annotation_overlay::tools::CaptioningSettings {
        imgsz: Some(480),
        trigger: Trigger::SceneChange { threshold: 0.2 },
    });

    let mut exclusive = SessionController::new(SessionPolicy::default());
    assert!(matches!(
        exclusive.begin_session("video.mp4", settings.clone()),
        Err(OverlayError::Config(_))
    ));

    let mut multi = SessionController::new(SessionPolicy {
        require_tool: false,
        tool_mode: ToolMode::Multi,
    });
    assert!(multi.begin_session("video.mp4", settings).is_ok());
}

#[test]
fn late_pipeline_result_after_reset_is_ignored() {
    let mut stream = RecordingStream::default();
    let mut controller = SessionController::new(SessionPolicy::default());
    let request = controller
        .begin_session("video.mp4", detection_with(vec!["person"]))
        .unwrap();
    let ticket = request.ticket().unwrap();
    controller.on_session_created(ticket, Ok(SessionId::new("session-1")));
    controller.reset(&mut stream);

    controller.on_pipeline_initialized(ticket, Ok(()));
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(stream.stops, 0);
}
