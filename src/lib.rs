//! Annotation Overlay
//!
//! Client core for live video analysis: renders per-frame metadata (object
//! boxes, pose skeletons, captions) from an analysis backend in sync with
//! the backend's video feed.
//!
//! # Module Structure
//!
//! - `session`: session lifecycle state machine (`SessionController`)
//! - `backend`: HTTP session API (`SessionApi`, `BackendClient`)
//! - `geometry`: source-pixel to on-screen mapping with letterbox correction
//! - `render`: `AnnotationRenderer` over a `DrawSurface`
//! - `stream`: media feed + metadata channel coordination
//! - `app`: single-threaded event loop tying the above together
//! - `config`, `event_log`, `error`: ambient configuration, operator log and
//!   error taxonomy

pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod event_log;
pub mod geometry;
pub mod metadata;
pub mod render;
pub mod session;
pub mod skeleton;
pub mod stream;
pub mod surface;
pub mod tools;

pub use app::{OverlayApp, OverlayEvent, UserAction};
pub use backend::{BackendClient, SessionApi, SessionInitRequest};
pub use config::OverlayConfig;
pub use error::{OverlayError, OverlayResult};
pub use event_log::{ControlState, EventLog, PendingWork, StatusIndicator};
pub use geometry::{DisplayMapping, GeometryMapper, Viewport};
pub use metadata::{DetectionBox, Keypoint, MetadataFrame, Pose};
pub use render::AnnotationRenderer;
pub use session::{
    LifecycleOutcome, LifecycleRequest, SessionController, SessionId, SessionPolicy,
    SessionState, StreamControl, Transition,
};
pub use stream::{FeedConnector, NetworkConnector, StreamCoordinator, StreamNotice};
pub use surface::{DrawSurface, Primitive, RasterSurface, SceneSurface};
pub use tools::{Tool, ToolConfigBuilder, ToolMode, ToolSettings};
