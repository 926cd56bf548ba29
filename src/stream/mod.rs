//! Dual-channel stream coordination.
//!
//! A session streams over two independent, unordered channels: a continuous
//! MJPEG media feed and a discrete metadata channel. Helper threads owned by
//! a [`FeedConnector`] read the channels and post [`StreamEnvelope`]s; the
//! coordinator consumes them on the event-loop thread.
//!
//! Every envelope carries the generation of the `start` call that produced
//! it. `stop` bumps the generation, so events from a torn-down stream are
//! dropped instead of reaching the renderer.

pub mod connector;
pub mod mjpeg;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use kurbo::{Point, Size};
use url::Url;

use crate::error::{OverlayError, OverlayResult};
use crate::geometry::Viewport;
use crate::metadata::MetadataFrame;
use crate::render::AnnotationRenderer;
use crate::session::{SessionId, StreamControl};
use crate::surface::DrawSurface;

pub use connector::{FeedConnector, NetworkConnector};
pub use mjpeg::{decode_jpeg, DecodedFrame, MjpegReader};

/// Raw event from a channel reader.
#[derive(Debug)]
pub enum StreamEvent {
    MediaFrame(DecodedFrame),
    MediaError(String),
    ChannelOpen,
    ChannelMessage(String),
    ChannelError(String),
    ChannelClosed,
}

#[derive(Debug)]
pub struct StreamEnvelope {
    pub generation: u64,
    pub event: StreamEvent,
}

pub type Deliver = dyn Fn(StreamEnvelope) -> bool + Send + Sync;

/// Posts stream events for one generation back to the event loop.
#[derive(Clone)]
pub struct EventSink {
    generation: u64,
    deliver: Arc<Deliver>,
}

impl EventSink {
    pub fn new(generation: u64, deliver: Arc<Deliver>) -> Self {
        Self {
            generation,
            deliver,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the event loop is gone.
    pub fn emit(&self, event: StreamEvent) -> bool {
        (self.deliver)(StreamEnvelope {
            generation: self.generation,
            event,
        })
    }
}

/// Handle on a channel reader thread.
#[derive(Debug)]
pub struct FeedHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn new(shutdown: Arc<AtomicBool>, join: Option<JoinHandle<()>>) -> Self {
        Self { shutdown, join }
    }

    /// Handle without a backing thread.
    pub fn detached() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)), None)
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Signals the reader to exit. Does not wait: a reader blocked on the
    /// network finishes on its own and its late events are discarded by
    /// generation.
    pub fn close(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.is_finished() {
                let _ = join.join();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Endpoint layout of the backend.
#[derive(Clone, Debug)]
pub struct StreamEndpoints {
    pub api_base: Url,
    pub ws_base: Url,
    pub ws_path: String,
}

impl StreamEndpoints {
    pub fn media_url(&self, session: &SessionId) -> String {
        format!("{}/stream/{}", trim_base(&self.api_base), session)
    }

    pub fn channel_url(&self, session: &SessionId) -> String {
        format!(
            "{}/{}/{}",
            trim_base(&self.ws_base),
            self.ws_path.trim_matches('/'),
            session
        )
    }
}

fn trim_base(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}

/// Lifecycle notices reported to the layer above.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotice {
    /// First frame decoded; the overlay surface is now live.
    MediaReady { width: u32, height: u32 },
    MediaError(OverlayError),
    ChannelOpen,
    /// A metadata message was rendered.
    ChannelMessage { boxes: usize, poses: usize },
    ChannelError(OverlayError),
    ChannelClosed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames: u64,
    pub messages: u64,
    pub rejected_messages: u64,
    pub stale_events: u64,
}

struct ActiveStream {
    session: SessionId,
    media: Option<FeedHandle>,
    channel: Option<FeedHandle>,
    media_ready: bool,
}

pub struct StreamCoordinator<S: DrawSurface, C: FeedConnector> {
    connector: C,
    endpoints: StreamEndpoints,
    deliver: Arc<Deliver>,
    renderer: AnnotationRenderer<S>,
    viewport: Viewport,
    pointer: Option<Point>,
    generation: u64,
    active: Option<ActiveStream>,
    stats: StreamStats,
}

impl<S: DrawSurface, C: FeedConnector> StreamCoordinator<S, C> {
    pub fn new(
        connector: C,
        endpoints: StreamEndpoints,
        deliver: Arc<Deliver>,
        renderer: AnnotationRenderer<S>,
        viewport: Viewport,
    ) -> Self {
        Self {
            connector,
            endpoints,
            deliver,
            renderer,
            viewport,
            pointer: None,
            generation: 0,
            active: None,
            stats: StreamStats::default(),
        }
    }

    pub fn renderer(&self) -> &AnnotationRenderer<S> {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut AnnotationRenderer<S> {
        &mut self.renderer
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn is_media_ready(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.media_ready)
    }

    /// Opens both channels for `session`. An already-running stream is torn
    /// down first, which is how a failed feed is retried.
    pub fn start(&mut self, session: &SessionId) -> OverlayResult<()> {
        self.stop();
        self.generation += 1;
        let sink = EventSink::new(self.generation, self.deliver.clone());

        let media_url = self.endpoints.media_url(session);
        let media = self.connector.open_media(&media_url, sink.clone())?;
        let channel_url = self.endpoints.channel_url(session);
        let channel = match self.connector.open_channel(&channel_url, sink) {
            Ok(channel) => channel,
            Err(err) => {
                media.close();
                return Err(err);
            }
        };

        log::info!(
            "stream started for session {} (generation {})",
            session,
            self.generation
        );
        self.active = Some(ActiveStream {
            session: session.clone(),
            media: Some(media),
            channel: Some(channel),
            media_ready: false,
        });
        Ok(())
    }

    /// Releases both channels. Safe to call with no active stream.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        if let Some(media) = active.media {
            media.close();
        }
        if let Some(channel) = active.channel {
            channel.close();
        }
        self.generation += 1;
        self.viewport.clear_native();
        log::info!("stream stopped for session {}", active.session);
    }

    /// Records the latest pointer position; positions off the surface count
    /// as unknown.
    pub fn pointer_moved(&mut self, pointer: Option<Point>) {
        self.pointer = pointer.filter(|p| self.viewport.contains(*p));
    }

    /// Applies a container resize to the viewport and the existing surface.
    pub fn resize(&mut self, container: Size) {
        self.viewport.resize(container);
        self.renderer.resize(container);
    }

    pub fn handle(&mut self, envelope: StreamEnvelope) -> Option<StreamNotice> {
        if envelope.generation != self.generation || self.active.is_none() {
            self.stats.stale_events += 1;
            log::debug!(
                "dropping stream event from generation {} (current {})",
                envelope.generation,
                self.generation
            );
            return None;
        }

        match envelope.event {
            StreamEvent::MediaFrame(frame) => self.on_media_frame(frame),
            StreamEvent::MediaError(message) => {
                if let Some(active) = self.active.as_mut() {
                    if let Some(media) = active.media.take() {
                        media.close();
                    }
                    active.media_ready = false;
                }
                Some(StreamNotice::MediaError(OverlayError::transport(message)))
            }
            StreamEvent::ChannelOpen => Some(StreamNotice::ChannelOpen),
            StreamEvent::ChannelMessage(text) => self.on_channel_message(&text),
            StreamEvent::ChannelError(message) => {
                Some(StreamNotice::ChannelError(OverlayError::transport(message)))
            }
            StreamEvent::ChannelClosed => {
                if let Some(channel) = self.active.as_mut().and_then(|a| a.channel.take()) {
                    channel.close();
                }
                Some(StreamNotice::ChannelClosed)
            }
        }
    }

    fn on_media_frame(&mut self, frame: DecodedFrame) -> Option<StreamNotice> {
        self.stats.frames += 1;
        let (width, height) = (frame.width, frame.height);
        self.viewport
            .set_native(Size::new(width as f64, height as f64));
        let display = self.viewport.display_box();
        self.renderer.surface_mut().set_backdrop(frame.image, display);

        let active = self.active.as_mut()?;
        if active.media_ready {
            return None;
        }
        active.media_ready = true;
        if self.renderer.activate() {
            self.renderer.resize(self.viewport.container());
        }
        Some(StreamNotice::MediaReady { width, height })
    }

    fn on_channel_message(&mut self, text: &str) -> Option<StreamNotice> {
        let frame = match MetadataFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.stats.rejected_messages += 1;
                log::warn!("metadata message rejected: {}", err);
                return Some(StreamNotice::ChannelError(err));
            }
        };
        self.stats.messages += 1;
        let mapping = self.viewport.mapping();
        self.renderer.draw_metadata(&frame, &mapping, self.pointer);
        Some(StreamNotice::ChannelMessage {
            boxes: frame.boxes.as_ref().map_or(0, Vec::len),
            poses: frame.poses.as_ref().map_or(0, Vec::len),
        })
    }
}

impl<S: DrawSurface, C: FeedConnector> StreamControl for StreamCoordinator<S, C> {
    fn start(&mut self, session: &SessionId) -> OverlayResult<()> {
        StreamCoordinator::start(self, session)
    }

    fn stop(&mut self) {
        StreamCoordinator::stop(self)
    }
}
