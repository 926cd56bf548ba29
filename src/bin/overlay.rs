//! overlay - live annotation overlay client
//!
//! This binary:
//! 1. Optionally uploads a local video to the analysis backend
//! 2. Creates a session with the selected tools and initializes its pipeline
//! 3. Streams the media feed and metadata channel, compositing annotations
//! 4. Writes annotated PNG snapshots on request
//! 5. Resets the backend session on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use kurbo::Size;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use annotation_overlay::{
    BackendClient, NetworkConnector, OverlayApp, OverlayConfig, OverlayEvent, RasterSurface,
    SessionState, StatusIndicator, Tool, ToolMode, UserAction,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Backend API base url (overrides config).
    #[arg(long, env = "OVERLAY_API_BASE")]
    api_base: Option<String>,
    /// Video url or server-side path to analyse.
    #[arg(long)]
    video: Option<String>,
    /// Local video file to upload first; its server path becomes the video.
    #[arg(long, conflicts_with = "video")]
    upload: Option<PathBuf>,
    /// Enable detection with this comma-separated vocabulary.
    #[arg(long, value_name = "CSV")]
    detect: Option<String>,
    /// Detection confidence threshold.
    #[arg(long)]
    confidence: Option<f64>,
    /// Enable scene-change captioning.
    #[arg(long)]
    caption: bool,
    /// Enable pose estimation.
    #[arg(long)]
    pose: bool,
    /// Allow several tools at once.
    #[arg(long)]
    multi: bool,
    /// Refuse to start a session without any tool.
    #[arg(long)]
    require_tool: bool,
    /// Display container size.
    #[arg(long, default_value = "1280x720", value_name = "WxH")]
    container: String,
    /// Write the composited overlay to this PNG while streaming.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Metadata messages between snapshots.
    #[arg(long, default_value_t = 30)]
    snapshot_every: u64,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(ui::UiMode::parse(&args.ui), std::io::stderr().is_terminal());

    let mut config = OverlayConfig::load()?;
    if let Some(api_base) = &args.api_base {
        config.api_base = url::Url::parse(api_base)
            .with_context(|| format!("--api-base is not a valid url: {}", api_base))?;
    }
    if args.multi {
        config.tool_mode = ToolMode::Multi;
    }
    config.require_tool |= args.require_tool;
    config.validate()?;

    let container = parse_container(&args.container)?;
    let api = Arc::new(BackendClient::new(
        config.api_base.clone(),
        config.request_timeout,
    ));
    let connector = NetworkConnector::new(config.request_timeout);
    let mut app = OverlayApp::new(&config, api, connector, RasterSurface::new(container))?;
    log::info!("backend {} ({:?} tool mode)", config.api_base, config.tool_mode);

    let tx = app.sender();
    ctrlc::set_handler(move || {
        let _ = tx.send(OverlayEvent::Shutdown);
    })
    .context("error setting Ctrl-C handler")?;

    let round_trip = config.request_timeout + Duration::from_secs(5);

    if let Some(path) = &args.upload {
        let mut stage = ui.stage("Upload video");
        app.handle(OverlayEvent::User(UserAction::Upload(path.clone())));
        let done = app.run_until(round_trip, |app| app.controls().upload);
        if !done || app.status() == StatusIndicator::Error || app.video_url().is_empty() {
            stage.fail();
            return Err(failure(&app, "upload failed"));
        }
    } else if let Some(video) = &args.video {
        app.handle(OverlayEvent::User(UserAction::SetVideoUrl(video.clone())));
    }

    if let Some(vocabulary) = &args.detect {
        app.handle(OverlayEvent::User(UserAction::SetTool(Tool::Detection, true)));
        app.handle(OverlayEvent::User(UserAction::SetVocabulary(vocabulary.clone())));
    }
    if let Some(confidence) = args.confidence {
        app.handle(OverlayEvent::User(UserAction::SetConfidence(confidence)));
    }
    if args.caption {
        app.handle(OverlayEvent::User(UserAction::SetTool(Tool::Captioning, true)));
    }
    if args.pose {
        app.handle(OverlayEvent::User(UserAction::SetTool(Tool::PoseEstimation, true)));
    }

    {
        let mut stage = ui.stage("Create session and load pipeline");
        app.handle(OverlayEvent::User(UserAction::InitSession));
        let ready = app.run_until(round_trip * 2, |app| {
            !app.controller().state().is_in_flight()
        });
        if !ready || app.controller().state() != SessionState::Ready {
            stage.fail();
            app.handle(OverlayEvent::Shutdown);
            return Err(failure(&app, "session did not become ready"));
        }
    }

    app.handle(OverlayEvent::User(UserAction::StartStream));
    if app.controller().state() != SessionState::Streaming {
        app.handle(OverlayEvent::Shutdown);
        return Err(failure(&app, "stream did not start"));
    }

    let mut status_line = ui.status_line();
    let mut next_snapshot = args.snapshot_every.max(1);
    let mut snapshot_error = None;
    app.run_with(|app| {
        let stats = app.stream().stats();
        status_line.update(app.status(), stats, app.stream().renderer().caption());
        if let Some(path) = &args.snapshot {
            if stats.messages >= next_snapshot {
                next_snapshot = stats.messages + args.snapshot_every.max(1);
                if let Err(err) = app.stream().renderer().surface().save_png(path) {
                    snapshot_error = Some(err);
                    return false;
                }
            }
        }
        app.controller().state() == SessionState::Streaming
    });
    status_line.finish();

    let stream_lost = !app.is_shut_down();
    if let Some(path) = &args.snapshot {
        if snapshot_error.is_none() && app.stream().renderer().is_active() {
            if let Err(err) = app.stream().renderer().surface().save_png(path) {
                snapshot_error = Some(err);
            }
        }
    }
    app.handle(OverlayEvent::Shutdown);

    if let Some(err) = snapshot_error {
        return Err(err);
    }
    if stream_lost {
        return Err(failure(&app, "stream lost; rerun to retry"));
    }
    log::info!("overlay stopped");
    Ok(())
}

fn failure<S, C>(app: &OverlayApp<S, C>, context: &str) -> anyhow::Error
where
    S: annotation_overlay::DrawSurface,
    C: annotation_overlay::FeedConnector,
{
    match app.controller().last_error() {
        Some(err) => anyhow!("{}: {}", context, err),
        None => match app.event_log().last() {
            Some(entry) => anyhow!("{}: {}", context, entry.message),
            None => anyhow!("{}", context),
        },
    }
}

fn parse_container(raw: &str) -> Result<Size> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("--container must look like WIDTHxHEIGHT, got {}", raw))?;
    let width: f64 = w.trim().parse().context("container width")?;
    let height: f64 = h.trim().parse().context("container height")?;
    if !(width > 0.0 && height > 0.0) {
        return Err(anyhow!("container size must be positive"));
    }
    Ok(Size::new(width, height))
}
