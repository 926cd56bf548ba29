use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use annotation_overlay::event_log::StatusIndicator;
use annotation_overlay::stream::StreamStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl UiMode {
    pub fn parse(flag: &str) -> Self {
        match flag {
            "plain" => UiMode::Plain,
            "pretty" => UiMode::Pretty,
            _ => UiMode::Auto,
        }
    }
}

/// Stderr progress for the overlay CLI: one spinner per lifecycle stage
/// and a live status line while streaming.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    fn spinner(&self, message: String) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        spinner
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            StageGuard::new(name.to_string(), Some(self.spinner(format!("{name}…"))))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    pub fn status_line(&self) -> StatusLine {
        let spinner = self.pretty().then(|| self.spinner(String::new()));
        StatusLine {
            spinner,
            last_plain: None,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Single updating line: status, frame and message counters, caption.
pub struct StatusLine {
    spinner: Option<ProgressBar>,
    last_plain: Option<StatusIndicator>,
}

impl StatusLine {
    pub fn update(&mut self, status: StatusIndicator, stats: StreamStats, caption: Option<&str>) {
        let line = format_status(status, stats, caption);
        match &self.spinner {
            Some(spinner) => spinner.set_message(line),
            None => {
                // Plain output only reports status changes.
                if self.last_plain != Some(status) {
                    eprintln!("{line}");
                    self.last_plain = Some(status);
                }
            }
        }
    }

    pub fn finish(self) {
        if let Some(spinner) = self.spinner {
            spinner.finish_and_clear();
        }
    }
}

fn format_status(status: StatusIndicator, stats: StreamStats, caption: Option<&str>) -> String {
    let mut line = format!(
        "[{}] frames {} · metadata {}",
        status.label(),
        stats.frames,
        stats.messages
    );
    if stats.rejected_messages > 0 {
        line.push_str(&format!(" ({} rejected)", stats.rejected_messages));
    }
    if let Some(caption) = caption {
        line.push_str(" · ");
        line.push_str(caption);
    }
    line
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
