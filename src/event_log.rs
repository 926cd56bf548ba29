//! Operator-visible event log, status indicator and control enablement.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};

use crate::session::SessionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogSource {
    System,
    Ws,
    Ui,
    Error,
}

impl LogSource {
    pub fn tag(self) -> &'static str {
        match self {
            LogSource::System => "SYSTEM",
            LogSource::Ws => "WS",
            LogSource::Ui => "UI",
            LogSource::Error => "ERROR",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            self.at.format("%H:%M:%S"),
            self.source.tag(),
            self.message
        )
    }
}

/// Bounded ring; the oldest entries fall off once `capacity` is reached.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, level: LogLevel, source: LogSource, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => log::info!("[{}] {}", source.tag(), message),
            LogLevel::Warn => log::warn!("[{}] {}", source.tag(), message),
            LogLevel::Error => log::error!("[{}] {}", source.tag(), message),
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: Local::now(),
            level,
            source,
            message,
        });
    }

    pub fn info(&mut self, source: LogSource, message: impl Into<String>) {
        self.push(LogLevel::Info, source, message);
    }

    pub fn warn(&mut self, source: LogSource, message: impl Into<String>) {
        self.push(LogLevel::Warn, source, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, LogSource::Error, message);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusIndicator {
    #[default]
    Idle,
    Loading,
    Ready,
    Live,
    Error,
}

impl StatusIndicator {
    /// Status for a session state when the stream has nothing to add.
    pub fn for_state(state: SessionState) -> Self {
        match state {
            SessionState::Idle => StatusIndicator::Idle,
            SessionState::Creating | SessionState::PipelineLoading => StatusIndicator::Loading,
            SessionState::Ready | SessionState::Streaming => StatusIndicator::Ready,
            SessionState::Error => StatusIndicator::Error,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusIndicator::Idle => "Idle",
            StatusIndicator::Loading => "Loading",
            StatusIndicator::Ready => "Ready",
            StatusIndicator::Live => "Live",
            StatusIndicator::Error => "Error",
        }
    }
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Backend round trips outside the session state machine that are still
/// in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingWork {
    pub upload: bool,
    /// `POST /session/reset` carries no session id, so a new session must
    /// not be created until it has landed.
    pub reset: bool,
}

/// Which user controls may be triggered right now. A pending round trip
/// disables the control that started it and any control that would race it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlState {
    pub init: bool,
    pub start: bool,
    pub reset: bool,
    pub upload: bool,
    pub start_label: &'static str,
}

impl ControlState {
    pub fn derive(state: SessionState, pending: PendingWork, stream_failed: bool) -> Self {
        let can_begin = state == SessionState::Idle && !pending.upload && !pending.reset;
        Self {
            init: can_begin,
            start: state == SessionState::Ready,
            reset: true,
            upload: can_begin,
            start_label: if stream_failed {
                "Retry Stream"
            } else {
                "Start Stream"
            },
        }
    }
}
