//! Channel readers.
//!
//! [`NetworkConnector`] reads the MJPEG media feed over HTTP (`ureq`) and
//! the metadata channel over a websocket (`tungstenite`), each on its own
//! named thread. Readers only post events; they never touch overlay state.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::mjpeg::{decode_jpeg, MjpegReader};
use super::{EventSink, FeedHandle, StreamEvent};
use crate::error::{OverlayError, OverlayResult};

/// Opens the two channels of a session.
pub trait FeedConnector {
    fn open_media(&mut self, url: &str, sink: EventSink) -> OverlayResult<FeedHandle>;

    fn open_channel(&mut self, url: &str, sink: EventSink) -> OverlayResult<FeedHandle>;
}

/// How often a blocked websocket read wakes up to check for shutdown.
const CHANNEL_POLL: Duration = Duration::from_millis(250);

pub struct NetworkConnector {
    agent: ureq::Agent,
}

impl NetworkConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .build();
        Self { agent }
    }
}

impl FeedConnector for NetworkConnector {
    fn open_media(&mut self, url: &str, sink: EventSink) -> OverlayResult<FeedHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let agent = self.agent.clone();
        let url = url.to_string();
        let join = std::thread::Builder::new()
            .name(format!("media-feed-{}", sink.generation()))
            .spawn(move || run_media(agent, &url, &sink, &flag))
            .map_err(|e| OverlayError::transport(format!("spawn media reader: {}", e)))?;
        Ok(FeedHandle::new(shutdown, Some(join)))
    }

    fn open_channel(&mut self, url: &str, sink: EventSink) -> OverlayResult<FeedHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let url = url.to_string();
        let join = std::thread::Builder::new()
            .name(format!("metadata-channel-{}", sink.generation()))
            .spawn(move || run_channel(&url, &sink, &flag))
            .map_err(|e| OverlayError::transport(format!("spawn channel reader: {}", e)))?;
        Ok(FeedHandle::new(shutdown, Some(join)))
    }
}

fn run_media(agent: ureq::Agent, url: &str, sink: &EventSink, shutdown: &AtomicBool) {
    let response = match agent.get(url).call() {
        Ok(response) => response,
        Err(err) => {
            if !shutdown.load(Ordering::SeqCst) {
                sink.emit(StreamEvent::MediaError(format!(
                    "media feed unreachable: {}",
                    err
                )));
            }
            return;
        }
    };

    let mut reader = MjpegReader::new(response.into_reader());
    let mut decode_failures = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let message = match reader.next_jpeg() {
            Ok(Some(jpeg)) => match decode_jpeg(&jpeg) {
                Ok(frame) => StreamEvent::MediaFrame(frame),
                Err(err) => {
                    decode_failures += 1;
                    log::debug!("skipping undecodable media frame ({}): {}", decode_failures, err);
                    continue;
                }
            },
            Ok(None) => StreamEvent::MediaError("media feed ended".to_string()),
            Err(err) => StreamEvent::MediaError(format!("media feed lost: {}", err)),
        };
        let terminal = matches!(message, StreamEvent::MediaError(_));
        if shutdown.load(Ordering::SeqCst) || !sink.emit(message) || terminal {
            return;
        }
    }
}

fn run_channel(url: &str, sink: &EventSink, shutdown: &AtomicBool) {
    let mut socket = match tungstenite::connect(url) {
        Ok((socket, _response)) => socket,
        Err(err) => {
            if !shutdown.load(Ordering::SeqCst) {
                sink.emit(StreamEvent::ChannelError(format!(
                    "metadata channel unreachable: {}",
                    err
                )));
                sink.emit(StreamEvent::ChannelClosed);
            }
            return;
        }
    };
    set_poll_timeout(&mut socket);
    if !sink.emit(StreamEvent::ChannelOpen) {
        return;
    }

    loop {
        if shutdown.load(Ordering::SeqCst) {
            let _ = socket.close(None);
            let _ = socket.flush();
            return;
        }
        let event = match socket.read() {
            Ok(Message::Text(text)) => StreamEvent::ChannelMessage(text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => StreamEvent::ChannelMessage(text),
                Err(_) => {
                    log::debug!("ignoring non-utf8 binary metadata message");
                    continue;
                }
            },
            Ok(Message::Close(_)) => StreamEvent::ChannelClosed,
            Ok(_) => continue,
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                continue
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                StreamEvent::ChannelClosed
            }
            Err(err) => {
                if !shutdown.load(Ordering::SeqCst) {
                    sink.emit(StreamEvent::ChannelError(err.to_string()));
                }
                StreamEvent::ChannelClosed
            }
        };
        let closed = matches!(event, StreamEvent::ChannelClosed);
        if shutdown.load(Ordering::SeqCst) {
            continue;
        }
        if !sink.emit(event) || closed {
            return;
        }
    }
}

fn set_poll_timeout(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) {
    let result = match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(CHANNEL_POLL)),
        MaybeTlsStream::Rustls(stream) => stream.sock.set_read_timeout(Some(CHANNEL_POLL)),
        _ => Ok(()),
    };
    if let Err(err) = result {
        log::warn!("metadata channel read timeout not applied: {}", err);
    }
}
