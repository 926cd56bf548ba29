use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use url::Url;

use annotation_overlay::backend::{BackendClient, SessionApi, SessionInitRequest};
use annotation_overlay::{OverlayError, SessionId, ToolSettings};

struct Captured {
    request_line: String,
    headers: Vec<String>,
    body: Vec<u8>,
}

/// Serves one canned response per entry, in order, and reports what it saw.
fn serve(responses: Vec<(u16, &'static str)>) -> (Url, mpsc::Receiver<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut headers = Vec::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                headers.push(line);
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            tx.send(Captured {
                request_line: request_line.trim_end().to_string(),
                headers,
                body: request_body,
            })
            .unwrap();

            let mut stream = stream;
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        }
    });
    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    (base, rx)
}

fn client(base: Url) -> BackendClient {
    BackendClient::new(base, Duration::from_secs(5))
}

#[test]
fn create_session_posts_init_payload() {
    let (base, seen) = serve(vec![(200, r#"{"session_id":"abc-123"}"#)]);
    let request = SessionInitRequest::new("/videos/a.mp4", ToolSettings::default());

    let session = client(base).create_session(&request).unwrap();
    assert_eq!(session, SessionId::new("abc-123"));

    let captured = seen.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(captured.request_line, "POST /session/init HTTP/1.1");
    assert!(captured
        .headers
        .iter()
        .any(|h| h.to_lowercase() == "content-type: application/json"));
    let body: serde_json::Value = serde_json::from_slice(&captured.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "video_url": "/videos/a.mp4",
            "pipeline_configuration": {"tool_settings": {}}
        })
    );
}

#[test]
fn error_detail_becomes_backend_message() {
    let (base, _seen) = serve(vec![(400, r#"{"detail":"Video not found"}"#)]);
    let request = SessionInitRequest::new("missing.mp4", ToolSettings::default());
    let err = client(base).create_session(&request).unwrap_err();
    assert_eq!(err, OverlayError::backend("Video not found"));
}

#[test]
fn missing_detail_falls_back_to_generic_message() {
    let (base, seen) = serve(vec![(500, "oops")]);
    let err = client(base)
        .initialize_pipeline(&SessionId::new("s-9"))
        .unwrap_err();
    assert_eq!(err, OverlayError::backend("Pipeline init failed"));
    let captured = seen.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        captured.request_line,
        "POST /session/s-9/initialize_pipeline HTTP/1.1"
    );
}

#[test]
fn reset_returns_acknowledgement() {
    let (base, _seen) = serve(vec![(200, r#"{"message":"Session reset"}"#)]);
    assert_eq!(client(base).reset_session().unwrap(), "Session reset");
}

#[test]
fn upload_sends_multipart_video_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.mp4");
    std::fs::write(&path, b"not really a video").unwrap();

    let (base, seen) = serve(vec![(200, r#"{"file_path":"/data/uploads/clip.mp4"}"#)]);
    let server_path = client(base).upload_file(&path).unwrap();
    assert_eq!(server_path, "/data/uploads/clip.mp4");

    let captured = seen.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(captured.request_line, "POST /upload_file HTTP/1.1");
    assert!(captured
        .headers
        .iter()
        .any(|h| h.to_lowercase().starts_with("content-type: multipart/form-data; boundary=")));
    let body = String::from_utf8_lossy(&captured.body);
    assert!(body.contains("name=\"video\"; filename=\"clip.mp4\""));
    assert!(body.contains("not really a video"));
}

#[test]
fn unreachable_backend_is_a_backend_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let base = Url::parse(&format!("http://{}", addr)).unwrap();
    let err = client(base).reset_session().unwrap_err();
    match err {
        OverlayError::Backend { message } => assert!(message.starts_with("Session reset failed")),
        other => panic!("unexpected error {:?}", other),
    }
}
