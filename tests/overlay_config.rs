use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use annotation_overlay::config::OverlayConfig;
use annotation_overlay::tools::{DetectionKey, ToolMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OVERLAY_CONFIG",
        "OVERLAY_API_BASE",
        "OVERLAY_WS_BASE",
        "OVERLAY_WS_PATH",
        "OVERLAY_TOOL_MODE",
        "OVERLAY_REQUIRE_TOOL",
        "OVERLAY_DETECTION_KEY",
        "OVERLAY_REQUEST_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = OverlayConfig::load().expect("load defaults");
    assert_eq!(cfg.api_base.as_str(), "http://127.0.0.1:8000/");
    assert_eq!(cfg.ws_path, "/ws/stream");
    assert_eq!(cfg.tool_mode, ToolMode::Exclusive);
    assert_eq!(cfg.detection_key, DetectionKey::OvDetection);
    assert!(!cfg.require_tool);
    assert_eq!(cfg.event_log_capacity, 500);

    let endpoints = cfg.endpoints().unwrap();
    assert_eq!(endpoints.ws_base.as_str(), "ws://127.0.0.1:8000/");
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api_base": "http://analysis.local:9000",
        "ws_path": "/api/ws/stream",
        "request_timeout_secs": 90,
        "tool_mode": "multi",
        "fallback_native": {"width": 1280, "height": 720},
        "tools": {"detection_conf": 0.4, "detection_stride": 5}
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_REQUIRE_TOOL", "true");
    std::env::set_var("OVERLAY_DETECTION_KEY", "detection");
    std::env::set_var("OVERLAY_REQUEST_TIMEOUT_SECS", "45");

    let cfg = OverlayConfig::load().expect("load config");
    assert_eq!(cfg.api_base.as_str(), "http://analysis.local:9000/");
    assert_eq!(cfg.ws_path, "/api/ws/stream");
    assert_eq!(cfg.request_timeout, Duration::from_secs(45));
    assert_eq!(cfg.tool_mode, ToolMode::Multi);
    assert!(cfg.require_tool);
    assert_eq!(cfg.detection_key, DetectionKey::Detection);
    assert_eq!(cfg.fallback_native.width, 1280.0);
    assert_eq!(cfg.tools.detection_conf, 0.4);
    assert_eq!(cfg.tools.detection_stride, 5);
    assert_eq!(cfg.tools.captioning_imgsz, Some(480));

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
api_base = "https://analysis.example"
tool_mode = "exclusive"

[tools]
pose_conf = 0.6
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("OVERLAY_CONFIG", file.path());

    let cfg = OverlayConfig::load().expect("load config");
    assert_eq!(cfg.tools.pose_conf, Some(0.6));
    assert_eq!(cfg.effective_ws_base().unwrap().scheme(), "wss");

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OVERLAY_TOOL_MODE", "several");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_REQUEST_TIMEOUT_SECS", "0");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_WS_BASE", "http://not-a-socket");
    assert!(OverlayConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_REQUIRE_TOOL", "maybe");
    assert!(OverlayConfig::load().is_err());
    clear_env();
}
