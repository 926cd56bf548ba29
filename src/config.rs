use anyhow::{anyhow, Context, Result};
use kurbo::Size;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::geometry::{DEFAULT_NATIVE_HEIGHT, DEFAULT_NATIVE_WIDTH};
use crate::stream::StreamEndpoints;
use crate::tools::{DetectionKey, ToolDefaults, ToolMode};

const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
const DEFAULT_WS_PATH: &str = "/ws/stream";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_LOG_CAPACITY: usize = 500;

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    api_base: Option<String>,
    ws_base: Option<String>,
    ws_path: Option<String>,
    request_timeout_secs: Option<u64>,
    tool_mode: Option<ToolMode>,
    require_tool: Option<bool>,
    detection_key: Option<DetectionKey>,
    fallback_native: Option<FallbackConfigFile>,
    tools: Option<ToolDefaults>,
    event_log_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct FallbackConfigFile {
    width: Option<f64>,
    height: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub api_base: Url,
    /// `None` derives the websocket base from `api_base`.
    pub ws_base: Option<Url>,
    pub ws_path: String,
    pub request_timeout: Duration,
    pub tool_mode: ToolMode,
    pub require_tool: bool,
    pub detection_key: DetectionKey,
    /// Native media size assumed before the first frame decodes.
    pub fallback_native: Size,
    pub tools: ToolDefaults,
    pub event_log_capacity: usize,
}

impl OverlayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults, before any file or environment layering.
    pub fn defaults() -> Result<Self> {
        Self::from_file(OverlayConfigFile::default())
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let api_base = parse_url(
            "api_base",
            file.api_base.as_deref().unwrap_or(DEFAULT_API_BASE),
        )?;
        let ws_base = file
            .ws_base
            .map(|raw| parse_url("ws_base", &raw))
            .transpose()?;
        let fallback_native = Size::new(
            file.fallback_native
                .as_ref()
                .and_then(|f| f.width)
                .unwrap_or(DEFAULT_NATIVE_WIDTH),
            file.fallback_native
                .as_ref()
                .and_then(|f| f.height)
                .unwrap_or(DEFAULT_NATIVE_HEIGHT),
        );
        Ok(Self {
            api_base,
            ws_base,
            ws_path: file
                .ws_path
                .unwrap_or_else(|| DEFAULT_WS_PATH.to_string()),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            tool_mode: file.tool_mode.unwrap_or_default(),
            require_tool: file.require_tool.unwrap_or(false),
            detection_key: file.detection_key.unwrap_or_default(),
            fallback_native,
            tools: file.tools.unwrap_or_default(),
            event_log_capacity: file
                .event_log_capacity
                .unwrap_or(DEFAULT_EVENT_LOG_CAPACITY),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(raw) = env_value("OVERLAY_API_BASE") {
            self.api_base = parse_url("OVERLAY_API_BASE", &raw)?;
        }
        if let Some(raw) = env_value("OVERLAY_WS_BASE") {
            self.ws_base = Some(parse_url("OVERLAY_WS_BASE", &raw)?);
        }
        if let Some(path) = env_value("OVERLAY_WS_PATH") {
            self.ws_path = path;
        }
        if let Some(mode) = env_value("OVERLAY_TOOL_MODE") {
            self.tool_mode = mode.parse().map_err(|e| anyhow!("OVERLAY_TOOL_MODE: {}", e))?;
        }
        if let Some(flag) = env_value("OVERLAY_REQUIRE_TOOL") {
            self.require_tool = parse_bool(&flag)
                .ok_or_else(|| anyhow!("OVERLAY_REQUIRE_TOOL must be true or false"))?;
        }
        if let Some(key) = env_value("OVERLAY_DETECTION_KEY") {
            self.detection_key = key
                .parse()
                .map_err(|e| anyhow!("OVERLAY_DETECTION_KEY: {}", e))?;
        }
        if let Some(timeout) = env_value("OVERLAY_REQUEST_TIMEOUT_SECS") {
            let seconds: u64 = timeout.parse().map_err(|_| {
                anyhow!("OVERLAY_REQUEST_TIMEOUT_SECS must be an integer number of seconds")
            })?;
            self.request_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.api_base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "api_base must be an http or https url, got {}",
                self.api_base
            ));
        }
        if let Some(ws) = &self.ws_base {
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(anyhow!("ws_base must be a ws or wss url, got {}", ws));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        let fallback = self.fallback_native;
        if !(fallback.width > 0.0 && fallback.height > 0.0)
            || !fallback.width.is_finite()
            || !fallback.height.is_finite()
        {
            return Err(anyhow!("fallback native size must be positive"));
        }
        if self.event_log_capacity == 0 {
            return Err(anyhow!("event log capacity must be greater than zero"));
        }

        let tools = &self.tools;
        check_unit("tools.detection_conf", tools.detection_conf)?;
        check_unit(
            "tools.captioning_scene_threshold",
            tools.captioning_scene_threshold,
        )?;
        if let Some(conf) = tools.pose_conf {
            check_unit("tools.pose_conf", conf)?;
        }
        if tools.detection_stride == 0 || tools.pose_stride == Some(0) {
            return Err(anyhow!("tool strides must be at least 1"));
        }
        Ok(())
    }

    /// Websocket base: the configured one, or `api_base` with its scheme
    /// switched to `ws`/`wss`.
    pub fn effective_ws_base(&self) -> Result<Url> {
        if let Some(ws) = &self.ws_base {
            return Ok(ws.clone());
        }
        let mut ws = self.api_base.clone();
        let scheme = if self.api_base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        ws.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot derive websocket url from {}", self.api_base))?;
        Ok(ws)
    }

    pub fn endpoints(&self) -> Result<StreamEndpoints> {
        Ok(StreamEndpoints {
            api_base: self.api_base.clone(),
            ws_base: self.effective_ws_base()?,
            ws_path: self.ws_path.clone(),
        })
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_url(field: &str, raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| anyhow!("{} is not a valid url ({}): {}", field, raw, e))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn check_unit(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", field, value));
    }
    Ok(())
}
