//! Tool configuration payloads and the builder that derives them from UI
//! toggle state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{OverlayError, OverlayResult};

pub const TOOL_OV_DETECTION: &str = "ov_detection";
pub const TOOL_DETECTION: &str = "detection";
pub const TOOL_CAPTIONING: &str = "captioning";
pub const TOOL_POSE_ESTIMATION: &str = "pose_estimation";

/// How often a tool runs on the backend.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Every `value`-th frame.
    Stride { value: u32 },
    /// When the scene-change score exceeds `threshold`.
    SceneChange { threshold: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    pub vocabulary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imgsz: Option<u32>,
    pub conf_threshold: f64,
    pub trigger: Trigger,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaptioningSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imgsz: Option<u32>,
    pub trigger: Trigger,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imgsz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
}

/// `tool_settings` object of the session-init payload.
///
/// Detection may be keyed either `ov_detection` (open vocabulary) or
/// `detection`; the key used is preserved. Unknown tools pass through
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ov_detection: Option<DetectionSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection: Option<DetectionSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captioning: Option<CaptioningSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose_estimation: Option<PoseSettings>,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl ToolSettings {
    /// Names of the configured tools, in payload order.
    pub fn enabled_tools(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.ov_detection.is_some() {
            names.push(TOOL_OV_DETECTION.to_string());
        }
        if self.detection.is_some() {
            names.push(TOOL_DETECTION.to_string());
        }
        if self.captioning.is_some() {
            names.push(TOOL_CAPTIONING.to_string());
        }
        if self.pose_estimation.is_some() {
            names.push(TOOL_POSE_ESTIMATION.to_string());
        }
        names.extend(self.other.keys().cloned());
        names
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_tools().is_empty()
    }

    /// Required-field checks for every configured tool.
    pub fn validate(&self) -> OverlayResult<()> {
        for (key, detection) in [
            (TOOL_OV_DETECTION, &self.ov_detection),
            (TOOL_DETECTION, &self.detection),
        ] {
            let Some(detection) = detection else {
                continue;
            };
            if detection.vocabulary.iter().all(|v| v.trim().is_empty()) {
                return Err(OverlayError::validation(format!(
                    "{} enabled but vocabulary is empty",
                    key
                )));
            }
            if !(0.0..=1.0).contains(&detection.conf_threshold) {
                return Err(OverlayError::validation(format!(
                    "{} conf_threshold must be within [0, 1]",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Enforces the tool-enablement mode on an already-built payload.
    pub fn validate_mode(&self, mode: ToolMode) -> OverlayResult<()> {
        let enabled = self.enabled_tools();
        if mode == ToolMode::Exclusive && enabled.len() > 1 {
            return Err(OverlayError::config(format!(
                "single-tool mode allows one tool, got {}",
                enabled.join(", ")
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Enabling one tool disables the others.
    #[default]
    Exclusive,
    /// Any combination of tools may run together.
    Multi,
}

impl std::str::FromStr for ToolMode {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exclusive" | "single" => Ok(Self::Exclusive),
            "multi" | "multiple" => Ok(Self::Multi),
            other => Err(OverlayError::config(format!(
                "unknown tool mode '{}'; expected exclusive or multi",
                other
            ))),
        }
    }
}

/// Payload key used for the detection tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKey {
    #[default]
    OvDetection,
    Detection,
}

impl std::str::FromStr for DetectionKey {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            TOOL_OV_DETECTION => Ok(Self::OvDetection),
            TOOL_DETECTION => Ok(Self::Detection),
            other => Err(OverlayError::config(format!(
                "unknown detection key '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    Detection,
    Captioning,
    PoseEstimation,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Detection, Tool::Captioning, Tool::PoseEstimation];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Detection => TOOL_DETECTION,
            Tool::Captioning => TOOL_CAPTIONING,
            Tool::PoseEstimation => TOOL_POSE_ESTIMATION,
        }
    }
}

/// Fixed per-tool parameters applied by the builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDefaults {
    pub detection_imgsz: Option<u32>,
    pub detection_conf: f64,
    pub detection_stride: u32,
    pub captioning_imgsz: Option<u32>,
    pub captioning_scene_threshold: f64,
    pub pose_imgsz: Option<u32>,
    pub pose_conf: Option<f64>,
    pub pose_stride: Option<u32>,
}

impl Default for ToolDefaults {
    fn default() -> Self {
        Self {
            detection_imgsz: Some(416),
            detection_conf: 0.25,
            detection_stride: 3,
            captioning_imgsz: Some(480),
            captioning_scene_threshold: 0.2,
            pose_imgsz: Some(640),
            pose_conf: Some(0.5),
            pose_stride: None,
        }
    }
}

/// Translates tool toggles and inputs into a [`ToolSettings`] payload.
#[derive(Clone, Debug)]
pub struct ToolConfigBuilder {
    mode: ToolMode,
    detection_key: DetectionKey,
    defaults: ToolDefaults,
    enabled: Vec<Tool>,
    vocabulary: String,
    confidence: Option<f64>,
}

impl ToolConfigBuilder {
    pub fn new(mode: ToolMode, detection_key: DetectionKey, defaults: ToolDefaults) -> Self {
        Self {
            mode,
            detection_key,
            defaults,
            enabled: Vec::new(),
            vocabulary: String::new(),
            confidence: None,
        }
    }

    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    /// Toggles a tool. In exclusive mode enabling one tool turns every other
    /// tool off. Returns the tools whose state changed besides `tool`.
    pub fn set_enabled(&mut self, tool: Tool, on: bool) -> Vec<Tool> {
        let mut switched_off = Vec::new();
        if on {
            if self.mode == ToolMode::Exclusive {
                switched_off = self.enabled.iter().copied().filter(|t| *t != tool).collect();
                self.enabled.retain(|t| *t == tool);
            }
            if !self.enabled.contains(&tool) {
                self.enabled.push(tool);
            }
        } else {
            self.enabled.retain(|t| *t != tool);
        }
        switched_off
    }

    pub fn is_enabled(&self, tool: Tool) -> bool {
        self.enabled.contains(&tool)
    }

    /// Comma-separated detection vocabulary, as typed.
    pub fn set_vocabulary(&mut self, raw: impl Into<String>) {
        self.vocabulary = raw.into();
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = Some(confidence);
    }

    pub fn build(&self) -> OverlayResult<ToolSettings> {
        let mut settings = ToolSettings::default();
        for tool in Tool::ALL {
            if !self.is_enabled(tool) {
                continue;
            }
            match tool {
                Tool::Detection => {
                    let vocabulary = parse_vocabulary(&self.vocabulary);
                    if vocabulary.is_empty() {
                        return Err(OverlayError::validation(
                            "detection enabled but vocabulary is empty",
                        ));
                    }
                    let detection = DetectionSettings {
                        vocabulary,
                        imgsz: self.defaults.detection_imgsz,
                        conf_threshold: self.confidence.unwrap_or(self.defaults.detection_conf),
                        trigger: Trigger::Stride {
                            value: self.defaults.detection_stride,
                        },
                    };
                    match self.detection_key {
                        DetectionKey::OvDetection => settings.ov_detection = Some(detection),
                        DetectionKey::Detection => settings.detection = Some(detection),
                    }
                }
                Tool::Captioning => {
                    settings.captioning = Some(CaptioningSettings {
                        imgsz: self.defaults.captioning_imgsz,
                        trigger: Trigger::SceneChange {
                            threshold: self.defaults.captioning_scene_threshold,
                        },
                    });
                }
                Tool::PoseEstimation => {
                    settings.pose_estimation = Some(PoseSettings {
                        imgsz: self.defaults.pose_imgsz,
                        conf_threshold: self.defaults.pose_conf,
                        trigger: self.defaults.pose_stride.map(|value| Trigger::Stride { value }),
                    });
                }
            }
        }
        settings.validate()?;
        settings.validate_mode(self.mode)?;
        Ok(settings)
    }
}

pub fn parse_vocabulary(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
