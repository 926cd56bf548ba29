//! Metadata channel wire types.
//!
//! One JSON [`MetadataFrame`] arrives per channel message. A frame is the
//! most recent analysis output available on the backend; it carries no
//! frame number and is not tied to any particular displayed video frame.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{OverlayError, OverlayResult};

/// Number of keypoints in a COCO-style pose.
pub const POSE_KEYPOINTS: usize = 17;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boxes: Option<Vec<DetectionBox>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poses: Option<Vec<Pose>>,

    /// Class id to display name. JSON object keys are decimal strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_names: Option<BTreeMap<i64, String>>,
}

impl MetadataFrame {
    pub fn parse(text: &str) -> OverlayResult<Self> {
        serde_json::from_str(text).map_err(|e| OverlayError::decode(format!("metadata frame: {}", e)))
    }

    /// Display name for a class id, falling back to the id itself.
    pub fn class_label(&self, cls: i64) -> String {
        self.class_names
            .as_ref()
            .and_then(|names| names.get(&cls))
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| cls.to_string())
    }

    /// Non-blank caption, if the message carries one.
    pub fn caption_text(&self) -> Option<&str> {
        self.caption.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// Detected object box in source-pixel space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub xyxy: [f64; 4],
    #[serde(deserialize_with = "whole_number::required")]
    pub cls: i64,
    /// Tracker id, stable across messages for the same object.
    #[serde(
        default,
        deserialize_with = "whole_number::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<i64>,
    pub conf: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub keypoints: Vec<Keypoint>,

    #[serde(
        default,
        deserialize_with = "whole_number::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<i64>,

    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

/// `[[x, y], confidence]` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "([f64; 2], f64)", into = "([f64; 2], f64)")]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

impl From<([f64; 2], f64)> for Keypoint {
    fn from(([x, y], confidence): ([f64; 2], f64)) -> Self {
        Self { x, y, confidence }
    }
}

impl From<Keypoint> for ([f64; 2], f64) {
    fn from(kp: Keypoint) -> Self {
        ([kp.x, kp.y], kp.confidence)
    }
}

/// Ids arrive as JSON integers or as floats with no fractional part
/// (`0.0`), depending on how the backend converted its tensors.
mod whole_number {
    use std::fmt;

    use serde::de::{self, Deserializer, Visitor};

    struct WholeNumber;

    impl<'de> Visitor<'de> for WholeNumber {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a whole number")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("id {} out of range", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
                Ok(v as i64)
            } else {
                Err(E::invalid_value(de::Unexpected::Float(v), &self))
            }
        }
    }

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        deserializer.deserialize_any(WholeNumber)
    }

    struct MaybeWholeNumber;

    impl<'de> Visitor<'de> for MaybeWholeNumber {
        type Value = Option<i64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a whole number or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            required(d).map(Some)
        }
    }

    pub fn optional<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        deserializer.deserialize_option(MaybeWholeNumber)
    }
}
