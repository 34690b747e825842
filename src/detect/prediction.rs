use serde::{Deserialize, Serialize};

/// One detected object, in source-frame pixel coordinates.
///
/// Predictions are ephemeral: produced per poll cycle (or relay message),
/// rendered, and dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    /// Confidence in 0..1.
    pub conf: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Prediction {
    pub fn new(class: &str, conf: f32, x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            class: class.to_string(),
            conf,
            x,
            y,
            w,
            h,
        }
    }

    /// Case-insensitive label match.
    pub fn is_class(&self, label: &str) -> bool {
        self.class.trim().eq_ignore_ascii_case(label.trim())
    }
}

/// Body returned by the detect endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    /// Present when the detector already persisted evidence server-side.
    #[serde(default)]
    pub evidence_url: Option<String>,
    /// Detector-side failure text; predictions are empty in that case.
    #[serde(default)]
    pub error: Option<String>,
}
