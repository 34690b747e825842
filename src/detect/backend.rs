use anyhow::Result;
use serde::Serialize;

use super::prediction::DetectResponse;

/// Payload sent to the detector for one poll cycle.
#[derive(Clone, Debug, Serialize)]
pub struct DetectRequest {
    /// JPEG frame as a data URI.
    pub image: String,
    pub class_id: i64,
    pub teacher_id: i64,
}

/// Remote object detector.
///
/// The inference itself lives behind this seam; implementations only move a
/// captured frame to the detector and bring predictions back. A call blocks
/// until the detector answers or the transport gives up.
pub trait Detector: Send + Sync {
    /// Detector identifier, used in logs.
    fn name(&self) -> &'static str;

    fn detect(&self, request: &DetectRequest) -> Result<DetectResponse>;
}
