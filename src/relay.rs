//! Frame relay listener.
//!
//! The backend relays camera frames over `/ws/stream/{classId}` as base64
//! data URIs, each with the predictions computed for it. Every message goes
//! through the frame source reconciler and re-renders the overlay.

use anyhow::Result;
use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::detect::Prediction;
use crate::display::{reconcile_relayed_frame, RelayDecision, SharedVideo};
use crate::overlay::{OverlayRenderer, SharedOverlay};
use crate::socket::{spawn_listener, ListenerHandle};

#[derive(Debug, Deserialize)]
struct RelayMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    image: Option<String>,
    #[serde(default)]
    predictions: Vec<Prediction>,
}

/// A relayed frame event.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayFrame {
    pub image: String,
    pub predictions: Vec<Prediction>,
}

/// Parse a relay socket message. Anything other than a `frame` message with
/// an image is ignored.
pub fn parse_relay_message(text: &str) -> Option<RelayFrame> {
    let message: RelayMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            log::debug!("relay message ignored: {}", err);
            return None;
        }
    };
    if message.kind.as_deref() != Some("frame") {
        return None;
    }
    let image = message.image.filter(|image| !image.is_empty())?;
    Some(RelayFrame {
        image,
        predictions: message.predictions,
    })
}

/// Applies relay messages to the shared video and overlay.
#[derive(Clone)]
pub struct RelayHandler {
    video: SharedVideo,
    overlay: SharedOverlay,
    renderer: OverlayRenderer,
}

impl RelayHandler {
    pub fn new(video: SharedVideo, overlay: SharedOverlay, renderer: OverlayRenderer) -> Self {
        Self {
            video,
            overlay,
            renderer,
        }
    }

    /// Handle one message. Returns `None` for messages that are not frames.
    pub fn handle_text(&self, text: &str) -> Result<Option<RelayDecision>> {
        let Some(frame) = parse_relay_message(text) else {
            return Ok(None);
        };
        let (decision, native, displayed) = {
            let mut video = self.video.lock()?;
            let decision = reconcile_relayed_frame(&mut video, &frame.image);
            (decision, video.native_size(), video.display_size())
        };
        self.overlay
            .paint(&self.renderer, native, displayed, &frame.predictions)?;
        Ok(Some(decision))
    }
}

pub fn spawn_relay(url: String, handler: RelayHandler, cancel: CancelToken) -> Result<ListenerHandle> {
    spawn_listener("relay", url, cancel, move |text| {
        if let Err(err) = handler.handle_text(text) {
            log::warn!("relay frame not applied: {:#}", err);
        }
    })
}
