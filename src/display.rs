//! The visible video element and the frame source reconciler.
//!
//! Two producers write into the same `VideoElement`: the raw HTTP camera
//! stream and the relay socket. Priority is resolved purely by inspecting the
//! current source at the time of a relayed write. Once the source holds an
//! `http(s)` stream URL the raw stream is authoritative and relayed frames
//! are ignored; when the stream fails and the source reverts to empty,
//! relayed frames resume on the next event.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::frame::{decode_data_uri, Frame};

/// Current value of the element's source attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum VideoSource {
    #[default]
    Empty,
    /// A raw camera stream (or any other URL).
    Url(String),
    /// A relayed frame, held as the data URI it arrived as.
    DataUri(String),
}

impl VideoSource {
    pub fn as_str(&self) -> &str {
        match self {
            VideoSource::Empty => "",
            VideoSource::Url(url) => url,
            VideoSource::DataUri(uri) => uri,
        }
    }
}

/// Returns true for `http://` and `https://` URLs.
pub fn is_stream_url(value: &str) -> bool {
    let lower = value.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Model of the displayed video.
///
/// `frame` carries the latest decoded image at native resolution. The
/// displayed size defaults to the native size unless the element is laid out
/// at a fixed size.
#[derive(Debug, Default)]
pub struct VideoElement {
    source: VideoSource,
    frame: Option<Frame>,
    display_size: Option<(u32, u32)>,
}

impl VideoElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display_size(width: u32, height: u32) -> Self {
        Self {
            display_size: Some((width, height)),
            ..Self::default()
        }
    }

    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    pub fn set_source(&mut self, source: VideoSource) {
        self.source = source;
    }

    /// Stream failed: revert to empty and drop the stale frame.
    pub fn reset(&mut self) {
        self.source = VideoSource::Empty;
        self.frame = None;
    }

    pub fn present(&mut self, frame: Frame) {
        self.frame = Some(frame);
    }

    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Native media size, `(0, 0)` until a frame has been presented.
    pub fn native_size(&self) -> (u32, u32) {
        self.frame
            .as_ref()
            .map(|frame| (frame.width, frame.height))
            .unwrap_or((0, 0))
    }

    /// Rendered size of the element.
    pub fn display_size(&self) -> (u32, u32) {
        self.display_size.unwrap_or_else(|| self.native_size())
    }

    pub fn set_display_size(&mut self, width: u32, height: u32) {
        self.display_size = Some((width, height));
    }

    /// Media is usable once it reports non-zero native dimensions.
    pub fn has_dimensions(&self) -> bool {
        let (width, height) = self.native_size();
        width > 0 && height > 0
    }
}

/// Shared handle used by the stream thread, the relay listener and the poller.
#[derive(Clone, Debug, Default)]
pub struct SharedVideo {
    inner: Arc<Mutex<VideoElement>>,
}

impl SharedVideo {
    pub fn new(element: VideoElement) -> Self {
        Self {
            inner: Arc::new(Mutex::new(element)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, VideoElement>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("video element lock poisoned"))
    }
}

/// What a relayed frame event did to the element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayDecision {
    /// The element now shows the relayed frame.
    Applied,
    /// The raw stream is authoritative; the element was left untouched.
    StreamAuthoritative,
}

/// Apply a relayed data-URI frame to the element.
///
/// The source is overwritten unless it currently holds an `http(s)` URL. A
/// payload that fails to decode still replaces the source (the attribute write
/// happens regardless) but leaves the last good frame in place.
pub fn reconcile_relayed_frame(video: &mut VideoElement, data_uri: &str) -> RelayDecision {
    if is_stream_url(video.source().as_str()) {
        return RelayDecision::StreamAuthoritative;
    }
    video.set_source(VideoSource::DataUri(data_uri.to_string()));
    match decode_data_uri(data_uri) {
        Ok(frame) => video.present(frame),
        Err(err) => log::debug!("relayed frame not decodable: {}", err),
    }
    RelayDecision::Applied
}
