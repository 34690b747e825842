//! Captured frames and their data-URI encoding.
//!
//! A `Frame` is the off-screen bitmap the poller captures from the visible
//! video: RGB8 pixels at the source media's native resolution. Frames leave
//! the process only as JPEG data URIs, either to the detector or as report
//! evidence.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{GenericImageView, RgbImage};

pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Upper bound on a decoded relay/stream payload.
pub const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap RGB8 pixels. The buffer length must match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "rgb buffer is {} bytes; expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Solid-color frame, mostly useful for tests and placeholders.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Decode a JPEG (or any format the `image` build supports).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(anyhow!("encoded frame exceeds {} bytes", MAX_JPEG_BYTES));
        }
        let image = image::load_from_memory(bytes).context("decode frame")?;
        let (width, height) = image.dimensions();
        Ok(Self {
            pixels: image.into_rgb8().into_raw(),
            width,
            height,
        })
    }

    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }

    /// Compress to JPEG. `quality` is clamped into 1..=100.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        if !self.has_dimensions() {
            return Err(anyhow!("cannot encode a frame without dimensions"));
        }
        let image = self.to_image()?;
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.encode_image(&image).context("encode jpeg")?;
        Ok(out)
    }

    pub fn to_data_uri(&self, quality: u8) -> Result<String> {
        let jpeg = self.encode_jpeg(quality)?;
        Ok(format!("{}{}", JPEG_DATA_URI_PREFIX, STANDARD.encode(jpeg)))
    }
}

/// Decode the payload of a data URI (`data:<mime>;base64,<payload>`).
///
/// A bare base64 string without the `data:` header is accepted too.
pub fn data_uri_bytes(uri: &str) -> Result<Vec<u8>> {
    let uri = uri.trim();
    let payload = match uri.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| anyhow!("data uri missing ',' separator"))?;
            if !header.ends_with(";base64") {
                return Err(anyhow!("data uri is not base64 encoded"));
            }
            payload
        }
        None => uri,
    };
    STANDARD.decode(payload).context("decode base64 payload")
}

pub fn decode_data_uri(uri: &str) -> Result<Frame> {
    let bytes = data_uri_bytes(uri)?;
    Frame::decode(&bytes)
}
