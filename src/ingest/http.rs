//! Raw HTTP camera stream.
//!
//! Classroom cameras serve MJPEG (`multipart/x-mixed-replace`) or single
//! JPEG snapshots over HTTP. `HttpStreamSource` handles both: multipart
//! responses are scanned for JPEG SOI/EOI markers, anything else is re-fetched
//! as one snapshot per frame. Snapshot fetches are paced to the target frame
//! rate; MJPEG frames arriving faster than it are dropped.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use crate::frame::{Frame, MAX_JPEG_BYTES};

#[derive(Clone, Debug)]
pub struct HttpStreamConfig {
    /// Stream URL; http(s) only.
    pub url: String,
    /// Frames per second to keep; extra frames are dropped. 0 keeps all.
    pub target_fps: u32,
    pub connect_timeout: Duration,
    /// Bounds a stalled read, and with it how long teardown waits.
    pub read_timeout: Duration,
}

impl Default for HttpStreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            target_fps: 10,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpStreamSource {
    config: HttpStreamConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    /// `pending` holds the snapshot read by `connect()`.
    SingleJpeg { pending: Option<Vec<u8>> },
}

impl HttpStreamSource {
    pub fn new(config: HttpStreamConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse stream url")?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http(s)",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            frame_count: 0,
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            let snapshot = read_snapshot(response)?;
            self.stream = Some(HttpStream::SingleJpeg {
                pending: Some(snapshot),
            });
        }
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        let min_interval = frame_interval(self.config.target_fps);
        loop {
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| anyhow!("camera stream not connected; call connect() first"))?;
            let (jpeg_bytes, paced) = match stream {
                HttpStream::Mjpeg(stream) => (stream.read_next_jpeg()?, false),
                HttpStream::SingleJpeg { pending } => match pending.take() {
                    Some(bytes) => (bytes, true),
                    None => {
                        if let Some(last) = self.last_frame_at {
                            let elapsed = last.elapsed();
                            if elapsed < min_interval {
                                std::thread::sleep(min_interval - elapsed);
                            }
                        }
                        (fetch_single_jpeg(&self.agent, &self.config.url)?, true)
                    }
                },
            };

            let now = Instant::now();
            if !paced {
                if let Some(last) = self.last_frame_at {
                    if now.duration_since(last) < min_interval {
                        continue;
                    }
                }
            }

            let frame = Frame::decode(&jpeg_bytes)?;
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(frame);
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_snapshot(response)
}

fn read_snapshot(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Byte range of the first complete JPEG (SOI..=EOI) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Cursor, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Snapshot camera: answers every GET with one JPEG and counts requests.
    fn snapshot_camera(jpeg: Vec<u8>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    jpeg.len()
                );
                let _ = stream.write_all(&jpeg);
                let _ = stream.flush();
            }
        });
        (format!("http://{}/capture", addr), hits)
    }

    #[test]
    fn finds_jpeg_between_markers() {
        let buffer = [0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(find_jpeg_bounds(&buffer), Some((2, 8)));
        assert_eq!(find_jpeg_bounds(&buffer[..7]), None);
        assert_eq!(find_jpeg_bounds(&[0x01, 0x02]), None);
    }

    #[test]
    fn mjpeg_stream_splits_multipart_body() {
        let jpeg = Frame::filled(8, 8, [50, 60, 70]).encode_jpeg(80).unwrap();
        let mut body = Vec::new();
        for _ in 0..2 {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg);
            body.extend_from_slice(b"\r\n");
        }
        let mut stream = MjpegStream::new(Box::new(Cursor::new(body)));
        let first = stream.read_next_jpeg().unwrap();
        assert_eq!(first, jpeg);
        let second = Frame::decode(&stream.read_next_jpeg().unwrap()).unwrap();
        assert_eq!((second.width, second.height), (8, 8));
        assert!(stream.read_next_jpeg().is_err());
    }

    #[test]
    fn rejects_non_http_urls() {
        let config = HttpStreamConfig {
            url: "rtsp://cam/stream".to_string(),
            ..HttpStreamConfig::default()
        };
        assert!(HttpStreamSource::new(config).is_err());
    }

    #[test]
    fn next_frame_requires_connect() {
        let mut source = HttpStreamSource::new(HttpStreamConfig::default()).unwrap();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn snapshot_camera_is_fetched_once_per_frame() {
        let jpeg = Frame::filled(16, 12, [90, 30, 30]).encode_jpeg(80).unwrap();
        let (url, hits) = snapshot_camera(jpeg);
        let mut source = HttpStreamSource::new(HttpStreamConfig {
            url,
            target_fps: 10,
            ..HttpStreamConfig::default()
        })
        .unwrap();

        source.connect().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        for _ in 0..3 {
            let frame = source.next_frame().unwrap();
            assert_eq!((frame.width, frame.height), (16, 12));
        }
        // The connect response is the first frame; the next two wait out
        // the 100 ms frame interval before fetching.
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(source.frames_captured(), 3);
        assert!(started.elapsed() >= Duration::from_millis(180));
    }
}
