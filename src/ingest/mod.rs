//! Camera stream ingestion.
//!
//! The stream thread owns the raw HTTP camera connection and is the only
//! writer of `http(s)` sources on the shared video element. While it is
//! connected the stream is authoritative; when it fails, the element is
//! reset to empty so relayed frames can take over until the next reconnect.

pub mod http;

use anyhow::{anyhow, Result};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::display::{SharedVideo, VideoSource};

pub use http::{HttpStreamConfig, HttpStreamSource};

const RETRY_DELAY: Duration = Duration::from_secs(3);
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Running stream thread.
#[derive(Debug)]
pub struct StreamHandle {
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Wait for the thread; the caller cancels the token first.
    ///
    /// A thread blocked inside a read notices cancellation once the read
    /// returns.
    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("camera stream thread panicked"))?;
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }
}

pub fn spawn_stream(
    config: HttpStreamConfig,
    video: SharedVideo,
    cancel: CancelToken,
) -> Result<StreamHandle> {
    let mut source = HttpStreamSource::new(config)?;
    let join = std::thread::Builder::new()
        .name("camera-stream".to_string())
        .spawn(move || run_stream(&mut source, &video, &cancel))?;
    Ok(StreamHandle { join: Some(join) })
}

fn run_stream(source: &mut HttpStreamSource, video: &SharedVideo, cancel: &CancelToken) {
    while !cancel.is_cancelled() {
        if let Err(err) = stream_until_error(source, video, cancel) {
            log::warn!("camera stream {} failed: {:#}", source.url(), err);
        }
        if let Err(err) = video.lock().map(|mut video| {
            if matches!(video.source(), VideoSource::Url(url) if url == source.url()) {
                video.reset();
            }
        }) {
            log::error!("camera stream could not reset video: {:#}", err);
            return;
        }
        sleep_unless_cancelled(RETRY_DELAY, cancel);
    }
    log::info!(
        "camera stream stopped after {} frames",
        source.frames_captured()
    );
}

fn stream_until_error(
    source: &mut HttpStreamSource,
    video: &SharedVideo,
    cancel: &CancelToken,
) -> Result<()> {
    source.connect()?;
    log::info!("camera stream connected: {}", source.url());
    video
        .lock()?
        .set_source(VideoSource::Url(source.url().to_string()));
    while !cancel.is_cancelled() {
        let frame = source.next_frame()?;
        video.lock()?.present(frame);
    }
    Ok(())
}

fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() && Instant::now() < deadline {
        std::thread::sleep(CANCEL_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{reconcile_relayed_frame, RelayDecision, VideoElement};
    use crate::frame::Frame;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// MJPEG camera that sends one part, then hangs up when told to.
    fn one_part_camera(jpeg: Vec<u8>) -> (String, mpsc::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (hang_up, wait) = mpsc::channel::<()>();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = stream.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\n\r\n",
            );
            let _ = stream.write_all(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            let _ = stream.write_all(&jpeg);
            let _ = stream.write_all(b"\r\n");
            let _ = stream.flush();
            let _ = wait.recv();
        });
        (format!("http://{}/stream", addr), hang_up)
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let until = Instant::now() + Duration::from_secs(5);
        while Instant::now() < until {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn failed_stream_hands_video_to_relay() {
        let jpeg = Frame::filled(24, 16, [10, 200, 10]).encode_jpeg(80).unwrap();
        let (url, hang_up) = one_part_camera(jpeg);
        let relayed = Frame::filled(8, 8, [0, 0, 0]).to_data_uri(80).unwrap();
        let video = SharedVideo::new(VideoElement::new());
        let cancel = CancelToken::new();
        let handle = spawn_stream(
            HttpStreamConfig {
                url: url.clone(),
                target_fps: 0,
                ..HttpStreamConfig::default()
            },
            video.clone(),
            cancel.clone(),
        )
        .unwrap();

        assert!(wait_until(|| video.lock().unwrap().frame().is_some()));
        {
            let mut element = video.lock().unwrap();
            assert_eq!(element.source(), &VideoSource::Url(url));
            assert_eq!(element.native_size(), (24, 16));
            assert_eq!(
                reconcile_relayed_frame(&mut element, &relayed),
                RelayDecision::StreamAuthoritative
            );
        }

        hang_up.send(()).unwrap();
        assert!(wait_until(|| video.lock().unwrap().source() == &VideoSource::Empty));
        {
            let mut element = video.lock().unwrap();
            assert!(element.frame().is_none());
            assert_eq!(
                reconcile_relayed_frame(&mut element, &relayed),
                RelayDecision::Applied
            );
            assert_eq!(element.native_size(), (8, 8));
        }

        cancel.cancel();
        handle.join().unwrap();
        assert_eq!(
            video.lock().unwrap().source(),
            &VideoSource::DataUri(relayed)
        );
    }
}
