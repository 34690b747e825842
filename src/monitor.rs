//! A monitoring session: the camera stream, the detection poll loop, and the
//! relay and alert sockets wired around one shared video element.
//!
//! Everything a session starts is tied to a single `CancelToken`, so
//! `teardown` stops the timer, the sockets and the stream together and no
//! in-flight cycle applies its result afterwards.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::alerts::{spawn_alerts, Alert, NotificationList};
use crate::api::{socket_url, stream_url_for};
use crate::cancel::CancelToken;
use crate::config::MonitorConfig;
use crate::detect::{Detector, HttpDetector};
use crate::display::{SharedVideo, VideoElement};
use crate::frame::Frame;
use crate::ingest::{spawn_stream, HttpStreamConfig, StreamHandle};
use crate::overlay::{LabelFont, OverlayRenderer, SharedOverlay};
use crate::poller::{self, DetectionPoller, PollerConfig, PollerHandle};
use crate::relay::{spawn_relay, RelayHandler};
use crate::report::{HttpReportSink, ReportSink, ReporterConfig, ViolationReporter};
use crate::session::SessionContext;
use crate::socket::ListenerHandle;

/// Whether the session also listens to the backend's frame relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayMode {
    WithRelay,
    WithoutRelay,
}

impl RelayMode {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            RelayMode::WithRelay
        } else {
            RelayMode::WithoutRelay
        }
    }
}

/// Backends a session reports to. `http` builds the production pair.
pub struct Backends {
    pub detector: Arc<dyn Detector>,
    pub sink: Box<dyn ReportSink>,
}

impl Backends {
    pub fn http(config: &MonitorConfig, session: &SessionContext) -> Self {
        Self {
            detector: Arc::new(HttpDetector::new(
                &config.api_url,
                config.api_timeout,
                session.clone(),
            )),
            sink: Box::new(HttpReportSink::new(
                &config.api_url,
                config.api_timeout,
                session.clone(),
            )),
        }
    }
}

pub struct MonitorSession {
    cancel: CancelToken,
    video: SharedVideo,
    overlay: SharedOverlay,
    notifications: NotificationList,
    poller: Arc<DetectionPoller>,
    poll_handle: Option<PollerHandle>,
    stream: Option<StreamHandle>,
    relay: Option<ListenerHandle>,
    alerts: Option<ListenerHandle>,
}

impl MonitorSession {
    /// Start a session against the HTTP backends in `config`.
    ///
    /// `class_ip` is the camera address from sign-in; an explicit stream URL
    /// in the config wins over it.
    pub fn start(
        config: &MonitorConfig,
        session: SessionContext,
        class_ip: Option<&str>,
    ) -> Result<Self> {
        let backends = Backends::http(config, &session);
        Self::start_with(config, session, class_ip, backends)
    }

    pub fn start_with(
        config: &MonitorConfig,
        session: SessionContext,
        class_ip: Option<&str>,
        backends: Backends,
    ) -> Result<Self> {
        let token = session
            .token()
            .ok_or_else(|| anyhow!("monitoring requires a signed-in session"))?;
        let cancel = CancelToken::new();
        let video = SharedVideo::new(match config.display_size {
            Some((width, height)) => VideoElement::with_display_size(width, height),
            None => VideoElement::new(),
        });
        let font = LabelFont::discover(config.label_font.as_deref());
        let overlay = SharedOverlay::with_font(font);
        let renderer = OverlayRenderer::new(&config.detection.target_class);
        let notifications = NotificationList::new();

        let reporter = ViolationReporter::new(
            ReporterConfig {
                target_class: config.detection.target_class.clone(),
                confidence_threshold: config.detection.confidence_threshold,
                cooldown: config.detection.cooldown,
            },
            backends.sink,
        );
        let poller = Arc::new(DetectionPoller::new(
            PollerConfig {
                jpeg_quality: config.detection.jpeg_quality,
            },
            video.clone(),
            overlay.clone(),
            renderer.clone(),
            backends.detector,
            reporter,
            session.clone(),
            cancel.clone(),
        ));

        let mut monitor = Self {
            cancel: cancel.clone(),
            video: video.clone(),
            overlay: overlay.clone(),
            notifications: notifications.clone(),
            poller: poller.clone(),
            poll_handle: None,
            stream: None,
            relay: None,
            alerts: None,
        };

        let stream_url = match (&config.stream.url, class_ip) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(ip)) => Some(stream_url_for(ip)?),
            (None, None) => None,
        };
        match stream_url {
            Some(url) => {
                log::info!("camera stream: {}", url);
                monitor.stream = Some(spawn_stream(
                    HttpStreamConfig {
                        url,
                        target_fps: config.stream.target_fps,
                        ..HttpStreamConfig::default()
                    },
                    video.clone(),
                    cancel.clone(),
                )?);
            }
            None => log::warn!("no camera stream configured; relying on relayed frames"),
        }

        let relay_mode = RelayMode::from_enabled(config.relay_enabled);
        match (relay_mode, session.class_id()) {
            (RelayMode::WithRelay, Some(class_id)) => {
                let path = format!("{}/ws/stream/{}", config.socket_prefix, class_id);
                let handler = RelayHandler::new(video.clone(), overlay.clone(), renderer);
                monitor.relay = Some(spawn_relay(
                    socket_url(&config.api_url, &path, &token)?,
                    handler,
                    cancel.clone(),
                )?);
            }
            (RelayMode::WithRelay, None) => {
                log::warn!("relay enabled but the session has no class id; relay not started")
            }
            (RelayMode::WithoutRelay, _) => log::info!("frame relay disabled"),
        }

        match session.teacher_id() {
            Some(teacher_id) => {
                let path = format!("{}/ws/alerts/{}", config.socket_prefix, teacher_id);
                monitor.alerts = Some(spawn_alerts(
                    socket_url(&config.api_url, &path, &token)?,
                    config.api_url.clone(),
                    notifications,
                    cancel.clone(),
                )?);
            }
            None => log::warn!("session has no teacher id; violation alerts not received"),
        }

        monitor.poll_handle = Some(poller::spawn(
            poller,
            config.detection.poll_interval,
            cancel,
        )?);
        log::info!(
            "monitoring for '{}' every {} ms",
            config.detection.target_class,
            config.detection.poll_interval.as_millis()
        );
        Ok(monitor)
    }

    pub fn video(&self) -> &SharedVideo {
        &self.video
    }

    pub fn overlay(&self) -> &SharedOverlay {
        &self.overlay
    }

    pub fn poller(&self) -> &Arc<DetectionPoller> {
        &self.poller
    }

    /// Alerts received so far, newest first.
    pub fn notifications(&self) -> Vec<Alert> {
        self.notifications.snapshot()
    }

    pub fn notification_list(&self) -> &NotificationList {
        &self.notifications
    }

    pub fn is_relay_running(&self) -> bool {
        self.relay.as_ref().map_or(false, |relay| !relay.is_finished())
    }

    /// The current frame with the overlay composited on top, if the video
    /// has one.
    pub fn annotated_frame(&self) -> Result<Option<Frame>> {
        let frame = match self.video.lock()?.frame() {
            Some(frame) => frame.clone(),
            None => return Ok(None),
        };
        let image = self.overlay.lock()?.surface.composite_onto(&frame)?;
        let (width, height) = image.dimensions();
        Frame::from_rgb(image.into_raw(), width, height).map(Some)
    }

    /// Stop every loop the session started and wait for its threads.
    pub fn teardown(mut self) -> Result<()> {
        self.cancel.cancel();
        let mut first_err = None;
        if let Some(handle) = self.poll_handle.take() {
            record(&mut first_err, handle.stop());
        }
        if let Some(handle) = self.relay.take() {
            record(&mut first_err, handle.join());
        }
        if let Some(handle) = self.alerts.take() {
            record(&mut first_err, handle.join());
        }
        if let Some(handle) = self.stream.take() {
            record(&mut first_err, handle.join());
        }
        log::info!("monitoring session torn down");
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn record(first_err: &mut Option<anyhow::Error>, result: Result<()>) {
    if let Err(err) = result {
        log::warn!("teardown: {:#}", err);
        first_err.get_or_insert(err);
    }
}
