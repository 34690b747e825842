//! Classwatch
//!
//! Classroom monitoring client: shows a classroom camera, periodically sends
//! the current frame to the backend's object detector, draws the returned
//! boxes over the video, and files a violation report when a phone is seen.
//!
//! # Architecture
//!
//! A running session is a handful of threads around one shared video element:
//!
//! 1. **Frame source**: the camera's MJPEG stream (`ingest`) and, optionally,
//!    frames relayed by the backend over a WebSocket (`relay`). A live stream
//!    is authoritative; relayed frames only fill in when there is none.
//! 2. **Detection poller**: a fixed-period timer with at most one cycle in
//!    flight (`poller`).
//! 3. **Overlay**: bounding boxes scaled from native to displayed size
//!    (`overlay`).
//! 4. **Violation reporter**: threshold plus cooldown in front of the report
//!    endpoint (`report`).
//! 5. **Alert listener**: violation alerts pushed by the backend, kept newest
//!    first (`alerts`).
//!
//! # Module Structure
//!
//! - `api`, `http`, `session`: backend calls and the session token store
//! - `frame`, `display`, `ingest`: frames, the video element and the camera
//! - `detect`, `poller`, `overlay`, `report`: the detection loop
//! - `socket`, `relay`, `alerts`: WebSocket listeners
//! - `monitor`: wires the above into a session with a single teardown

pub mod alerts;
pub mod api;
pub mod cancel;
pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod http;
pub mod ingest;
pub mod monitor;
pub mod overlay;
pub mod poller;
pub mod relay;
pub mod report;
pub mod session;
pub mod socket;

pub use alerts::{Alert, NotificationList};
pub use api::{BackendClient, LoginResponse, SignInResponse};
pub use cancel::CancelToken;
pub use config::MonitorConfig;
pub use detect::{DetectRequest, DetectResponse, Detector, HttpDetector, Prediction};
pub use display::{RelayDecision, SharedVideo, VideoElement, VideoSource};
pub use frame::Frame;
pub use ingest::{HttpStreamConfig, HttpStreamSource};
pub use monitor::{Backends, MonitorSession, RelayMode};
pub use overlay::{DrawSurface, LabelFont, OverlayRenderer, RasterSurface, SharedOverlay};
pub use poller::{DetectionPoller, PollState, TickOutcome};
pub use report::{ReportOutcome, ReportSink, ViolationReport, ViolationReporter};
pub use session::SessionContext;
