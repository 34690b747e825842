mod backend;
mod http;
mod prediction;

pub use backend::{DetectRequest, Detector};
pub use http::HttpDetector;
pub use prediction::{DetectResponse, Prediction};
