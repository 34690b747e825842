use anyhow::{anyhow, Result};
use std::time::Duration;

use super::backend::{DetectRequest, Detector};
use super::prediction::DetectResponse;
use crate::http::{agent, post_json};
use crate::session::SessionContext;

pub const DETECT_PATH: &str = "/api/admin/detect";

/// Detector reached over HTTP (`POST /api/admin/detect`).
pub struct HttpDetector {
    agent: ureq::Agent,
    url: String,
    session: SessionContext,
}

impl HttpDetector {
    pub fn new(base_url: &str, timeout: Duration, session: SessionContext) -> Self {
        Self {
            agent: agent(timeout),
            url: format!("{}{}", base_url.trim_end_matches('/'), DETECT_PATH),
            session,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Detector for HttpDetector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn detect(&self, request: &DetectRequest) -> Result<DetectResponse> {
        let token = self.session.token();
        let reply = post_json(&self.agent, &self.url, token.as_deref(), request)?;
        if !reply.is_success() {
            log::warn!(
                "detector returned HTTP {}: {}",
                reply.status,
                reply
                    .body
                    .as_ref()
                    .map(|body| body.to_string())
                    .unwrap_or_else(|| "<no json body>".to_string())
            );
            return Err(anyhow!("detector returned HTTP {}", reply.status));
        }
        let body = reply
            .body
            .ok_or_else(|| anyhow!("detector response was not json"))?;
        let response: DetectResponse =
            serde_json::from_value(body).map_err(|e| anyhow!("parse detector response: {}", e))?;
        if let Some(error) = response.error.as_deref() {
            log::warn!("detector reported an error: {}", error);
        }
        Ok(response)
    }
}
