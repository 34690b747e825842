//! Thin blocking HTTP helpers shared by the detector, reporter and API client.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Status and (best-effort parsed) JSON body of a completed request.
///
/// Non-2xx responses are returned here rather than as errors so callers can
/// log the server's diagnostics before deciding how to fail.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: Option<Value>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-supplied `detail` (or `error`) text, if any.
    pub fn detail(&self) -> Option<String> {
        let body = self.body.as_ref()?;
        for key in ["detail", "error", "message"] {
            match body.get(key) {
                Some(Value::String(text)) => return Some(text.clone()),
                Some(other) if !other.is_null() => return Some(other.to_string()),
                _ => {}
            }
        }
        None
    }

    /// Convert a rejection into an error carrying the server's detail text.
    pub fn error_for_status(self, what: &str) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let detail = self
            .detail()
            .unwrap_or_else(|| format!("HTTP {}", self.status));
        Err(anyhow!("{} rejected ({}): {}", what, self.status, detail))
    }
}

pub fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

pub fn post_json<T: Serialize>(
    agent: &ureq::Agent,
    url: &str,
    bearer: Option<&str>,
    body: &T,
) -> Result<HttpReply> {
    let payload = serde_json::to_string(body).context("serialize request body")?;
    let mut request = agent.post(url).set("Content-Type", "application/json");
    if let Some(token) = bearer {
        request = request.set("Authorization", &format!("Bearer {}", token));
    }
    into_reply(request.send_string(&payload), url)
}

pub fn post_form(
    agent: &ureq::Agent,
    url: &str,
    bearer: Option<&str>,
    fields: &[(&str, &str)],
) -> Result<HttpReply> {
    let mut request = agent.post(url);
    if let Some(token) = bearer {
        request = request.set("Authorization", &format!("Bearer {}", token));
    }
    into_reply(request.send_form(fields), url)
}

fn into_reply(result: Result<ureq::Response, ureq::Error>, url: &str) -> Result<HttpReply> {
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(err)) => {
            return Err(anyhow!("request to {} failed: {}", url, err));
        }
    };
    let status = response.status();
    let text = response
        .into_string()
        .with_context(|| format!("read response body from {}", url))?;
    let body = serde_json::from_str(&text).ok();
    Ok(HttpReply { status, body })
}
