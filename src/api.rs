//! Backend client for the authentication and sign-in calls, plus the URL
//! helpers the rest of the crate uses to reach the backend.
//!
//! Rejections carry the server's `detail` text so the caller can show it to
//! the user as-is.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::http::{agent, post_form, post_json, HttpReply};
use crate::session::{SessionContext, ACCESS_TOKEN_KEY, SESSION_TOKEN_KEY};

pub const LOGIN_PATH: &str = "/api/auth/token";
pub const TEACHER_LOGIN_PATH: &str = "/api/teacher/login";
pub const SIGN_IN_PATH: &str = "/api/teacher/sign-in";

/// Port and path the classroom cameras serve their MJPEG stream on.
const CAMERA_STREAM_PORT: u16 = 81;
const CAMERA_STREAM_PATH: &str = "/stream";

#[derive(Clone, Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, alias = "role")]
    pub user_role: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct SignInRequest<'a> {
    qr_payload: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SignInResponse {
    #[serde(default)]
    pub message: Option<String>,
    pub session_token: String,
    #[serde(default)]
    pub class_name: Option<String>,
    /// Camera address of the classroom.
    #[serde(default)]
    pub class_ip: Option<String>,
    #[serde(default)]
    pub class_id: Option<i64>,
}

pub struct BackendClient {
    agent: ureq::Agent,
    base_url: String,
    session: SessionContext,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration, session: SessionContext) -> Self {
        Self {
            agent: agent(timeout),
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse<T: for<'de> Deserialize<'de>>(reply: HttpReply, what: &str) -> Result<T> {
        let reply = reply.error_for_status(what)?;
        let body = reply
            .body
            .ok_or_else(|| anyhow!("{} response was not json", what))?;
        serde_json::from_value(body).with_context(|| format!("parse {} response", what))
    }

    /// Username/password login. Stores the access token in the session.
    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let reply = post_form(
            &self.agent,
            &self.url(LOGIN_PATH),
            None,
            &[("username", username), ("password", password)],
        )?;
        let response: LoginResponse = Self::parse(reply, "login")?;
        self.session.set(ACCESS_TOKEN_KEY, &response.access_token)?;
        log::info!(
            "logged in as {} ({})",
            response.username.as_deref().unwrap_or(username),
            response.user_role.as_deref().unwrap_or("unknown role")
        );
        Ok(response)
    }

    /// Teacher identity login. Stores the token and the teacher id.
    pub fn teacher_login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let reply = post_form(
            &self.agent,
            &self.url(TEACHER_LOGIN_PATH),
            None,
            &[("username", username), ("password", password)],
        )?;
        let response: LoginResponse = Self::parse(reply, "teacher login")?;
        self.session.set(ACCESS_TOKEN_KEY, &response.access_token)?;
        if let Some(user_id) = response.user_id {
            self.session.set_teacher_id(user_id)?;
        }
        if let Some(message) = response.message.as_deref() {
            log::info!("{}", message);
        }
        Ok(response)
    }

    /// Exchange a classroom QR payload for a monitoring session token.
    pub fn sign_in(&self, qr_payload: &str) -> Result<SignInResponse> {
        let token = self
            .session
            .get(ACCESS_TOKEN_KEY)
            .or_else(|| self.session.token())
            .ok_or_else(|| anyhow!("sign-in requires a login first"))?;
        let reply = post_json(
            &self.agent,
            &self.url(SIGN_IN_PATH),
            Some(&token),
            &SignInRequest { qr_payload },
        )?;
        let response: SignInResponse = Self::parse(reply, "sign-in")?;
        self.session.set(SESSION_TOKEN_KEY, &response.session_token)?;
        let class_id = response
            .class_id
            .or_else(|| class_id_from_token(&response.session_token));
        if let Some(class_id) = class_id {
            self.session.set_class_id(class_id)?;
        }
        log::info!(
            "{}",
            response
                .message
                .as_deref()
                .unwrap_or("monitoring session established")
        );
        Ok(response)
    }

    pub fn logout(&self) -> Result<()> {
        self.session.clear()
    }

    /// WebSocket URL for `path` on the backend, with the session token.
    pub fn socket_url(&self, path: &str) -> Result<String> {
        let token = self
            .session
            .token()
            .ok_or_else(|| anyhow!("no session token for socket {}", path))?;
        socket_url(&self.base_url, path, &token)
    }
}

/// Map the HTTP base URL to its WebSocket counterpart and append the token.
pub fn socket_url(base_url: &str, path: &str, token: &str) -> Result<String> {
    let mut url = Url::parse(base_url).with_context(|| format!("parse base url {}", base_url))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(anyhow!("unsupported backend scheme '{}'", other)),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot switch {} to {}", base_url, scheme))?;
    url.set_path(path);
    url.query_pairs_mut().clear().append_pair("token", token);
    Ok(url.to_string())
}

/// Absolute URL for a media path the backend returned.
///
/// Absolute and data URLs pass through unchanged.
pub fn resolve_media_url(base_url: &str, path: &str) -> String {
    let path = path.trim();
    if path.contains("://") || path.starts_with("data:") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Camera stream URL for a classroom's camera address.
pub fn stream_url_for(class_ip: &str) -> Result<String> {
    let class_ip = class_ip.trim();
    if class_ip.is_empty() {
        return Err(anyhow!("classroom has no camera address"));
    }
    if class_ip.starts_with("http://") || class_ip.starts_with("https://") {
        return Ok(class_ip.to_string());
    }
    let mut url = Url::parse(&format!("http://{}", class_ip))
        .with_context(|| format!("parse camera address {}", class_ip))?;
    if url.port().is_none() {
        url.set_port(Some(CAMERA_STREAM_PORT))
            .map_err(|_| anyhow!("cannot set port on {}", class_ip))?;
    }
    if url.path() == "/" {
        url.set_path(CAMERA_STREAM_PATH);
    }
    Ok(url.to_string())
}

/// Read the `class_id` claim from a session token without verifying it.
///
/// Only used to learn which classroom a session belongs to; the backend is
/// the one that validates the token.
pub fn class_id_from_token(token: &str) -> Option<i64> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    match claims.get("class_id")? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

    #[test]
    fn socket_url_maps_scheme_and_appends_token() {
        assert_eq!(
            socket_url("http://localhost:8000", "/ws/alerts/7", "abc").unwrap(),
            "ws://localhost:8000/ws/alerts/7?token=abc"
        );
        assert_eq!(
            socket_url("https://monitor.school.edu/", "/ws/stream/3", "t").unwrap(),
            "wss://monitor.school.edu/ws/stream/3?token=t"
        );
        assert!(socket_url("ftp://x", "/ws", "t").is_err());
    }

    #[test]
    fn media_paths_resolve_against_base() {
        assert_eq!(
            resolve_media_url("http://localhost:8000/", "uploads/evidence/v.jpg"),
            "http://localhost:8000/uploads/evidence/v.jpg"
        );
        assert_eq!(
            resolve_media_url("http://localhost:8000", "http://cdn/v.jpg"),
            "http://cdn/v.jpg"
        );
    }

    #[test]
    fn stream_url_from_camera_address() {
        assert_eq!(
            stream_url_for("192.168.1.40").unwrap(),
            "http://192.168.1.40:81/stream"
        );
        assert_eq!(
            stream_url_for("192.168.1.40:8080").unwrap(),
            "http://192.168.1.40:8080/stream"
        );
        assert_eq!(
            stream_url_for("http://cam.local/mjpeg").unwrap(),
            "http://cam.local/mjpeg"
        );
        assert!(stream_url_for("  ").is_err());
    }

    #[test]
    fn class_id_claim_is_read() {
        let claims = URL_SAFE_NO_PAD.encode(r#"{"sub":"4","role":"TeacherSession","class_id":12}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", claims);
        assert_eq!(class_id_from_token(&token), Some(12));
        assert_eq!(class_id_from_token("opaque"), None);
    }
}
