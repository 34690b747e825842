//! Alert session listener.
//!
//! Push notifications arrive over `/ws/alerts/{id}`. The backend sends either
//! a JSON object (violation alerts) or a bare JSON string (session notices);
//! both land in a bounded notification list, newest first.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::api::resolve_media_url;
use crate::cancel::CancelToken;
use crate::socket::{spawn_listener, ListenerHandle};

pub const MAX_NOTIFICATIONS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub message: String,
    /// Evidence image, if the alert carries one.
    pub image_url: Option<String>,
    /// Server timestamp when supplied, as sent; numeric stamps as decimal text.
    pub timestamp: Option<String>,
    /// Local receipt time, seconds since the epoch.
    pub received_at: u64,
}

fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.clone()),
        _ => None,
    })
}

/// Like `text_field`, but numbers (e.g. epoch timestamps) are kept as their
/// decimal text.
fn scalar_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => text_field(value, &[*key]),
    })
}

/// Parse an alert payload; returns `None` for payloads with no message text.
pub fn parse_alert(text: &str) -> Option<Alert> {
    let received_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) if !text.trim().is_empty() => Value::String(text.trim().to_string()),
        Err(_) => return None,
    };
    match value {
        Value::String(message) if !message.trim().is_empty() => Some(Alert {
            message,
            image_url: None,
            timestamp: None,
            received_at,
        }),
        Value::Object(_) => {
            let message = text_field(&value, &["message", "detail"])?;
            Some(Alert {
                message,
                image_url: text_field(&value, &["image_url", "image_path", "crop_url"]),
                timestamp: scalar_field(&value, &["timestamp"]),
                received_at,
            })
        }
        _ => None,
    }
}

/// Bounded, newest-first list of received alerts.
#[derive(Clone, Debug, Default)]
pub struct NotificationList {
    inner: Arc<Mutex<Notifications>>,
}

#[derive(Debug, Default)]
struct Notifications {
    alerts: VecDeque<Alert>,
    /// Alerts ever pushed, including ones since truncated.
    received: u64,
}

impl NotificationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, alert: Alert) -> Result<()> {
        let mut list = self
            .inner
            .lock()
            .map_err(|_| anyhow!("notification list lock poisoned"))?;
        list.alerts.push_front(alert);
        list.alerts.truncate(MAX_NOTIFICATIONS);
        list.received += 1;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        self.inner
            .lock()
            .map(|list| list.alerts.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Alerts pushed after the first `seen`, newest first, and the new count
    /// to pass next time. Alerts already truncated away are not returned.
    pub fn since(&self, seen: u64) -> (Vec<Alert>, u64) {
        match self.inner.lock() {
            Ok(list) => {
                let fresh = list.received.saturating_sub(seen) as usize;
                let alerts = list.alerts.iter().take(fresh).cloned().collect();
                (alerts, list.received)
            }
            Err(_) => (Vec::new(), seen),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|list| list.alerts.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse, resolve relative evidence paths against `base_url`, and store.
pub fn ingest_alert(text: &str, base_url: &str, notifications: &NotificationList) -> Result<bool> {
    let Some(mut alert) = parse_alert(text) else {
        return Ok(false);
    };
    alert.image_url = alert
        .image_url
        .map(|path| resolve_media_url(base_url, &path));
    log::info!("alert: {}", alert.message);
    notifications.push(alert)?;
    Ok(true)
}

pub fn spawn_alerts(
    url: String,
    base_url: String,
    notifications: NotificationList,
    cancel: CancelToken,
) -> Result<ListenerHandle> {
    spawn_listener("alerts", url, cancel, move |text| {
        if let Err(err) = ingest_alert(text, &base_url, &notifications) {
            log::warn!("alert dropped: {:#}", err);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_violation_alert_object() {
        let alert = parse_alert(
            r#"{"message": "🚨 Phone detected (88% confidence)", "image_url": "http://localhost:8000/uploads/evidence/v.jpg"}"#,
        )
        .unwrap();
        assert_eq!(alert.message, "🚨 Phone detected (88% confidence)");
        assert_eq!(
            alert.image_url.as_deref(),
            Some("http://localhost:8000/uploads/evidence/v.jpg")
        );
    }

    #[test]
    fn falls_back_through_alternate_keys() {
        let alert = parse_alert(
            r#"{"detail": "Phone detected", "crop_url": "uploads/c.jpg", "timestamp": "2024-05-01T10:00:00"}"#,
        )
        .unwrap();
        assert_eq!(alert.message, "Phone detected");
        assert_eq!(alert.image_url.as_deref(), Some("uploads/c.jpg"));
        assert_eq!(alert.timestamp.as_deref(), Some("2024-05-01T10:00:00"));
    }

    #[test]
    fn numeric_timestamp_is_kept() {
        let alert = parse_alert(r#"{"message": "m", "timestamp": 1714557600}"#).unwrap();
        assert_eq!(alert.timestamp.as_deref(), Some("1714557600"));
        let alert = parse_alert(r#"{"message": "m", "timestamp": 1714557600.25}"#).unwrap();
        assert_eq!(alert.timestamp.as_deref(), Some("1714557600.25"));
        let alert = parse_alert(r#"{"message": "m", "timestamp": null}"#).unwrap();
        assert!(alert.timestamp.is_none());
    }

    #[test]
    fn bare_string_is_a_notice() {
        let alert = parse_alert(r#""✅ Monitoring session started for Room 4""#).unwrap();
        assert_eq!(alert.message, "✅ Monitoring session started for Room 4");
        assert!(alert.image_url.is_none());
    }

    #[test]
    fn payload_without_message_is_ignored() {
        assert!(parse_alert(r#"{"image_url": "x.jpg"}"#).is_none());
        assert!(parse_alert("   ").is_none());
        assert!(parse_alert("42").is_none());
    }

    #[test]
    fn list_is_newest_first_and_bounded() {
        let list = NotificationList::new();
        for i in 0..(MAX_NOTIFICATIONS + 5) {
            ingest_alert(&format!(r#"{{"message": "alert {}"}}"#, i), "http://h", &list).unwrap();
        }
        let snapshot = list.snapshot();
        assert_eq!(snapshot.len(), MAX_NOTIFICATIONS);
        assert_eq!(snapshot[0].message, format!("alert {}", MAX_NOTIFICATIONS + 4));
    }

    #[test]
    fn relative_evidence_path_is_resolved() {
        let list = NotificationList::new();
        ingest_alert(
            r#"{"message": "m", "image_path": "uploads/evidence/a.jpg"}"#,
            "http://localhost:8000",
            &list,
        )
        .unwrap();
        assert_eq!(
            list.snapshot()[0].image_url.as_deref(),
            Some("http://localhost:8000/uploads/evidence/a.jpg")
        );
    }

    #[test]
    fn since_returns_only_unseen_alerts() {
        let list = NotificationList::new();
        ingest_alert("first", "http://h", &list).unwrap();
        let (fresh, seen) = list.since(0);
        assert_eq!(fresh.len(), 1);
        assert_eq!(seen, 1);

        ingest_alert("second", "http://h", &list).unwrap();
        ingest_alert("third", "http://h", &list).unwrap();
        let (fresh, seen) = list.since(seen);
        let messages: Vec<_> = fresh.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages, vec!["third", "second"]);
        assert_eq!(seen, 3);
        assert!(list.since(seen).0.is_empty());
    }
}
