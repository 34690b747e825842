//! Violation reporter.
//!
//! Turns a qualifying detection into a report filed with the backend,
//! throttled by a cooldown window. Failed reports are logged and never
//! retried; a later qualifying detection may succeed instead.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::detect::Prediction;
use crate::http::{agent, post_json};
use crate::session::SessionContext;

pub const REPORT_PATH: &str = "/api/admin/report-violation";

/// Payload of `POST /api/admin/report-violation`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViolationReport {
    pub class_id: i64,
    pub teacher_id: i64,
    pub detail: String,
    /// Captured frame as a data URI.
    pub evidence: String,
}

/// Where accepted reports go.
pub trait ReportSink: Send + Sync {
    fn submit(&self, report: &ViolationReport) -> Result<()>;
}

/// Files reports with the backend using the session's bearer token.
pub struct HttpReportSink {
    agent: ureq::Agent,
    url: String,
    session: SessionContext,
}

impl HttpReportSink {
    pub fn new(base_url: &str, timeout: Duration, session: SessionContext) -> Self {
        Self {
            agent: agent(timeout),
            url: format!("{}{}", base_url.trim_end_matches('/'), REPORT_PATH),
            session,
        }
    }
}

impl ReportSink for HttpReportSink {
    fn submit(&self, report: &ViolationReport) -> Result<()> {
        let token = self
            .session
            .token()
            .ok_or_else(|| anyhow!("no session token for violation report"))?;
        post_json(&self.agent, &self.url, Some(&token), report)?.error_for_status("violation report")?;
        Ok(())
    }
}

/// Minimum spacing between accepted reports.
///
/// Time is passed in explicitly so callers (and tests) control the clock.
#[derive(Clone, Debug)]
pub struct Cooldown {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accepts and records `now` when the window has elapsed since the last
    /// accepted instant. The timestamp is never reset otherwise.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) <= self.window {
                return false;
            }
        }
        self.last_accepted = Some(now);
        true
    }
}

/// Result of evaluating one prediction list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    /// No prediction of the target class above the threshold.
    NoMatch,
    /// A match, but inside the cooldown window.
    CoolingDown,
    /// The detector already saved evidence; acknowledged without re-sending.
    AcknowledgedLocally { evidence_url: String },
    Sent { detail: String },
    /// Sending failed; logged, not retried.
    Failed { error: String },
}

#[derive(Clone, Debug)]
pub struct ReporterConfig {
    pub target_class: String,
    pub confidence_threshold: f32,
    pub cooldown: Duration,
}

pub struct ViolationReporter {
    target_class: String,
    confidence_threshold: f32,
    cooldown: Cooldown,
    sink: Box<dyn ReportSink>,
}

impl ViolationReporter {
    pub fn new(config: ReporterConfig, sink: Box<dyn ReportSink>) -> Self {
        Self {
            target_class: config.target_class,
            confidence_threshold: config.confidence_threshold,
            cooldown: Cooldown::new(config.cooldown),
            sink,
        }
    }

    /// Highest-confidence prediction of the target class above the threshold.
    pub fn qualifying<'a>(&self, predictions: &'a [Prediction]) -> Option<&'a Prediction> {
        predictions
            .iter()
            .filter(|p| p.is_class(&self.target_class) && p.conf > self.confidence_threshold)
            .max_by(|a, b| a.conf.total_cmp(&b.conf))
    }

    /// Check predictions and file a report when one qualifies.
    ///
    /// `evidence` is only invoked once a report is actually going to be sent,
    /// so callers can defer the JPEG encode.
    pub fn evaluate(
        &mut self,
        predictions: &[Prediction],
        server_evidence: Option<&str>,
        ids: (i64, i64),
        evidence: impl FnOnce() -> Result<String>,
        now: Instant,
    ) -> ReportOutcome {
        let Some(hit) = self.qualifying(predictions) else {
            return ReportOutcome::NoMatch;
        };
        let confidence_pct = (hit.conf * 100.0).round() as u32;
        if !self.cooldown.try_accept(now) {
            log::debug!(
                "{} at {}% inside {}s cooldown; not reported",
                hit.class,
                confidence_pct,
                self.cooldown.window().as_secs()
            );
            return ReportOutcome::CoolingDown;
        }

        if let Some(url) = server_evidence.filter(|url| !url.trim().is_empty()) {
            log::info!("detector saved evidence at {}; report acknowledged", url);
            return ReportOutcome::AcknowledgedLocally {
                evidence_url: url.to_string(),
            };
        }

        let detail = format!("Phone detected ({}% confidence)", confidence_pct);
        let (class_id, teacher_id) = ids;
        let result = evidence().and_then(|evidence| {
            let report = ViolationReport {
                class_id,
                teacher_id,
                detail: detail.clone(),
                evidence,
            };
            self.sink.submit(&report)
        });
        match result {
            Ok(()) => {
                log::info!("violation reported for class {}: {}", class_id, detail);
                ReportOutcome::Sent { detail }
            }
            Err(err) => {
                log::warn!("violation report failed: {:#}", err);
                ReportOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        reports: Arc<Mutex<Vec<ViolationReport>>>,
        fail: bool,
    }

    impl ReportSink for RecordingSink {
        fn submit(&self, report: &ViolationReport) -> Result<()> {
            if self.fail {
                return Err(anyhow!("backend unavailable"));
            }
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn reporter(sink: RecordingSink) -> ViolationReporter {
        ViolationReporter::new(
            ReporterConfig {
                target_class: "cell phone".to_string(),
                confidence_threshold: 0.35,
                cooldown: Duration::from_secs(12),
            },
            Box::new(sink),
        )
    }

    fn phone(conf: f32) -> Vec<Prediction> {
        vec![Prediction::new("cell phone", conf, 10.0, 10.0, 50.0, 50.0)]
    }

    fn evidence() -> Result<String> {
        Ok("data:image/jpeg;base64,AAAA".to_string())
    }

    #[test]
    fn cooldown_accepts_after_window() {
        let start = Instant::now();
        let mut cooldown = Cooldown::new(Duration::from_secs(12));
        assert!(cooldown.try_accept(start));
        assert!(!cooldown.try_accept(start + Duration::from_secs(5)));
        assert!(cooldown.try_accept(start + Duration::from_secs(13)));
    }

    #[test]
    fn detections_five_seconds_apart_send_one_report() {
        let sink = RecordingSink::default();
        let mut reporter = reporter(sink.clone());
        let start = Instant::now();
        let first = reporter.evaluate(&phone(0.5), None, (1, 2), evidence, start);
        let second = reporter.evaluate(
            &phone(0.5),
            None,
            (1, 2),
            evidence,
            start + Duration::from_secs(5),
        );
        assert!(matches!(first, ReportOutcome::Sent { .. }));
        assert_eq!(second, ReportOutcome::CoolingDown);
        assert_eq!(sink.reports.lock().unwrap().len(), 1);
    }

    #[test]
    fn detections_thirteen_seconds_apart_send_two_reports() {
        let sink = RecordingSink::default();
        let mut reporter = reporter(sink.clone());
        let start = Instant::now();
        reporter.evaluate(&phone(0.5), None, (1, 2), evidence, start);
        reporter.evaluate(
            &phone(0.5),
            None,
            (1, 2),
            evidence,
            start + Duration::from_secs(13),
        );
        assert_eq!(sink.reports.lock().unwrap().len(), 2);
    }

    #[test]
    fn third_detection_after_window_reports_again() {
        let sink = RecordingSink::default();
        let mut reporter = reporter(sink.clone());
        let start = Instant::now();
        for offset in [0, 1, 13] {
            reporter.evaluate(
                &phone(0.5),
                None,
                (1, 2),
                evidence,
                start + Duration::from_secs(offset),
            );
        }
        assert_eq!(sink.reports.lock().unwrap().len(), 2);
    }

    #[test]
    fn report_payload_carries_rounded_confidence() {
        let sink = RecordingSink::default();
        let mut reporter = reporter(sink.clone());
        reporter.evaluate(&phone(0.876), None, (4, 9), evidence, Instant::now());
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports[0].class_id, 4);
        assert_eq!(reports[0].teacher_id, 9);
        assert_eq!(reports[0].detail, "Phone detected (88% confidence)");
        assert!(reports[0].evidence.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn below_threshold_or_other_class_is_ignored() {
        let sink = RecordingSink::default();
        let mut reporter = reporter(sink.clone());
        let now = Instant::now();
        assert_eq!(
            reporter.evaluate(&phone(0.2), None, (1, 2), evidence, now),
            ReportOutcome::NoMatch
        );
        let book = vec![Prediction::new("book", 0.9, 0.0, 0.0, 1.0, 1.0)];
        assert_eq!(
            reporter.evaluate(&book, None, (1, 2), evidence, now),
            ReportOutcome::NoMatch
        );
        assert!(sink.reports.lock().unwrap().is_empty());
    }

    #[test]
    fn server_evidence_is_acknowledged_without_sending() {
        let sink = RecordingSink::default();
        let mut reporter = reporter(sink.clone());
        let start = Instant::now();
        let outcome = reporter.evaluate(
            &phone(0.5),
            Some("uploads/evidence/violation_1.jpg"),
            (1, 2),
            evidence,
            start,
        );
        assert_eq!(
            outcome,
            ReportOutcome::AcknowledgedLocally {
                evidence_url: "uploads/evidence/violation_1.jpg".to_string()
            }
        );
        assert!(sink.reports.lock().unwrap().is_empty());

        // The acknowledgment still consumed the cooldown.
        let next = reporter.evaluate(
            &phone(0.5),
            None,
            (1, 2),
            evidence,
            start + Duration::from_secs(3),
        );
        assert_eq!(next, ReportOutcome::CoolingDown);
    }

    #[test]
    fn failed_report_is_not_retried() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let mut reporter = reporter(sink);
        let start = Instant::now();
        let outcome = reporter.evaluate(&phone(0.5), None, (1, 2), evidence, start);
        assert!(matches!(outcome, ReportOutcome::Failed { .. }));
        let retry = reporter.evaluate(
            &phone(0.5),
            None,
            (1, 2),
            evidence,
            start + Duration::from_secs(1),
        );
        assert_eq!(retry, ReportOutcome::CoolingDown);
    }
}
