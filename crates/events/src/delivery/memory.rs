//! Transport that keeps reports in memory instead of sending them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DeliveryError, ReportTransport};
use crate::report::Report;

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Report>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Report> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReportTransport for RecordingTransport {
    async fn send(&self, report: &Report) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Unavailable("recording transport set to fail".into()));
        }
        self.sent
            .lock()
            .map_err(|_| DeliveryError::Unavailable("lock poisoned".into()))?
            .push(report.clone());
        tracing::debug!(to = %report.to, failed = report.failed, "Report recorded");
        Ok(())
    }
}
