//! Report delivery channels.
//!
//! The completion handler only sees [`ReportTransport`]. [`email`] sends over
//! SMTP; [`memory`] records reports for tests and dry runs.

pub mod email;
pub mod memory;

use async_trait::async_trait;

use crate::report::Report;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Email(#[from] email::EmailError),

    #[error("Report transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ReportTransport: Send + Sync {
    async fn send(&self, report: &Report) -> Result<(), DeliveryError>;
}
