//! Result reports and their delivery.
//!
//! - [`report`]: the report model and its HTML rendering.
//! - [`delivery`]: the [`ReportTransport`] seam, SMTP delivery and a
//!   recording transport.

pub mod delivery;
pub mod report;

pub use delivery::email::{EmailConfig, EmailDelivery, EmailError};
pub use delivery::memory::RecordingTransport;
pub use delivery::{DeliveryError, ReportTransport};
pub use report::{Attachment, Report, ReportContext};
