//! Job lifecycle: submission, dispatch and completion.
//!
//! - [`ledger`]: deduplicating [`JobLedger`] over the ledger store.
//! - [`dispatcher`]: stages the profile and submits the backend job.
//! - [`completion`]: the callback that settles a job and sends its report.
//! - [`submission`]: the end-to-end submit flow used by the API.

pub mod completion;
pub mod dispatcher;
pub mod ledger;
pub mod submission;

pub use completion::{CompletionError, CompletionHandler, CompletionSummary};
pub use dispatcher::{DispatchError, DispatcherConfig, JobDispatcher, ProfileLocation};
pub use ledger::{JobLedger, JobOutcome, LedgerError, SubmitOutcome};
pub use submission::{DispatchState, SubmissionError, SubmissionReceipt, SubmissionService, SubmitRequest};
