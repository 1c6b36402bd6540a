use std::sync::Arc;

use autotune_cloud::{ExecutionBackend, ObjectStore};
use autotune_db::{CounterStore, LedgerStore, SettingStore};
use autotune_events::ReportTransport;
use autotune_nightscout::NightscoutClient;
use autotune_pipeline::{CompletionHandler, JobDispatcher, JobLedger, SubmissionService};

use crate::config::ServerConfig;

/// The storage and delivery seams the services are built on.
pub struct Backends {
    pub ledger: Arc<dyn LedgerStore>,
    pub settings: Arc<dyn SettingStore>,
    pub counters: Arc<dyn CounterStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub execution: Arc<dyn ExecutionBackend>,
    pub transport: Arc<dyn ReportTransport>,
}

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (everything is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub ledger: Arc<JobLedger>,
    pub submissions: Arc<SubmissionService>,
    pub completion: Arc<CompletionHandler>,
    pub nightscout: Arc<NightscoutClient>,
    /// Job containers, for serving output logs.
    pub objects: Arc<dyn ObjectStore>,
    pub settings: Arc<dyn SettingStore>,
}

impl AppState {
    /// Wire the pipeline services over `backends`.
    pub fn new(config: ServerConfig, backends: Backends, nightscout: NightscoutClient) -> Self {
        let ledger = Arc::new(JobLedger::new(backends.ledger, Arc::clone(&backends.execution)));
        let dispatcher = Arc::new(JobDispatcher::new(
            Arc::clone(&backends.objects),
            Arc::clone(&backends.execution),
            config.dispatcher_config(),
        ));
        let submissions = SubmissionService::new(Arc::clone(&ledger), dispatcher, backends.counters);
        let completion = CompletionHandler::new(
            Arc::clone(&ledger),
            backends.execution,
            Arc::clone(&backends.objects),
            backends.transport,
            Arc::clone(&backends.settings),
            config.callback_key.clone(),
        )
        .with_rounding(config.basal_rounding);

        Self {
            config: Arc::new(config),
            ledger,
            submissions: Arc::new(submissions),
            completion: Arc::new(completion),
            nightscout: Arc::new(nightscout),
            objects: backends.objects,
            settings: backends.settings,
        }
    }
}
