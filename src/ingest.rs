pub mod engine;
mod ingestor;
mod stats;
mod types;
pub mod window;


pub use stats::{IngestStats, IngestSummary};
pub use types::{ConnectionState, Reading, State, Stats};
pub use window::{WindowBuffer, WindowSpec};

use crate::domain::Domain;
use crate::publish::RealtimePublisher;
use crate::store::LiveStateStore;
use std::sync::Arc;

/// Per-domain ingest tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSettings {
    pub window: WindowSpec,
    pub reading_list_max: usize,
    pub connection_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub revolution_counter: DomainSettings,
    pub workforce: DomainSettings,
}

impl IngestSettings {
    pub fn for_domain(&self, domain: Domain) -> &DomainSettings {
        match domain {
            Domain::RevolutionCounter => &self.revolution_counter,
            Domain::Workforce => &self.workforce,
        }
    }
}

#[derive(Clone)]
pub struct TelemetryIngestor {
    store: Arc<dyn LiveStateStore>,
    publisher: Arc<dyn RealtimePublisher>,
    settings: IngestSettings,
    stats: Arc<IngestStats>,
}
