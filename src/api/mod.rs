//! Admin REST surface consumed by the out-of-core UI.

pub mod routes;

use std::sync::Arc;

use crate::marketplace::MarketClient;
use crate::models::Config;
use crate::pricing::{ProbeProtocol, RepricingOrchestrator};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::sync::SyncDriver;
use crate::traffic::TrafficController;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub controller: Arc<TrafficController>,
    pub client: Arc<MarketClient>,
    pub sync: Arc<SyncDriver>,
    pub orchestrator: Arc<RepricingOrchestrator>,
    pub probe: Arc<ProbeProtocol>,
    pub scheduler: Arc<Scheduler>,
}
