use tokio::sync::broadcast;

use crate::services::broadcaster::ProgressSnapshot;
use crate::services::build_store::BuildStore;
use crate::services::configuration::ConfigurationService;
use crate::services::scheduler::BuildScheduler;

pub use crate::db::DbConn;

/// Broadcast channel carrying progress snapshots to WebSocket clients
pub type ProgressBroadcast = broadcast::Sender<ProgressSnapshot>;

/// Application state containing all shared resources
#[derive(Clone)]
pub struct AppState {
    pub store: BuildStore,
    pub configurations: ConfigurationService,
    pub scheduler: BuildScheduler,
}

impl AppState {
    pub fn new(db: DbConn, scheduler: BuildScheduler) -> Self {
        Self {
            store: BuildStore::new(db.clone()),
            configurations: ConfigurationService::new(db),
            scheduler,
        }
    }

    /// Sender side of the progress channel, for subscribing observers
    pub fn progress_tx(&self) -> &ProgressBroadcast {
        self.scheduler.progress_tx()
    }
}
