pub mod broadcaster;
pub mod build_store;
pub mod configuration;
pub mod estimator;
pub mod executor;
pub mod interpolation;
pub mod recovery;
pub mod runner;
pub mod scheduler;

pub use broadcaster::{ProgressSnapshot, start_progress_broadcaster};
pub use build_store::BuildStore;
pub use configuration::ConfigurationService;
pub use executor::BuildExecutor;
pub use recovery::{reconcile, RecoveryReport};
pub use scheduler::{BuildScheduler, SchedulerSettings, TriggerRequest, TriggerResponse};
