use std::env;
use std::time::Duration;

/// Tuning for build execution and progress streaming
#[derive(Debug, Clone)]
pub struct BuildsConfig {
    /// Period between progress snapshots (env: `CICD_PROGRESS_INTERVAL_MS`)
    pub progress_interval: Duration,
    /// How long the executor waits for its broadcaster to stop (env: `CICD_BROADCASTER_GRACE_MS`)
    pub broadcaster_grace: Duration,
    /// Shell used to run step commands (env: `CICD_SHELL`)
    pub shell: String,
}

impl BuildsConfig {
    pub fn from_env() -> Self {
        Self {
            progress_interval: Duration::from_millis(millis_from_env(
                "CICD_PROGRESS_INTERVAL_MS",
                1000,
            )),
            broadcaster_grace: Duration::from_millis(millis_from_env(
                "CICD_BROADCASTER_GRACE_MS",
                2000,
            )),
            shell: env::var("CICD_SHELL").unwrap_or_else(|_| "sh".to_string()),
        }
    }
}

fn millis_from_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
