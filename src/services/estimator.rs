//! Build progress estimation
//!
//! Percent complete, elapsed time, remaining time and overdue detection for
//! a build, using the most recent similar successful build as a reference
//! when one exists and the build's own pace otherwise. Every input may be
//! missing; the estimate degrades to defaults instead of failing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::build::{self, BuildStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    pub percent: u8,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<f64>,
    pub overdue: bool,
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 1000.0).max(0.0)
}

/// Seconds since the build started, frozen at completion for finished builds
pub fn elapsed_seconds(build: &build::Model, now: DateTime<Utc>) -> f64 {
    let Some(started) = build.started_at else {
        return 0.0;
    };
    match build.completed_at {
        Some(completed) if build.status.is_terminal() => seconds_between(started, completed),
        _ => seconds_between(started, now),
    }
}

/// Duration the similar build spent on step `index`
fn reference_step_duration(similar: Option<&build::Model>, index: usize) -> Option<f64> {
    let similar = similar?;
    similar
        .step_times
        .duration_of(index, similar.total_elapsed_secs())
}

/// Average seconds per completed step, measured at the start of step `index`
///
/// Undefined before any step has completed.
fn own_average_step_secs(build: &build::Model, index: usize) -> Option<f64> {
    if index == 0 {
        return None;
    }
    let current_start = build.step_times.get(index)?;
    Some(current_start / index as f64)
}

/// Estimate progress of `build` at instant `now`
///
/// Pure: the same build, reference and instant always give the same result.
pub fn estimate(
    build: &build::Model,
    similar: Option<&build::Model>,
    now: DateTime<Utc>,
) -> ProgressEstimate {
    let elapsed = elapsed_seconds(build, now);
    let total_steps = build.total_steps.max(0) as usize;
    let current_step = build.current_step.max(0) as usize;
    let running = build.status == BuildStatus::Running;

    let step_index = current_step.checked_sub(1);
    let elapsed_in_step = step_index
        .and_then(|i| build.step_times.get(i))
        .map(|start| (elapsed - start).max(0.0));
    let reference_duration = step_index.and_then(|i| reference_step_duration(similar, i));
    let expected_duration =
        reference_duration.or_else(|| step_index.and_then(|i| own_average_step_secs(build, i)));

    let percent = if build.status == BuildStatus::Success {
        100
    } else if total_steps == 0 || current_step == 0 {
        0
    } else {
        let step_share = 100.0 / total_steps as f64;
        let base = (current_step - 1) as f64 * step_share;
        let in_step = match (running, elapsed_in_step, expected_duration) {
            (true, Some(spent), Some(expected)) if expected > 0.0 => {
                (spent / expected).min(1.0) * step_share
            }
            _ => 0.0,
        };
        (base + in_step).clamp(0.0, 100.0).floor() as u8
    };

    let estimated_remaining_seconds = if build.status.is_terminal() || current_step == 0 {
        None
    } else if let Some(reference_total) = similar.and_then(|s| s.total_elapsed_secs()) {
        Some((reference_total - elapsed).max(0.0))
    } else {
        step_index
            .and_then(|i| own_average_step_secs(build, i))
            .map(|avg| avg * total_steps.saturating_sub(current_step - 1) as f64)
    };

    let overdue = match (running, elapsed_in_step, reference_duration) {
        (true, Some(spent), Some(reference)) => spent > reference,
        _ => false,
    };

    ProgressEstimate {
        percent,
        elapsed_seconds: elapsed,
        estimated_remaining_seconds,
        overdue,
    }
}
