//! Live status of model loading and the most recent summarisation job.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::summariser::JobStage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelLoadingStatus {
    pub is_loading: bool,
    pub step: String,
    /// Percent complete, 0 to 100
    pub progress: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub in_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_word_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<JobStage>,
    /// Percent complete, 0 to 100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Estimated seconds left, extrapolated from progress so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub model_loading: ModelLoadingStatus,
    pub current_job: JobStatus,
    pub device: String,
    pub model: String,
    pub model_loaded: bool,
}

#[derive(Debug, Default)]
struct TrackerState {
    loading: ModelLoadingStatus,
    job_id: Option<Uuid>,
    job_started: Option<Instant>,
    job: JobStatus,
}

/// Shared between request handlers and blocking inference threads.
#[derive(Debug, Default)]
pub struct StatusTracker {
    state: Mutex<TrackerState>,
}

fn percent(fraction: f32) -> u8 {
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Linear extrapolation; `None` until some progress has been made.
fn estimate_remaining(elapsed: Duration, fraction: f32) -> Option<u64> {
    let fraction = f64::from(fraction.clamp(0.0, 1.0));
    if fraction <= 0.0 {
        return None;
    }
    let remaining = elapsed.as_secs_f64() * (1.0 - fraction) / fraction;
    Some(remaining.ceil() as u64)
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn loading_step(&self, step: &str, fraction: f32) {
        let mut state = self.lock();
        state.loading = ModelLoadingStatus {
            is_loading: true,
            step: step.to_string(),
            progress: percent(fraction),
        };
    }

    pub fn loading_finished(&self) {
        self.lock().loading = ModelLoadingStatus::default();
    }

    /// Register a new job as the current one.
    pub fn start_job(&self, input_word_count: usize) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.lock();
        state.job_id = Some(id);
        state.job_started = Some(Instant::now());
        state.job = JobStatus {
            in_progress: true,
            input_word_count: Some(input_word_count),
            stage: None,
            progress: Some(0),
            time_remaining: None,
        };
        id
    }

    /// Update a job; ignored once a newer job has become current.
    pub fn update_job(&self, id: Uuid, stage: JobStage, fraction: f32) {
        let mut state = self.lock();
        if state.job_id != Some(id) {
            return;
        }
        state.job.stage = Some(stage);
        state.job.progress = Some(percent(fraction));
        state.job.time_remaining = state
            .job_started
            .and_then(|started| estimate_remaining(started.elapsed(), fraction));
    }

    pub fn finish_job(&self, id: Uuid) {
        let mut state = self.lock();
        if state.job_id == Some(id) {
            state.job_id = None;
            state.job_started = None;
            state.job = JobStatus::default();
        }
    }

    pub fn loading(&self) -> ModelLoadingStatus {
        self.lock().loading.clone()
    }

    pub fn current_job(&self) -> JobStatus {
        self.lock().job.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let tracker = StatusTracker::new();
        assert!(!tracker.current_job().in_progress);

        let id = tracker.start_job(120);
        tracker.update_job(id, JobStage::Generating, 0.456);
        let job = tracker.current_job();
        assert!(job.in_progress);
        assert_eq!(job.input_word_count, Some(120));
        assert_eq!(job.stage, Some(JobStage::Generating));
        assert_eq!(job.progress, Some(46));

        assert!(job.time_remaining.is_some());

        tracker.update_job(id, JobStage::Complete, 1.0);
        assert_eq!(tracker.current_job().time_remaining, Some(0));

        tracker.finish_job(id);
        assert_eq!(tracker.current_job(), JobStatus::default());
    }

    #[test]
    fn test_time_remaining_estimate() {
        let elapsed = Duration::from_secs(10);
        assert_eq!(estimate_remaining(elapsed, 0.0), None);
        assert_eq!(estimate_remaining(elapsed, 0.25), Some(30));
        assert_eq!(estimate_remaining(elapsed, 0.5), Some(10));
        assert_eq!(estimate_remaining(elapsed, 1.0), Some(0));
        assert_eq!(estimate_remaining(Duration::from_millis(500), 0.5), Some(1));
    }

    #[test]
    fn test_stale_job_does_not_clobber_newer_one() {
        let tracker = StatusTracker::new();
        let old = tracker.start_job(10);
        let new = tracker.start_job(20);

        tracker.update_job(old, JobStage::Complete, 1.0);
        tracker.finish_job(old);

        let job = tracker.current_job();
        assert!(job.in_progress);
        assert_eq!(job.input_word_count, Some(20));
        assert_eq!(job.stage, None);

        tracker.finish_job(new);
        assert!(!tracker.current_job().in_progress);
    }

    #[test]
    fn test_loading_progress() {
        let tracker = StatusTracker::new();
        tracker.loading_step("Loading weights", 0.5);
        let loading = tracker.loading();
        assert!(loading.is_loading);
        assert_eq!(loading.step, "Loading weights");
        assert_eq!(loading.progress, 50);

        tracker.loading_finished();
        assert!(!tracker.loading().is_loading);
    }

    #[test]
    fn test_idle_job_serialises_without_optional_fields() {
        let json = serde_json::to_value(JobStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "in_progress": false }));
    }
}
