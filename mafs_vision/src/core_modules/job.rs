// THEORY:
// The `job` module defines the records that flow between submitters and the
// background worker. A `Job` is created `Pending` by a submission, moved to
// `Processing` and then to `Completed` or `Failed` by the worker, and never
// touched again once terminal.
//
// Key architectural principles:
// 1.  **Closed Status**: `JobStatus` is an enum, never a string. The only legal
//     moves are encoded in `JobStatus::can_transition_to`.
// 2.  **Cheap Snapshots**: status reads hand out clones. Input bytes and results sit
//     behind `Arc`, so a snapshot of a finished job costs a few pointer copies no
//     matter how large its rasters are.
// 3.  **Serializable Summaries**: rasters are not serializable, so `JobSummary`
//     carries the scalar facts a client needs to render a status line.

use crate::core_modules::band::Band;
use crate::core_modules::detection::Detection;
use crate::pipeline::{StepSnapshots, Termination};
use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque, random 128-bit job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix for log lines and status displays.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Recognized request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobParams {
    pub band: Band,
}

/// Raw submission: encoded image bytes plus parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct JobInput {
    pub image_bytes: Arc<Vec<u8>>,
    pub params: JobParams,
}

/// Structured result of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub message: String,
    /// Original analysis channel with land (plus buffer) zeroed.
    pub processed_image: GrayImage,
    /// Final land mask, 255 = land.
    pub mask: GrayImage,
    /// Input with each round's land removed, before the safety buffer.
    pub unbuffered_image: GrayImage,
    /// Detector rendering of `processed_image`.
    pub annotated_image: RgbImage,
    pub detections: Vec<Detection>,
    pub steps: StepSnapshots,
    /// `(width, height)` of the decoded input.
    pub original_size: (u32, u32),
    pub land_percentage: f64,
    pub iterations: usize,
    pub termination: Termination,
}

/// One entry of the job table.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input: JobInput,
    pub result: Option<Arc<JobOutput>>,
    /// Human-readable failure text when `status` is `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(image_bytes: Vec<u8>, params: JobParams) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            input: JobInput {
                image_bytes: Arc::new(image_bytes),
                params,
            },
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            band: self.input.params.band,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            message: self.result.as_ref().map(|r| r.message.clone()),
            error: self.error.clone(),
            land_percentage: self.result.as_ref().map(|r| r.land_percentage),
            detection_count: self.result.as_ref().map(|r| r.detections.len()),
            iterations: self.result.as_ref().map(|r| r.iterations),
            original_size: self.result.as_ref().map(|r| r.original_size),
        }
    }
}

/// Serializable view of a job for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub band: Band,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub land_percentage: Option<f64>,
    pub detection_count: Option<usize>,
    pub iterations: Option<usize>,
    pub original_size: Option<(u32, u32)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_legal() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(Completed.is_terminal() && Failed.is_terminal());
        assert!(!Pending.is_terminal() && !Processing.is_terminal());
    }

    #[test]
    fn new_jobs_are_pending_with_distinct_ids() {
        let a = Job::new(vec![1, 2, 3], JobParams::default());
        let b = Job::new(vec![1, 2, 3], JobParams::default());
        assert_eq!(a.status, JobStatus::Pending);
        assert_ne!(a.id, b.id);
        assert!(a.result.is_none() && a.started_at.is_none());
        assert_eq!(a.id.short().len(), 8);
    }

    #[test]
    fn summary_serializes_with_snake_case_status() {
        let job = Job::new(Vec::new(), JobParams { band: Band::Vh });
        let json = serde_json::to_string(&job.summary()).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"band\":\"VH\""));

        let back: JobSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job.summary());
    }
}
