// THEORY:
// This file is the main entry point for the `mafs_vision` library crate. It defines
// the public API that external consumers (like the `mafs_runner` binary) build on.
//
// The primary goals are to export the `LandMaskEngine` as the high-level interface
// to the iterative land masker and the `JobQueue` as the background service that
// drives it. The pixel primitives, band selection, detector boundary and job records
// live in `core_modules`; they stay public so callers can reuse individual stages,
// but most users only need the re-exports below.

pub mod core_modules;
pub mod error;
pub mod job_queue;
pub mod pipeline;

pub use core_modules::band::Band;
pub use core_modules::detection::{Detection, DetectionError, DetectionOutput, Detector, NoopDetector};
pub use core_modules::job::{Job, JobId, JobOutput, JobParams, JobStatus, JobSummary};
pub use error::{LandMaskError, Result};
pub use job_queue::{JobQueue, QueueConfig};
pub use pipeline::{LandMaskConfig, LandMaskEngine, Segmentation, StepSnapshots, Termination};
