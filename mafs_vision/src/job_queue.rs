// THEORY:
// The `job_queue` module turns the synchronous land masker into a background
// service. Clients submit encoded image bytes and get an id back at once; a single
// worker task drains a FIFO channel of ids and runs each job to completion while
// clients poll for status.
//
// Key architectural principles:
// 1.  **Explicit Service Object**: a `JobQueue` is constructed once and handed to
//     callers by reference or `Arc`. There is no global queue.
// 2.  **One Worker**: exactly one task consumes the channel, so at most one job is
//     `Processing` at any instant and jobs start in submission order.
// 3.  **Job-Local Failure**: `process_job` returns a `Result`. The worker turns it
//     into a status transition. Heavy work runs on the blocking pool, so even a
//     panic inside a job surfaces as a `JoinError` and only fails that job.
// 4.  **Cooperative Shutdown**: the worker waits on the channel with a timeout and
//     re-checks a stop flag, so it exits within one poll interval. The in-flight
//     job finishes; jobs still queued are left `Pending`.

use crate::core_modules::band::select_band;
use crate::core_modules::detection::{DetectionError, Detector, NoopDetector};
use crate::core_modules::job::{Job, JobId, JobInput, JobOutput, JobParams, JobStatus};
use crate::error::{LandMaskError, Result};
use crate::pipeline::{LandMaskConfig, LandMaskEngine};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reference client poll cadence, also used as the worker's dequeue timeout.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound on how long the worker waits for work before re-checking the
    /// stop flag.
    pub poll_interval: Duration,
    pub engine: LandMaskConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            engine: LandMaskConfig::default(),
        }
    }
}

/// Job ledger shared by submitters and the worker.
#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<JobId, Job>,
    /// Submission order, for listing.
    order: Vec<JobId>,
}

type SharedTable = Arc<RwLock<JobTable>>;

pub struct JobQueue {
    table: SharedTable,
    sender: mpsc::UnboundedSender<JobId>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Validates the engine configuration and spawns the worker on the current
    /// tokio runtime.
    pub fn start(config: QueueConfig, detector: Arc<dyn Detector>) -> Result<Self> {
        let engine = Arc::new(LandMaskEngine::new(config.engine)?);
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| LandMaskError::worker(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded_channel::<JobId>();
        let table = SharedTable::default();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = runtime.spawn(run_worker(
            receiver,
            Arc::clone(&table),
            Arc::clone(&stop),
            engine,
            detector,
            config.poll_interval,
        ));

        Ok(Self {
            table,
            sender,
            stop,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Records a new `Pending` job and enqueues it. Never waits on processing.
    pub fn submit(&self, image_bytes: Vec<u8>, params: JobParams) -> Result<JobId> {
        if self.stop.load(Ordering::Acquire) {
            return Err(LandMaskError::QueueClosed);
        }

        let job = Job::new(image_bytes, params);
        let id = job.id;
        {
            let mut table = self.table.write();
            table.jobs.insert(id, job);
            table.order.push(id);
        }

        if self.sender.send(id).is_err() {
            let mut table = self.table.write();
            table.jobs.remove(&id);
            table.order.retain(|queued| *queued != id);
            return Err(LandMaskError::QueueClosed);
        }

        info!(job = %id, band = %params.band, "job queued");
        Ok(id)
    }

    /// Snapshot of a job, or `None` for an unknown id.
    pub fn get_status(&self, id: JobId) -> Option<Job> {
        self.table.read().jobs.get(&id).cloned()
    }

    /// Snapshots of every job, in submission order.
    pub fn list_jobs(&self) -> Vec<Job> {
        let table = self.table.read();
        table.order.iter().filter_map(|id| table.jobs.get(id).cloned()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.table
            .read()
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .count()
    }

    /// Stops the worker and waits for it. A job already being processed is
    /// finished first; queued jobs stay `Pending`. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| LandMaskError::worker(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Runs one job: decode, band selection, segmentation, detection.
pub fn process_job(input: &JobInput, engine: &LandMaskEngine, detector: &dyn Detector) -> Result<JobOutput> {
    // --- 1. Decode ---
    let decoded = image::load_from_memory(&input.image_bytes)?;
    let original_size = (decoded.width(), decoded.height());
    let rgb = decoded.to_rgb8();

    // --- 2. Band Selection ---
    let channel = select_band(&rgb, input.params.band);

    // --- 3. Land Masking ---
    let segmentation = engine.segment_land(&channel)?;

    // --- 4. Detection ---
    // An offline model is not a job failure: carry on with no detections.
    let detected = match detector.detect(&segmentation.masked_image) {
        Err(DetectionError::Unavailable(reason)) => {
            warn!(detector = detector.name(), %reason, "detector unavailable, continuing without detections");
            NoopDetector.detect(&segmentation.masked_image)?
        }
        other => other?,
    };

    let land_percentage = segmentation.land_percentage();
    Ok(JobOutput {
        message: "Image processed successfully".to_string(),
        processed_image: segmentation.masked_image,
        mask: segmentation.mask,
        unbuffered_image: segmentation.unbuffered_image,
        annotated_image: detected.annotated,
        detections: detected.detections,
        steps: segmentation.steps,
        original_size,
        land_percentage,
        iterations: segmentation.iterations.len(),
        termination: segmentation.termination,
    })
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<JobId>,
    table: SharedTable,
    stop: Arc<AtomicBool>,
    engine: Arc<LandMaskEngine>,
    detector: Arc<dyn Detector>,
    poll_interval: Duration,
) {
    info!(detector = detector.name(), "worker started");

    while !stop.load(Ordering::Acquire) {
        let id = match tokio::time::timeout(poll_interval, receiver.recv()).await {
            Ok(Some(id)) => id,
            Ok(None) => break,
            Err(_) => continue,
        };
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(input) = begin_job(&table, id) else {
            continue;
        };

        let engine = Arc::clone(&engine);
        let detector = Arc::clone(&detector);
        let outcome = tokio::task::spawn_blocking(move || process_job(&input, &engine, detector.as_ref()))
            .await
            .unwrap_or_else(|e| Err(LandMaskError::worker(e.to_string())));

        finish_job(&table, id, outcome);
    }

    info!("worker stopped");
}

/// Moves a queued job to `Processing` and hands back its input.
fn begin_job(table: &SharedTable, id: JobId) -> Option<JobInput> {
    let mut table = table.write();
    let Some(job) = table.jobs.get_mut(&id) else {
        warn!(job = %id, "dequeued id has no job record");
        return None;
    };
    if !job.status.can_transition_to(JobStatus::Processing) {
        warn!(job = %id, status = %job.status, "dequeued job is not pending");
        return None;
    }
    job.status = JobStatus::Processing;
    job.started_at = Some(Utc::now());
    debug!(job = %id, "job processing");
    Some(job.input.clone())
}

fn finish_job(table: &SharedTable, id: JobId, outcome: Result<JobOutput>) {
    let mut table = table.write();
    let Some(job) = table.jobs.get_mut(&id) else {
        return;
    };
    job.finished_at = Some(Utc::now());
    match outcome {
        Ok(output) => {
            info!(
                job = %id,
                land_percentage = output.land_percentage,
                detections = output.detections.len(),
                "job completed"
            );
            job.status = JobStatus::Completed;
            job.result = Some(Arc::new(output));
        }
        Err(e) => {
            error!(job = %id, error = %e, "job failed");
            job.status = JobStatus::Failed;
            job.error = Some(e.to_string());
        }
    }
}
