use anyhow::{Context, Result, bail};
use clap::Parser;
use mafs_vision::{Band, JobId, JobOutput, JobParams, JobQueue, LandMaskConfig, NoopDetector, QueueConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "mafs_runner")]
#[command(version, about = "Runs SAR images through the land-masking job queue", long_about = None)]
struct Cli {
    /// Input images (any format the `image` crate decodes)
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Analysis channel: VV, VH or Grayscale
    #[arg(short, long, value_name = "BAND", default_value = "Grayscale")]
    band: String,

    /// Output directory
    #[arg(short, long, value_name = "DIR", default_value = "mafs_output")]
    out: PathBuf,

    /// JSON file overriding land-masking parameters
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Status poll interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    poll_ms: u64,

    /// Skip writing the diagnostic step images
    #[arg(long)]
    no_steps: bool,
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // --- 1. Configuration ---
    let mut engine = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<LandMaskConfig>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => LandMaskConfig::default(),
    };
    engine.capture_steps = !cli.no_steps;
    let poll_interval = Duration::from_millis(cli.poll_ms.max(1));

    let queue = JobQueue::start(QueueConfig { poll_interval, engine }, Arc::new(NoopDetector))?;
    fs::create_dir_all(&cli.out).with_context(|| format!("creating {}", cli.out.display()))?;

    // --- 2. Submission ---
    let params = JobParams {
        band: Band::from_param(&cli.band),
    };
    let mut submitted: Vec<(JobId, PathBuf)> = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let id = queue.submit(bytes, params)?;
        info!(job = %id, input = %input.display(), "submitted");
        submitted.push((id, input.clone()));
    }

    // --- 3. Polling ---
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        let open = submitted
            .iter()
            .filter(|(id, _)| queue.get_status(*id).is_some_and(|job| !job.status.is_terminal()))
            .count();
        if open == 0 {
            break;
        }
        info!(remaining = open, pending = queue.pending_count(), "waiting for jobs");
    }

    // --- 4. Output ---
    let mut failures = 0;
    for (id, input) in &submitted {
        let job = queue.get_status(*id).with_context(|| format!("job {id} disappeared"))?;
        if let Some(output) = &job.result {
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
            let stem = format!("{stem}_{}", id.short());
            save_outputs(&cli.out, &stem, output)?;
        } else {
            failures += 1;
        }
        println!("{}", serde_json::to_string_pretty(&job.summary())?);
    }

    queue.shutdown().await?;
    if failures > 0 {
        bail!("{failures} of {} jobs failed", submitted.len());
    }
    Ok(())
}

fn save_outputs(dir: &Path, stem: &str, output: &JobOutput) -> Result<()> {
    output.processed_image.save(dir.join(format!("{stem}_processed.png")))?;
    output.mask.save(dir.join(format!("{stem}_mask.png")))?;
    output.unbuffered_image.save(dir.join(format!("{stem}_unbuffered.png")))?;
    output.annotated_image.save(dir.join(format!("{stem}_annotated.png")))?;

    for (index, step) in output.steps.iter().enumerate() {
        let slug = step.name.to_lowercase().replace(' ', "_");
        step.image.save(dir.join(format!("{stem}_step{index}_{slug}.png")))?;
    }
    info!(stem, directory = %dir.display(), "outputs written");
    Ok(())
}
