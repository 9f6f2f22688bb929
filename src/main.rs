//! Command-line front end for the adversarial image workflow

use adversarial_workflow::{
    backend::KNOWN_MODELS,
    config::Settings,
    media::file::{read_image, FileDownloader},
    workflow::{Outcome, TracingNotifier},
    WorkflowController,
};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "adv-workflow")]
struct Cli {
    /// Image to corrupt
    #[arg(short, long, value_name = "PATH", required_unless_present = "list_models")]
    image: Option<PathBuf>,

    /// Detector model identifier, e.g. yolov8n
    #[arg(short, long)]
    model: Option<String>,

    /// Iteration budget: -1, a positive number, or 'min'
    #[arg(short = 'n', long, allow_hyphen_values = true)]
    iterations: Option<String>,

    /// Corruption type: vanishing or fabrication
    #[arg(short, long)]
    strategy: Option<String>,

    /// Run detection on the original and corrupted image afterwards
    #[arg(long)]
    compare: bool,

    /// Configuration file, `config/default.toml` when omitted
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for the corrupted image and noise pattern
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Print the known detector models and exit
    #[arg(long)]
    list_models: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.list_models {
        for model in KNOWN_MODELS {
            println!("{}", model);
        }
        return Ok(());
    }

    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let json = settings.logging.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    info!(endpoint = %settings.service.base_url, "Starting adversarial workflow");

    let controller = WorkflowController::from_settings(&settings, Arc::new(TracingNotifier))?;
    if let Some(model) = cli.model {
        controller.set_model(model);
    }
    if let Some(iterations) = cli.iterations {
        controller.set_iterations(iterations);
    }
    if let Some(strategy) = cli.strategy {
        controller.set_strategy(strategy);
    }

    let image_path = cli.image.context("an image path is required")?;
    let payload = read_image(&image_path)
        .await
        .with_context(|| format!("reading {}", image_path.display()))?;
    controller.capture_image(payload)?;

    if controller.generate().await? == Outcome::Superseded {
        anyhow::bail!("corruption result was superseded");
    }

    let output_dir = cli
        .output
        .unwrap_or_else(|| PathBuf::from(&settings.storage.output_dir));
    let downloader = FileDownloader::new(output_dir);
    let adversarial = controller.export_adversarial(&downloader).await?;
    let noise = controller.export_noise(&downloader).await?;
    println!("Corrupted image: {}", adversarial.display());
    println!("Noise pattern:   {}", noise.display());

    if cli.compare {
        controller.compare().await?;
        if let Some(detection) = controller.snapshot().detection {
            println!("Original detections:  {}", detection.original);
            println!("Corrupted detections: {}", detection.corrupted);
        }
    }

    Ok(())
}
