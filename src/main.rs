use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use lpr_wrapper::{LicensePlateRecognizer, PlateImage};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Parser, Debug)]
#[command(name = "lpr-wrapper", version, about = "Recognize license plates in image files")]
struct Args {
    /// Model directory holding the plate graphs
    #[arg(short, long, default_value = "./models")]
    model: PathBuf,

    /// Give up on an image after this many milliseconds (single plate mode)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Report every plate instead of the most confident one
    #[arg(long)]
    all: bool,

    /// Print one JSON object per image
    #[arg(long)]
    json: bool,

    /// Image files or directories of images
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn collect_images(inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("reading {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
                })
                .collect();
            entries.sort();
            images.extend(entries);
        } else {
            images.push(input.clone());
        }
    }
    Ok(images)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let recognizer = LicensePlateRecognizer::new(&args.model)?;
    let images = collect_images(&args.inputs)?;
    info!("recognizing {} images", images.len());

    let mut latencies = Vec::new();
    let mut scores = Vec::new();
    for path in &images {
        let image = match PlateImage::open(path) {
            Ok(image) => image,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                continue;
            },
        };
        let now = Instant::now();
        let outcome = if args.all {
            recognizer.recognize_all(image).await.map(|plates| {
                let line = if args.json {
                    serde_json::json!({ "file": path, "plates": plates }).to_string()
                } else {
                    plates.iter().map(|p| format!("{} {} {:.3} {:?}", p.code, p.plate_type, p.confidence, p.bbox))
                        .collect::<Vec<_>>().join(", ")
                };
                (line, plates.first().map(|p| p.confidence))
            })
        } else {
            let res = match args.timeout_ms {
                Some(ms) => recognizer.recognize_timeout(image, Duration::from_millis(ms)).await,
                None => recognizer.recognize(image).await,
            };
            res.map(|res| {
                let line = if args.json {
                    serde_json::json!({ "file": path, "result": res }).to_string()
                } else {
                    format!("{} {} {:.3}", res.code, res.plate_type, res.confidence)
                };
                (line, (!res.is_empty()).then_some(res.confidence))
            })
        };
        let elapsed = now.elapsed();
        match outcome {
            Ok((line, score)) => {
                if args.json {
                    println!("{}", line);
                } else {
                    println!("{}: {} ({:.2?})", path.display(), line, elapsed);
                }
                latencies.push(elapsed);
                scores.extend(score);
            },
            Err(e) => error!("{}: {}", path.display(), e),
        }
    }

    if !latencies.is_empty() {
        let average_speed = latencies.iter().sum::<Duration>() / latencies.len() as u32;
        let average_score = if scores.is_empty() { 0.0 } else { scores.iter().sum::<f32>() / scores.len() as f32 };
        info!(
            "total_amount: {}, success: {}, average_score: {:.3}, average_speed: {:.2?}",
            images.len(), scores.len(), average_score, average_speed
        );
    }
    recognizer.release_async().await;
    Ok(())
}
