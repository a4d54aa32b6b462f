use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{all_descriptors, FullFrameDetector, Metric, ModelVariant, OrtLoader, UNKNOWN_LABEL};
use facematch_engine::{spawn_engine, EngineConfig, EngineHandle, GalleryStore, MemoryGallery, Outcome};
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facematch", about = "Face embedding, registration and recognition")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Embedding model (facenet, facenet-quantized, facenet-512, facenet-512-quantized, mobilefacenet)
    #[arg(long, global = true)]
    model: Option<ModelVariant>,
    /// Directory holding the ONNX model files
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported embedding models
    Models,
    /// Print the embedding of a face image as JSON
    Embed { image: PathBuf },
    /// Register a face under a label, appending it to a gallery file
    Register {
        image: PathBuf,
        #[arg(short, long)]
        label: String,
        #[arg(short, long)]
        gallery: PathBuf,
    },
    /// Recognize a face against a gallery file
    Recognize {
        image: PathBuf,
        #[arg(short, long)]
        gallery: PathBuf,
        /// Scoring metric (l2 or cosine); defaults to the configured one
        #[arg(long)]
        metric: Option<Metric>,
        /// Match every detected face instead of the first
        #[arg(long)]
        all: bool,
    },
    /// Check whether two face images show the same person
    Compare { first: PathBuf, second: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Models => {
            for d in all_descriptors() {
                let marker = if d.variant == config.model { "*" } else { " " };
                println!(
                    "{marker} {:<22} dims={:<4} input={}x{}  cosine>{}  l2<={}  {}",
                    d.variant.tag(),
                    d.output_dims,
                    d.input_dims,
                    d.input_dims,
                    d.cosine_threshold,
                    d.l2_threshold,
                    d.asset
                );
            }
        }
        Commands::Embed { image } => {
            let engine = start_engine(&config)?;
            match engine.register(load_image(&image)?, UNKNOWN_LABEL).await {
                Outcome::Registered(record) => println!("{}", serde_json::to_string(&record.embedding)?),
                other => return fail(other),
            }
        }
        Commands::Register { image, label, gallery } => {
            let mut store = load_gallery(&gallery)?;
            let engine = start_engine(&config)?;
            match engine.register(load_image(&image)?, label).await {
                Outcome::Registered(record) => {
                    println!("registered {} as {}", record.label, record.id);
                    store.add(record);
                    save_gallery(&gallery, &store)?;
                }
                other => return fail(other),
            }
        }
        Commands::Recognize { image, gallery, metric, all } => {
            let store = load_gallery(&gallery)?;
            let engine = start_engine(&config)?;
            let metric = metric.unwrap_or(config.metric);
            let image = load_image(&image)?;
            let outcome = if all {
                engine.recognize_all(image, store.get_all(), metric, config.thresholds()).await
            } else {
                engine.recognize(image, store.get_all(), metric, config.thresholds()).await
            };
            match outcome {
                Outcome::Faces(faces) => {
                    for m in faces {
                        println!(
                            "{} at ({}, {}, {}x{}) ({metric} {:.4})",
                            m.result.label(),
                            m.face.x,
                            m.face.y,
                            m.face.width,
                            m.face.height,
                            m.result.score
                        );
                    }
                }
                Outcome::Recognized { identity, score, .. } => {
                    println!("{} ({metric} {score:.4})", identity.label);
                }
                Outcome::NotFound { message, .. } => {
                    println!("{UNKNOWN_LABEL}");
                    eprintln!("{message}");
                }
                other => return fail(other),
            }
        }
        Commands::Compare { first, second } => {
            let engine = start_engine(&config)?;
            match engine.compare_pair(load_image(&first)?, load_image(&second)?).await {
                Outcome::Compared(c) => {
                    let verdict = if c.identical { "same person" } else { "different people" };
                    println!("{verdict} (similarity {:.4})", c.similarity);
                }
                other => return fail(other),
            }
        }
    }

    Ok(())
}

/// Defaults, then the config file, then env, then command-line flags.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let base = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let mut config = base.with_env_overrides();
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn start_engine(config: &EngineConfig) -> Result<EngineHandle> {
    let loader = OrtLoader::new(config.model_dir.clone()).with_intra_threads(config.intra_threads);
    let engine = spawn_engine(config.descriptor().clone(), Box::new(FullFrameDetector), Box::new(loader))
        .with_context(|| format!("starting engine with model {}", config.model))?;
    Ok(engine)
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// A missing gallery file is an empty gallery.
fn load_gallery(path: &Path) -> Result<MemoryGallery> {
    if !path.exists() {
        return Ok(MemoryGallery::new());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading gallery {}", path.display()))?;
    MemoryGallery::from_json(&raw).with_context(|| format!("parsing gallery {}", path.display()))
}

fn save_gallery(path: &Path, gallery: &MemoryGallery) -> Result<()> {
    std::fs::write(path, gallery.to_json()?).with_context(|| format!("writing gallery {}", path.display()))?;
    tracing::debug!(path = %path.display(), records = gallery.len(), "gallery saved");
    Ok(())
}

fn fail(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::NoFace => bail!("no face detected"),
        Outcome::Busy => bail!("engine busy"),
        Outcome::Error(err) => Err(err.into()),
        other => bail!("unexpected engine outcome: {}", other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::{Embedding, IdentityRecord};

    #[test]
    fn test_missing_gallery_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let gallery = load_gallery(&dir.path().join("gallery.json")).unwrap();
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_gallery_file_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");

        let mut gallery = load_gallery(&path).unwrap();
        gallery.add(IdentityRecord::new("Alice", Embedding::new(vec![0.1, 0.2])));
        save_gallery(&path, &gallery).unwrap();

        let mut reloaded = load_gallery(&path).unwrap();
        reloaded.add(IdentityRecord::new("Alice", Embedding::new(vec![0.3, 0.4])));
        save_gallery(&path, &reloaded).unwrap();

        let last = load_gallery(&path).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last.labels(), vec!["Alice"]);
    }

    #[test]
    fn test_corrupt_gallery_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_gallery(&path).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "facematch",
            "--model",
            "mobilefacenet",
            "--model-dir",
            "/tmp/models",
            "recognize",
            "face.png",
            "--gallery",
            "g.json",
            "--metric",
            "cosine",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.model, ModelVariant::MobileFaceNet);
        assert_eq!(config.model_dir, PathBuf::from("/tmp/models"));
        match cli.command {
            Commands::Recognize { metric, all, .. } => {
                assert_eq!(metric, Some(Metric::Cosine));
                assert!(!all);
            }
            _ => panic!("expected recognize"),
        }
    }

    #[test]
    fn test_unknown_model_flag_rejected() {
        assert!(Cli::try_parse_from(["facematch", "--model", "arcface", "models"]).is_err());
    }
}
