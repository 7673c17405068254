use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::{Embedding, EnrollmentError, FaceConfig, FaceIdentityRecord};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod engine;
mod store;

use engine::{EngineError, EngineHandle, Sample};
use store::GalleryStore;

#[derive(Parser)]
#[command(name = "faceid", about = "Face embedding enrollment and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a JSON file of embedding samples
    Enroll {
        /// Identity to enroll (e.g., a username)
        #[arg(short, long)]
        id: String,
        /// JSON array of samples: bare float arrays or {"embedding", "detection"} objects
        #[arg(short, long)]
        samples: PathBuf,
    },
    /// Decide whether two embeddings belong to the same person
    Verify {
        a: PathBuf,
        b: PathBuf,
        /// Override the configured L2 distance threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Find the enrolled identity closest to a query embedding
    Recognize {
        query: PathBuf,
        /// Override the configured L2 distance threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity to remove
        id: String,
    },
    /// Write the gallery to a file
    Export { output: PathBuf },
    /// Replace the gallery with the records in a file
    Import { input: PathBuf },
    /// Show effective configuration and gallery size
    Status,
}

/// A sample as written on disk: either a bare embedding or a full sample object.
#[derive(Deserialize)]
#[serde(untagged)]
enum SampleInput {
    Bare(Embedding),
    Full(Sample),
}

impl From<SampleInput> for Sample {
    fn from(input: SampleInput) -> Self {
        match input {
            SampleInput::Bare(embedding) => embedding.into(),
            SampleInput::Full(sample) => sample,
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&src).with_context(|| format!("failed to parse {}", path.display()))
}

fn read_sample(path: &Path) -> Result<Sample> {
    Ok(read_json::<SampleInput>(path)?.into())
}

/// Errors that reject one enrollment sample but let the run continue.
fn is_skippable(err: &EngineError) -> bool {
    match err {
        EngineError::QualityRejected(_) | EngineError::NonFiniteEmbedding => true,
        EngineError::Enrollment(EnrollmentError::EmptyIdentity) => false,
        EngineError::Enrollment(_) => true,
        _ => false,
    }
}

/// Start an engine whose candidate pool is the current gallery.
async fn start_engine(config: FaceConfig, records: Vec<FaceIdentityRecord>) -> Result<EngineHandle> {
    let engine = engine::spawn_engine(Arc::new(config))?;
    engine.import(records).await.context("gallery does not match configuration")?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = config::Settings::from_env();
    let mut face_config = settings.face_config().context("invalid configuration")?;
    let gallery = GalleryStore::new(&settings.gallery_path);

    match cli.command {
        Commands::Enroll { id, samples } => {
            anyhow::ensure!(!id.is_empty(), "identity id must not be empty");
            let samples: Vec<SampleInput> = read_json(&samples)?;
            let mut records = gallery.load()?;
            let required = face_config.required_enrollment_samples;
            let engine = engine::spawn_engine(Arc::new(face_config))?;

            println!("Enrolling '{id}' from {} samples ({required} required)", samples.len());
            for (i, input) in samples.into_iter().enumerate() {
                match engine.add_sample(&id, input.into()).await {
                    Ok(progress) => {
                        let state = if progress.complete { ", complete" } else { "" };
                        println!(
                            "  sample {i}: accepted ({}/{}{state})",
                            progress.samples, progress.required
                        );
                    }
                    Err(EngineError::QualityRejected(verdict)) => {
                        println!("  sample {i}: skipped, {verdict} ({})", verdict.hint());
                    }
                    Err(e) if is_skippable(&e) => {
                        println!("  sample {i}: skipped, {e}");
                    }
                    Err(e) => return Err(e).with_context(|| format!("sample {i}")),
                }
            }

            let Some(record) = engine.export().await?.into_iter().next() else {
                anyhow::bail!("not enough consistent samples to enroll '{id}' (need {required})");
            };
            let replaced = store::upsert(&mut records, record);
            gallery.save(&records)?;
            engine.clear_identity(&id).await?;

            if replaced {
                println!("Re-enrolled '{id}'");
            } else {
                println!("Enrolled '{id}'");
            }
        }
        Commands::Verify { a, b, threshold } => {
            if let Some(t) = threshold {
                face_config.recognition_threshold = t;
                face_config.validate()?;
            }
            let a: Sample = read_sample(&a)?;
            let b: Sample = read_sample(&b)?;
            let engine = engine::spawn_engine(Arc::new(face_config))?;

            match engine.verify(a, b).await {
                Ok(v) => {
                    let verdict = if v.matched { "MATCH" } else { "NO MATCH" };
                    println!("{verdict}: distance {:.4} (threshold {:.4})", v.distance, v.threshold);
                }
                Err(EngineError::QualityRejected(verdict)) => {
                    println!("Rejected: {verdict} ({})", verdict.hint());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Recognize { query, threshold } => {
            if let Some(t) = threshold {
                face_config.recognition_threshold = t;
                face_config.validate()?;
            }
            let query = read_sample(&query)?;
            let engine = start_engine(face_config, gallery.load()?).await?;

            match engine.recognize(query).await {
                Ok(result) => match (&result.identity_id, result.distance) {
                    (Some(id), Some(d)) => println!("{id} (distance {d:.4})"),
                    (_, Some(d)) => println!(
                        "No match: closest distance {d:.4} (threshold {:.4})",
                        result.threshold
                    ),
                    _ => println!("No match: gallery is empty"),
                },
                Err(EngineError::QualityRejected(verdict)) => {
                    println!("Rejected: {verdict} ({})", verdict.hint());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::List => {
            let records = gallery.load()?;
            if records.is_empty() {
                println!("No identities enrolled");
            }
            for r in &records {
                println!("{}  dim={}  format={}", r.identity_id(), r.embedding().len(), r.format_version());
            }
        }
        Commands::Remove { id } => {
            let mut records = gallery.load()?;
            if store::remove(&mut records, &id) {
                gallery.save(&records)?;
                println!("Removed '{id}'");
            } else {
                anyhow::bail!("no identity '{id}' in {}", gallery.path().display());
            }
        }
        Commands::Export { output } => {
            let records = gallery.load()?;
            GalleryStore::new(&output).save(&records)?;
            println!("Exported {} identities to {}", records.len(), output.display());
        }
        Commands::Import { input } => {
            let records = GalleryStore::new(&input).load()?;
            // Validate against the configured dimension before overwriting anything.
            let count = start_engine(face_config, records.clone()).await.map(|_| records.len())?;
            gallery.save(&records)?;
            println!("Imported {count} identities");
        }
        Commands::Status => {
            let records = gallery.load()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "gallery": gallery.path().display().to_string(),
                    "identities": records.len(),
                    "config": face_config,
                }))?
            );
        }
    }

    Ok(())
}
