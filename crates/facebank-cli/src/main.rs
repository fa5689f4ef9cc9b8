use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facebank_core::{Embedding, FileDecoder, OnnxAnalyzer};
use facebank_pipeline::{
    archive, npy, spawn_engine, Extractor, ManifestOutcome, Pipeline, PipelineConfig, ReferenceMode,
    SelectionPolicy,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Parser)]
#[command(name = "facebank", version, about = "Face-embedding extraction for person catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract embeddings for every catalog row, reusing existing artifacts
    Extract(ExtractArgs),
    /// Print the contents of a combined archive or a single .npy artifact
    Inspect {
        /// Archive (.fbar) or artifact (.npy) to read
        path: PathBuf,
    },
}

#[derive(Args, Default)]
struct ExtractArgs {
    /// TOML config file (applied before FACEBANK_* variables and flags)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// CSV catalog of people and image references
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Flat directory holding the images
    #[arg(long)]
    images: Option<PathBuf>,
    /// Directory for per-record .npy artifacts
    #[arg(long)]
    artifacts: Option<PathBuf>,
    /// Combined archive output
    #[arg(long)]
    archive: Option<PathBuf>,
    /// Manifest CSV output
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Manifest embedding column: "path" or "inline"
    #[arg(long)]
    mode: Option<ReferenceMode>,
    /// Face chosen when an image has several
    #[arg(long)]
    selection: Option<SelectionPolicy>,
    /// Recompute every record, replacing existing artifacts
    #[arg(long)]
    force: bool,
    /// Check cached artifact size before reusing it
    #[arg(long)]
    validate_cache: bool,
    /// Per-record time limit in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// Print the run report as JSON instead of the summary block
    #[arg(long)]
    json: bool,
}

impl ExtractArgs {
    /// Flags win over every other layer.
    fn apply(&self, config: &mut PipelineConfig) {
        let paths = [
            (&self.catalog, &mut config.catalog_path),
            (&self.images, &mut config.image_dir),
            (&self.artifacts, &mut config.artifact_dir),
            (&self.archive, &mut config.archive_path),
            (&self.manifest, &mut config.manifest_path),
        ];
        for (flag, slot) in paths {
            if let Some(p) = flag {
                *slot = p.clone();
            }
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = Some(dir.clone());
        }
        if let Some(mode) = self.mode {
            config.reference_mode = mode;
        }
        if let Some(selection) = self.selection {
            config.selection = selection;
        }
        if let Some(secs) = self.timeout {
            config.record_timeout_secs = secs;
        }
        config.force |= self.force;
        config.validate_cache |= self.validate_cache;
    }

    fn resolve_config(&self) -> Result<PipelineConfig> {
        let mut config = config::load(self.config.as_deref())?;
        config::apply_env(&mut config, |k| std::env::var(k).ok());
        self.apply(&mut config);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract(args) => extract(&args).await,
        Commands::Inspect { path } => inspect(&path),
    }
}

async fn extract(args: &ExtractArgs) -> Result<()> {
    let config = args.resolve_config()?;

    let model_dir = config.model_dir();
    let analyzer = OnnxAnalyzer::load(&model_dir)
        .with_context(|| format!("loading face models from {}", model_dir.display()))?;
    let extractor = Extractor::new(
        Box::new(FileDecoder),
        Box::new(analyzer),
        config.selection,
        config.embedding_dim,
    );
    let engine = spawn_engine(extractor).context("starting inference engine")?;

    let report = Pipeline::new(config)
        .run(&engine)
        .await
        .context("extraction run aborted")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", report.summary);
    match &report.manifest {
        ManifestOutcome::Empty => println!("No embeddings produced; manifest not written."),
        ManifestOutcome::Written { path, rows, fallback } => {
            let note = if *fallback { " (fallback location)" } else { "" };
            println!("Manifest: {} ({rows} rows){note}", path.display());
        }
    }
    if let Some(archive) = &report.archive {
        println!("Archive:  {} ({} entries)", archive.path.display(), archive.entries);
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let is_npy = path.extension().is_some_and(|ext| ext == "npy");
    if is_npy {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let values = npy::decode(&bytes).with_context(|| format!("decoding {}", path.display()))?;
        let embedding = Embedding::from_values(values);
        println!("dim={} norm={:.4}", embedding.dim(), embedding.norm());
        return Ok(());
    }

    let archive =
        archive::read(path).with_context(|| format!("reading archive {}", path.display()))?;
    println!("{}: {} entries, dim={}", path.display(), archive.entries.len(), archive.dim);
    for (key, values) in archive.entries {
        let embedding = Embedding::from_values(values);
        println!("{key}\tdim={}\tnorm={:.4}", embedding.dim(), embedding.norm());
    }
    Ok(())
}
