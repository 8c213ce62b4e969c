use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use clip_compositor::{
    composition::CompositionEngine,
    config::Config,
    manifest::Manifest,
    video::probe,
};

#[derive(Parser)]
#[command(
    name = "clip-compositor",
    version,
    about = "Frame-accurate multi-source clip compositor",
    long_about = "Clip-Compositor cuts frame ranges from several video sources, merges aligned copies per sample, splices the results and encodes a single lossless output."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compose a manifest into an encoded video
    Run {
        /// Composition manifest (TOML)
        manifest: PathBuf,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Build a manifest and print clip lengths without decoding
    Plan {
        /// Composition manifest (TOML)
        manifest: PathBuf,
    },

    /// Print frame count and format of a source
    Probe {
        /// Video container
        file: PathBuf,
    },

    /// Write one output frame's luma plane as a 16-bit PNG
    Preview {
        /// Composition manifest (TOML)
        manifest: PathBuf,

        /// Output frame index
        #[arg(short, long)]
        frame: usize,

        /// PNG file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Starting Clip-Compositor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { manifest, output } => {
            let engine = CompositionEngine::new(config).map_err(report)?;
            let encoded = engine.compose(&manifest, &output).await.map_err(report)?;
            info!(
                "Wrote {} frames ({:.1}s) to {}",
                encoded.frame_count, encoded.duration, encoded.path
            );
        }
        Command::Plan { manifest } => {
            let engine = CompositionEngine::new(config).map_err(report)?;
            let manifest = Manifest::from_file(&manifest).map_err(report)?;
            let plan = engine.build(&manifest).map_err(report)?;
            println!("{}", plan);
        }
        Command::Probe { file } => {
            let metadata = probe(&file, &config.decoder).map_err(report)?;
            println!("{}", metadata.path.display());
            println!("  codec:    {}", metadata.codec);
            println!("  pix_fmt:  {}", metadata.pix_fmt);
            println!("  format:   {}", metadata.format);
            println!("  frames:   {}", metadata.frame_count);
            println!("  duration: {:.3}s", metadata.duration());
        }
        Command::Preview {
            manifest,
            frame,
            output,
        } => {
            let engine = CompositionEngine::new(config).map_err(report)?;
            let manifest = Manifest::from_file(&manifest).map_err(report)?;
            let plan = engine.build(&manifest).map_err(report)?;
            engine.preview(&plan, frame, &output).map_err(report)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)
                .map_err(report)
                .with_context(|| format!("invalid configuration {:?}", config_path))
        }
        None => {
            info!("Using default configuration");
            Ok(Config::default())
        }
    }
}

fn report(error: clip_compositor::CompositorError) -> anyhow::Error {
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}
