//! # Clip-Compositor
//!
//! Frame-accurate composition of video clips cut from several sources.
//!
//! Clips are selected by frame range, normalized to a common bit depth,
//! merged per sample across aligned copies, spliced together and handed to
//! an encoding sink. Every operation returns a new immutable [`Clip`]
//! describing how its frames are computed; nothing is decoded until a sink
//! pulls the finalized output frame by frame.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clip_compositor::{composition::CompositionEngine, config::Config};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = CompositionEngine::new(Config::default())?;
//! let encoded = engine.compose("opening.toml", "opening.mkv").await?;
//! println!("{} frames written", encoded.frame_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`video`] - Frames, sources, the lazy clip graph and output sinks
//! - [`composition`] - The clip operations and the manifest pipeline
//! - [`manifest`] - Composition manifests
//! - [`config`] - Configuration management
//!
//! ## Working With Clips Directly
//!
//! ```rust,no_run
//! use clip_compositor::{
//!     composition::ClipCompositor,
//!     config::{Config, OutputConfig},
//!     video::{MediaCore, MergeRule},
//! };
//!
//! # fn main() -> clip_compositor::Result<()> {
//! let config = Config::default();
//! let core = MediaCore::new(config.resources, config.decoder)?;
//! let mut compositor = ClipCompositor::new(MergeRule::Median, OutputConfig::default());
//!
//! let vol1 = core.open("vol1/00004.m2ts")?;
//! let vol2 = core.open("vol2/00003.m2ts")?;
//! let clips = [
//!     compositor.select(&vol1, 1104, 3261)?,
//!     compositor.select(&vol2, 0, 2157)?,
//!     compositor.select(&vol2, 12, 2169)?,
//! ];
//! let clips = clips
//!     .iter()
//!     .map(|clip| compositor.normalize_depth(clip, 16))
//!     .collect::<clip_compositor::Result<Vec<_>>>()?;
//!
//! let merged = compositor.merge(&clips)?;
//! let output = compositor.finalize(&merged)?;
//! assert_eq!(output.len(), 2157);
//! # Ok(())
//! # }
//! ```

pub mod composition;
pub mod config;
pub mod error;
pub mod manifest;
pub mod video;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{ClipCompositor, CompositionEngine},
    config::Config,
    error::{CompositorError, Result},
    manifest::Manifest,
    video::{Clip, MediaCore, MergeRule, Source},
};
