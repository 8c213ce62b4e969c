//! # Video Module
//!
//! Frame storage, sources, the lazy clip graph and the output sinks.

pub mod cache;
pub mod clip;
pub mod core;
pub mod encoder;
pub mod loader;
pub mod processor;
pub mod source;
pub mod types;

pub use cache::{CacheStats, FrameCache};
pub use clip::Clip;
pub use self::core::MediaCore;
pub use encoder::{render_clip, EncodedVideo, FfmpegSink, FrameSink, InMemorySink, SinkConfig};
pub use loader::{probe, FfmpegSource, VideoMetadata};
pub use processor::MergeRule;
pub use source::{MediaSource, MemorySource, Source};
pub use types::{BitDepth, ClipFormat, ColorFamily, ColorRange, Frame, PixelLayout, Plane, Rational};
