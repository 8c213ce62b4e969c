use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::config::{DecoderConfig, ResourceConfig};
use crate::error::{ConfigError, Result};
use crate::video::cache::{CacheStats, FrameCache};
use crate::video::loader::FfmpegSource;
use crate::video::source::{MediaSource, Source};

/// Media library collaborator.
///
/// Created once from an explicit resource directive; owns the worker pool
/// and the decoded frame cache shared by every source it opens.
pub struct MediaCore {
    resources: ResourceConfig,
    decoder: DecoderConfig,
    cache: Arc<FrameCache>,
    pool: Arc<ThreadPool>,
    next_id: AtomicU64,
}

impl MediaCore {
    pub fn new(resources: ResourceConfig, decoder: DecoderConfig) -> Result<Self> {
        let workers = resources.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("compositor-worker-{}", i))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "resources.cpus".to_string(),
                value: e.to_string(),
            })?;

        info!(
            "Media core: {} workers, {} MiB frame cache",
            workers, resources.cache_mb
        );

        Ok(Self {
            cache: Arc::new(FrameCache::new(resources.cache_bytes())),
            pool: Arc::new(pool),
            next_id: AtomicU64::new(1),
            resources,
            decoder,
        })
    }

    /// Open a media container through ffmpeg
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Source> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let source = FfmpegSource::open(
            id,
            path.as_ref(),
            self.decoder.clone(),
            self.resources.worker_count(),
            Arc::clone(&self.cache),
        )?;
        Ok(self.source_from(Arc::new(source)))
    }

    /// Wrap any other source implementation
    pub fn source_from(&self, inner: Arc<dyn MediaSource>) -> Source {
        Source::new(inner)
    }

    pub fn pool(&self) -> Arc<ThreadPool> {
        Arc::clone(&self.pool)
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CpuSet;

    #[test]
    fn test_pool_follows_directive() {
        let resources = ResourceConfig {
            cpus: Some(CpuSet::Range {
                start: 0,
                end: 8,
                step: 2,
            }),
            cache_mb: 16,
        };
        let core = MediaCore::new(resources, DecoderConfig::default()).unwrap();
        assert_eq!(core.worker_count(), 4);
        assert_eq!(core.cache_stats().entries, 0);
    }

    #[test]
    fn test_source_from_wraps_memory_source() {
        use crate::video::types::{BitDepth, ClipFormat, Frame};
        use crate::video::MemorySource;

        let core = MediaCore::new(ResourceConfig::default(), DecoderConfig::default()).unwrap();
        let format = ClipFormat::gray(2, 2, BitDepth::EIGHT);
        let inner = MemorySource::from_fn("vol1.m2ts", format, 3, |n| {
            Frame::new_filled(&format, &[n as u16])
        })
        .unwrap();

        let source = core.source_from(Arc::new(inner));
        assert_eq!(source.len(), 3);
        assert_eq!(source.read_frame(2).unwrap().sample(0, 1, 1), 2);
        assert!(source.read_frame(3).is_err());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let core = MediaCore::new(ResourceConfig::default(), DecoderConfig::default()).unwrap();
        assert!(core.open("/nonexistent/00005.m2ts").is_err());
    }
}
