use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ClipError, Result, SourceError};
use crate::video::clip::Clip;
use crate::video::types::{ClipFormat, Frame};

/// Decoder seam: anything that can serve frames of one video stream by index
pub trait MediaSource: Send + Sync {
    /// Path or name identifying the stream
    fn path(&self) -> &Path;

    /// Format of every frame the source yields
    fn format(&self) -> &ClipFormat;

    /// Total number of frames
    fn frame_count(&self) -> usize;

    /// Decode frame `index`; `index < frame_count()` is checked by the caller
    fn read_frame(&self, index: usize) -> Result<Arc<Frame>>;
}

/// Opaque, cheaply clonable handle onto an opened media stream
#[derive(Clone)]
pub struct Source {
    inner: Arc<dyn MediaSource>,
}

impl Source {
    pub fn new(inner: Arc<dyn MediaSource>) -> Self {
        Self { inner }
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    pub fn format(&self) -> &ClipFormat {
        self.inner.format()
    }

    pub fn len(&self) -> usize {
        self.inner.frame_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name used in clip labels: the file name, or the full path when absent
    pub fn name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path().display().to_string())
    }

    pub fn read_frame(&self, index: usize) -> Result<Arc<Frame>> {
        if index >= self.len() {
            return Err(ClipError::FrameOutOfRange {
                clip: self.name(),
                index,
                len: self.len(),
            }
            .into());
        }
        self.inner.read_frame(index)
    }

    /// The whole stream as a clip
    pub fn clip(&self) -> Clip {
        Clip::from_source(self.clone())
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("path", &self.path())
            .field("frames", &self.len())
            .field("format", self.format())
            .finish()
    }
}

/// Source serving frames held in memory
pub struct MemorySource {
    path: PathBuf,
    format: ClipFormat,
    frames: Vec<Arc<Frame>>,
}

impl MemorySource {
    /// Wrap `frames`; every frame must match `format`
    pub fn new<P: Into<PathBuf>>(path: P, format: ClipFormat, frames: Vec<Frame>) -> Result<Self> {
        let path = path.into();
        if let Some(index) = frames.iter().position(|f| !f.matches(&format)) {
            return Err(SourceError::InvalidFrames {
                name: path.display().to_string(),
                details: format!("frame {} does not match {}", index, format),
            }
            .into());
        }

        Ok(Self {
            path,
            format,
            frames: frames.into_iter().map(Arc::new).collect(),
        })
    }

    /// Generate `count` frames with `make`
    pub fn from_fn<P, F>(path: P, format: ClipFormat, count: usize, make: F) -> Result<Self>
    where
        P: Into<PathBuf>,
        F: FnMut(usize) -> Frame,
    {
        let frames = (0..count).map(make).collect();
        Self::new(path, format, frames)
    }

    /// Convenience: wrap into a [`Source`] handle
    pub fn into_source(self) -> Source {
        Source::new(Arc::new(self))
    }
}

impl MediaSource for MemorySource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> &ClipFormat {
        &self.format
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&self, index: usize) -> Result<Arc<Frame>> {
        self.frames.get(index).cloned().ok_or_else(|| {
            ClipError::FrameOutOfRange {
                clip: self.path.display().to_string(),
                index,
                len: self.frames.len(),
            }
            .into()
        })
    }
}
