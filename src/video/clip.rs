//! Immutable clip handles over a lazily evaluated frame graph.
//!
//! Every operation returns a new [`Clip`] that refers to its inputs; frames
//! are only produced when [`Clip::frame`] is called, normally by a sink pulling
//! the finalized clip in order.

use std::fmt;
use std::sync::Arc;

use rayon::ThreadPool;

use crate::error::{ClipError, Result};
use crate::video::processor::{self, MergeRule};
use crate::video::source::Source;
use crate::video::types::{BitDepth, ClipFormat, Frame};

/// Ordered, finite sequence of frames with a known length
#[derive(Clone)]
pub struct Clip {
    node: Arc<Node>,
    len: usize,
    format: ClipFormat,
    label: Arc<str>,
}

enum Node {
    Source(Source),
    Slice {
        inner: Clip,
        start: usize,
    },
    Concat(Vec<Clip>),
    Depth {
        inner: Clip,
    },
    Merge {
        inputs: Vec<Clip>,
        rule: MergeRule,
        pool: Option<Arc<ThreadPool>>,
    },
    ClampTvRange {
        inner: Clip,
    },
}

impl Clip {
    pub(crate) fn from_source(source: Source) -> Self {
        let len = source.len();
        let format = *source.format();
        let label: Arc<str> = Arc::from(source.name());
        Self {
            node: Arc::new(Node::Source(source)),
            len,
            format,
            label,
        }
    }

    fn from_node(node: Node, len: usize, format: ClipFormat, label: String) -> Self {
        Self {
            node: Arc::new(node),
            len,
            format,
            label: Arc::from(label),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn format(&self) -> &ClipFormat {
        &self.format
    }

    pub fn depth(&self) -> BitDepth {
        self.format.depth()
    }

    /// Name used in logs and error messages
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Same clip under a new name
    pub fn with_label<S: Into<String>>(&self, label: S) -> Self {
        Self {
            node: Arc::clone(&self.node),
            len: self.len,
            format: self.format,
            label: Arc::from(label.into()),
        }
    }

    /// Duration in seconds at the clip's frame rate
    pub fn duration(&self) -> f64 {
        let fps = self.format.fps.as_f64();
        if fps > 0.0 {
            self.len as f64 / fps
        } else {
            0.0
        }
    }

    /// Whether two handles refer to the same node
    pub fn ptr_eq(&self, other: &Clip) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Frames `start..end` in original order.
    ///
    /// Requires `start < end <= len`. Slicing a slice composes offsets onto
    /// the underlying clip.
    pub fn select(&self, start: usize, end: usize) -> Result<Clip> {
        if start >= end || end > self.len {
            return Err(ClipError::Range {
                clip: self.label.to_string(),
                start,
                end,
                len: self.len,
            }
            .into());
        }

        if start == 0 && end == self.len {
            return Ok(self.clone());
        }

        let label = format!("{}[{}..{}]", self.label, start, end);
        let (inner, offset) = match self.node.as_ref() {
            Node::Slice { inner, start: base } => (inner.clone(), base + start),
            _ => (self.clone(), start),
        };

        Ok(Self::from_node(
            Node::Slice {
                inner,
                start: offset,
            },
            end - start,
            self.format,
            label,
        ))
    }

    /// Frames of `self` followed by frames of `other`
    pub fn concat(&self, other: &Clip) -> Result<Clip> {
        check_same_format(self, other)?;

        let mut parts = Vec::new();
        for clip in [self, other] {
            match clip.node.as_ref() {
                Node::Concat(inner) => parts.extend(inner.iter().cloned()),
                _ => parts.push(clip.clone()),
            }
        }

        let label = format!("{}+{}", self.label, other.label);
        Ok(Self::from_node(
            Node::Concat(parts),
            self.len + other.len,
            self.format,
            label,
        ))
    }

    /// Same frames at another sample precision
    pub fn with_depth(&self, depth: BitDepth) -> Clip {
        if depth == self.depth() {
            return self.clone();
        }

        let label = format!("{}@{}", self.label, depth.bits());
        Self::from_node(
            Node::Depth {
                inner: self.clone(),
            },
            self.len,
            self.format.with_depth(depth),
            label,
        )
    }

    /// Merge aligned clips with `rule`; preconditions are checked by the caller
    pub(crate) fn merged(
        inputs: Vec<Clip>,
        rule: MergeRule,
        pool: Option<Arc<ThreadPool>>,
        label: String,
    ) -> Clip {
        let len = inputs.first().map(|c| c.len).unwrap_or(0);
        let format = inputs
            .first()
            .map(|c| c.format)
            .unwrap_or_else(|| ClipFormat::gray(0, 0, BitDepth::EIGHT));
        Self::from_node(Node::Merge { inputs, rule, pool }, len, format, label)
    }

    /// Clamp samples to limited range
    pub(crate) fn clamped_tv_range(&self) -> Clip {
        Self::from_node(
            Node::ClampTvRange {
                inner: self.clone(),
            },
            self.len,
            self.format,
            self.label.to_string(),
        )
    }

    /// Evaluate frame `index`
    pub fn frame(&self, index: usize) -> Result<Arc<Frame>> {
        if index >= self.len {
            return Err(self.out_of_range(index));
        }

        match self.node.as_ref() {
            Node::Source(source) => source.read_frame(index),
            Node::Slice { inner, start } => inner.frame(start + index),
            Node::Concat(parts) => {
                let mut index = index;
                for part in parts {
                    if index < part.len {
                        return part.frame(index);
                    }
                    index -= part.len;
                }
                Err(self.out_of_range(index))
            }
            Node::Depth { inner } => {
                let frame = inner.frame(index)?;
                Ok(Arc::new(processor::convert_depth(&frame, self.depth())))
            }
            Node::Merge { inputs, rule, pool } => {
                let frames = inputs
                    .iter()
                    .map(|clip| clip.frame(index))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(processor::merge_frames(
                    &frames,
                    *rule,
                    &self.format,
                    pool.as_deref(),
                )))
            }
            Node::ClampTvRange { inner } => {
                let frame = inner.frame(index)?;
                Ok(Arc::new(processor::clamp_tv_range(
                    &frame,
                    self.format.layout.family,
                )))
            }
        }
    }

    /// Operation that produced this clip, for plan output
    pub fn node_kind(&self) -> &'static str {
        match self.node.as_ref() {
            Node::Source(_) => "source",
            Node::Slice { .. } => "select",
            Node::Concat(_) => "concat",
            Node::Depth { .. } => "depth",
            Node::Merge { .. } => "merge",
            Node::ClampTvRange { .. } => "clamp",
        }
    }

    fn out_of_range(&self, index: usize) -> crate::error::CompositorError {
        ClipError::FrameOutOfRange {
            clip: self.label.to_string(),
            index,
            len: self.len,
        }
        .into()
    }
}

/// Check that `other` can follow or be merged with `reference`
pub(crate) fn check_same_format(reference: &Clip, other: &Clip) -> Result<()> {
    if !reference.format.is_compatible(&other.format) {
        return Err(ClipError::FormatMismatch {
            clip: other.label.to_string(),
            details: format!("{} vs {}", other.format, reference.format),
        }
        .into());
    }
    if reference.depth() != other.depth() {
        return Err(ClipError::DepthMismatch {
            clip: other.label.to_string(),
            expected: reference.depth().bits(),
            found: other.depth().bits(),
        }
        .into());
    }
    Ok(())
}

impl fmt::Debug for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clip")
            .field("label", &self.label)
            .field("kind", &self.node_kind())
            .field("len", &self.len)
            .field("format", &self.format)
            .finish()
    }
}
