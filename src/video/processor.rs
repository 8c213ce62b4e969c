//! Per-sample kernels behind the clip operations: depth conversion, the
//! multi-clip merge statistics and output range clamping.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::error::{ClipError, Result};
use crate::video::types::{BitDepth, ClipFormat, ColorFamily, Frame, Plane};

/// Statistic used to combine aligned samples from several clips.
///
/// Every rule sorts its samples first, so the result does not depend on the
/// order of the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRule {
    /// Middle rank; even counts average the two central ranks, rounding half up
    #[default]
    Median,
    /// Arithmetic mean, rounding half up
    Mean,
    /// Lehmer mean `sum(x^p) / sum(x^(p-1))`, rounded to nearest
    Lehmer { p: f64 },
}

impl MergeRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Mean => "mean",
            Self::Lehmer { .. } => "lehmer",
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Self::Lehmer { p } = self {
            if !p.is_finite() || *p < 1.0 {
                return Err(ClipError::InvalidRule {
                    details: format!("lehmer exponent must be finite and >= 1, got {}", p),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Reduce `samples` to one value. `samples` is reordered in place.
    pub fn reduce(&self, samples: &mut [u16], max: u16) -> u16 {
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let n = samples.len();

        match self {
            Self::Median => {
                if n % 2 == 1 {
                    samples[n / 2]
                } else {
                    let a = samples[n / 2 - 1] as u32;
                    let b = samples[n / 2] as u32;
                    ((a + b + 1) / 2) as u16
                }
            }
            Self::Mean => {
                let sum: u64 = samples.iter().map(|&v| v as u64).sum();
                ((sum + n as u64 / 2) / n as u64).min(max as u64) as u16
            }
            Self::Lehmer { p } => {
                // scaled by the largest sample so high exponents stay finite
                let top = samples[n - 1] as f64;
                if top == 0.0 {
                    return 0;
                }
                let (num, den) = samples.iter().fold((0.0f64, 0.0f64), |(num, den), &v| {
                    let x = v as f64 / top;
                    (num + x.powf(*p), den + x.powf(*p - 1.0))
                });
                if den <= 0.0 {
                    return 0;
                }
                (top * num / den).round().clamp(0.0, max as f64) as u16
            }
        }
    }
}

/// Convert one sample between depths.
///
/// Up-conversion shifts left; down-conversion rounds half up and saturates.
pub fn convert_sample(value: u16, from: BitDepth, to: BitDepth) -> u16 {
    let (from, to) = (from.bits(), to.bits());
    if to >= from {
        value << (to - from)
    } else {
        let shift = from - to;
        let max = (1u32 << to) - 1;
        let rounded = (value as u32 + (1 << (shift - 1))) >> shift;
        rounded.min(max) as u16
    }
}

/// Return a copy of `frame` at the `to` depth
pub fn convert_depth(frame: &Frame, to: BitDepth) -> Frame {
    let from = frame.depth();
    if from == to {
        return frame.clone();
    }

    let planes = frame
        .planes()
        .iter()
        .map(|plane| {
            let mut out = plane.clone();
            for v in out.iter_mut() {
                *v = convert_sample(*v, from, to);
            }
            out
        })
        .collect();
    Frame::new(planes, to)
}

/// Merge aligned frames plane by plane with `rule`.
///
/// Rows are spread over `pool` when one is given. All frames must share the
/// geometry and depth of `format`.
pub fn merge_frames(
    frames: &[Arc<Frame>],
    rule: MergeRule,
    format: &ClipFormat,
    pool: Option<&ThreadPool>,
) -> Frame {
    let max = format.depth().max_value();
    let planes = (0..format.plane_count())
        .map(|index| {
            let (width, height) = format.plane_dimensions(index);
            let inputs: Vec<&Plane> = frames.iter().map(|f| f.plane(index)).collect();
            let mut out = Plane::new(width, height);

            let merge_row = |(y, row): (usize, &mut [u16])| {
                let mut scratch = Vec::with_capacity(inputs.len());
                let offset = y * width as usize;
                for (x, sample) in row.iter_mut().enumerate() {
                    scratch.clear();
                    scratch.extend(inputs.iter().map(|p| p.as_raw()[offset + x]));
                    *sample = rule.reduce(&mut scratch, max);
                }
            };

            let row_len = (width as usize).max(1);
            match pool {
                Some(pool) => pool.install(|| {
                    out.par_chunks_mut(row_len).enumerate().for_each(merge_row)
                }),
                None => out.chunks_mut(row_len).enumerate().for_each(merge_row),
            }
            out
        })
        .collect();

    Frame::new(planes, format.depth())
}

/// Legal sample bounds of limited ("tv") range for plane `index`
pub fn tv_range_bounds(family: ColorFamily, index: usize, depth: BitDepth) -> (u16, u16) {
    let shift = depth.bits() - 8;
    let high = if family == ColorFamily::Yuv && index > 0 {
        240u16
    } else {
        235u16
    };
    (16u16 << shift, high << shift)
}

/// Clamp every plane of `frame` to limited range
pub fn clamp_tv_range(frame: &Frame, family: ColorFamily) -> Frame {
    let depth = frame.depth();
    let planes = frame
        .planes()
        .iter()
        .enumerate()
        .map(|(index, plane)| {
            let (low, high) = tv_range_bounds(family, index, depth);
            let mut out = plane.clone();
            for v in out.iter_mut() {
                *v = (*v).clamp(low, high);
            }
            out
        })
        .collect();
    Frame::new(planes, depth)
}
