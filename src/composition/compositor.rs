use std::sync::Arc;

use rayon::ThreadPool;
use tracing::{debug, info};

use crate::config::OutputConfig;
use crate::error::{ClipError, EncodeError, Result};
use crate::video::clip::check_same_format;
use crate::video::{BitDepth, Clip, ColorRange, MergeRule, Source};

/// The composition operations over immutable clips.
///
/// Every operation returns a new [`Clip`]; the only state kept here is the
/// single finalized output.
pub struct ClipCompositor {
    rule: MergeRule,
    output_config: OutputConfig,
    pool: Option<Arc<ThreadPool>>,
    finalized: bool,
    output: Option<Clip>,
}

impl ClipCompositor {
    pub fn new(rule: MergeRule, output_config: OutputConfig) -> Self {
        Self {
            rule,
            output_config,
            pool: None,
            finalized: false,
            output: None,
        }
    }

    /// Run merge kernels on `pool`
    pub fn with_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn rule(&self) -> MergeRule {
        self.rule
    }

    /// Frames `start..end` of `source`
    pub fn select(&self, source: &Source, start: usize, end: usize) -> Result<Clip> {
        source.clip().select(start, end)
    }

    /// Frames `start..end` of an existing clip
    pub fn select_clip(&self, clip: &Clip, start: usize, end: usize) -> Result<Clip> {
        clip.select(start, end)
    }

    /// Convert `clip` to `bits` per sample
    pub fn normalize_depth(&self, clip: &Clip, bits: u8) -> Result<Clip> {
        let depth = BitDepth::new(bits)?;
        Ok(clip.with_depth(depth))
    }

    /// Merge aligned clips with the configured rule
    pub fn merge(&self, clips: &[Clip]) -> Result<Clip> {
        self.merge_with(clips, self.rule)
    }

    /// Merge aligned clips with an explicit rule.
    ///
    /// All inputs must share length, depth and geometry.
    pub fn merge_with(&self, clips: &[Clip], rule: MergeRule) -> Result<Clip> {
        rule.validate()?;
        let Some(first) = clips.first().filter(|_| clips.len() >= 2) else {
            return Err(ClipError::EmptyMerge { count: clips.len() }.into());
        };

        for (index, clip) in clips.iter().enumerate().skip(1) {
            if clip.len() != first.len() {
                return Err(ClipError::LengthMismatch {
                    clip: clip.label().to_string(),
                    index,
                    expected: first.len(),
                    found: clip.len(),
                }
                .into());
            }
            check_same_format(first, clip)?;
        }

        let label = format!("{}({})", rule.name(), clips.len());
        debug!(
            "Merging {} clips of {} frames with {}",
            clips.len(),
            first.len(),
            rule.name()
        );
        Ok(Clip::merged(clips.to_vec(), rule, self.pool.clone(), label))
    }

    /// Frames of `prefix` followed by frames of `suffix`
    pub fn concat(&self, prefix: &Clip, suffix: &Clip) -> Result<Clip> {
        prefix.concat(suffix)
    }

    /// `a[0..cutoff]` followed by `b[cutoff..]`.
    ///
    /// Requires `cutoff <= min(len(a), len(b))`. A zero cutoff yields `b`,
    /// a cutoff at the end of `b` yields the prefix of `a` alone.
    pub fn splice(&self, a: &Clip, cutoff: usize, b: &Clip) -> Result<Clip> {
        let range_error = || ClipError::Range {
            clip: format!("{}|{}", a.label(), b.label()),
            start: cutoff,
            end: b.len(),
            len: a.len().min(b.len()),
        };
        if cutoff > a.len().min(b.len()) {
            return Err(range_error().into());
        }

        let head = if cutoff > 0 {
            Some(a.select(0, cutoff)?)
        } else {
            None
        };
        let tail = if cutoff < b.len() {
            Some(b.select(cutoff, b.len())?)
        } else {
            None
        };

        let spliced = match (head, tail) {
            (Some(head), Some(tail)) => head.concat(&tail)?,
            (Some(head), None) => head,
            (None, Some(tail)) => tail,
            (None, None) => return Err(range_error().into()),
        };

        info!(
            "Spliced '{}'[..{}] with '{}'[{}..] -> {} frames",
            a.label(),
            cutoff,
            b.label(),
            cutoff,
            spliced.len()
        );
        Ok(spliced)
    }

    /// Normalize `clip` for the encoder and register it as the single output
    pub fn finalize(&mut self, clip: &Clip) -> Result<Clip> {
        if self.finalized {
            return Err(ClipError::AlreadyFinalized {
                clip: clip.label().to_string(),
            }
            .into());
        }

        let mut output = clip.with_depth(self.output_config.bit_depth);
        if self.output_config.clamp_tv_range && output.format().range == ColorRange::Limited {
            output = output.clamped_tv_range();
        }
        let output = output.with_label(format!("final({})", clip.label()));

        info!(
            "Finalized '{}': {} frames, {}",
            clip.label(),
            output.len(),
            output.format()
        );

        self.finalized = true;
        self.output = Some(output.clone());
        Ok(output)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// The registered output, or `NoOutput` before `finalize`
    pub fn require_output(&self) -> Result<&Clip> {
        self.output.as_ref().ok_or_else(|| EncodeError::NoOutput.into())
    }

    /// Hand the registered output to the sink; later finalizes still fail
    pub fn take_output(&mut self) -> Option<Clip> {
        self.output.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositorError;
    use crate::video::{ClipFormat, Frame, MemorySource};
    use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};

    fn compositor() -> ClipCompositor {
        ClipCompositor::new(MergeRule::Median, OutputConfig::default())
    }

    /// Gray 8-bit clip whose frame `n` holds `f(n)` everywhere
    fn clip_of(name: &str, len: usize, f: impl Fn(usize) -> u16) -> Clip {
        let format = ClipFormat::gray(4, 2, crate::video::BitDepth::EIGHT);
        MemorySource::from_fn(name, format, len, |n| Frame::new_filled(&format, &[f(n)]))
            .unwrap()
            .into_source()
            .clip()
    }

    fn values(clip: &Clip) -> Vec<u16> {
        (0..clip.len())
            .map(|n| clip.frame(n).unwrap().sample(0, 3, 1))
            .collect()
    }

    #[test]
    fn test_select_from_source() {
        let format = ClipFormat::gray(2, 2, crate::video::BitDepth::EIGHT);
        let source = MemorySource::from_fn("00004.m2ts", format, 4000, |n| {
            Frame::new_filled(&format, &[(n % 200) as u16])
        })
        .unwrap()
        .into_source();

        let op = compositor().select(&source, 1104, 3261).unwrap();
        assert_eq!(op.len(), 2157);
        assert_eq!(op.frame(0).unwrap().sample(0, 0, 0), (1104 % 200) as u16);
        assert!(matches!(
            compositor().select(&source, 3261, 1104),
            Err(CompositorError::Clip(ClipError::Range { .. }))
        ));
        assert!(compositor().select(&source, 0, 4001).is_err());
    }

    #[test]
    fn test_normalize_depth() {
        let clip = clip_of("a", 3, |n| n as u16);
        let deep = compositor().normalize_depth(&clip, 16).unwrap();
        assert_eq!(deep.len(), 3);
        assert_eq!(deep.depth().bits(), 16);
        assert_eq!(values(&deep), vec![0, 256, 512]);

        assert!(matches!(
            compositor().normalize_depth(&clip, 32),
            Err(CompositorError::Clip(ClipError::UnsupportedDepth { bits: 32 }))
        ));
    }

    #[test]
    fn test_merge_median() {
        let c = compositor();
        let a = clip_of("a", 4, |_| 10);
        let b = clip_of("b", 4, |_| 200);
        let d = clip_of("d", 4, |n| 11 + n as u16);

        let merged = c.merge(&[a, b, d]).unwrap();
        assert_eq!(merged.len(), 4);
        assert_eq!(values(&merged), vec![11, 12, 13, 14]);
    }

    #[test]
    fn test_merge_commutative() {
        let c = compositor();
        let mut clips: Vec<Clip> = (0..6)
            .map(|i| clip_of(&format!("op_{}", i), 5, move |n| ((i * 37 + n * 11) % 256) as u16))
            .collect();
        let expected = values(&c.merge(&clips).unwrap());

        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..10 {
            clips.shuffle(&mut rng);
            assert_eq!(values(&c.merge(&clips).unwrap()), expected);
        }
    }

    #[test]
    fn test_merge_length_mismatch() {
        let short = clip_of("short", 2157, |_| 0);
        let long = clip_of("long", 2159, |_| 0);
        let result = compositor().merge(&[short, long]);
        assert!(matches!(
            result,
            Err(CompositorError::Clip(ClipError::LengthMismatch {
                expected: 2157,
                found: 2159,
                ..
            }))
        ));
    }

    #[test]
    fn test_merge_depth_mismatch() {
        let c = compositor();
        let a = clip_of("a", 3, |_| 0);
        let b = c.normalize_depth(&clip_of("b", 3, |_| 0), 16).unwrap();
        assert!(matches!(
            c.merge(&[a, b]),
            Err(CompositorError::Clip(ClipError::DepthMismatch { .. }))
        ));
    }

    #[test]
    fn test_merge_and_concat_reject_range_mismatch() {
        let c = compositor();
        let limited = clip_of("limited", 3, |_| 16);
        let mut format = ClipFormat::gray(4, 2, crate::video::BitDepth::EIGHT);
        format.range = crate::video::ColorRange::Full;
        let full = MemorySource::from_fn("full", format, 3, |_| Frame::new_filled(&format, &[0]))
            .unwrap()
            .into_source()
            .clip();

        assert!(matches!(
            c.merge(&[limited.clone(), full.clone()]),
            Err(CompositorError::Clip(ClipError::FormatMismatch { .. }))
        ));
        assert!(matches!(
            c.concat(&limited, &full),
            Err(CompositorError::Clip(ClipError::FormatMismatch { .. }))
        ));
    }

    #[test]
    fn test_merge_needs_two_inputs() {
        let c = compositor();
        assert!(c.merge(&[]).is_err());
        assert!(matches!(
            c.merge(&[clip_of("a", 3, |_| 0)]),
            Err(CompositorError::Clip(ClipError::EmptyMerge { count: 1 }))
        ));
    }

    #[test]
    fn test_concat_lengths() {
        let c = compositor();
        let a = clip_of("a", 3, |n| n as u16);
        let b = clip_of("b", 2, |n| 100 + n as u16);
        let joined = c.concat(&a, &b).unwrap();
        assert_eq!(joined.len(), 5);
        assert_eq!(values(&joined), vec![0, 1, 2, 100, 101]);
    }

    #[test]
    fn test_splice_lengths() {
        let c = compositor();
        let a = clip_of("a", 10, |_| 1);
        let b = clip_of("b", 7, |_| 2);

        for k in 0..=7 {
            let spliced = c.splice(&a, k, &b).unwrap();
            assert_eq!(spliced.len(), k + (7 - k));
            let v = values(&spliced);
            assert!(v[..k].iter().all(|&x| x == 1));
            assert!(v[k..].iter().all(|&x| x == 2));
        }
        assert!(c.splice(&a, 8, &b).is_err());
    }

    #[test]
    fn test_splice_short_and_long_merges() {
        let c = compositor();
        let short: Vec<Clip> = (0..3)
            .map(|i| clip_of(&format!("s{}", i), 2157, move |n| ((n + i) % 250) as u16))
            .collect();
        let long: Vec<Clip> = (0..3)
            .map(|i| clip_of(&format!("l{}", i), 2159, move |n| ((n * 3 + i) % 250) as u16))
            .collect();

        let merge_short = c.merge(&short).unwrap();
        let merge_long = c.merge(&long).unwrap();
        let spliced = c.splice(&merge_short, 2157, &merge_long).unwrap();

        assert_eq!(spliced.len(), 2159);
        for n in [0, 1, 1000, 2156] {
            assert_eq!(
                spliced.frame(n).unwrap(),
                merge_short.frame(n).unwrap(),
                "frame {}",
                n
            );
        }
        for n in [2157, 2158] {
            assert_eq!(spliced.frame(n).unwrap(), merge_long.frame(n).unwrap());
        }
    }

    #[test]
    fn test_finalize_once() {
        let mut c = compositor();
        let clip = clip_of("a", 3, |_| 255);
        assert!(matches!(
            c.require_output(),
            Err(CompositorError::Encode(EncodeError::NoOutput))
        ));

        let out = c.finalize(&clip).unwrap();
        assert!(c.require_output().unwrap().ptr_eq(&out));
        assert_eq!(out.len(), 3);
        assert_eq!(out.depth().bits(), 10);
        assert_eq!(out.frame(0).unwrap().sample(0, 0, 0), 1020);
        assert!(c.is_finalized());

        assert!(matches!(
            c.finalize(&clip),
            Err(CompositorError::Clip(ClipError::AlreadyFinalized { .. }))
        ));
        assert!(c.take_output().is_some());
        assert!(c.take_output().is_none());
        assert!(c.finalize(&clip).is_err());
    }

    #[test]
    fn test_finalize_clamps_tv_range() {
        let output = OutputConfig {
            clamp_tv_range: true,
            ..OutputConfig::default()
        };
        let mut c = ClipCompositor::new(MergeRule::Median, output);
        let clip = clip_of("a", 1, |_| 255);

        let out = c.finalize(&clip).unwrap();
        assert_eq!(out.frame(0).unwrap().sample(0, 0, 0), 940);
    }
}
