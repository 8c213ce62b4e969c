use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    composition::ClipCompositor,
    config::Config,
    error::{CompositorError, EncodeError, ManifestError, Result},
    manifest::{Manifest, OutputTarget, Truncate},
    video::{render_clip, Clip, EncodedVideo, FfmpegSink, FrameSink, MediaCore, Source},
};

/// Main composition engine that runs a manifest end to end
///
/// The engine follows a clear pipeline:
/// 1. Source Opening - Probe every container the manifest names
/// 2. Clip Selection - Cut the declared frame ranges
/// 3. Depth Normalization - Bring every clip to the merge precision
/// 4. Merging - Combine each merge group per sample
/// 5. Output - Splice and finalize the single output clip
pub struct CompositionEngine {
    config: Config,
    core: Arc<MediaCore>,
}

/// One named node of a built composition
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub name: String,
    pub kind: &'static str,
    pub frames: usize,
}

/// A built, not yet evaluated composition
#[derive(Debug, Clone)]
pub struct Plan {
    pub clips: Vec<PlanStep>,
    pub merges: Vec<PlanStep>,
    pub output: Clip,
}

impl CompositionEngine {
    /// Create an engine and its media core from `config`
    pub fn new(config: Config) -> Result<Self> {
        let core = MediaCore::new(config.resources.clone(), config.decoder.clone())?;
        Ok(Self::with_core(config, Arc::new(core)))
    }

    /// Create an engine sharing an existing media core
    pub fn with_core(config: Config, core: Arc<MediaCore>) -> Self {
        Self { config, core }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn core(&self) -> &Arc<MediaCore> {
        &self.core
    }

    /// Compose `manifest_path` into `output_path` through ffmpeg
    pub async fn compose<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        manifest_path: P,
        output_path: Q,
    ) -> Result<EncodedVideo> {
        let manifest_path = manifest_path.as_ref();
        let output_path = output_path.as_ref();

        info!("🎬 Starting clip composition");
        info!("   Manifest: {:?}", manifest_path);
        info!("   Output: {:?}", output_path);
        info!("   Workers: {}", self.core.worker_count());

        let manifest = Manifest::from_file(manifest_path)?;
        let plan = self.build(&manifest)?;

        let sink = FfmpegSink::new(
            self.config.decoder.ffmpeg.clone(),
            output_path.to_path_buf(),
            self.config.output.clone(),
        );
        let (_, frame_count) = self.render(&plan, sink).await?;

        let file_size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
        let encoded = EncodedVideo {
            path: output_path.display().to_string(),
            duration: plan.output.duration(),
            frame_count,
            file_size,
        };

        info!("   ✅ Output generation complete:");
        info!("      File saved: {:?}", output_path);
        info!("      Duration: {:.1}s", encoded.duration);
        info!("      Frame count: {}", encoded.frame_count);
        info!("      File size: {:.1} MB", encoded.file_size as f64 / 1024.0 / 1024.0);

        let stats = self.core.cache_stats();
        debug!(
            "Frame cache: {} hits, {} misses, {} evictions",
            stats.hits, stats.misses, stats.evictions
        );

        info!("🎉 Composition complete! Output saved to: {:?}", output_path);
        Ok(encoded)
    }

    /// Open every source and build the clip graph without decoding frames
    pub fn build(&self, manifest: &Manifest) -> Result<Plan> {
        let sources = self.open_sources(manifest)?;
        self.build_with_sources(manifest, &sources)
    }

    // ==========================================
    // PIPELINE STEP 1: SOURCE OPENING
    // ==========================================

    /// Open the manifest's sources through the media core
    pub fn open_sources(&self, manifest: &Manifest) -> Result<HashMap<String, Source>> {
        info!("📂 Step 1: Opening {} sources...", manifest.sources.len());

        let mut sources = HashMap::new();
        for entry in &manifest.sources {
            let path = manifest.resolve_path(entry);
            let source = self.core.open(&path).map_err(|e| {
                warn!("Failed to open source '{}': {}", entry.name, e);
                e
            })?;
            info!("   {}: {} frames, {}", entry.name, source.len(), source.format());
            sources.insert(entry.name.clone(), source);
        }

        Ok(sources)
    }

    /// Build the clip graph from already opened sources
    pub fn build_with_sources(
        &self,
        manifest: &Manifest,
        sources: &HashMap<String, Source>,
    ) -> Result<Plan> {
        let mut compositor = ClipCompositor::new(self.config.merge.rule, self.config.output.clone())
            .with_pool(self.core.pool());

        let clips = self.select_clips(&compositor, manifest, sources)?;
        let clips = self.normalize_clips(&compositor, manifest, clips)?;
        let merges = self.merge_groups(&compositor, manifest, &clips)?;
        let output = self.generate_output(&mut compositor, manifest, &clips, &merges)?;

        Ok(Plan {
            clips: plan_steps(&clips),
            merges: plan_steps(&merges),
            output,
        })
    }

    // ==========================================
    // PIPELINE STEP 2: CLIP SELECTION
    // ==========================================

    fn select_clips(
        &self,
        compositor: &ClipCompositor,
        manifest: &Manifest,
        sources: &HashMap<String, Source>,
    ) -> Result<Vec<(String, Clip)>> {
        info!("✂️  Step 2: Selecting {} clips...", manifest.clips.len());

        manifest
            .clips
            .iter()
            .map(|entry| -> Result<(String, Clip)> {
                let source = sources.get(&entry.source).ok_or_else(|| {
                    ManifestError::UnknownSource {
                        clip: entry.name.clone(),
                        source_name: entry.source.clone(),
                    }
                })?;
                let clip = compositor
                    .select(source, entry.start, entry.end)?
                    .with_label(entry.name.as_str());
                debug!(
                    "   {}: {}[{}..{}] -> {} frames",
                    entry.name,
                    entry.source,
                    entry.start,
                    entry.end,
                    clip.len()
                );
                Ok((entry.name.clone(), clip))
            })
            .collect()
    }

    // ==========================================
    // PIPELINE STEP 3: DEPTH NORMALIZATION
    // ==========================================

    fn normalize_clips(
        &self,
        compositor: &ClipCompositor,
        manifest: &Manifest,
        clips: Vec<(String, Clip)>,
    ) -> Result<Vec<(String, Clip)>> {
        let bits = manifest
            .bit_depth
            .unwrap_or_else(|| self.config.merge.bit_depth.bits());
        info!("🎚️  Step 3: Normalizing clips to {}-bit...", bits);

        clips
            .into_iter()
            .map(|(name, clip)| -> Result<(String, Clip)> {
                let normalized = compositor.normalize_depth(&clip, bits)?.with_label(name.as_str());
                Ok((name, normalized))
            })
            .collect()
    }

    // ==========================================
    // PIPELINE STEP 4: MERGING
    // ==========================================

    fn merge_groups(
        &self,
        compositor: &ClipCompositor,
        manifest: &Manifest,
        clips: &[(String, Clip)],
    ) -> Result<Vec<(String, Clip)>> {
        info!("🧮 Step 4: Merging {} groups...", manifest.merges.len());

        let mut merges = Vec::with_capacity(manifest.merges.len());
        for entry in &manifest.merges {
            let mut inputs = entry
                .clips
                .iter()
                .map(|name| lookup(clips, name).ok_or_else(|| unknown_clip(&entry.name, name)))
                .collect::<Result<Vec<_>>>()?;

            if entry.truncate == Some(Truncate::Shortest) {
                let shortest = inputs.iter().map(Clip::len).min().unwrap_or(0);
                inputs = inputs
                    .iter()
                    .map(|clip| clip.select(0, shortest))
                    .collect::<Result<Vec<_>>>()?;
                debug!("   {}: inputs truncated to {} frames", entry.name, shortest);
            }

            let rule = entry.rule.unwrap_or_else(|| compositor.rule());
            let merged = compositor
                .merge_with(&inputs, rule)?
                .with_label(entry.name.as_str());
            info!(
                "   {}: {} clips, {} -> {} frames",
                entry.name,
                inputs.len(),
                rule.name(),
                merged.len()
            );
            merges.push((entry.name.clone(), merged));
        }

        Ok(merges)
    }

    // ==========================================
    // PIPELINE STEP 5: OUTPUT
    // ==========================================

    fn generate_output(
        &self,
        compositor: &mut ClipCompositor,
        manifest: &Manifest,
        clips: &[(String, Clip)],
        merges: &[(String, Clip)],
    ) -> Result<Clip> {
        info!("🎬 Step 5: Generating output clip...");

        let find = |name: &str| {
            lookup(merges, name)
                .or_else(|| lookup(clips, name))
                .ok_or_else(|| -> CompositorError {
                    ManifestError::UnknownTarget {
                        name: name.to_string(),
                    }
                    .into()
                })
        };

        let clip = match manifest.output_target()? {
            OutputTarget::Splice => {
                let splice = manifest.splice.as_ref().ok_or_else(|| {
                    CompositorError::generic("splice target without splice section")
                })?;
                let head = find(splice.head.as_str())?;
                let tail = find(splice.tail.as_str())?;
                let cutoff = splice.cutoff.unwrap_or_else(|| head.len());
                compositor.splice(&head, cutoff, &tail)?
            }
            OutputTarget::Merge(name) | OutputTarget::Clip(name) => find(name.as_str())?,
        };

        let output = compositor.finalize(&clip)?;
        info!("   ✅ Output clip ready:");
        info!("      Frames: {}", output.len());
        info!("      Duration: {:.1}s", output.duration());
        info!("      Format: {}", output.format());

        Ok(output)
    }

    /// Stream every output frame into `sink` on a blocking task
    pub async fn render<S: FrameSink + 'static>(&self, plan: &Plan, mut sink: S) -> Result<(S, usize)> {
        let clip = plan.output.clone();
        info!("📼 Rendering {} frames of '{}'...", clip.len(), clip.label());

        tokio::task::spawn_blocking(move || -> Result<(S, usize)> {
            let frames = render_clip(&clip, &mut sink)?;
            Ok((sink, frames))
        })
        .await
        .map_err(|e| CompositorError::generic(format!("render task failed: {}", e)))?
    }

    /// Write output frame `index` of `plan` as a 16-bit PNG
    pub fn preview<P: AsRef<Path>>(&self, plan: &Plan, index: usize, path: P) -> Result<()> {
        let frame = plan.output.frame(index)?;
        frame
            .save_png(path.as_ref())
            .map_err(|e| EncodeError::SinkFailed {
                reason: format!("failed to write {:?}: {}", path.as_ref(), e),
            })?;
        info!("🖼️  Frame {} written to {:?}", index, path.as_ref());
        Ok(())
    }
}

fn lookup(named: &[(String, Clip)], name: &str) -> Option<Clip> {
    named
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, clip)| clip.clone())
}

fn plan_steps(named: &[(String, Clip)]) -> Vec<PlanStep> {
    named
        .iter()
        .map(|(name, clip)| PlanStep {
            name: name.clone(),
            kind: clip.node_kind(),
            frames: clip.len(),
        })
        .collect()
}

fn unknown_clip(merge: &str, clip: &str) -> CompositorError {
    ManifestError::UnknownClip {
        merge: merge.to_string(),
        clip: clip.to_string(),
    }
    .into()
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "clips:")?;
        for step in &self.clips {
            writeln!(f, "  {:<16} {:>8} frames", step.name, step.frames)?;
        }
        if !self.merges.is_empty() {
            writeln!(f, "merges:")?;
            for step in &self.merges {
                writeln!(f, "  {:<16} {:>8} frames", step.name, step.frames)?;
            }
        }
        write!(
            f,
            "output: {} frames ({:.2}s, {})",
            self.output.len(),
            self.output.duration(),
            self.output.format()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CpuSet, ResourceConfig};
    use crate::error::ClipError;
    use crate::video::{BitDepth, ClipFormat, Frame, InMemorySink, MemorySource};
    use tempfile::tempdir;

    const OPENING: &str = r#"
bit_depth = 16

[[sources]]
name = "vol1"
path = "00004.m2ts"

[[sources]]
name = "vol2"
path = "00003.m2ts"

[[clips]]
name = "op_01"
source = "vol1"
start = 1104
end = 3261

[[clips]]
name = "op_02"
source = "vol2"
start = 0
end = 2159

[[clips]]
name = "op_05"
source = "vol2"
start = 20
end = 2179

[[merges]]
name = "all"
clips = ["op_01", "op_02", "op_05"]
truncate = "shortest"

[[merges]]
name = "long"
clips = ["op_02", "op_05"]

[splice]
head = "all"
tail = "long"
cutoff = 2157
"#;

    fn engine() -> CompositionEngine {
        let mut config = Config::default();
        config.resources = ResourceConfig {
            cpus: Some(CpuSet::List(vec![0, 1])),
            cache_mb: 16,
        };
        CompositionEngine::new(config).unwrap()
    }

    fn sources(vol1_len: usize, vol2_len: usize) -> HashMap<String, Source> {
        let format = ClipFormat::gray(4, 2, BitDepth::EIGHT);
        let make = |name: &str, len: usize, step: usize| {
            MemorySource::from_fn(name, format, len, move |n| {
                Frame::new_filled(&format, &[((n * step) % 256) as u16])
            })
            .unwrap()
            .into_source()
        };

        let mut sources = HashMap::new();
        sources.insert("vol1".to_string(), make("00004.m2ts", vol1_len, 1));
        sources.insert("vol2".to_string(), make("00003.m2ts", vol2_len, 3));
        sources
    }

    #[test]
    fn test_build_opening_plan() {
        let engine = engine();
        let manifest = OPENING.parse::<Manifest>().unwrap();
        let plan = engine
            .build_with_sources(&manifest, &sources(4316, 2200))
            .unwrap();

        let lengths: Vec<usize> = plan.clips.iter().map(|s| s.frames).collect();
        assert_eq!(lengths, vec![2157, 2159, 2159]);
        assert_eq!(plan.merges[0].frames, 2157);
        assert_eq!(plan.merges[1].frames, 2159);
        assert_eq!(plan.merges[0].kind, "merge");
        assert_eq!(plan.output.len(), 2159);
        assert_eq!(plan.output.depth(), engine.config().output.bit_depth);
        assert!(plan.to_string().contains("output: 2159 frames"));
    }

    #[test]
    fn test_build_rejects_out_of_range_clip() {
        let engine = engine();
        let manifest = OPENING.parse::<Manifest>().unwrap();
        let result = engine.build_with_sources(&manifest, &sources(3000, 2200));
        assert!(matches!(
            result,
            Err(CompositorError::Clip(ClipError::Range { end: 3261, .. }))
        ));
    }

    #[test]
    fn test_build_without_truncation_fails() {
        let engine = engine();
        let text = OPENING.replace("truncate = \"shortest\"\n", "");
        let manifest = text.parse::<Manifest>().unwrap();
        let result = engine.build_with_sources(&manifest, &sources(4316, 2200));
        assert!(matches!(
            result,
            Err(CompositorError::Clip(ClipError::LengthMismatch { .. }))
        ));
    }

    #[test]
    fn test_build_rejects_unsupported_depth() {
        let engine = engine();
        let text = OPENING.replace("bit_depth = 16", "bit_depth = 32");
        let manifest = text.parse::<Manifest>().unwrap();
        let result = engine.build_with_sources(&manifest, &sources(4316, 2200));
        assert!(matches!(
            result,
            Err(CompositorError::Clip(ClipError::UnsupportedDepth { bits: 32 }))
        ));
    }

    #[test]
    fn test_build_missing_source_file() {
        let engine = engine();
        let manifest = OPENING.parse::<Manifest>().unwrap();
        assert!(matches!(
            engine.build(&manifest),
            Err(CompositorError::Source(_))
        ));
    }

    #[tokio::test]
    async fn test_render_spliced_output() {
        let engine = engine();
        let manifest = OPENING.parse::<Manifest>().unwrap();
        let plan = engine
            .build_with_sources(&manifest, &sources(4316, 2200))
            .unwrap();

        let (sink, frames) = engine.render(&plan, InMemorySink::new()).await.unwrap();
        assert_eq!(frames, 2159);
        assert!(sink.is_finished());
        assert_eq!(sink.frames().len(), 2159);
        assert_eq!(sink.config().unwrap().frame_count, 2159);
        assert_eq!(sink.frames()[2158].0, 2158);
        assert_eq!(sink.frames()[0].1.depth(), BitDepth::TEN);
    }

    #[test]
    fn test_preview_writes_png() {
        let engine = engine();
        let manifest = OPENING.parse::<Manifest>().unwrap();
        let plan = engine
            .build_with_sources(&manifest, &sources(4316, 2200))
            .unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        engine.preview(&plan, 2158, &path).unwrap();
        assert!(path.exists());
        assert!(engine.preview(&plan, 2159, &path).is_err());
    }
}
