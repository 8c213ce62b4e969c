use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, Result},
    video::{BitDepth, MergeRule},
};

/// Main configuration for the clip compositor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Processor and memory directive handed to the media core
    pub resources: ResourceConfig,

    /// External decoder settings
    pub decoder: DecoderConfig,

    /// Merge settings
    pub merge: MergeConfig,

    /// Output normalization and encoder settings
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            value: e.to_string(),
        })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.resources.validate()?;
        self.decoder.validate()?;
        self.merge.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Set of logical CPUs the decoder and merge workers may use.
///
/// Written either as an explicit list (`cpus = [0, 2, 4]`) or as a stepped
/// range (`cpus = { start = 0, end = 32, step = 2 }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CpuSet {
    List(Vec<usize>),
    Range {
        start: usize,
        end: usize,
        #[serde(default = "default_step")]
        step: usize,
    },
}

fn default_step() -> usize {
    1
}

impl CpuSet {
    /// Number of distinct CPUs in the set
    pub fn len(&self) -> usize {
        match self {
            Self::List(cpus) => {
                let mut cpus = cpus.clone();
                cpus.sort_unstable();
                cpus.dedup();
                cpus.len()
            }
            Self::Range { start, end, step } => {
                if *step == 0 || start >= end {
                    0
                } else {
                    (*start..*end).step_by(*step).count()
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Processor and memory directive for the media core.
///
/// The CPU set bounds the worker count; cores are not pinned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// CPUs available to workers; all logical CPUs when unset
    pub cpus: Option<CpuSet>,

    /// Ceiling for the decoded frame cache in MiB
    pub cache_mb: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpus: None,
            cache_mb: 4096,
        }
    }
}

impl ResourceConfig {
    /// Worker threads implied by the CPU set
    pub fn worker_count(&self) -> usize {
        match &self.cpus {
            Some(set) => set.len().max(1),
            None => num_cpus::get(),
        }
    }

    pub fn cache_bytes(&self) -> usize {
        self.cache_mb.saturating_mul(1024 * 1024)
    }

    fn validate(&self) -> Result<()> {
        if let Some(set) = &self.cpus {
            if set.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "resources.cpus".to_string(),
                    value: format!("{:?}", set),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// External `ffmpeg`/`ffprobe` decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// ffmpeg executable
    pub ffmpeg: PathBuf,

    /// ffprobe executable
    pub ffprobe: PathBuf,

    /// How far ahead a running decoder may be advanced before it is restarted
    pub readahead: usize,

    /// Count decoded frames instead of packets when probing (slow, exact)
    pub exact_frame_count: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            readahead: 240,
            exact_frame_count: false,
        }
    }
}

impl DecoderConfig {
    fn validate(&self) -> Result<()> {
        if self.ffmpeg.as_os_str().is_empty() || self.ffprobe.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "decoder.ffmpeg".to_string(),
                value: "<empty>".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Precision every merge input is normalized to
    pub bit_depth: BitDepth,

    /// Per-sample statistic
    pub rule: MergeRule,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::SIXTEEN,
            rule: MergeRule::Median,
        }
    }
}

impl MergeConfig {
    fn validate(&self) -> Result<()> {
        self.rule.validate()?;
        Ok(())
    }
}

/// Output normalization and encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Depth of the finalized clip
    pub bit_depth: BitDepth,

    /// Clamp limited-range clips to legal luma/chroma values
    pub clamp_tv_range: bool,

    /// ffmpeg video codec
    pub codec: String,

    /// Extra encoder arguments placed after the codec
    pub codec_args: Vec<String>,

    /// Overwrite an existing output file
    pub overwrite: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            bit_depth: BitDepth::TEN,
            clamp_tv_range: false,
            codec: "ffv1".to_string(),
            codec_args: ["-level", "3", "-g", "1", "-slicecrc", "1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            overwrite: true,
        }
    }
}

impl OutputConfig {
    fn validate(&self) -> Result<()> {
        if !self.bit_depth.is_ffmpeg_native() {
            return Err(ConfigError::InvalidValue {
                key: "output.bit_depth".to_string(),
                value: self.bit_depth.bits().to_string(),
            }
            .into());
        }

        if self.codec.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "output.codec".to_string(),
                value: self.codec.clone(),
            }
            .into());
        }

        Ok(())
    }
}
