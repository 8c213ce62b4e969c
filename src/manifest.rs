//! Composition manifests.
//!
//! A manifest names the source containers, the frame ranges cut from them,
//! the merge groups built from those ranges and the optional splice that
//! joins two merge results into the final output.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, ManifestError, Result};
use crate::video::MergeRule;

/// A complete composition description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Precision every clip is converted to before merging
    #[serde(default)]
    pub bit_depth: Option<u8>,

    #[serde(default)]
    pub sources: Vec<SourceEntry>,

    #[serde(default)]
    pub clips: Vec<ClipEntry>,

    #[serde(default)]
    pub merges: Vec<MergeEntry>,

    #[serde(default)]
    pub splice: Option<SpliceEntry>,

    /// Directory relative source paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Frames `start..end` of a named source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEntry {
    pub name: String,
    pub source: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeEntry {
    pub name: String,
    pub clips: Vec<String>,

    #[serde(default)]
    pub truncate: Option<Truncate>,

    /// Overrides the configured merge rule for this group
    #[serde(default)]
    pub rule: Option<MergeRule>,
}

/// How a merge group reconciles inputs of differing length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Truncate {
    /// Cut every input to the shortest one
    Shortest,
}

/// `head[0..cutoff]` followed by `tail[cutoff..]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpliceEntry {
    pub head: String,
    pub tail: String,

    #[serde(default)]
    pub cutoff: Option<usize>,
}

/// What the manifest produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Splice,
    Merge(String),
    Clip(String),
}

impl Manifest {
    /// Load and validate a manifest; relative paths resolve against its directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ManifestError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path)?;
        let mut manifest = Self::parse(&content).map_err(|reason| ManifestError::ParseFailed {
            path: path.display().to_string(),
            reason,
        })?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        manifest.validate()?;
        Ok(manifest)
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Check names and references
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let all_names = self
            .sources
            .iter()
            .map(|s| &s.name)
            .chain(self.clips.iter().map(|c| &c.name))
            .chain(self.merges.iter().map(|m| &m.name));
        for name in all_names {
            if !names.insert(name.as_str()) {
                return Err(ManifestError::DuplicateName { name: name.clone() }.into());
            }
        }

        for clip in &self.clips {
            if self.source(&clip.source).is_none() {
                return Err(ManifestError::UnknownSource {
                    clip: clip.name.clone(),
                    source_name: clip.source.clone(),
                }
                .into());
            }
        }

        for merge in &self.merges {
            if merge.clips.len() < 2 {
                return Err(ManifestError::EmptyGroup {
                    name: merge.name.clone(),
                }
                .into());
            }
            if let Some(missing) = merge.clips.iter().find(|c| self.clip(c).is_none()) {
                return Err(ManifestError::UnknownClip {
                    merge: merge.name.clone(),
                    clip: missing.clone(),
                }
                .into());
            }
            if let Some(rule) = &merge.rule {
                rule.validate()?;
            }
        }

        self.output_target().map(|_| ())
    }

    pub fn source(&self, name: &str) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn clip(&self, name: &str) -> Option<&ClipEntry> {
        self.clips.iter().find(|c| c.name == name)
    }

    pub fn merge(&self, name: &str) -> Option<&MergeEntry> {
        self.merges.iter().find(|m| m.name == name)
    }

    /// Source path, joined onto the manifest directory when relative
    pub fn resolve_path(&self, source: &SourceEntry) -> PathBuf {
        if source.path.is_absolute() {
            source.path.clone()
        } else {
            self.base_dir.join(&source.path)
        }
    }

    /// Decide which node is the composition output
    pub fn output_target(&self) -> Result<OutputTarget> {
        if let Some(splice) = &self.splice {
            for name in [&splice.head, &splice.tail] {
                if self.merge(name).is_none() && self.clip(name).is_none() {
                    return Err(ManifestError::UnknownTarget { name: name.clone() }.into());
                }
            }
            return Ok(OutputTarget::Splice);
        }

        match (self.merges.as_slice(), self.clips.as_slice()) {
            ([merge], _) => Ok(OutputTarget::Merge(merge.name.clone())),
            ([], [clip]) => Ok(OutputTarget::Clip(clip.name.clone())),
            ([], []) => Err(ManifestError::AmbiguousOutput {
                details: "manifest declares no clips".to_string(),
            }
            .into()),
            ([], clips) => Err(ManifestError::AmbiguousOutput {
                details: format!("{} clips and no merge or splice", clips.len()),
            }
            .into()),
            (merges, _) => Err(ManifestError::AmbiguousOutput {
                details: format!("{} merge groups and no splice", merges.len()),
            }
            .into()),
        }
    }
}

/// Parses and validates manifest text; paths resolve against the working directory
impl FromStr for Manifest {
    type Err = CompositorError;

    fn from_str(content: &str) -> Result<Self> {
        let manifest = Self::parse(content).map_err(|reason| ManifestError::ParseFailed {
            path: "<inline>".to_string(),
            reason,
        })?;
        manifest.validate()?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositorError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OPENING: &str = r#"
bit_depth = 16

[[sources]]
name = "vol1"
path = "BDMV/STREAM/00004.m2ts"

[[sources]]
name = "vol2"
path = "/discs/vol2/BDMV/STREAM/00003.m2ts"

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
name = "op_03"
source = "vol2"
start = 0
end = 2159

[[merges]]
name = "all"
clips = ["op_01", "op_02", "op_03"]
truncate = "shortest"

[[merges]]
name = "long"
clips = ["op_02", "op_03"]
rule = { lehmer = { p = 2.0 } }

[splice]
head = "all"
tail = "long"
cutoff = 2157
"#;

    fn manifest_error(result: Result<Manifest>) -> ManifestError {
        match result {
            Err(CompositorError::Manifest(e)) => e,
            other => panic!("expected manifest error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_opening() {
        let manifest = OPENING.parse::<Manifest>().unwrap();

        assert_eq!(manifest.bit_depth, Some(16));
        assert_eq!(manifest.sources.len(), 2);
        assert_eq!(manifest.clip("op_01").unwrap().end, 3261);
        assert_eq!(manifest.merge("all").unwrap().truncate, Some(Truncate::Shortest));
        assert_eq!(
            manifest.merge("long").unwrap().rule,
            Some(MergeRule::Lehmer { p: 2.0 })
        );
        assert_eq!(manifest.splice.as_ref().unwrap().cutoff, Some(2157));
        assert_eq!(manifest.output_target().unwrap(), OutputTarget::Splice);
    }

    #[test]
    fn test_from_file_resolves_relative_paths() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(OPENING.as_bytes()).unwrap();

        let manifest = Manifest::from_file(file.path()).unwrap();
        let dir = file.path().parent().unwrap();

        let vol1 = manifest.source("vol1").unwrap();
        assert_eq!(
            manifest.resolve_path(vol1),
            dir.join("BDMV/STREAM/00004.m2ts")
        );
        let vol2 = manifest.source("vol2").unwrap();
        assert_eq!(
            manifest.resolve_path(vol2),
            PathBuf::from("/discs/vol2/BDMV/STREAM/00003.m2ts")
        );
    }

    #[test]
    fn test_missing_file() {
        let err = manifest_error(Manifest::from_file("/nonexistent/opening.toml"));
        assert!(matches!(err, ManifestError::FileNotFound { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        let err = manifest_error("[[sources]\nname = ".parse::<Manifest>());
        assert!(matches!(err, ManifestError::ParseFailed { .. }));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let text = r#"
[[sources]]
name = "a"
path = "a.mkv"

[[clips]]
name = "a"
source = "a"
start = 0
end = 10
"#;
        let err = manifest_error(text.parse::<Manifest>());
        assert!(matches!(err, ManifestError::DuplicateName { ref name } if name == "a"));
    }

    #[test]
    fn test_rejects_unknown_references() {
        let unknown_source = r#"
[[clips]]
name = "op"
source = "missing"
start = 0
end = 10
"#;
        assert!(matches!(
            manifest_error(unknown_source.parse::<Manifest>()),
            ManifestError::UnknownSource { .. }
        ));

        let unknown_clip = OPENING.replace(r#"clips = ["op_02", "op_03"]"#, r#"clips = ["op_02", "op_09"]"#);
        assert!(matches!(
            manifest_error(unknown_clip.parse::<Manifest>()),
            ManifestError::UnknownClip { ref clip, .. } if clip == "op_09"
        ));

        let unknown_target = OPENING.replace(r#"tail = "long""#, r#"tail = "longer""#);
        assert!(matches!(
            manifest_error(unknown_target.parse::<Manifest>()),
            ManifestError::UnknownTarget { .. }
        ));
    }

    #[test]
    fn test_rejects_empty_group() {
        for group in ["clips = []", r#"clips = ["op_02"]"#] {
            let text = OPENING.replace(r#"clips = ["op_02", "op_03"]"#, group);
            assert!(matches!(
                manifest_error(text.parse::<Manifest>()),
                ManifestError::EmptyGroup { .. }
            ));
        }
    }

    #[test]
    fn test_output_without_splice() {
        let text = r#"
[[sources]]
name = "vol1"
path = "00004.m2ts"

[[clips]]
name = "op_01"
source = "vol1"
start = 0
end = 5
"#;
        let manifest = text.parse::<Manifest>().unwrap();
        assert_eq!(
            manifest.output_target().unwrap(),
            OutputTarget::Clip("op_01".to_string())
        );

        let two_merges = OPENING.split("[splice]").next().unwrap_or_default();
        assert!(matches!(
            manifest_error(two_merges.parse::<Manifest>()),
            ManifestError::AmbiguousOutput { .. }
        ));
    }
}
