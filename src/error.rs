use thiserror::Error;

/// Main error type for the clip compositor library
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Clip error: {0}")]
    Clip(#[from] ClipError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Errors raised by the composition operations
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Invalid range {start}..{end} on clip '{clip}' of length {len}")]
    Range {
        clip: String,
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("Frame {index} is out of range for clip '{clip}' (length {len})")]
    FrameOutOfRange { clip: String, index: usize, len: usize },

    #[error("Merge input '{clip}' (#{index}) has {found} frames, expected {expected}")]
    LengthMismatch {
        clip: String,
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Clip '{clip}' is {found}-bit, expected {expected}-bit")]
    DepthMismatch { clip: String, expected: u8, found: u8 },

    #[error("Unsupported bit depth: {bits} (supported: 8-16)")]
    UnsupportedDepth { bits: u8 },

    #[error("Clip '{clip}' has an incompatible format: {details}")]
    FormatMismatch { clip: String, details: String },

    #[error("Merge needs at least two clips, got {count}")]
    EmptyMerge { count: usize },

    #[error("Invalid merge rule: {details}")]
    InvalidRule { details: String },

    #[error("An output clip was already finalized; cannot finalize '{clip}'")]
    AlreadyFinalized { clip: String },
}

/// Errors from opening and decoding media sources
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open source {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Unsupported pixel format '{pix_fmt}' in {path}")]
    UnsupportedFormat { path: String, pix_fmt: String },

    #[error("Decoding frame {frame} of {path} failed: {reason}")]
    DecodeFailed {
        path: String,
        frame: usize,
        reason: String,
    },

    #[error("Invalid source frames for '{name}': {details}")]
    InvalidFrames { name: String, details: String },
}

/// Errors from handing frames to an output sink
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Sink failed: {reason}")]
    SinkFailed { reason: String },

    #[error("Video encoding failed: {reason}")]
    EncodingFailed { reason: String },

    #[error("No output clip has been finalized")]
    NoOutput,
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Manifest loading and reference errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse manifest {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Duplicate name '{name}' in manifest")]
    DuplicateName { name: String },

    #[error("Clip '{clip}' refers to unknown source '{source_name}'")]
    UnknownSource { clip: String, source_name: String },

    #[error("Merge '{merge}' refers to unknown clip '{clip}'")]
    UnknownClip { merge: String, clip: String },

    #[error("Splice refers to unknown clip or merge '{name}'")]
    UnknownTarget { name: String },

    #[error("Merge '{name}' has fewer than two clips")]
    EmptyGroup { name: String },

    #[error("Manifest does not determine a single output: {details}")]
    AmbiguousOutput { details: String },
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl CompositorError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Inputs are static, so no error clears up on retry
    pub fn is_recoverable(&self) -> bool {
        false
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Source(SourceError::OpenFailed { path, reason }) => {
                format!(
                    "Could not open source '{}' ({}). Check the path and that ffprobe is installed.",
                    path, reason
                )
            }
            Self::Clip(ClipError::LengthMismatch { .. }) => {
                format!(
                    "{}. Adjust the clip ranges or set truncate = \"shortest\" on the merge.",
                    self
                )
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            Self::Manifest(ManifestError::FileNotFound { path }) => {
                format!("Manifest '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors_are_never_recoverable() {
        let errors: Vec<CompositorError> = vec![
            ClipError::EmptyMerge { count: 1 }.into(),
            SourceError::OpenFailed {
                path: "a.m2ts".to_string(),
                reason: "missing".to_string(),
            }
            .into(),
            std::io::Error::new(std::io::ErrorKind::Other, "disk").into(),
        ];
        assert!(errors.iter().all(|e| !e.is_recoverable()));
    }

    #[test]
    fn test_user_message_names_the_clip() {
        let err: CompositorError = ClipError::LengthMismatch {
            clip: "op_02".to_string(),
            index: 1,
            expected: 2157,
            found: 2159,
        }
        .into();
        let message = err.user_message();
        assert!(message.contains("op_02"));
        assert!(message.contains("2159"));
        assert!(message.ends_with("set truncate = \"shortest\" on the merge."));
    }
}
