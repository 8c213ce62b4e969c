use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::error::{EncodeError, Result};
use crate::video::clip::Clip;
use crate::video::loader::is_tool_available;
use crate::video::types::{ClipFormat, Frame};

/// Configuration handed to a [`FrameSink`] before the first frame
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub format: ClipFormat,
    pub frame_count: usize,
}

/// Consumer of finalized frames.
///
/// `push_frame` is called with strictly increasing indices between `begin`
/// and `end`. `abort` is called instead of `end` when rendering fails.
pub trait FrameSink: Send {
    fn begin(&mut self, config: SinkConfig) -> Result<()>;

    fn push_frame(&mut self, index: usize, frame: &Frame) -> Result<()>;

    fn end(&mut self) -> Result<()>;

    fn abort(&mut self) {}
}

/// Summary of an encoded output
#[derive(Debug, Clone)]
pub struct EncodedVideo {
    pub path: String,
    pub duration: f64,
    pub frame_count: usize,
    pub file_size: u64,
}

/// Pull every frame of `clip` in order and push it into `sink`
pub fn render_clip(clip: &Clip, sink: &mut dyn FrameSink) -> Result<usize> {
    sink.begin(SinkConfig {
        format: *clip.format(),
        frame_count: clip.len(),
    })?;

    let progress_step = (clip.len() / 20).max(1);
    for index in 0..clip.len() {
        let pushed = clip
            .frame(index)
            .and_then(|frame| sink.push_frame(index, &frame));
        if let Err(e) = pushed {
            warn!("Rendering '{}' failed at frame {}: {}", clip.label(), index, e);
            sink.abort();
            return Err(e);
        }

        if (index + 1) % progress_step == 0 {
            debug!("Rendered {}/{} frames", index + 1, clip.len());
        }
    }

    if let Err(e) = sink.end() {
        warn!("Finishing '{}' failed: {}", clip.label(), e);
        sink.abort();
        return Err(e);
    }
    Ok(clip.len())
}

/// In-memory sink for tests and previews
#[derive(Debug, Default)]
pub struct InMemorySink {
    config: Option<SinkConfig>,
    frames: Vec<(usize, Frame)>,
    finished: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<&SinkConfig> {
        self.config.as_ref()
    }

    pub fn frames(&self) -> &[(usize, Frame)] {
        &self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, config: SinkConfig) -> Result<()> {
        self.config = Some(config);
        self.frames.clear();
        self.finished = false;
        Ok(())
    }

    fn push_frame(&mut self, index: usize, frame: &Frame) -> Result<()> {
        if let Some((last, _)) = self.frames.last() {
            if index <= *last {
                return Err(EncodeError::SinkFailed {
                    reason: format!("frame {} pushed after frame {}", index, last),
                }
                .into());
            }
        }
        self.frames.push((index, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.frames.clear();
    }
}

/// Sink that streams raw planar frames into a system `ffmpeg` for lossless output
pub struct FfmpegSink {
    ffmpeg: PathBuf,
    output_path: PathBuf,
    options: OutputConfig,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,

    config: Option<SinkConfig>,
    scratch: Vec<u8>,
    last_index: Option<usize>,
    writing: bool,
}

impl FfmpegSink {
    pub fn new<P: Into<PathBuf>>(ffmpeg: P, output_path: P, options: OutputConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            output_path: output_path.into(),
            options,
            child: None,
            stdin: None,
            stderr_drain: None,
            config: None,
            scratch: Vec::new(),
            last_index: None,
            writing: false,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn encoder_args(&self, format: &ClipFormat) -> Vec<String> {
        let mut args: Vec<String> = [
            "-v",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            &format.pix_fmt(),
            "-s",
            &format!("{}x{}", format.width, format.height),
            "-r",
            &format.fps.to_string(),
            "-color_range",
            format.range.ffmpeg_name(),
            "-i",
            "pipe:0",
            "-c:v",
            &self.options.codec,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.extend(self.options.codec_args.iter().cloned());
        args.extend(
            [
                "-pix_fmt",
                &format.pix_fmt(),
                "-color_range",
                format.range.ffmpeg_name(),
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(if self.options.overwrite { "-y" } else { "-n" }.to_string());
        args.push(self.output_path.display().to_string());
        args
    }

    fn kill(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, config: SinkConfig) -> Result<()> {
        if !is_tool_available(&self.ffmpeg) {
            return Err(EncodeError::EncodingFailed {
                reason: format!("{} not found. Please install FFmpeg.", self.ffmpeg.display()),
            }
            .into());
        }
        if !config.format.depth().is_ffmpeg_native() {
            return Err(EncodeError::EncodingFailed {
                reason: format!("ffmpeg has no planar format for {}", config.format.depth()),
            }
            .into());
        }

        if !self.options.overwrite && self.output_path.exists() {
            return Err(EncodeError::SinkFailed {
                reason: format!("{:?} already exists", self.output_path),
            }
            .into());
        }

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let args = self.encoder_args(&config.format);
        debug!("Spawning {} {}", self.ffmpeg.display(), args.join(" "));

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncodeError::EncodingFailed {
                reason: format!("Failed to spawn FFmpeg process: {}", e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| EncodeError::EncodingFailed {
            reason: "ffmpeg stdin unavailable".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| EncodeError::EncodingFailed {
            reason: "ffmpeg stderr unavailable".to_string(),
        })?;
        self.stderr_drain = Some(std::thread::spawn(move || {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf)?;
            Ok(buf)
        }));

        info!(
            "Encoding {} frames ({}) to {:?} with {}",
            config.frame_count, config.format, self.output_path, self.options.codec
        );

        self.scratch = Vec::with_capacity(config.format.frame_bytes());
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.writing = true;
        self.config = Some(config);
        self.last_index = None;
        Ok(())
    }

    fn push_frame(&mut self, index: usize, frame: &Frame) -> Result<()> {
        let config = self.config.as_ref().ok_or_else(|| EncodeError::SinkFailed {
            reason: "ffmpeg sink not started".to_string(),
        })?;

        if let Some(last) = self.last_index {
            if index <= last {
                return Err(EncodeError::SinkFailed {
                    reason: format!("out-of-order frame {} after {}", index, last),
                }
                .into());
            }
        }
        if !frame.matches(&config.format) {
            return Err(EncodeError::SinkFailed {
                reason: format!("frame {} does not match {}", index, config.format),
            }
            .into());
        }

        self.scratch.clear();
        frame.write_raw(&mut self.scratch);

        let stdin = self.stdin.as_mut().ok_or_else(|| EncodeError::SinkFailed {
            reason: "ffmpeg sink is already finalized".to_string(),
        })?;
        stdin
            .write_all(&self.scratch)
            .map_err(|e| EncodeError::EncodingFailed {
                reason: format!("failed to write frame {} to ffmpeg: {}", index, e),
            })?;

        self.last_index = Some(index);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        drop(self.stdin.take());
        let mut child = self.child.take().ok_or_else(|| EncodeError::SinkFailed {
            reason: "ffmpeg sink not started".to_string(),
        })?;

        let status = child.wait().map_err(|e| EncodeError::EncodingFailed {
            reason: format!("failed to wait for ffmpeg: {}", e),
        })?;
        let stderr = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| EncodeError::EncodingFailed {
                    reason: "ffmpeg stderr drain thread panicked".to_string(),
                })??,
            None => Vec::new(),
        };

        if !status.success() {
            return Err(EncodeError::EncodingFailed {
                reason: format!(
                    "FFmpeg exited with {}: {}",
                    status,
                    String::from_utf8_lossy(&stderr).trim()
                ),
            }
            .into());
        }

        self.config = None;
        self.writing = false;
        Ok(())
    }

    fn abort(&mut self) {
        self.kill();
        if self.writing && self.output_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.output_path) {
                warn!("Failed to remove partial output {:?}: {}", self.output_path, e);
            }
        }
        self.writing = false;
        self.config = None;
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.kill();
    }
}
