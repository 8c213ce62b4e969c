use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DecoderConfig;
use crate::error::{Result, SourceError};
use crate::video::cache::FrameCache;
use crate::video::source::MediaSource;
use crate::video::types::{ClipFormat, ColorRange, Frame, PixelLayout, Rational};

/// Stream properties reported by `ffprobe`
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub path: PathBuf,
    pub codec: String,
    pub pix_fmt: String,
    pub format: ClipFormat,
    pub frame_count: usize,
}

impl VideoMetadata {
    pub fn duration(&self) -> f64 {
        let fps = self.format.fps.as_f64();
        if fps > 0.0 {
            self.frame_count as f64 / fps
        } else {
            0.0
        }
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    color_range: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    nb_read_frames: Option<String>,
}

/// Probe the first video stream of `path`
pub fn probe(path: &Path, decoder: &DecoderConfig) -> Result<VideoMetadata> {
    let open_failed = |reason: String| SourceError::OpenFailed {
        path: path.display().to_string(),
        reason,
    };

    if !path.exists() {
        return Err(open_failed("file does not exist".to_string()).into());
    }

    let count_flag = if decoder.exact_frame_count {
        "-count_frames"
    } else {
        "-count_packets"
    };

    let output = Command::new(&decoder.ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            count_flag,
            "-show_entries",
            "stream=codec_name,width,height,pix_fmt,r_frame_rate,color_range,nb_frames,nb_read_packets,nb_read_frames",
            "-of",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| open_failed(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(open_failed(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
        .into());
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| open_failed(format!("invalid ffprobe output: {}", e)))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| open_failed("no video stream".to_string()))?;

    metadata_from_stream(path, stream)
}

fn metadata_from_stream(path: &Path, stream: ProbeStream) -> Result<VideoMetadata> {
    let open_failed = |reason: &str| SourceError::OpenFailed {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let width = stream.width.ok_or_else(|| open_failed("missing width"))?;
    let height = stream.height.ok_or_else(|| open_failed("missing height"))?;
    let pix_fmt = stream.pix_fmt.unwrap_or_default();

    let (layout, forced_range) =
        PixelLayout::from_ffmpeg(&pix_fmt).ok_or_else(|| SourceError::UnsupportedFormat {
            path: path.display().to_string(),
            pix_fmt: pix_fmt.clone(),
        })?;

    let fps = match stream.r_frame_rate.as_deref().map(str::parse::<Rational>) {
        Some(Ok(fps)) if fps.num > 0 => fps,
        _ => {
            warn!("No usable frame rate for {}, assuming {}", path.display(), Rational::default());
            Rational::default()
        }
    };

    let frame_count = [stream.nb_read_frames, stream.nb_read_packets, stream.nb_frames]
        .into_iter()
        .flatten()
        .find_map(|v| v.parse::<usize>().ok())
        .ok_or_else(|| open_failed("frame count unavailable"))?;

    let mut format = ClipFormat::new(width, height, layout, fps);
    format.range =
        forced_range.unwrap_or_else(|| ColorRange::from_ffprobe(stream.color_range.as_deref()));

    Ok(VideoMetadata {
        path: path.to_path_buf(),
        codec: stream.codec_name.unwrap_or_else(|| "unknown".to_string()),
        pix_fmt,
        format,
        frame_count,
    })
}

/// Running ffmpeg process positioned at frame `next`
struct DecodeCursor {
    child: Child,
    stdout: BufReader<ChildStdout>,
    next: usize,
    buffer: Vec<u8>,
}

impl Drop for DecodeCursor {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// What a read does with the running decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorAction {
    /// Keep streaming; the `skip` frames before the target go to the cache
    Advance { skip: usize },
    /// Start a new decoder at the requested frame
    Restart,
}

/// Decide how to reach `index` from a decoder whose next frame is `next`
fn cursor_action(next: Option<usize>, index: usize, readahead: usize) -> CursorAction {
    match next {
        Some(next) if next <= index && index - next <= readahead => CursorAction::Advance {
            skip: index - next,
        },
        _ => CursorAction::Restart,
    }
}

/// Frame-accurate source decoded by an external `ffmpeg` process.
///
/// Sequential reads stream from one decoder; a backwards seek or a jump past
/// the readahead window restarts decoding at the requested frame.
pub struct FfmpegSource {
    id: u64,
    metadata: VideoMetadata,
    decoder: DecoderConfig,
    threads: usize,
    cache: Arc<FrameCache>,
    cursor: Mutex<Option<DecodeCursor>>,
    starts: AtomicU64,
}

impl FfmpegSource {
    pub(crate) fn open(
        id: u64,
        path: &Path,
        decoder: DecoderConfig,
        threads: usize,
        cache: Arc<FrameCache>,
    ) -> Result<Self> {
        let metadata = probe(path, &decoder)?;
        info!(
            "Opened {}: {} frames, {} ({})",
            path.display(),
            metadata.frame_count,
            metadata.format,
            metadata.codec
        );

        Ok(Self {
            id,
            metadata,
            decoder,
            threads,
            cache,
            cursor: Mutex::new(None),
            starts: AtomicU64::new(0),
        })
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// Number of decoder processes started so far
    pub fn decoder_starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    fn decode_failed(&self, frame: usize, reason: String) -> SourceError {
        SourceError::DecodeFailed {
            path: self.metadata.path.display().to_string(),
            frame,
            reason,
        }
    }

    fn spawn_cursor(&self, start: usize) -> Result<DecodeCursor> {
        debug!("Starting decoder for {} at frame {}", self.metadata.path.display(), start);

        let mut cmd = Command::new(&self.decoder.ffmpeg);
        cmd.args(["-v", "error", "-nostdin", "-threads", &self.threads.to_string()])
            .arg("-i")
            .arg(&self.metadata.path)
            .args([
                "-map",
                "0:v:0",
                "-vf",
                &format!("trim=start_frame={}", start),
                "-fps_mode",
                "passthrough",
                "-f",
                "rawvideo",
                "-pix_fmt",
                &self.metadata.format.pix_fmt(),
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .map_err(|e| self.decode_failed(start, format!("failed to start ffmpeg: {}", e)))?;
        self.starts.fetch_add(1, Ordering::Relaxed);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.decode_failed(start, "ffmpeg stdout unavailable".to_string()))?;

        Ok(DecodeCursor {
            child,
            stdout: BufReader::with_capacity(self.metadata.format.frame_bytes(), stdout),
            next: start,
            buffer: vec![0u8; self.metadata.format.frame_bytes()],
        })
    }
}

impl MediaSource for FfmpegSource {
    fn path(&self) -> &Path {
        &self.metadata.path
    }

    fn format(&self) -> &ClipFormat {
        &self.metadata.format
    }

    fn frame_count(&self) -> usize {
        self.metadata.frame_count
    }

    fn read_frame(&self, index: usize) -> Result<Arc<Frame>> {
        if let Some(frame) = self.cache.get((self.id, index)) {
            return Ok(frame);
        }

        let mut slot = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let next = slot.as_ref().map(|cursor| cursor.next);
        match cursor_action(next, index, self.decoder.readahead) {
            CursorAction::Advance { skip } if skip > 0 => {
                debug!("Advancing decoder {} frames to frame {}", skip, index)
            }
            CursorAction::Advance { .. } => {}
            CursorAction::Restart => {
                // drop the old process before starting the next one
                *slot = None;
                *slot = Some(self.spawn_cursor(index)?);
            }
        }

        loop {
            let Some(cursor) = slot.as_mut() else {
                return Err(self.decode_failed(index, "decoder not running".to_string()).into());
            };

            let position = cursor.next;
            if let Err(e) = cursor.stdout.read_exact(&mut cursor.buffer) {
                *slot = None;
                return Err(self
                    .decode_failed(position, format!("decoder stream ended early: {}", e))
                    .into());
            }
            cursor.next += 1;

            let frame = Frame::from_raw(&self.metadata.format, &cursor.buffer)
                .map(Arc::new)
                .ok_or_else(|| self.decode_failed(position, "malformed raw frame".to_string()))?;
            self.cache.insert((self.id, position), Arc::clone(&frame));

            if position == index {
                return Ok(frame);
            }
        }
    }
}

/// Return `true` when `program -version` runs successfully
pub fn is_tool_available<P: AsRef<Path>>(program: P) -> bool {
    Command::new(program.as_ref())
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
