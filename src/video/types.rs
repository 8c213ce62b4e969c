use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::error::ClipError;

/// One plane of samples. Every depth is stored in a 16-bit container.
pub type Plane = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Integer sample precision of a clip, 8 to 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BitDepth(u8);

impl BitDepth {
    pub const MIN: u8 = 8;
    pub const MAX: u8 = 16;

    pub const EIGHT: BitDepth = BitDepth(8);
    pub const TEN: BitDepth = BitDepth(10);
    pub const SIXTEEN: BitDepth = BitDepth(16);

    /// Create a depth, rejecting precisions outside `8..=16`
    pub fn new(bits: u8) -> Result<Self, ClipError> {
        if (Self::MIN..=Self::MAX).contains(&bits) {
            Ok(Self(bits))
        } else {
            Err(ClipError::UnsupportedDepth { bits })
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Largest sample value representable at this depth
    pub fn max_value(self) -> u16 {
        ((1u32 << self.0) - 1) as u16
    }

    /// Bytes per sample in ffmpeg's raw planar layout
    pub fn bytes_per_sample(self) -> usize {
        if self.0 == 8 {
            1
        } else {
            2
        }
    }

    /// Whether ffmpeg has planar pixel formats for this depth
    pub fn is_ffmpeg_native(self) -> bool {
        matches!(self.0, 8 | 9 | 10 | 12 | 14 | 16)
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = ClipError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Self::new(bits)
    }
}

impl From<BitDepth> for u8 {
    fn from(depth: BitDepth) -> Self {
        depth.0
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFamily {
    Gray,
    Yuv,
}

/// Signal range of the samples. Limited is the broadcast ("tv") range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorRange {
    #[default]
    Limited,
    Full,
}

impl ColorRange {
    /// Value for ffmpeg's `-color_range` option
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Limited => "tv",
            Self::Full => "pc",
        }
    }

    pub fn from_ffprobe(value: Option<&str>) -> Self {
        match value {
            Some("pc") | Some("full") | Some("jpeg") => Self::Full,
            _ => Self::Limited,
        }
    }
}

/// Exact frame rate as a fraction, e.g. `24000/1001`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(24000, 1001)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s.split_once('/').unwrap_or((s, "1"));
        let num = num.trim().parse().map_err(|_| format!("invalid frame rate '{s}'"))?;
        let den = den.trim().parse().map_err(|_| format!("invalid frame rate '{s}'"))?;
        if den == 0 {
            return Err(format!("frame rate '{s}' has a zero denominator"));
        }
        Ok(Self::new(num, den))
    }
}

/// Planar sample layout, independent of frame geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    pub family: ColorFamily,
    /// log2 of the horizontal and vertical chroma subsampling
    pub subsampling: (u8, u8),
    pub depth: BitDepth,
}

impl PixelLayout {
    /// Parse an ffmpeg planar `pix_fmt` name.
    ///
    /// The `yuvj*` names are accepted and report full range.
    pub fn from_ffmpeg(name: &str) -> Option<(Self, Option<ColorRange>)> {
        let (name, range) = match name.strip_prefix("yuvj") {
            Some(rest) => (format!("yuv{rest}"), Some(ColorRange::Full)),
            None => (name.to_string(), None),
        };

        let (family, subsampling, rest) = if let Some(rest) = name.strip_prefix("gray") {
            (ColorFamily::Gray, (0, 0), rest)
        } else if let Some(rest) = name.strip_prefix("yuv420p") {
            (ColorFamily::Yuv, (1, 1), rest)
        } else if let Some(rest) = name.strip_prefix("yuv422p") {
            (ColorFamily::Yuv, (1, 0), rest)
        } else if let Some(rest) = name.strip_prefix("yuv444p") {
            (ColorFamily::Yuv, (0, 0), rest)
        } else {
            return None;
        };

        let bits = if rest.is_empty() {
            8
        } else {
            rest.strip_suffix("le")?.parse::<u8>().ok()?
        };
        let depth = BitDepth::new(bits).ok()?;

        Some((
            Self {
                family,
                subsampling,
                depth,
            },
            range,
        ))
    }

    /// The ffmpeg `pix_fmt` name for this layout (little-endian for high depths)
    pub fn ffmpeg_name(&self) -> String {
        let base = match (self.family, self.subsampling) {
            (ColorFamily::Gray, _) => "gray",
            (ColorFamily::Yuv, (1, 1)) => "yuv420p",
            (ColorFamily::Yuv, (1, 0)) => "yuv422p",
            _ => "yuv444p",
        };
        if self.depth.bits() == 8 {
            base.to_string()
        } else {
            format!("{}{}le", base, self.depth.bits())
        }
    }
}

/// Geometry, layout and timing shared by every frame of a clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClipFormat {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub range: ColorRange,
    pub fps: Rational,
}

impl ClipFormat {
    pub fn new(width: u32, height: u32, layout: PixelLayout, fps: Rational) -> Self {
        Self {
            width,
            height,
            layout,
            range: ColorRange::Limited,
            fps,
        }
    }

    /// Convenience constructor for 4:2:0 YUV
    pub fn yuv420(width: u32, height: u32, depth: BitDepth) -> Self {
        Self::new(
            width,
            height,
            PixelLayout {
                family: ColorFamily::Yuv,
                subsampling: (1, 1),
                depth,
            },
            Rational::default(),
        )
    }

    pub fn gray(width: u32, height: u32, depth: BitDepth) -> Self {
        Self::new(
            width,
            height,
            PixelLayout {
                family: ColorFamily::Gray,
                subsampling: (0, 0),
                depth,
            },
            Rational::default(),
        )
    }

    pub fn depth(&self) -> BitDepth {
        self.layout.depth
    }

    pub fn with_depth(mut self, depth: BitDepth) -> Self {
        self.layout.depth = depth;
        self
    }

    pub fn plane_count(&self) -> usize {
        match self.layout.family {
            ColorFamily::Gray => 1,
            ColorFamily::Yuv => 3,
        }
    }

    /// Dimensions of plane `index`; chroma planes round up like ffmpeg does
    pub fn plane_dimensions(&self, index: usize) -> (u32, u32) {
        if index == 0 {
            return (self.width, self.height);
        }
        let (sx, sy) = self.layout.subsampling;
        (
            (self.width + (1 << sx) - 1) >> sx,
            (self.height + (1 << sy) - 1) >> sy,
        )
    }

    /// Size of one frame in ffmpeg's raw planar layout
    pub fn frame_bytes(&self) -> usize {
        let samples: usize = (0..self.plane_count())
            .map(|i| {
                let (w, h) = self.plane_dimensions(i);
                w as usize * h as usize
            })
            .sum();
        samples * self.layout.depth.bytes_per_sample()
    }

    /// Same geometry, sample layout and range, ignoring depth and timing
    pub fn is_compatible(&self, other: &ClipFormat) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.layout.family == other.layout.family
            && self.layout.subsampling == other.layout.subsampling
            && self.range == other.range
    }

    pub fn pix_fmt(&self) -> String {
        self.layout.ffmpeg_name()
    }
}

impl fmt::Display for ClipFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} {:?} @ {}",
            self.width,
            self.height,
            self.pix_fmt(),
            self.range,
            self.fps
        )
    }
}

/// A single decoded video frame stored as planes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    planes: Vec<Plane>,
    depth: BitDepth,
}

impl Frame {
    pub fn new(planes: Vec<Plane>, depth: BitDepth) -> Self {
        Self { planes, depth }
    }

    /// A frame of the given format with every sample set to zero
    pub fn new_black(format: &ClipFormat) -> Self {
        let planes = (0..format.plane_count())
            .map(|i| {
                let (w, h) = format.plane_dimensions(i);
                Plane::new(w, h)
            })
            .collect();
        Self::new(planes, format.depth())
    }

    /// A frame with plane `i` filled with `values[i]`
    pub fn new_filled(format: &ClipFormat, values: &[u16]) -> Self {
        let planes = (0..format.plane_count())
            .map(|i| {
                let (w, h) = format.plane_dimensions(i);
                let value = values.get(i).copied().unwrap_or(0);
                Plane::from_pixel(w, h, Luma([value]))
            })
            .collect();
        Self::new(planes, format.depth())
    }

    pub fn width(&self) -> u32 {
        self.planes.first().map(|p| p.width()).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.planes.first().map(|p| p.height()).unwrap_or(0)
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    pub fn sample(&self, plane: usize, x: u32, y: u32) -> u16 {
        self.planes[plane].get_pixel(x, y)[0]
    }

    pub fn set_sample(&mut self, plane: usize, x: u32, y: u32, value: u16) {
        self.planes[plane].put_pixel(x, y, Luma([value]));
    }

    /// Memory held by the sample buffers
    pub fn byte_size(&self) -> usize {
        self.planes.iter().map(|p| p.len() * 2).sum()
    }

    /// Whether the frame matches `format` in geometry and depth
    pub fn matches(&self, format: &ClipFormat) -> bool {
        self.depth == format.depth()
            && self.planes.len() == format.plane_count()
            && self
                .planes
                .iter()
                .enumerate()
                .all(|(i, p)| p.dimensions() == format.plane_dimensions(i))
    }

    /// Decode one frame from ffmpeg raw planar bytes
    pub fn from_raw(format: &ClipFormat, data: &[u8]) -> Option<Self> {
        if data.len() != format.frame_bytes() {
            return None;
        }

        let bytes_per_sample = format.depth().bytes_per_sample();
        let mut offset = 0;
        let mut planes = Vec::with_capacity(format.plane_count());

        for i in 0..format.plane_count() {
            let (w, h) = format.plane_dimensions(i);
            let count = w as usize * h as usize;
            let bytes = &data[offset..offset + count * bytes_per_sample];
            offset += count * bytes_per_sample;

            let samples: Vec<u16> = if bytes_per_sample == 1 {
                bytes.iter().map(|&b| b as u16).collect()
            } else {
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect()
            };
            planes.push(Plane::from_raw(w, h, samples)?);
        }

        Some(Self::new(planes, format.depth()))
    }

    /// Append the frame to `out` in ffmpeg raw planar layout
    pub fn write_raw(&self, out: &mut Vec<u8>) {
        for plane in &self.planes {
            if self.depth.bytes_per_sample() == 1 {
                out.extend(plane.iter().map(|&v| v as u8));
            } else {
                for &v in plane.iter() {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
    }

    /// Save the luma plane as a 16-bit grayscale PNG, scaled to full 16-bit
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<(), image::ImageError> {
        let shift = 16 - self.depth.bits();
        let luma = self.plane(0);
        let scaled: Plane =
            ImageBuffer::from_fn(luma.width(), luma.height(), |x, y| {
                Luma([luma.get_pixel(x, y)[0] << shift])
            });
        scaled.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_depth_bounds() {
        assert!(BitDepth::new(7).is_err());
        assert!(BitDepth::new(17).is_err());
        assert_eq!(BitDepth::new(10).unwrap().max_value(), 1023);
        assert_eq!(BitDepth::SIXTEEN.max_value(), u16::MAX);
    }

    #[test]
    fn test_pix_fmt_parsing() {
        let (layout, range) = PixelLayout::from_ffmpeg("yuv420p10le").unwrap();
        assert_eq!(layout.family, ColorFamily::Yuv);
        assert_eq!(layout.subsampling, (1, 1));
        assert_eq!(layout.depth.bits(), 10);
        assert_eq!(range, None);
        assert_eq!(layout.ffmpeg_name(), "yuv420p10le");

        let (layout, range) = PixelLayout::from_ffmpeg("yuvj420p").unwrap();
        assert_eq!(layout.depth, BitDepth::EIGHT);
        assert_eq!(range, Some(ColorRange::Full));

        let (layout, _) = PixelLayout::from_ffmpeg("gray16le").unwrap();
        assert_eq!(layout.family, ColorFamily::Gray);
        assert_eq!(layout.ffmpeg_name(), "gray16le");

        assert!(PixelLayout::from_ffmpeg("rgb24").is_none());
        assert!(PixelLayout::from_ffmpeg("yuv420p10be").is_none());
    }

    #[test]
    fn test_plane_dimensions_round_up() {
        let format = ClipFormat::yuv420(1919, 1079, BitDepth::EIGHT);
        assert_eq!(format.plane_dimensions(0), (1919, 1079));
        assert_eq!(format.plane_dimensions(1), (960, 540));
        assert_eq!(format.frame_bytes(), 1919 * 1079 + 2 * 960 * 540);
    }

    #[test]
    fn test_raw_layout_roundtrip_high_depth() {
        let format = ClipFormat::yuv420(4, 2, BitDepth::TEN);
        let mut frame = Frame::new_filled(&format, &[64, 512, 960]);
        frame.set_sample(0, 3, 1, 1023);

        let mut raw = Vec::new();
        frame.write_raw(&mut raw);
        assert_eq!(raw.len(), format.frame_bytes());

        let decoded = Frame::from_raw(&format, &raw).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.matches(&format));
    }

    #[test]
    fn test_raw_rejects_short_buffer() {
        let format = ClipFormat::gray(4, 4, BitDepth::EIGHT);
        assert!(Frame::from_raw(&format, &[0u8; 15]).is_none());
    }

    #[test]
    fn test_compatibility_checks_range() {
        let limited = ClipFormat::yuv420(64, 48, BitDepth::EIGHT);
        let mut full = limited;
        full.range = ColorRange::Full;

        assert!(limited.is_compatible(&limited.with_depth(BitDepth::SIXTEEN)));
        assert!(!limited.is_compatible(&full));
        assert!(!limited.is_compatible(&ClipFormat::yuv420(64, 40, BitDepth::EIGHT)));
    }

    #[test]
    fn test_rational_parse() {
        assert_eq!("24000/1001".parse::<Rational>().unwrap(), Rational::new(24000, 1001));
        assert_eq!("25".parse::<Rational>().unwrap(), Rational::new(25, 1));
        assert!("30/0".parse::<Rational>().is_err());
    }
}
