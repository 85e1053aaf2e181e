use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Supported output containers, each with a fixed codec.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// H.264 in MP4.
    #[default]
    Mp4,
    /// H.264 in QuickTime.
    Mov,
    /// H.264 in Matroska.
    Mkv,
    /// MPEG-4 Part 2 in AVI.
    Avi,
    /// VP9 in WebM.
    Webm,
    /// Animated GIF.
    Gif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Mp4,
        OutputFormat::Mov,
        OutputFormat::Mkv,
        OutputFormat::Avi,
        OutputFormat::Webm,
        OutputFormat::Gif,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Avi => "avi",
            OutputFormat::Webm => "webm",
            OutputFormat::Gif => "gif",
        }
    }

    /// Case-insensitive lookup; a leading dot is ignored.
    pub fn from_extension(ext: &str) -> TimelapseResult<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == ext)
            .ok_or_else(|| {
                TimelapseError::unsupported_format(format!(
                    "'{ext}' (supported: mp4, mov, mkv, avi, webm, gif)"
                ))
            })
    }

    /// Format implied by `path`'s extension.
    pub fn from_path(path: &Path) -> TimelapseResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            TimelapseError::unsupported_format(format!(
                "'{}' has no file extension",
                path.display()
            ))
        })?;
        Self::from_extension(ext)
    }

    /// Encoder arguments placed after the input.
    pub(crate) fn codec_args(self) -> &'static [&'static str] {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => &[
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
            ],
            OutputFormat::Mkv => &["-c:v", "libx264", "-pix_fmt", "yuv420p"],
            OutputFormat::Avi => &["-c:v", "mpeg4", "-q:v", "2", "-pix_fmt", "yuv420p"],
            OutputFormat::Webm => &[
                "-c:v",
                "libvpx-vp9",
                "-b:v",
                "0",
                "-crf",
                "30",
                "-pix_fmt",
                "yuv420p",
            ],
            OutputFormat::Gif => &[],
        }
    }

    /// ffmpeg muxer name, so the container does not depend on the output file name.
    pub(crate) fn muxer(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Mkv => "matroska",
            OutputFormat::Avi => "avi",
            OutputFormat::Webm => "webm",
            OutputFormat::Gif => "gif",
        }
    }

    /// `true` when the output pixel format subsamples chroma and needs even dimensions.
    pub fn needs_even_dims(self) -> bool {
        !matches!(self, OutputFormat::Gif)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = TimelapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s)
    }
}
