//! Movie and still-image output.
//!
//! Sinks consume frames in ascending time order and are driven by the scene executor or by
//! [`encode`] for already-ordered frame sequences.

/// `ffmpeg`-based movie sink.
pub mod ffmpeg;
/// Output container/codec selection.
pub mod format;
/// Generic frame sink trait and built-in sinks.
pub mod sink;
/// Single-frame PNG export.
pub mod still;

use std::path::{Path, PathBuf};

use crate::foundation::core::Fps;
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::frame::Frame;

use self::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
use self::format::OutputFormat;
use self::sink::{FrameSink, SinkConfig};

/// Encode an ordered frame sequence into a new movie at `output_path`.
///
/// Refuses to replace an existing file. Frames are streamed to the encoder as the iterator
/// yields them; an error item aborts the movie and removes the partial output.
pub fn encode<I>(
    frames: I,
    output_path: impl AsRef<Path>,
    format: OutputFormat,
    fps: Fps,
) -> TimelapseResult<PathBuf>
where
    I: IntoIterator<Item = TimelapseResult<Frame>>,
{
    let path = output_path.as_ref().to_path_buf();
    let opts = FfmpegSinkOpts::new(&path, format);
    opts.check_overwrite()?;
    let mut sink = FfmpegSink::new(opts);
    encode_into(frames, &mut sink, fps)?;
    Ok(path)
}

/// Drive `sink` from an ordered frame sequence; returns the number of frames written.
///
/// The sink is configured from the first frame's size. An empty sequence is rejected.
pub fn encode_into<I>(frames: I, sink: &mut dyn FrameSink, fps: Fps) -> TimelapseResult<usize>
where
    I: IntoIterator<Item = TimelapseResult<Frame>>,
{
    let mut frames = frames.into_iter();
    let first = match frames.next() {
        Some(first) => first?,
        None => return Err(TimelapseError::invalid_shape("no frames to encode")),
    };
    sink.begin(frame_config(&first, fps)?)?;

    match push_all(first, frames, sink) {
        Ok(written) => {
            sink.end()?;
            Ok(written)
        }
        Err(e) => {
            sink.abort();
            Err(e)
        }
    }
}

fn push_all(
    first: Frame,
    rest: impl Iterator<Item = TimelapseResult<Frame>>,
    sink: &mut dyn FrameSink,
) -> TimelapseResult<usize> {
    sink.push_frame(first.time, &first)?;
    let mut written = 1;
    for frame in rest {
        let frame = frame?;
        sink.push_frame(frame.time, &frame)?;
        written += 1;
    }
    Ok(written)
}

/// Sink configuration for frames shaped like `frame`.
pub fn frame_config(frame: &Frame, fps: Fps) -> TimelapseResult<SinkConfig> {
    let (h, w) = frame.pixels.dim();
    shape_config((h, w), fps)
}

pub(crate) fn shape_config((h, w): (usize, usize), fps: Fps) -> TimelapseResult<SinkConfig> {
    let too_big = || TimelapseError::invalid_shape(format!("{w}x{h} frames are too large"));
    Ok(SinkConfig {
        width: u32::try_from(w).map_err(|_| too_big())?,
        height: u32::try_from(h).map_err(|_| too_big())?,
        fps,
    })
}
