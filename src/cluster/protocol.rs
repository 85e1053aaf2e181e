use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context as _;
use ndarray::Array2;

use crate::foundation::error::{ErrorKind, TimelapseError, TimelapseResult};
use crate::pipeline::frame::{Frame, FrameStages};
use crate::stages::normalization::Normalization;
use crate::stages::projection::Projection;

/// One frame node, as sent to a worker on a single JSON line.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameRequest {
    /// Source location; must resolve to the same data on the worker.
    pub source: PathBuf,
    pub scene: usize,
    pub channel: usize,
    pub time: usize,
    pub projection: Projection,
    pub normalization: Normalization,
    /// Transient read retries the worker applies.
    pub retries: u32,
}

impl FrameRequest {
    pub fn stages(&self) -> FrameStages {
        FrameStages {
            projection: self.projection,
            normalization: self.normalization,
            chunk_read_retries: self.retries,
        }
    }
}

/// JSON line preceding a response. A successful header is followed by `height * width`
/// raw bytes in row-major order.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseHeader {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseHeader {
    pub fn frame(frame: &Frame) -> Self {
        let (height, width) = frame.shape();
        Self {
            ok: true,
            time: Some(frame.time),
            height: Some(height),
            width: Some(width),
            kind: None,
            message: None,
        }
    }

    pub fn error(err: &TimelapseError) -> Self {
        Self {
            ok: false,
            time: None,
            height: None,
            width: None,
            kind: Some(err.kind()),
            message: Some(err.detail()),
        }
    }
}

fn write_line<T: serde::Serialize>(w: &mut impl Write, value: &T) -> TimelapseResult<()> {
    serde_json::to_writer(&mut *w, value).context("serialize protocol message")?;
    w.write_all(b"\n").context("write protocol message")?;
    Ok(())
}

/// Read one JSON line; `None` at end of stream.
fn read_line<T: serde::de::DeserializeOwned>(r: &mut impl BufRead) -> TimelapseResult<Option<T>> {
    let mut line = String::new();
    let n = r.read_line(&mut line).context("read protocol message")?;
    if n == 0 {
        return Ok(None);
    }
    let value = serde_json::from_str(line.trim_end())
        .with_context(|| format!("malformed protocol message: {}", line.trim_end()))?;
    Ok(Some(value))
}

pub fn write_request(w: &mut impl Write, req: &FrameRequest) -> TimelapseResult<()> {
    write_line(w, req)?;
    w.flush().context("flush request")?;
    Ok(())
}

pub fn read_request(r: &mut impl BufRead) -> TimelapseResult<Option<FrameRequest>> {
    read_line(r)
}

/// Write a frame response (header + pixels).
pub fn write_frame(w: &mut impl Write, frame: &Frame) -> TimelapseResult<()> {
    write_line(w, &ResponseHeader::frame(frame))?;
    match frame.pixels.as_slice() {
        Some(bytes) => w.write_all(bytes),
        None => w.write_all(&frame.pixels.iter().copied().collect::<Vec<u8>>()),
    }
    .context("write frame pixels")?;
    w.flush().context("flush frame response")?;
    Ok(())
}

pub fn write_error(w: &mut impl Write, err: &TimelapseError) -> TimelapseResult<()> {
    write_line(w, &ResponseHeader::error(err))?;
    w.flush().context("flush error response")?;
    Ok(())
}

/// Read one response for `req`.
///
/// The outer result carries transport failures; the inner one is the node's own outcome as
/// reported by the worker.
pub fn read_response(
    r: &mut impl BufRead,
    req: &FrameRequest,
) -> TimelapseResult<TimelapseResult<Frame>> {
    let header: ResponseHeader = read_line(r)?.ok_or_else(|| {
        TimelapseError::Other(anyhow::anyhow!("worker closed the connection"))
    })?;

    if !header.ok {
        let kind = header.kind.unwrap_or(ErrorKind::Other);
        let message = header.message.unwrap_or_default();
        let err = match kind {
            ErrorKind::ChunkRead => TimelapseError::chunk_read(req.scene, req.time, message),
            other => TimelapseError::from_kind(other, message),
        };
        return Ok(Err(err));
    }

    let (Some(time), Some(height), Some(width)) = (header.time, header.height, header.width)
    else {
        return Err(TimelapseError::Other(anyhow::anyhow!(
            "frame response header is missing time/height/width"
        )));
    };
    if time != req.time {
        return Err(TimelapseError::Other(anyhow::anyhow!(
            "worker answered time {time} for a request of time {}",
            req.time
        )));
    }
    let len = height
        .checked_mul(width)
        .context("frame response size overflows")?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).context("read frame pixels")?;
    let pixels = Array2::from_shape_vec((height, width), buf)
        .map_err(|e| TimelapseError::invalid_shape(e.to_string()))?;
    Ok(Ok(Frame::new(req.scene, req.channel, time, pixels)))
}
