use std::path::Path;

use anyhow::Context as _;

use crate::encode::ffmpeg::ensure_parent_dir;
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::frame::Frame;

/// Write one frame as an 8-bit grayscale PNG.
pub fn save_frame_png(frame: &Frame, path: &Path, overwrite: bool) -> TimelapseResult<()> {
    if !overwrite && path.exists() {
        return Err(TimelapseError::conflicting(format!(
            "output file '{}' already exists (set overwrite to replace it)",
            path.display()
        )));
    }
    ensure_parent_dir(path)?;

    let (h, w) = frame.pixels.dim();
    let width = u32::try_from(w).context("frame width exceeds u32")?;
    let height = u32::try_from(h).context("frame height exceeds u32")?;
    let raw: Vec<u8> = frame.pixels.iter().copied().collect();
    let img = image::GrayImage::from_raw(width, height, raw)
        .ok_or_else(|| TimelapseError::invalid_shape("frame buffer does not match its size"))?;
    img.save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("write png '{}'", path.display()))?;
    Ok(())
}
