use ndarray::Array2;

use crate::foundation::core::{AxisTag, IndexRange};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::reader::view::ArrayView;
use crate::stages::normalization::Normalization;
use crate::stages::projection::Projection;

/// One normalized movie frame tagged with its coordinate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub scene: usize,
    pub channel: usize,
    pub time: usize,
    /// Display intensities, (height, width).
    pub pixels: Array2<u8>,
}

impl Frame {
    pub fn new(scene: usize, channel: usize, time: usize, pixels: Array2<u8>) -> Self {
        Self {
            scene,
            channel,
            time,
            pixels,
        }
    }

    /// (height, width)
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.dim()
    }
}

/// The per-frame computation: projection then normalization, with chunk-read retries.
///
/// Plain data so it can be shipped to cluster workers.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FrameStages {
    pub projection: Projection,
    pub normalization: Normalization,
    /// Extra attempts for a node whose plane reads fail transiently.
    #[serde(default = "default_retries")]
    pub chunk_read_retries: u32,
}

fn default_retries() -> u32 {
    1
}

impl Default for FrameStages {
    fn default() -> Self {
        Self::new(Projection::default(), Normalization::default())
    }
}

impl FrameStages {
    pub fn new(projection: Projection, normalization: Normalization) -> Self {
        Self {
            projection,
            normalization,
            chunk_read_retries: default_retries(),
        }
    }

    pub fn validate(&self) -> TimelapseResult<()> {
        self.projection.validate()?;
        self.normalization.validate()
    }
}

/// Lazy frame producer for one (scene, channel) of a source.
///
/// Construction checks every shape and configuration constraint without reading pixel data, so
/// a misconfigured scene fails before any frame is scheduled.
#[derive(Clone, Debug)]
pub struct FramePipeline {
    view: ArrayView,
    scene: usize,
    channel: usize,
    times: IndexRange,
    stages: FrameStages,
    frame_shape: (usize, usize),
}

impl FramePipeline {
    /// `times` defaults to the whole Time axis and is clamped to it otherwise.
    pub fn new(
        source: &ArrayView,
        scene: usize,
        channel: usize,
        times: Option<IndexRange>,
        stages: FrameStages,
    ) -> TimelapseResult<Self> {
        stages.validate()?;
        let mut view = fix_axis(source, AxisTag::Scene, scene)?;
        view = fix_axis(&view, AxisTag::Channel, channel)?;
        if view.has_axis(AxisTag::Block) {
            view = view.select(AxisTag::Block, 0)?;
        }

        let n_times = view.len(AxisTag::Time).ok_or_else(|| {
            TimelapseError::invalid_shape(format!(
                "source has no Time axis to iterate (axes: {:?})",
                view.axes()
            ))
        })?;
        let times = times
            .map(|r| r.clamp_to(n_times))
            .unwrap_or(IndexRange::full(n_times));
        if times.is_empty() {
            return Err(TimelapseError::conflicting(format!(
                "time range selects no frames (Time axis has {n_times} points)"
            )));
        }

        let probe = view.select(AxisTag::Time, times.start)?;
        let frame_shape = stages.projection.output_shape(&probe)?;
        if frame_shape.0 == 0 || frame_shape.1 == 0 {
            return Err(TimelapseError::invalid_shape(format!(
                "scene {scene} projects to an empty {}x{} frame",
                frame_shape.1, frame_shape.0
            )));
        }

        Ok(Self {
            view,
            scene,
            channel,
            times,
            stages,
            frame_shape,
        })
    }

    pub fn scene(&self) -> usize {
        self.scene
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn times(&self) -> IndexRange {
        self.times
    }

    pub fn stages(&self) -> &FrameStages {
        &self.stages
    }

    /// (height, width) of every frame this pipeline yields.
    pub fn frame_shape(&self) -> (usize, usize) {
        self.frame_shape
    }

    /// Scene/channel-restricted view that frames are cut from.
    pub fn view(&self) -> &ArrayView {
        &self.view
    }

    /// Compute the frame at absolute time index `time`.
    ///
    /// Transient read failures are retried up to `chunk_read_retries` times.
    pub fn compute(&self, time: usize) -> TimelapseResult<Frame> {
        if !self.times.contains(time) {
            return Err(TimelapseError::invalid_shape(format!(
                "time {time} is outside the selected range {}..{}",
                self.times.start, self.times.end
            )));
        }
        let mut attempt = 0;
        loop {
            match self.compute_once(time) {
                Err(e) if e.is_transient() && attempt < self.stages.chunk_read_retries => {
                    attempt += 1;
                    tracing::warn!(
                        scene = self.scene,
                        time,
                        attempt,
                        error = %e,
                        "retrying frame after chunk read failure"
                    );
                }
                res => return res,
            }
        }
    }

    fn compute_once(&self, time: usize) -> TimelapseResult<Frame> {
        let sub = self.view.select(AxisTag::Time, time)?;
        let projected = self.stages.projection.project(&sub)?;
        let pixels = self.stages.normalization.apply(&projected)?;
        tracing::debug!(scene = self.scene, channel = self.channel, time, "frame computed");
        Ok(Frame::new(self.scene, self.channel, time, pixels))
    }

    /// Frames in ascending time order, computed one at a time as the iterator is advanced.
    pub fn frames(&self) -> impl Iterator<Item = TimelapseResult<Frame>> + '_ {
        self.times.iter().map(move |t| self.compute(t))
    }
}

// Sources without the axis behave as a single index 0.
fn fix_axis(view: &ArrayView, axis: AxisTag, index: usize) -> TimelapseResult<ArrayView> {
    if view.has_axis(axis) {
        return view.select(axis, index);
    }
    if index != 0 {
        return Err(TimelapseError::invalid_shape(format!(
            "source has no {axis} axis, so only index 0 exists (requested {index})"
        )));
    }
    Ok(view.clone())
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/frame.rs"]
mod tests;
