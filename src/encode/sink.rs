use crate::foundation::core::Fps;
use crate::foundation::error::TimelapseResult;
use crate::pipeline::frame::Frame;

/// Configuration provided to a [`FrameSink`] before the first frame of a movie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Output frames-per-second.
    pub fps: Fps,
}

/// Consumer of one movie's frames.
///
/// Ordering contract: `push_frame` is called with strictly increasing time indices. Gaps are
/// allowed (frames skipped under the `skip_frames` policy).
pub trait FrameSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> TimelapseResult<()>;
    /// Push one frame.
    fn push_frame(&mut self, time: usize, frame: &Frame) -> TimelapseResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> TimelapseResult<()>;
    /// Called instead of `end` when the movie is abandoned. Must not fail.
    fn abort(&mut self) {}
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<Frame>,
    finished: bool,
    aborted: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg
    }

    /// Frames in delivery order.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Time indices in delivery order.
    pub fn times(&self) -> Vec<usize> {
        self.frames.iter().map(|f| f.time).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> TimelapseResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.finished = false;
        self.aborted = false;
        Ok(())
    }

    fn push_frame(&mut self, _time: usize, frame: &Frame) -> TimelapseResult<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn end(&mut self) -> TimelapseResult<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}
