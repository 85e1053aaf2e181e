use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context as _;

use crate::encode::format::OutputFormat;
use crate::foundation::core::{Fps, IndexRange};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::executor::{FailurePolicy, SceneOptions, SchedulerDescriptor};
use crate::pipeline::frame::FrameStages;
use crate::stages::StrategyConfig;
use crate::stages::normalization::Normalization;
use crate::stages::projection::Projection;

/// Channels to render: one index, or every channel as its own movie.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "ChannelRepr", into = "ChannelRepr")]
pub enum ChannelSelection {
    Index(usize),
    All,
}

impl Default for ChannelSelection {
    fn default() -> Self {
        ChannelSelection::Index(0)
    }
}

impl FromStr for ChannelSelection {
    type Err = TimelapseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(ChannelSelection::All);
        }
        s.parse().map(ChannelSelection::Index).map_err(|_| {
            TimelapseError::conflicting(format!("invalid channel '{s}' (expected an index or 'all')"))
        })
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelection::Index(i) => write!(f, "{i}"),
            ChannelSelection::All => f.write_str("all"),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
enum ChannelRepr {
    Index(usize),
    Word(String),
}

impl TryFrom<ChannelRepr> for ChannelSelection {
    type Error = TimelapseError;

    fn try_from(repr: ChannelRepr) -> Result<Self, Self::Error> {
        match repr {
            ChannelRepr::Index(i) => Ok(ChannelSelection::Index(i)),
            ChannelRepr::Word(w) => w.parse(),
        }
    }
}

impl From<ChannelSelection> for ChannelRepr {
    fn from(sel: ChannelSelection) -> Self {
        match sel {
            ChannelSelection::Index(i) => ChannelRepr::Index(i),
            ChannelSelection::All => ChannelRepr::Word("all".to_string()),
        }
    }
}

/// Immutable description of how frames are computed, encoded and scheduled.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Projection strategy; its `axis` parameter names the reduced (depth) axis.
    pub projection: StrategyConfig,
    pub normalization: StrategyConfig,
    pub format: OutputFormat,
    pub fps: Fps,
    /// Replace existing movies instead of failing their scenes.
    pub overwrite: bool,
    pub scheduler: SchedulerDescriptor,
    /// Frames submitted per scheduling window.
    pub chunk_size: usize,
    /// Completed frames that may wait for the encoder.
    pub channel_capacity: usize,
    pub failure_policy: FailurePolicy,
    /// Retries for transient chunk reads inside each frame node.
    pub chunk_read_retries: u32,
    /// Scenes processed at the same time.
    pub scene_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let scene = SceneOptions::default();
        Self {
            projection: StrategyConfig::named("max"),
            normalization: StrategyConfig::named("percentile"),
            format: OutputFormat::default(),
            fps: Fps::default(),
            overwrite: false,
            scheduler: SchedulerDescriptor::default(),
            chunk_size: scene.chunk_size,
            channel_capacity: scene.channel_capacity,
            failure_policy: scene.policy,
            chunk_read_retries: FrameStages::default().chunk_read_retries,
            scene_concurrency: 1,
        }
    }
}

impl PipelineConfig {
    /// Resolve the configured strategies, validating their parameters.
    pub fn stages(&self) -> TimelapseResult<FrameStages> {
        Ok(FrameStages {
            projection: Projection::configure(&self.projection)?,
            normalization: Normalization::configure(&self.normalization)?,
            chunk_read_retries: self.chunk_read_retries,
        })
    }

    pub fn scene_options(&self) -> SceneOptions {
        SceneOptions {
            fps: self.fps,
            chunk_size: self.chunk_size,
            channel_capacity: self.channel_capacity,
            policy: self.failure_policy,
        }
    }

    pub fn validate(&self) -> TimelapseResult<()> {
        self.stages()?;
        self.fps.validate()?;
        for (name, value) in [
            ("chunk_size", self.chunk_size),
            ("channel_capacity", self.channel_capacity),
            ("scene_concurrency", self.scene_concurrency),
        ] {
            if value == 0 {
                return Err(TimelapseError::conflicting(format!("{name} must be >= 1")));
            }
        }
        if let SchedulerDescriptor::Local {
            threads: Some(0),
        } = self.scheduler
        {
            return Err(TimelapseError::conflicting("threads must be >= 1 when set"));
        }
        Ok(())
    }
}

/// One invocation: which source, which scenes/channels/times, and where movies go.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunConfig {
    /// Source array (plane store directory).
    pub input: PathBuf,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    /// Scene indices; `None` renders every scene.
    #[serde(default)]
    pub scenes: Option<Vec<usize>>,
    #[serde(default)]
    pub channel: ChannelSelection,
    /// Half-open time range, clamped to the Time axis; `None` renders all timepoints.
    #[serde(default)]
    pub time: Option<IndexRange>,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from(".")
}

impl RunConfig {
    pub fn new(input: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            out_dir: out_dir.into(),
            scenes: None,
            channel: ChannelSelection::default(),
            time: None,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Read a run description from a JSON file.
    pub fn load(path: &Path) -> TimelapseResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read run config '{}'", path.display()))?;
        let cfg = serde_json::from_str(&text).map_err(|e| {
            TimelapseError::conflicting(format!("invalid run config '{}': {e}", path.display()))
        })?;
        Ok(cfg)
    }

    pub fn validate(&self) -> TimelapseResult<()> {
        self.pipeline.validate()?;
        if let Some(scenes) = &self.scenes
            && scenes.is_empty()
        {
            return Err(TimelapseError::conflicting("scene list is empty"));
        }
        if let Some(t) = self.time
            && t.is_empty()
        {
            return Err(TimelapseError::conflicting(format!(
                "time range {}..{} is empty",
                t.start, t.end
            )));
        }
        Ok(())
    }

    /// Movie path for one (scene, channel): `<out_dir>/<stem>_S<scene>[_C<channel>].<ext>`.
    ///
    /// The channel suffix is present only when every channel is rendered.
    pub fn output_path(&self, scene: usize, channel: usize) -> PathBuf {
        let stem = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "movie".to_string());
        let mut name = format!("{stem}_S{scene}");
        if self.channel == ChannelSelection::All {
            name.push_str(&format!("_C{channel}"));
        }
        name.push('.');
        name.push_str(self.pipeline.format.extension());
        self.out_dir.join(name)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/config.rs"]
mod tests;
