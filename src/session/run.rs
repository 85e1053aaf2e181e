use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
use crate::encode::sink::FrameSink;
use crate::foundation::core::AxisTag;
use crate::foundation::error::{ErrorKind, TimelapseError, TimelapseResult};
use crate::pipeline::executor::{ExecutionContext, SceneFailure, SceneStats, run_scene};
use crate::pipeline::frame::FramePipeline;
use crate::reader;
use crate::reader::view::ArrayView;
use crate::session::config::{ChannelSelection, PipelineConfig, RunConfig};

/// Creates the sink each (scene, channel) movie is written to.
pub trait SinkFactory: Sync {
    fn create(&self, path: &Path, config: &PipelineConfig) -> TimelapseResult<Box<dyn FrameSink>>;
}

/// Writes movies with the system `ffmpeg`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegSinkFactory;

impl SinkFactory for FfmpegSinkFactory {
    fn create(&self, path: &Path, config: &PipelineConfig) -> TimelapseResult<Box<dyn FrameSink>> {
        let opts = FfmpegSinkOpts::new(path, config.format).overwrite(config.overwrite);
        Ok(Box::new(FfmpegSink::new(opts)))
    }
}

/// Outcome of one (scene, channel) movie.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SceneResult {
    pub scene: usize,
    pub channel: usize,
    pub outcome: SceneOutcome,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SceneOutcome {
    Written {
        path: PathBuf,
        frames: usize,
        /// Times left out under the `skip_frames` policy.
        skipped_times: Vec<usize>,
    },
    Failed {
        kind: ErrorKind,
        /// Failing time index, when one frame caused the failure.
        time: Option<usize>,
        message: String,
    },
}

impl SceneResult {
    fn written(scene: usize, channel: usize, path: PathBuf, stats: SceneStats) -> Self {
        Self {
            scene,
            channel,
            outcome: SceneOutcome::Written {
                path,
                frames: stats.frames_written,
                skipped_times: stats.skipped_times,
            },
        }
    }

    fn failed(scene: usize, channel: usize, failure: SceneFailure) -> Self {
        Self {
            scene,
            channel,
            outcome: SceneOutcome::Failed {
                kind: failure.error.kind(),
                time: failure.time,
                message: failure.error.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SceneOutcome::Failed { .. })
    }

    /// Path of the written movie, if the scene succeeded.
    pub fn path(&self) -> Option<&Path> {
        match &self.outcome {
            SceneOutcome::Written { path, .. } => Some(path),
            SceneOutcome::Failed { .. } => None,
        }
    }
}

/// Per-movie results of one run, in (scene, channel) order.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct RunReport {
    pub results: Vec<SceneResult>,
}

impl RunReport {
    pub fn any_failed(&self) -> bool {
        self.results.iter().any(SceneResult::is_failed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &SceneResult> {
        self.results.iter().filter(|r| r.is_failed())
    }
}

struct SceneJob {
    scene: usize,
    channel: usize,
    path: PathBuf,
    pipeline: TimelapseResult<FramePipeline>,
}

/// A validated run over one opened source.
///
/// Construction resolves the strategies, the scene/channel selection and the execution
/// backend, so configuration errors surface before any movie is started.
#[derive(Debug)]
pub struct MovieSession {
    config: RunConfig,
    view: ArrayView,
    ctx: ExecutionContext,
    scenes: Vec<usize>,
    channels: Vec<usize>,
}

impl MovieSession {
    pub fn open(config: RunConfig) -> TimelapseResult<Self> {
        config.validate()?;
        let view = reader::open(&config.input)?;
        Self::from_view(view, config)
    }

    /// Session over an already-opened view; `config.input` is only used for output names.
    pub fn from_view(view: ArrayView, config: RunConfig) -> TimelapseResult<Self> {
        config.validate()?;
        let scenes = resolve_scenes(&view, config.scenes.as_deref())?;
        let channels = resolve_channels(&view, config.channel)?;
        let ctx = ExecutionContext::new(&config.pipeline.scheduler)?;
        tracing::debug!(?scenes, ?channels, ?ctx, "session ready");
        Ok(Self {
            config,
            view,
            ctx,
            scenes,
            channels,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn view(&self) -> &ArrayView {
        &self.view
    }

    pub fn scenes(&self) -> &[usize] {
        &self.scenes
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// Render every selected movie with `ffmpeg`.
    pub fn run(&self) -> TimelapseResult<RunReport> {
        self.run_with(&FfmpegSinkFactory)
    }

    /// Render every selected movie into sinks made by `factory`.
    ///
    /// Up to `scene_concurrency` movies are in flight at once, never more than the backend can
    /// run in parallel. A failing or panicking movie never stops the others.
    pub fn run_with(&self, factory: &dyn SinkFactory) -> TimelapseResult<RunReport> {
        let stages = self.config.pipeline.stages()?;
        let jobs: Vec<SceneJob> = self
            .scenes
            .iter()
            .flat_map(|&scene| self.channels.iter().map(move |&channel| (scene, channel)))
            .map(|(scene, channel)| SceneJob {
                scene,
                channel,
                path: self.config.output_path(scene, channel),
                pipeline: FramePipeline::new(&self.view, scene, channel, self.config.time, stages),
            })
            .collect();

        let next = AtomicUsize::new(0);
        let workers = self.scene_workers(jobs.len());
        let mut done: Vec<(usize, SceneResult)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut out = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(job) = jobs.get(i) else {
                                return out;
                            };
                            let result =
                                panic::catch_unwind(AssertUnwindSafe(|| self.run_job(job, factory)))
                                    .unwrap_or_else(|payload| panicked(job, payload.as_ref()));
                            out.push((i, result));
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap_or_default())
                .collect()
        });

        if done.len() != jobs.len() {
            return Err(TimelapseError::Other(anyhow::anyhow!(
                "scene worker thread panicked"
            )));
        }
        done.sort_by_key(|(i, _)| *i);
        Ok(RunReport {
            results: done.into_iter().map(|(_, r)| r).collect(),
        })
    }

    /// Scene threads for `jobs` movies, bounded by the backend's capacity.
    fn scene_workers(&self, jobs: usize) -> usize {
        self.config
            .pipeline
            .scene_concurrency
            .min(self.ctx.capacity())
            .clamp(1, jobs.max(1))
    }

    fn run_job(&self, job: &SceneJob, factory: &dyn SinkFactory) -> SceneResult {
        match self.render(job, factory) {
            Ok(stats) => {
                tracing::info!(
                    scene = job.scene,
                    channel = job.channel,
                    path = %job.path.display(),
                    frames = stats.frames_written,
                    skipped = stats.skipped_times.len(),
                    "movie written"
                );
                SceneResult::written(job.scene, job.channel, job.path.clone(), stats)
            }
            Err(failure) => {
                tracing::error!(
                    scene = job.scene,
                    channel = job.channel,
                    time = failure.time,
                    error = %failure.error,
                    "scene failed"
                );
                SceneResult::failed(job.scene, job.channel, failure)
            }
        }
    }

    fn render(
        &self,
        job: &SceneJob,
        factory: &dyn SinkFactory,
    ) -> Result<SceneStats, SceneFailure> {
        let pipeline = match &job.pipeline {
            Ok(p) => p,
            Err(e) => return Err(TimelapseError::from_kind(e.kind(), e.detail()).into()),
        };
        let cfg = &self.config.pipeline;
        FfmpegSinkOpts::new(&job.path, cfg.format)
            .overwrite(cfg.overwrite)
            .check_overwrite()?;

        self.log_scene_start(pipeline);
        let mut sink = factory.create(&job.path, cfg)?;
        run_scene(&self.ctx, pipeline, &cfg.scene_options(), sink.as_mut())
    }

    fn log_scene_start(&self, pipeline: &FramePipeline) {
        let meta = self.view.metadata();
        let times = pipeline.times();
        let (h, w) = pipeline.frame_shape();
        tracing::info!(
            scene = pipeline.scene(),
            channel = pipeline.channel(),
            channel_name = meta.channel_names.get(pipeline.channel()).map(String::as_str),
            acquired = meta.acquisition_date.as_deref(),
            interval_secs = meta.time_interval_secs,
            duration_secs = meta.total_duration_secs(times.len()),
            frames = times.len(),
            width = w,
            height = h,
            "scene started"
        );
    }
}

fn panicked(job: &SceneJob, payload: &(dyn Any + Send)) -> SceneResult {
    let reason = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause");
    tracing::error!(scene = job.scene, channel = job.channel, reason, "scene panicked");
    SceneResult::failed(
        job.scene,
        job.channel,
        SceneFailure::from(TimelapseError::Other(anyhow::anyhow!(
            "scene computation panicked: {reason}"
        ))),
    )
}

/// Open `config.input` and render every selected movie with `ffmpeg`.
pub fn run(config: RunConfig) -> TimelapseResult<RunReport> {
    MovieSession::open(config)?.run()
}

fn resolve_scenes(view: &ArrayView, requested: Option<&[usize]>) -> TimelapseResult<Vec<usize>> {
    let count = view.len(AxisTag::Scene).unwrap_or(1);
    let Some(requested) = requested else {
        return Ok((0..count).collect());
    };
    let mut scenes = Vec::with_capacity(requested.len());
    for &s in requested {
        if s >= count {
            return Err(TimelapseError::conflicting(format!(
                "scene {s} out of range (source has {count} scene(s))"
            )));
        }
        if scenes.contains(&s) {
            tracing::warn!(scene = s, "ignoring repeated scene selection");
            continue;
        }
        scenes.push(s);
    }
    Ok(scenes)
}

fn resolve_channels(view: &ArrayView, sel: ChannelSelection) -> TimelapseResult<Vec<usize>> {
    let count = view.len(AxisTag::Channel);
    match (sel, count) {
        (ChannelSelection::All, Some(n)) => Ok((0..n).collect()),
        (ChannelSelection::All, None) => {
            tracing::warn!("source has no Channel axis; rendering its single channel");
            Ok(vec![0])
        }
        (ChannelSelection::Index(c), Some(n)) if c >= n => Err(TimelapseError::conflicting(
            format!("channel {c} out of range (source has {n} channel(s))"),
        )),
        (ChannelSelection::Index(c), None) if c > 0 => Err(TimelapseError::conflicting(format!(
            "channel {c} requested but the source has no Channel axis"
        ))),
        (ChannelSelection::Index(c), _) => Ok(vec![c]),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/session/run.rs"]
mod tests;
