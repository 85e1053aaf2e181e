use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;

use crate::cluster::client::ClusterClient;
use crate::encode::shape_config;
use crate::encode::sink::FrameSink;
use crate::foundation::core::Fps;
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::frame::{Frame, FramePipeline};
use crate::pipeline::reorder::{ReorderBuffer, Slot};

const MAX_REORDER_BUFFER_BYTES: usize = 256 * 1024 * 1024;

/// Where frame nodes run.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerDescriptor {
    /// In-process rayon pool. `None` uses rayon's default thread count.
    Local {
        #[serde(default)]
        threads: Option<usize>,
    },
    /// `timelapse worker` processes reachable over TCP. Listing an address twice opens two
    /// concurrent connections to it.
    Cluster { workers: Vec<String> },
}

impl Default for SchedulerDescriptor {
    fn default() -> Self {
        SchedulerDescriptor::Local { threads: None }
    }
}

/// What a failed frame node does to its scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failed frame fails the whole scene; no movie is written.
    #[default]
    FailScene,
    /// Failed frames are left out of the movie and reported.
    SkipFrames,
}

/// Per-scene scheduling options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneOptions {
    pub fps: Fps,
    /// Frames submitted to the backend per window.
    pub chunk_size: usize,
    /// Bounded channel capacity between nodes and the encoder thread.
    pub channel_capacity: usize,
    pub policy: FailurePolicy,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            fps: Fps::default(),
            chunk_size: 32,
            channel_capacity: 8,
            policy: FailurePolicy::default(),
        }
    }
}

/// Outcome counters of a successfully written scene.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    /// Frames in the requested time range.
    pub frames_total: usize,
    /// Frames handed to the sink.
    pub frames_written: usize,
    /// Times left out under [`FailurePolicy::SkipFrames`], ascending.
    pub skipped_times: Vec<usize>,
}

/// Scene-level failure with the time index that caused it, when known.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct SceneFailure {
    pub time: Option<usize>,
    pub error: TimelapseError,
}

impl SceneFailure {
    pub fn at(time: usize, error: TimelapseError) -> Self {
        Self {
            time: Some(time),
            error,
        }
    }
}

impl From<TimelapseError> for SceneFailure {
    fn from(error: TimelapseError) -> Self {
        Self { time: None, error }
    }
}

enum Backend {
    Local(rayon::ThreadPool),
    Cluster(ClusterClient),
}

/// Execution backend for frame nodes, owned by the caller and passed to every scene run.
///
/// Dropping the context shuts the worker pool down.
pub struct ExecutionContext {
    backend: Backend,
}

impl ExecutionContext {
    pub fn new(desc: &SchedulerDescriptor) -> TimelapseResult<Self> {
        match desc {
            SchedulerDescriptor::Local { threads } => Self::local(*threads),
            SchedulerDescriptor::Cluster { workers } => Ok(Self {
                backend: Backend::Cluster(ClusterClient::new(workers.clone())?),
            }),
        }
    }

    pub fn local(threads: Option<usize>) -> TimelapseResult<Self> {
        Ok(Self {
            backend: Backend::Local(build_thread_pool(threads)?),
        })
    }

    /// Frame nodes that can run at once.
    pub fn capacity(&self) -> usize {
        match &self.backend {
            Backend::Local(pool) => pool.current_num_threads(),
            Backend::Cluster(client) => client.workers().len(),
        }
    }

    /// Fail early when `pipeline` cannot run on this backend.
    pub fn check(&self, pipeline: &FramePipeline) -> TimelapseResult<()> {
        match &self.backend {
            Backend::Local(_) => Ok(()),
            Backend::Cluster(client) => client.check(pipeline),
        }
    }

    /// Submit one node per entry of `times` and hand each result to `deliver` as it completes,
    /// in no particular order. Nodes that start after `cancel` is set are not run and not
    /// delivered. Returns once every submitted node has finished.
    pub fn gather(
        &self,
        pipeline: &FramePipeline,
        times: &[usize],
        cancel: &AtomicBool,
        deliver: &(dyn Fn(usize, TimelapseResult<Frame>) + Sync),
    ) {
        match &self.backend {
            Backend::Local(pool) => pool.install(|| {
                times.par_iter().for_each(|&time| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    deliver(time, pipeline.compute(time));
                });
            }),
            Backend::Cluster(client) => client.gather(pipeline, times, cancel, deliver),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.backend {
            Backend::Local(pool) => f
                .debug_struct("ExecutionContext::Local")
                .field("threads", &pool.current_num_threads())
                .finish(),
            Backend::Cluster(client) => f
                .debug_struct("ExecutionContext::Cluster")
                .field("workers", &client.workers())
                .finish(),
        }
    }
}

struct FrameMsg {
    time: usize,
    result: TimelapseResult<Frame>,
}

/// Compute every frame of `pipeline` on `ctx` and stream them into `sink` in ascending time
/// order.
///
/// Nodes run in windows of `chunk_size`; an encoder thread re-orders completions and feeds the
/// sink. On a scene failure remaining nodes are cancelled, in-flight results are drained and
/// discarded, and the sink is aborted.
#[tracing::instrument(
    name = "scene",
    skip_all,
    fields(scene = pipeline.scene(), channel = pipeline.channel())
)]
pub fn run_scene(
    ctx: &ExecutionContext,
    pipeline: &FramePipeline,
    opts: &SceneOptions,
    sink: &mut dyn FrameSink,
) -> Result<SceneStats, SceneFailure> {
    ctx.check(pipeline)?;
    let cfg = shape_config(pipeline.frame_shape(), opts.fps)?;
    let times = pipeline.times();

    let (h, w) = pipeline.frame_shape();
    let max_chunk_by_mem = (MAX_REORDER_BUFFER_BYTES / h.saturating_mul(w).max(1)).max(1);
    let chunk_size = opts.chunk_size.max(1).min(max_chunk_by_mem);
    let cap = opts.channel_capacity.max(1);
    let policy = opts.policy;
    let cancel = AtomicBool::new(false);

    std::thread::scope(|scope| -> Result<SceneStats, SceneFailure> {
        let (tx, rx) = mpsc::sync_channel::<FrameMsg>(cap);
        let cancel = &cancel;
        let sink_ref: &mut dyn FrameSink = sink;

        // Encoder thread: delivers to the sink in time order regardless of completion order.
        let enc = scope.spawn(move || -> Result<SceneStats, SceneFailure> {
            if let Err(e) = sink_ref.begin(cfg) {
                cancel.store(true, Ordering::Relaxed);
                rx.iter().for_each(drop);
                return Err(e.into());
            }

            let mut buf = ReorderBuffer::new(times);
            let mut stats = SceneStats {
                frames_total: times.len(),
                ..SceneStats::default()
            };
            let mut failure: Option<SceneFailure> = None;
            let mut last_skip: Option<TimelapseError> = None;

            for msg in rx.iter() {
                if failure.is_some() {
                    continue;
                }
                let slot = match msg.result {
                    Ok(frame) => Slot::Ready(frame),
                    Err(error) if policy == FailurePolicy::SkipFrames => {
                        tracing::warn!(time = msg.time, %error, "skipping failed frame");
                        stats.skipped_times.push(msg.time);
                        last_skip = Some(error);
                        Slot::Skipped
                    }
                    Err(error) => {
                        cancel.store(true, Ordering::Relaxed);
                        failure = Some(SceneFailure::at(msg.time, error));
                        continue;
                    }
                };
                if let Err(error) = buf.insert(msg.time, slot) {
                    cancel.store(true, Ordering::Relaxed);
                    failure = Some(SceneFailure::at(msg.time, error));
                    continue;
                }
                while let Some((time, frame)) = buf.pop_ready() {
                    if let Err(error) = sink_ref.push_frame(time, &frame) {
                        cancel.store(true, Ordering::Relaxed);
                        failure = Some(SceneFailure::at(time, error));
                        break;
                    }
                    stats.frames_written += 1;
                }
            }

            stats.skipped_times.sort_unstable();
            if failure.is_none() && !buf.is_complete() {
                failure = Some(SceneFailure::at(
                    buf.next_index(),
                    TimelapseError::Other(anyhow::anyhow!("frame was never delivered")),
                ));
            }
            if failure.is_none() && stats.frames_written == 0 {
                let error = last_skip.unwrap_or_else(|| {
                    TimelapseError::Other(anyhow::anyhow!("no frames were produced"))
                });
                failure = Some(SceneFailure {
                    time: stats.skipped_times.first().copied(),
                    error,
                });
            }
            if let Some(failure) = failure {
                sink_ref.abort();
                return Err(failure);
            }

            sink_ref.end()?;
            Ok(stats)
        });

        let deliver = |time: usize, result: TimelapseResult<Frame>| {
            // stop scheduling right away instead of waiting for the encoder to see the error
            if result.is_err() && policy == FailurePolicy::FailScene {
                cancel.store(true, Ordering::Relaxed);
            }
            if tx.send(FrameMsg { time, result }).is_err() {
                cancel.store(true, Ordering::Relaxed);
            }
        };
        let all: Vec<usize> = times.iter().collect();
        for window in all.chunks(chunk_size) {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            ctx.gather(pipeline, window, cancel, &deliver);
        }

        drop(tx);
        enc.join().map_err(|_| {
            SceneFailure::from(TimelapseError::Other(anyhow::anyhow!(
                "encoder thread panicked"
            )))
        })?
    })
}

/// Dedicated rayon pool; `threads` must be at least 1 when set.
pub fn build_thread_pool(threads: Option<usize>) -> TimelapseResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(TimelapseError::conflicting("'threads' must be >= 1 when set"));
    }
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("timelapse-{i}"));
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder.build().map_err(|e| {
        TimelapseError::Other(anyhow::anyhow!("failed to build rayon thread pool: {e}"))
    })
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/executor.rs"]
mod tests;
