//! Timelapse turns large multi-dimensional microscopy arrays into movies.
//!
//! For every selected scene the frames along the Time axis are computed independently
//! (depth projection, then percentile normalization), scheduled on a local thread pool or on
//! remote workers, re-ordered by time, and streamed into `ffmpeg`:
//!
//! - Open a source with [`open`] and describe the run with a [`RunConfig`]
//! - Create a [`MovieSession`] and [`MovieSession::run`] it
//! - Inspect the per-scene [`RunReport`]
#![forbid(unsafe_code)]

mod foundation;

/// Distributed frame execution over TCP.
pub mod cluster;
/// Movie and still-image output.
pub mod encode;
/// Per-scene frame computation and scheduling.
pub mod pipeline;
/// Chunked source access.
pub mod reader;
/// Run-level orchestration.
pub mod session;
/// Projection and normalization strategies.
pub mod stages;

pub use crate::foundation::core::{AxisTag, Fps, IndexRange, dims_string};
pub use crate::foundation::error::{ErrorKind, TimelapseError, TimelapseResult};

pub use crate::encode::encode;
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts, is_ffmpeg_on_path};
pub use crate::encode::format::OutputFormat;
pub use crate::encode::sink::{FrameSink, InMemorySink, SinkConfig};
pub use crate::encode::still::save_frame_png;
pub use crate::pipeline::executor::{
    ExecutionContext, FailurePolicy, SceneFailure, SceneOptions, SceneStats, SchedulerDescriptor,
    run_scene,
};
pub use crate::pipeline::frame::{Frame, FramePipeline, FrameStages};
pub use crate::reader::open;
pub use crate::reader::source::{
    AcquisitionMetadata, ChunkSource, Dims, InMemorySource, PlaneCoord,
};
pub use crate::reader::store::{PlaneStore, PlaneStoreWriter};
pub use crate::reader::view::ArrayView;
pub use crate::session::config::{ChannelSelection, PipelineConfig, RunConfig};
pub use crate::session::run::{
    FfmpegSinkFactory, MovieSession, RunReport, SceneOutcome, SceneResult, SinkFactory, run,
};
pub use crate::stages::StrategyConfig;
pub use crate::stages::normalization::Normalization;
pub use crate::stages::projection::Projection;
