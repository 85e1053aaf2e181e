use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::encode::sink::{InMemorySink, SinkConfig};
use crate::foundation::core::AxisTag;
use crate::pipeline::frame::FrameStages;
use crate::reader::source::InMemorySource;
use crate::reader::view::ArrayView;

const Z: usize = 3;

fn source(times: usize) -> InMemorySource {
    InMemorySource::from_fn(
        &[
            (AxisTag::Scene, 2),
            (AxisTag::Time, times),
            (AxisTag::SpatialZ, Z),
            (AxisTag::SpatialY, 4),
            (AxisTag::SpatialX, 4),
        ],
        |c, y, x| (c.time() * 7 + y * 4 + x) as f32,
    )
    .unwrap()
}

fn pipeline(src: InMemorySource, scene: usize) -> (Arc<InMemorySource>, FramePipeline) {
    let src = Arc::new(src);
    let view = ArrayView::new(src.clone());
    let pipe = FramePipeline::new(&view, scene, 0, None, FrameStages::default()).unwrap();
    (src, pipe)
}

struct RefusingSink;

impl FrameSink for RefusingSink {
    fn begin(&mut self, _cfg: SinkConfig) -> TimelapseResult<()> {
        Err(TimelapseError::encode("no encoder here"))
    }
    fn push_frame(&mut self, _time: usize, _frame: &Frame) -> TimelapseResult<()> {
        unreachable!("frames pushed after a failed begin")
    }
    fn end(&mut self) -> TimelapseResult<()> {
        unreachable!("end called after a failed begin")
    }
}

#[test]
fn slow_early_frames_are_still_delivered_first() {
    let src = source(8)
        .with_delay(0, Duration::from_millis(120))
        .with_delay(1, Duration::from_millis(60))
        .with_delay(3, Duration::from_millis(30));
    let (_, pipe) = pipeline(src, 1);
    let ctx = ExecutionContext::local(Some(4)).unwrap();
    let opts = SceneOptions {
        chunk_size: 8,
        channel_capacity: 2,
        ..SceneOptions::default()
    };

    let mut sink = InMemorySink::new();
    let stats = run_scene(&ctx, &pipe, &opts, &mut sink).unwrap();
    assert_eq!(stats.frames_total, 8);
    assert_eq!(stats.frames_written, 8);
    assert!(stats.skipped_times.is_empty());
    assert_eq!(sink.times(), (0..8).collect::<Vec<_>>());
    assert!(sink.frames().iter().all(|f| f.scene == 1));
    assert!(sink.is_finished());
    let cfg = sink.config().unwrap();
    assert_eq!((cfg.width, cfg.height), (4, 4));
}

#[test]
fn ordering_holds_across_small_windows() {
    let (_, pipe) = pipeline(source(11), 0);
    let ctx = ExecutionContext::local(Some(3)).unwrap();
    let opts = SceneOptions {
        chunk_size: 3,
        channel_capacity: 1,
        ..SceneOptions::default()
    };
    let mut sink = InMemorySink::new();
    run_scene(&ctx, &pipe, &opts, &mut sink).unwrap();
    assert_eq!(sink.times(), (0..11).collect::<Vec<_>>());
}

#[test]
fn corrupted_frame_fails_the_scene_by_default() {
    let (_, pipe) = pipeline(source(6).with_failure(0, 4), 0);
    let ctx = ExecutionContext::local(Some(2)).unwrap();
    let mut sink = InMemorySink::new();
    let failure = run_scene(&ctx, &pipe, &SceneOptions::default(), &mut sink).unwrap_err();
    assert_eq!(failure.time, Some(4));
    assert!(matches!(failure.error, TimelapseError::ChunkRead { time: 4, .. }));
    assert!(sink.is_aborted());
    assert!(!sink.is_finished());
}

#[test]
fn skip_policy_leaves_out_failed_frames() {
    let (_, pipe) = pipeline(source(6).with_failure(0, 2).with_failure(0, 5), 0);
    let ctx = ExecutionContext::local(Some(2)).unwrap();
    let opts = SceneOptions {
        policy: FailurePolicy::SkipFrames,
        ..SceneOptions::default()
    };
    let mut sink = InMemorySink::new();
    let stats = run_scene(&ctx, &pipe, &opts, &mut sink).unwrap();
    assert_eq!(stats.frames_written, 4);
    assert_eq!(stats.skipped_times, vec![2, 5]);
    assert_eq!(sink.times(), vec![0, 1, 3, 4]);
}

#[test]
fn skip_policy_with_nothing_left_is_a_failure() {
    let src = (0..3).fold(source(3), |s, t| s.with_failure(1, t));
    let (_, pipe) = pipeline(src, 1);
    let ctx = ExecutionContext::local(Some(1)).unwrap();
    let opts = SceneOptions {
        policy: FailurePolicy::SkipFrames,
        ..SceneOptions::default()
    };
    let mut sink = InMemorySink::new();
    let failure = run_scene(&ctx, &pipe, &opts, &mut sink).unwrap_err();
    assert_eq!(failure.time, Some(0));
    assert!(failure.error.is_transient());
    assert!(sink.is_aborted());
}

#[test]
fn failure_cancels_nodes_not_yet_started() {
    let (src, pipe) = pipeline(source(20).with_failure(0, 0), 0);
    let ctx = ExecutionContext::local(Some(1)).unwrap();
    let opts = SceneOptions {
        chunk_size: 2,
        ..SceneOptions::default()
    };
    let mut sink = InMemorySink::new();
    assert!(run_scene(&ctx, &pipe, &opts, &mut sink).is_err());
    assert!(src.reads() < 3 * Z, "read {} planes", src.reads());
}

#[test]
fn sink_begin_failure_drains_without_deadlock() {
    let (_, pipe) = pipeline(source(10), 0);
    let ctx = ExecutionContext::local(Some(2)).unwrap();
    let opts = SceneOptions {
        channel_capacity: 1,
        chunk_size: 4,
        ..SceneOptions::default()
    };
    let failure = run_scene(&ctx, &pipe, &opts, &mut RefusingSink).unwrap_err();
    assert_eq!(failure.time, None);
    assert!(matches!(failure.error, TimelapseError::Encode(_)));
}

#[test]
fn zero_threads_is_rejected() {
    assert!(matches!(
        build_thread_pool(Some(0)),
        Err(TimelapseError::ConflictingArguments(_))
    ));
    assert_eq!(ExecutionContext::local(Some(3)).unwrap().capacity(), 3);
}

#[test]
fn scheduler_descriptor_json_forms() {
    let local: SchedulerDescriptor = serde_json::from_str(r#"{"kind":"local"}"#).unwrap();
    assert_eq!(local, SchedulerDescriptor::default());
    let cluster: SchedulerDescriptor =
        serde_json::from_str(r#"{"kind":"cluster","workers":["10.0.0.2:7070"]}"#).unwrap();
    assert_eq!(
        cluster,
        SchedulerDescriptor::Cluster {
            workers: vec!["10.0.0.2:7070".to_string()]
        }
    );
    let policy: FailurePolicy = serde_json::from_str(r#""skip_frames""#).unwrap();
    assert_eq!(policy, FailurePolicy::SkipFrames);
}
