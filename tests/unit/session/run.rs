use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::*;
use crate::encode::sink::{InMemorySink, SinkConfig};
use crate::pipeline::executor::FailurePolicy;
use crate::pipeline::frame::Frame;
use crate::reader::source::{AcquisitionMetadata, ChunkSource, Dims, InMemorySource, PlaneCoord};

/// Sink handle whose frames stay inspectable after the session drops it.
struct Shared(Arc<Mutex<InMemorySink>>);

impl FrameSink for Shared {
    fn begin(&mut self, cfg: SinkConfig) -> TimelapseResult<()> {
        self.0.lock().unwrap().begin(cfg)
    }
    fn push_frame(&mut self, time: usize, frame: &Frame) -> TimelapseResult<()> {
        self.0.lock().unwrap().push_frame(time, frame)
    }
    fn end(&mut self) -> TimelapseResult<()> {
        self.0.lock().unwrap().end()
    }
    fn abort(&mut self) {
        self.0.lock().unwrap().abort()
    }
}

#[derive(Default)]
struct Recorder {
    sinks: Mutex<BTreeMap<PathBuf, Arc<Mutex<InMemorySink>>>>,
}

impl Recorder {
    fn times(&self, path: &Path) -> Vec<usize> {
        let sinks = self.sinks.lock().unwrap();
        sinks[path].lock().unwrap().times()
    }

    fn created(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

impl SinkFactory for Recorder {
    fn create(&self, path: &Path, _cfg: &PipelineConfig) -> TimelapseResult<Box<dyn FrameSink>> {
        let sink = Arc::new(Mutex::new(InMemorySink::new()));
        self.sinks
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), sink.clone());
        Ok(Box::new(Shared(sink)))
    }
}

fn source() -> InMemorySource {
    InMemorySource::from_fn(
        &[
            (AxisTag::Scene, 3),
            (AxisTag::Time, 5),
            (AxisTag::Channel, 2),
            (AxisTag::SpatialZ, 2),
            (AxisTag::SpatialY, 6),
            (AxisTag::SpatialX, 4),
        ],
        |c, y, x| (c.scene() * 100 + c.time() * 10 + y * 4 + x) as f32,
    )
    .unwrap()
    .with_metadata(AcquisitionMetadata {
        channel_names: vec!["BF".into(), "GFP".into()],
        acquisition_date: Some("2024-03-01T09:00:00".into()),
        time_interval_secs: Some(600.0),
    })
}

fn config(name: &str) -> RunConfig {
    let out = PathBuf::from("target/tmp/session_unit").join(name);
    let _ = std::fs::remove_dir_all(&out);
    let mut cfg = RunConfig::new("plate1.zarr", out);
    cfg.pipeline.scheduler = crate::pipeline::executor::SchedulerDescriptor::Local {
        threads: Some(3),
    };
    cfg
}

fn session(src: InMemorySource, cfg: RunConfig) -> MovieSession {
    MovieSession::from_view(ArrayView::new(Arc::new(src)), cfg).unwrap()
}

#[test]
fn every_scene_is_rendered_by_default() {
    let cfg = config("all_scenes");
    let out = cfg.out_dir.clone();
    let s = session(source(), cfg);
    assert_eq!(s.scenes(), &[0, 1, 2]);
    assert_eq!(s.channels(), &[0]);

    let rec = Recorder::default();
    let report = s.run_with(&rec).unwrap();
    assert!(!report.any_failed());
    assert_eq!(report.results.len(), 3);
    for (i, r) in report.results.iter().enumerate() {
        assert_eq!(r.scene, i);
        let path = out.join(format!("plate1_S{i}.mp4"));
        assert_eq!(r.path(), Some(path.as_path()));
        assert_eq!(rec.times(&path), vec![0, 1, 2, 3, 4]);
    }
}

#[test]
fn corrupted_scene_does_not_stop_its_siblings() {
    let mut cfg = config("corrupt");
    cfg.scenes = Some(vec![0, 1]);
    let out = cfg.out_dir.clone();
    let s = session(source().with_failure(0, 3), cfg);

    let rec = Recorder::default();
    let report = s.run_with(&rec).unwrap();
    assert!(report.any_failed());
    match &report.results[0].outcome {
        SceneOutcome::Failed { kind, time, .. } => {
            assert_eq!(*kind, ErrorKind::ChunkRead);
            assert_eq!(*time, Some(3));
        }
        other => panic!("scene 0 should have failed, got {other:?}"),
    }
    assert_eq!(rec.times(&out.join("plate1_S1.mp4")), vec![0, 1, 2, 3, 4]);
    assert_eq!(report.failed().count(), 1);
}

#[test]
fn skip_policy_reports_the_missing_times() {
    let mut cfg = config("skip");
    cfg.scenes = Some(vec![2]);
    cfg.pipeline.failure_policy = FailurePolicy::SkipFrames;
    let s = session(source().with_failure(2, 1), cfg);

    let report = s.run_with(&Recorder::default()).unwrap();
    assert_eq!(
        report.results[0].outcome,
        SceneOutcome::Written {
            path: s.config().output_path(2, 0),
            frames: 4,
            skipped_times: vec![1],
        }
    );
}

#[test]
fn all_channels_become_separate_movies() {
    let mut cfg = config("channels");
    cfg.scenes = Some(vec![1]);
    cfg.channel = ChannelSelection::All;
    cfg.time = Some(crate::foundation::core::IndexRange { start: 2, end: 99 });
    let s = session(source(), cfg);
    assert_eq!(s.channels(), &[0, 1]);

    let rec = Recorder::default();
    let report = s.run_with(&rec).unwrap();
    let names: Vec<String> = report
        .results
        .iter()
        .filter_map(|r| r.path())
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["plate1_S1_C0.mp4", "plate1_S1_C1.mp4"]);
    assert_eq!(rec.times(report.results[1].path().unwrap()), vec![2, 3, 4]);
}

#[test]
fn selections_are_checked_against_the_source() {
    let mut cfg = config("bad_scene");
    cfg.scenes = Some(vec![0, 7]);
    let err = MovieSession::from_view(ArrayView::new(Arc::new(source())), cfg).unwrap_err();
    assert!(matches!(err, TimelapseError::ConflictingArguments(_)));

    let mut cfg = config("bad_channel");
    cfg.channel = ChannelSelection::Index(2);
    assert!(MovieSession::from_view(ArrayView::new(Arc::new(source())), cfg).is_err());

    let mut cfg = config("repeat");
    cfg.scenes = Some(vec![2, 0, 2]);
    assert_eq!(session(source(), cfg).scenes(), &[2, 0]);
}

#[test]
fn existing_output_fails_only_that_scene_and_is_left_alone() {
    let mut cfg = config("overwrite");
    cfg.scenes = Some(vec![0, 1]);
    let existing = cfg.output_path(0, 0);
    std::fs::create_dir_all(&cfg.out_dir).unwrap();
    std::fs::write(&existing, b"keep me").unwrap();

    let rec = Recorder::default();
    let report = session(source(), cfg).run_with(&rec).unwrap();
    assert!(matches!(
        report.results[0].outcome,
        SceneOutcome::Failed {
            kind: ErrorKind::ConflictingArguments,
            time: None,
            ..
        }
    ));
    assert!(!report.results[1].is_failed());
    assert_eq!(rec.created(), 1);
    assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");
}

#[test]
fn concurrent_scenes_report_in_selection_order() {
    let mut cfg = config("concurrent");
    cfg.pipeline.scene_concurrency = 3;
    cfg.scenes = Some(vec![2, 0, 1]);
    let report = session(source().with_failure(0, 0), cfg)
        .run_with(&Recorder::default())
        .unwrap();
    let order: Vec<(usize, bool)> = report
        .results
        .iter()
        .map(|r| (r.scene, r.is_failed()))
        .collect();
    assert_eq!(order, vec![(2, false), (0, true), (1, false)]);
}

#[test]
fn report_serializes_with_status_tags() {
    let mut cfg = config("json");
    cfg.scenes = Some(vec![0]);
    let report = session(source().with_failure(0, 4), cfg)
        .run_with(&Recorder::default())
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    let outcome = &json["results"][0]["outcome"];
    assert_eq!(outcome["status"], "failed");
    assert_eq!(outcome["kind"], "chunk_read");
    assert_eq!(outcome["time"], 4);
}

/// Wraps [`InMemorySource`] and panics on every read of one scene.
#[derive(Debug)]
struct PanicsOnScene {
    inner: InMemorySource,
    scene: usize,
}

impl ChunkSource for PanicsOnScene {
    fn dims(&self) -> &Dims {
        self.inner.dims()
    }

    fn read_plane(&self, coord: &PlaneCoord) -> TimelapseResult<ndarray::Array2<f32>> {
        if coord.scene() == self.scene && coord.time() == 2 {
            panic!("decoder blew up on scene {}", self.scene);
        }
        self.inner.read_plane(coord)
    }
}

#[test]
fn panicking_scene_fails_alone() {
    let mut cfg = config("panic");
    cfg.pipeline.scene_concurrency = 1;
    let src = PanicsOnScene {
        inner: source(),
        scene: 1,
    };
    let s = MovieSession::from_view(ArrayView::new(Arc::new(src)), cfg).unwrap();

    let rec = Recorder::default();
    let report = s.run_with(&rec).unwrap();
    assert_eq!(report.results.len(), 3);
    assert!(!report.results[0].is_failed());
    assert!(!report.results[2].is_failed());
    match &report.results[1].outcome {
        SceneOutcome::Failed { kind, message, .. } => {
            assert_eq!(*kind, ErrorKind::Other);
            assert!(message.contains("decoder blew up"), "{message}");
        }
        other => panic!("scene 1 should have failed, got {other:?}"),
    }
    assert_eq!(rec.created(), 3);
    assert_eq!(
        rec.times(&s.config().output_path(2, 0)),
        vec![0, 1, 2, 3, 4]
    );
}

#[test]
fn scene_concurrency_is_bounded_by_pool_size() {
    let mut cfg = config("bounded");
    cfg.pipeline.scene_concurrency = 8;
    cfg.pipeline.scheduler = crate::pipeline::executor::SchedulerDescriptor::Local {
        threads: Some(1),
    };
    let s = session(source(), cfg);
    assert_eq!(s.scene_workers(3), 1);

    let report = s.run_with(&Recorder::default()).unwrap();
    assert_eq!(report.results.len(), 3);
    assert!(!report.any_failed());
}
