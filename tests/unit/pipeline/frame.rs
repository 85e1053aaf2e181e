use std::sync::Arc;

use super::*;
use crate::reader::source::InMemorySource;

fn stczyx(block: bool) -> Arc<InMemorySource> {
    let mut pairs = vec![
        (AxisTag::Scene, 2),
        (AxisTag::Time, 4),
        (AxisTag::Channel, 2),
        (AxisTag::SpatialZ, 3),
    ];
    if block {
        pairs.push((AxisTag::Block, 2));
    }
    pairs.push((AxisTag::SpatialY, 4));
    pairs.push((AxisTag::SpatialX, 6));
    let src = InMemorySource::from_fn(&pairs, |c, y, x| {
        // brightest plane is z == time % 3, scaled by scene
        let z = c.get(AxisTag::SpatialZ).unwrap_or(0);
        let hot = if z == c.time() % 3 { 1000.0 } else { 0.0 };
        hot * (c.scene() + 1) as f32 + (y * 6 + x) as f32
    })
    .unwrap();
    Arc::new(src)
}

#[test]
fn frames_are_lazy_and_ascending() {
    let src = stczyx(false);
    let view = ArrayView::new(src.clone());
    let pipe = FramePipeline::new(&view, 1, 0, None, FrameStages::default()).unwrap();
    assert_eq!(pipe.frame_shape(), (4, 6));
    assert_eq!(pipe.times(), IndexRange::full(4));
    assert_eq!(src.reads(), 0);

    let mut frames = pipe.frames();
    let first = frames.next().unwrap().unwrap();
    assert_eq!((first.scene, first.channel, first.time), (1, 0, 0));
    assert_eq!(first.shape(), (4, 6));
    assert_eq!(src.reads(), 3);

    let rest: Vec<usize> = frames.map(|f| f.unwrap().time).collect();
    assert_eq!(rest, vec![1, 2, 3]);
}

#[test]
fn block_axis_is_fixed_to_zero() {
    let view = ArrayView::new(stczyx(true));
    let pipe = FramePipeline::new(&view, 0, 1, None, FrameStages::default()).unwrap();
    assert_eq!(pipe.view().fixed(AxisTag::Block), Some(0));
    assert_eq!(pipe.view().fixed(AxisTag::Channel), Some(1));
    assert!(pipe.compute(2).is_ok());
}

#[test]
fn time_range_is_clamped_and_empty_rejected() {
    let view = ArrayView::new(stczyx(false));
    let pipe = FramePipeline::new(
        &view,
        0,
        0,
        Some(IndexRange::new(2, 99).unwrap()),
        FrameStages::default(),
    )
    .unwrap();
    assert_eq!(pipe.times(), IndexRange::new(2, 4).unwrap());
    assert!(pipe.compute(1).is_err());

    let err = FramePipeline::new(
        &view,
        0,
        0,
        Some(IndexRange::new(4, 8).unwrap()),
        FrameStages::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TimelapseError::ConflictingArguments(_)));
}

#[test]
fn missing_depth_fails_before_any_read() {
    let src = Arc::new(
        InMemorySource::from_fn(
            &[
                (AxisTag::Time, 3),
                (AxisTag::SpatialY, 4),
                (AxisTag::SpatialX, 4),
            ],
            |_, _, _| 1.0,
        )
        .unwrap(),
    );
    let err = FramePipeline::new(
        &ArrayView::new(src.clone()),
        0,
        0,
        None,
        FrameStages::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TimelapseError::InvalidShape(_)));
    assert_eq!(src.reads(), 0);
}

#[test]
fn absent_scene_axis_accepts_only_index_zero() {
    let src = Arc::new(
        InMemorySource::from_fn(
            &[
                (AxisTag::Time, 2),
                (AxisTag::SpatialZ, 2),
                (AxisTag::SpatialY, 2),
                (AxisTag::SpatialX, 2),
            ],
            |_, _, _| 1.0,
        )
        .unwrap(),
    );
    let view = ArrayView::new(src);
    assert!(FramePipeline::new(&view, 0, 0, None, FrameStages::default()).is_ok());
    assert!(FramePipeline::new(&view, 1, 0, None, FrameStages::default()).is_err());
}

#[test]
fn transient_reads_are_retried() {
    let src = InMemorySource::from_fn(
        &[
            (AxisTag::Time, 2),
            (AxisTag::SpatialZ, 1),
            (AxisTag::SpatialY, 2),
            (AxisTag::SpatialX, 2),
        ],
        |_, y, x| (y + x) as f32,
    )
    .unwrap()
    .with_transient_failure(0, 1, 1);
    let view = ArrayView::new(Arc::new(src));

    let pipe = FramePipeline::new(&view, 0, 0, None, FrameStages::default()).unwrap();
    assert!(pipe.compute(1).is_ok());
}

#[test]
fn retries_are_bounded() {
    let src = InMemorySource::from_fn(
        &[
            (AxisTag::Time, 2),
            (AxisTag::SpatialZ, 1),
            (AxisTag::SpatialY, 2),
            (AxisTag::SpatialX, 2),
        ],
        |_, _, _| 0.0,
    )
    .unwrap()
    .with_transient_failure(0, 1, 3);
    let view = ArrayView::new(Arc::new(src));
    let stages = FrameStages {
        chunk_read_retries: 1,
        ..FrameStages::default()
    };
    let pipe = FramePipeline::new(&view, 0, 0, None, stages).unwrap();
    let err = pipe.compute(1).unwrap_err();
    assert!(matches!(err, TimelapseError::ChunkRead { time: 1, .. }));
}

#[test]
fn single_plane_max_projection_is_identity_before_normalization() {
    let src = InMemorySource::from_fn(
        &[
            (AxisTag::Time, 1),
            (AxisTag::SpatialZ, 1),
            (AxisTag::SpatialY, 2),
            (AxisTag::SpatialX, 3),
        ],
        |_, y, x| (y * 3 + x) as f32 * 10.0,
    )
    .unwrap();
    let view = ArrayView::new(Arc::new(src));
    let stages = FrameStages::new(Projection::default(), Normalization::Passthrough);
    let pipe = FramePipeline::new(&view, 0, 0, None, stages).unwrap();
    let frame = pipe.compute(0).unwrap();
    assert_eq!(
        frame.pixels,
        ndarray::array![[0u8, 10, 20], [30, 40, 50]]
    );
}

#[test]
fn default_stages_retry_once() {
    assert_eq!(FrameStages::default().chunk_read_retries, 1);
    let parsed: FrameStages = serde_json::from_str(
        r#"{"projection":{"name":"max","axis":"SpatialZ"},"normalization":{"name":"passthrough"}}"#,
    )
    .unwrap();
    assert_eq!(parsed.chunk_read_retries, 1);
}
