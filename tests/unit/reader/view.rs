use std::sync::Arc;

use super::*;
use crate::reader::source::InMemorySource;

fn stcz_source() -> Arc<InMemorySource> {
    // value encodes its own coordinate: s*1000 + t*100 + z*10 + y + x
    let src = InMemorySource::from_fn(
        &[
            (AxisTag::Scene, 2),
            (AxisTag::Time, 3),
            (AxisTag::SpatialZ, 2),
            (AxisTag::SpatialY, 4),
            (AxisTag::SpatialX, 5),
        ],
        |c, y, x| {
            (c.scene() * 1000 + c.time() * 100 + c.get(AxisTag::SpatialZ).unwrap() * 10 + y + x)
                as f32
        },
    )
    .unwrap();
    Arc::new(src)
}

#[test]
fn select_and_slice_are_lazy() {
    let src = stcz_source();
    let view = ArrayView::new(src.clone());
    let narrowed = view
        .select(AxisTag::Scene, 1)
        .unwrap()
        .select(AxisTag::Time, 2)
        .unwrap()
        .slice(AxisTag::SpatialX, IndexRange::new(1, 3).unwrap())
        .unwrap();
    assert_eq!(src.reads(), 0);
    assert_eq!(
        narrowed.axes(),
        vec![AxisTag::SpatialZ, AxisTag::SpatialY, AxisTag::SpatialX]
    );
    assert_eq!(narrowed.shape(), vec![2, 4, 2]);
    assert_eq!(narrowed.fixed(AxisTag::Scene), Some(1));
    assert_eq!(narrowed.plane_count(), 2);
}

#[test]
fn materialize_reads_only_the_selected_scene() {
    let src = stcz_source();
    let view = ArrayView::new(src.clone())
        .select(AxisTag::Scene, 1)
        .unwrap()
        .select(AxisTag::Time, 2)
        .unwrap();
    let arr = view.materialize().unwrap();
    assert_eq!(arr.shape(), &[2, 4, 5]);
    assert_eq!(src.reads(), 2);
    assert_eq!(arr[[1, 3, 4]], (1000 + 200 + 10 + 3 + 4) as f32);
    assert_eq!(arr[[0, 0, 0]], 1200.0);
}

#[test]
fn materialize_crops_the_plane() {
    let src = stcz_source();
    let view = ArrayView::new(src)
        .select(AxisTag::Scene, 0)
        .unwrap()
        .select(AxisTag::Time, 0)
        .unwrap()
        .select(AxisTag::SpatialZ, 1)
        .unwrap()
        .slice(AxisTag::SpatialY, IndexRange::new(2, 4).unwrap())
        .unwrap()
        .select(AxisTag::SpatialX, 3)
        .unwrap();
    let arr = view.materialize().unwrap();
    assert_eq!(arr.shape(), &[2]);
    assert_eq!(arr.iter().copied().collect::<Vec<_>>(), vec![15.0, 16.0]);
}

#[test]
fn nested_slices_are_relative() {
    let view = ArrayView::new(stcz_source())
        .slice(AxisTag::Time, IndexRange::new(1, 3).unwrap())
        .unwrap()
        .select(AxisTag::Time, 1)
        .unwrap();
    assert_eq!(view.fixed(AxisTag::Time), Some(2));
}

#[test]
fn missing_or_reselected_axes_are_shape_errors() {
    let view = ArrayView::new(stcz_source());
    assert!(matches!(
        view.select(AxisTag::Channel, 0),
        Err(TimelapseError::InvalidShape(_))
    ));
    let fixed = view.select(AxisTag::Time, 0).unwrap();
    assert!(matches!(
        fixed.select(AxisTag::Time, 0),
        Err(TimelapseError::InvalidShape(_))
    ));
    assert!(view.select(AxisTag::Scene, 2).is_err());
    assert!(
        view.slice(AxisTag::Time, IndexRange::new(0, 4).unwrap())
            .is_err()
    );
}

#[test]
fn require_axes_ignores_order_but_not_extras() {
    let view = ArrayView::new(stcz_source())
        .select(AxisTag::Scene, 0)
        .unwrap();
    assert!(
        view.require_axes(&[AxisTag::SpatialZ, AxisTag::SpatialY, AxisTag::SpatialX])
            .is_err()
    );
    let view = view.select(AxisTag::Time, 0).unwrap();
    assert!(
        view.require_axes(&[AxisTag::SpatialX, AxisTag::SpatialZ, AxisTag::SpatialY])
            .is_ok()
    );
}

#[test]
fn read_failures_surface_from_materialize() {
    let src = InMemorySource::from_fn(
        &[
            (AxisTag::Time, 2),
            (AxisTag::SpatialY, 2),
            (AxisTag::SpatialX, 2),
        ],
        |_, _, _| 1.0,
    )
    .unwrap()
    .with_failure(0, 1);
    let view = ArrayView::new(Arc::new(src));
    assert!(view.select(AxisTag::Time, 0).unwrap().materialize().is_ok());
    let err = view
        .select(AxisTag::Time, 1)
        .unwrap()
        .materialize()
        .unwrap_err();
    assert!(err.is_transient());
}
