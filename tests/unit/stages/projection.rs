use std::sync::Arc;

use ndarray::{Array3, array};

use super::*;
use crate::reader::source::InMemorySource;

const ZYX: [AxisTag; 3] = [AxisTag::SpatialZ, AxisTag::SpatialY, AxisTag::SpatialX];

fn ramp(nz: usize, ny: usize, nx: usize) -> Array3<f32> {
    Array3::from_shape_fn((nz, ny, nx), |(z, y, x)| (z * 100 + y * 10 + x) as f32)
}

#[test]
fn max_over_z_matches_elementwise_maximum() {
    let data = array![[[1.0f32, 9.0], [3.0, 0.0]], [[5.0, 2.0], [3.0, 7.0]]].into_dyn();
    let out = Projection::default()
        .project_array(data.view(), &ZYX)
        .unwrap();
    assert_eq!(out, array![[5.0, 9.0], [3.0, 7.0]]);
}

#[test]
fn mean_over_y_keeps_z_and_x() {
    let data = ramp(2, 3, 4).into_dyn();
    let proj = Projection::Mean {
        axis: AxisTag::SpatialY,
    };
    let out = proj.project_array(data.view(), &ZYX).unwrap();
    assert_eq!(out.dim(), (2, 4));
    assert_eq!(out[[1, 2]], 100.0 + 10.0 + 2.0);
}

#[test]
fn axis_order_of_input_does_not_matter() {
    // (Y, Z, X) layout holding the same values as ramp(2, 3, 4)
    let zyx = ramp(2, 3, 4);
    let yzx = zyx.view().permuted_axes([1, 0, 2]).to_owned().into_dyn();
    let axes = [AxisTag::SpatialY, AxisTag::SpatialZ, AxisTag::SpatialX];
    let a = Projection::default()
        .project_array(zyx.into_dyn().view(), &ZYX)
        .unwrap();
    let b = Projection::default()
        .project_array(yzx.view(), &axes)
        .unwrap();
    assert_eq!(a, b);
}

#[test]
fn orthogonal_layout_places_each_projection() {
    let (nz, ny, nx) = (2, 3, 4);
    let data = ramp(nz, ny, nx).into_dyn();
    let out = Projection::Orthogonal
        .project_array(data.view(), &ZYX)
        .unwrap();
    assert_eq!(out.dim(), (ny + nz, nz + nx));

    // top-left: YZ transposed, max over X -> value at x = nx-1
    assert_eq!(out[[2, 1]], (100 + 20 + 3) as f32);
    // top-right: XY, max over Z -> z = nz-1
    assert_eq!(out[[1, nz + 2]], (100 + 10 + 2) as f32);
    // bottom-right: XZ flipped along Z, max over Y -> y = ny-1
    assert_eq!(out[[ny, nz + 3]], (100 + 20 + 3) as f32);
    assert_eq!(out[[ny + 1, nz + 3]], (20 + 3) as f32);
    // bottom-left pad is NaN
    let pad = out
        .slice_axis(Axis(0), Slice::from(ny..))
        .slice_axis(Axis(1), Slice::from(..nz))
        .to_owned();
    assert_eq!(pad.dim(), (nz, nz));
    assert!(pad.iter().all(|v| v.is_nan()));
}

#[test]
fn orthogonal_pad_does_not_shift_percentiles() {
    use crate::stages::normalization::Normalization;

    // every voxel is 100 or more, so the pad would otherwise become the low percentile
    let data = Array3::from_shape_fn((3, 4, 4), |(z, y, x)| (100 + z + y + x) as f32).into_dyn();
    let frame = Projection::Orthogonal
        .project_array(data.view(), &ZYX)
        .unwrap();
    let norm = Normalization::Percentile {
        min_percentile: 0.0,
        max_percentile: 100.0,
        sample_fraction: None,
    };
    let out = norm.apply(&frame).unwrap();

    let lo = frame.iter().copied().filter(|v| !v.is_nan()).fold(f32::INFINITY, f32::min);
    let (r, c) = frame
        .indexed_iter()
        .find(|(_, v)| **v == lo)
        .map(|(ix, _)| ix)
        .unwrap();
    assert_eq!(out[[r, c]], 0);
    assert_eq!(out.iter().copied().max(), Some(255));
    // the pad renders black
    assert_eq!(out[[4, 0]], 0);
    // data pixels above the minimum are not crushed to zero by the pad
    assert!(out[[0, 3 + 3]] > 0);
}

#[test]
fn output_shape_is_known_before_reading() {
    let src = Arc::new(
        InMemorySource::from_fn(
            &[
                (AxisTag::Time, 2),
                (AxisTag::SpatialZ, 5),
                (AxisTag::SpatialY, 6),
                (AxisTag::SpatialX, 7),
            ],
            |_, _, _| 0.0,
        )
        .unwrap(),
    );
    let view = ArrayView::new(src.clone())
        .select(AxisTag::Time, 0)
        .unwrap();
    assert_eq!(Projection::default().output_shape(&view).unwrap(), (6, 7));
    assert_eq!(
        Projection::Max {
            axis: AxisTag::SpatialX
        }
        .output_shape(&view)
        .unwrap(),
        (5, 6)
    );
    assert_eq!(
        Projection::Orthogonal.output_shape(&view).unwrap(),
        (6 + 5, 5 + 7)
    );
    assert_eq!(src.reads(), 0);

    let frame = Projection::default().project(&view).unwrap();
    assert_eq!(frame.dim(), (6, 7));
    assert_eq!(src.reads(), 5);
}

#[test]
fn missing_depth_axis_is_a_shape_error() {
    let data = ndarray::Array2::<f32>::zeros((3, 3)).into_dyn();
    let err = Projection::default()
        .project_array(data.view(), &[AxisTag::SpatialY, AxisTag::SpatialX])
        .unwrap_err();
    assert!(matches!(err, TimelapseError::InvalidShape(_)));

    let data = ndarray::Array3::<f32>::zeros((2, 3, 3)).into_dyn();
    let err = Projection::default()
        .project_array(
            data.view(),
            &[AxisTag::Time, AxisTag::SpatialY, AxisTag::SpatialX],
        )
        .unwrap_err();
    assert!(matches!(err, TimelapseError::InvalidShape(_)));
}

#[test]
fn configure_validates_names_params_and_axes() {
    let p = Projection::configure(&StrategyConfig::named("mean").with("axis", "y")).unwrap();
    assert_eq!(
        p,
        Projection::Mean {
            axis: AxisTag::SpatialY
        }
    );
    assert_eq!(
        Projection::configure(&StrategyConfig::named("max")).unwrap(),
        Projection::default()
    );

    for bad in [
        StrategyConfig::named("median"),
        StrategyConfig::named("max").with("sigma", 1.0),
        StrategyConfig::named("orthogonal").with("axis", "Z"),
        StrategyConfig::named("max").with("axis", "T"),
        StrategyConfig::named("max").with("axis", "scene"),
        StrategyConfig::named("max").with("axis", "C"),
    ] {
        let err = Projection::configure(&bad).unwrap_err();
        assert!(
            matches!(err, TimelapseError::ConflictingArguments(_)),
            "{bad:?} -> {err}"
        );
    }
}

#[test]
fn serializes_with_a_name_tag() {
    let json = serde_json::to_string(&Projection::default()).unwrap();
    assert_eq!(json, r#"{"name":"max","axis":"SpatialZ"}"#);
    let back: Projection = serde_json::from_str(r#"{"name":"orthogonal"}"#).unwrap();
    assert_eq!(back, Projection::Orthogonal);
}
