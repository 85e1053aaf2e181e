use ndarray::{Array2, ArrayView3, ArrayViewD, Axis, Ix2, Ix3, Slice};

use crate::foundation::core::{AxisTag, dims_string};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::reader::view::ArrayView;
use crate::stages::{Params, StrategyConfig};

/// Axes every projection input must expose, in any order.
pub const PROJECTION_AXES: [AxisTag; 3] = [AxisTag::SpatialZ, AxisTag::SpatialY, AxisTag::SpatialX];

/// Reduction of a (Z, Y, X) sub-array to one 2-D frame.
///
/// All variants are pure functions of their input, so frames can be projected on any worker
/// without coordination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Projection {
    /// Element-wise maximum along `axis`.
    Max {
        /// Reduced axis; the remaining two form the frame.
        axis: AxisTag,
    },
    /// Element-wise mean along `axis`.
    Mean {
        /// Reduced axis; the remaining two form the frame.
        axis: AxisTag,
    },
    /// Maximum projections along Z, Y and X stitched into one frame:
    /// `[YZ^T | XY]` over `[pad | XZ flipped in Z]`.
    ///
    /// The Z×Z pad is NaN, so percentile normalization ignores it and renders it black.
    Orthogonal,
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Max {
            axis: AxisTag::SpatialZ,
        }
    }
}

impl Projection {
    /// Strategy names accepted by [`Projection::configure`].
    pub const NAMES: [&'static str; 3] = ["max", "mean", "orthogonal"];

    /// Build a projection from a configured name and keyword parameters.
    pub fn configure(cfg: &StrategyConfig) -> TimelapseResult<Self> {
        let params = Params::new(&cfg.name, &cfg.params);
        let proj = match cfg.name.as_str() {
            "max" => {
                params.check_keys(&["axis"])?;
                Projection::Max {
                    axis: params.axis_or("axis", AxisTag::SpatialZ)?,
                }
            }
            "mean" => {
                params.check_keys(&["axis"])?;
                Projection::Mean {
                    axis: params.axis_or("axis", AxisTag::SpatialZ)?,
                }
            }
            "orthogonal" => {
                params.check_keys(&[])?;
                Projection::Orthogonal
            }
            other => {
                return Err(TimelapseError::conflicting(format!(
                    "unknown projection '{other}' (expected one of {:?})",
                    Self::NAMES
                )));
            }
        };
        proj.validate()?;
        Ok(proj)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Projection::Max { .. } => "max",
            Projection::Mean { .. } => "mean",
            Projection::Orthogonal => "orthogonal",
        }
    }

    /// Reduced axis, `None` for [`Projection::Orthogonal`] which reduces each in turn.
    pub fn axis(&self) -> Option<AxisTag> {
        match self {
            Projection::Max { axis } | Projection::Mean { axis } => Some(*axis),
            Projection::Orthogonal => None,
        }
    }

    /// Reject reductions over axes the pipeline iterates or that are not spatial.
    pub fn validate(&self) -> TimelapseResult<()> {
        let Some(axis) = self.axis() else {
            return Ok(());
        };
        if axis.is_iterated() {
            return Err(TimelapseError::conflicting(format!(
                "projection cannot reduce over {axis}: the pipeline iterates that axis"
            )));
        }
        if !axis.is_spatial() {
            return Err(TimelapseError::conflicting(format!(
                "projection axis must be Z, Y or X, got {axis}"
            )));
        }
        Ok(())
    }

    /// Frame (height, width) this projection produces for `view`, without reading it.
    pub fn output_shape(&self, view: &ArrayView) -> TimelapseResult<(usize, usize)> {
        view.require_axes(&PROJECTION_AXES)?;
        let len = |a: AxisTag| view.len(a).unwrap_or(0);
        match self.axis() {
            Some(axis) => {
                let kept: Vec<usize> = view
                    .axes()
                    .into_iter()
                    .filter(|a| *a != axis)
                    .map(len)
                    .collect();
                Ok((kept[0], kept[1]))
            }
            None => {
                let (z, y, x) = (
                    len(AxisTag::SpatialZ),
                    len(AxisTag::SpatialY),
                    len(AxisTag::SpatialX),
                );
                Ok((y + z, z + x))
            }
        }
    }

    /// Read `view` and reduce it to a frame.
    pub fn project(&self, view: &ArrayView) -> TimelapseResult<Array2<f32>> {
        view.require_axes(&PROJECTION_AXES)?;
        let data = view.materialize()?;
        self.project_array(data.view(), &view.axes())
    }

    /// Reduce an already materialized array whose axes are named by `axes`.
    pub fn project_array(
        &self,
        data: ArrayViewD<'_, f32>,
        axes: &[AxisTag],
    ) -> TimelapseResult<Array2<f32>> {
        if data.ndim() != 3 || axes.len() != 3 {
            return Err(TimelapseError::invalid_shape(format!(
                "projection expects 3 axes, got {} ('{}')",
                data.ndim(),
                dims_string(axes)
            )));
        }
        if !PROJECTION_AXES.iter().all(|a| axes.contains(a)) {
            return Err(TimelapseError::invalid_shape(format!(
                "projection expects axes ZYX, got '{}'",
                dims_string(axes)
            )));
        }
        if data.is_empty() {
            return Err(TimelapseError::invalid_shape(format!(
                "cannot project an empty array of shape {:?}",
                data.shape()
            )));
        }

        match self {
            Projection::Max { axis } => {
                let k = position(axes, *axis)?;
                to_2d(data.fold_axis(Axis(k), f32::NEG_INFINITY, |acc, v| acc.max(*v)))
            }
            Projection::Mean { axis } => {
                let k = position(axes, *axis)?;
                let mean = data
                    .mean_axis(Axis(k))
                    .ok_or_else(|| TimelapseError::invalid_shape("cannot average an empty axis"))?;
                to_2d(mean)
            }
            Projection::Orthogonal => {
                let perm = vec![
                    position(axes, AxisTag::SpatialZ)?,
                    position(axes, AxisTag::SpatialY)?,
                    position(axes, AxisTag::SpatialX)?,
                ];
                let zyx: ArrayView3<'_, f32> = data
                    .permuted_axes(perm)
                    .into_dimensionality::<Ix3>()
                    .map_err(|e| TimelapseError::invalid_shape(e.to_string()))?;
                Ok(orthogonal(zyx))
            }
        }
    }
}

fn orthogonal(zyx: ArrayView3<'_, f32>) -> Array2<f32> {
    let (nz, ny, nx) = zyx.dim();
    let max = |acc: &f32, v: &f32| acc.max(*v);
    let xy = zyx.fold_axis(Axis(0), f32::NEG_INFINITY, max);
    let xz = zyx.fold_axis(Axis(1), f32::NEG_INFINITY, max);
    let yz = zyx.fold_axis(Axis(2), f32::NEG_INFINITY, max);

    let mut out = Array2::<f32>::from_elem((ny + nz, nz + nx), f32::NAN);
    let (mut top, mut bottom) = out.view_mut().split_at(Axis(0), ny);
    let (mut top_left, mut top_right) = top.view_mut().split_at(Axis(1), nz);
    top_left.assign(&yz.t());
    top_right.assign(&xy);
    bottom
        .slice_axis_mut(Axis(1), Slice::from(nz..))
        .assign(&xz.slice_axis(Axis(0), Slice::new(0, None, -1)));
    out
}

fn position(axes: &[AxisTag], axis: AxisTag) -> TimelapseResult<usize> {
    axes.iter().position(|a| *a == axis).ok_or_else(|| {
        TimelapseError::invalid_shape(format!(
            "axis {axis} is not present in '{}'",
            dims_string(axes)
        ))
    })
}

fn to_2d(arr: ndarray::ArrayD<f32>) -> TimelapseResult<Array2<f32>> {
    arr.into_dimensionality::<Ix2>()
        .map_err(|e| TimelapseError::invalid_shape(format!("projection result is not 2-D: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/stages/projection.rs"]
mod tests;
