use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};

use crate::foundation::core::{AxisTag, IndexRange, dims_string};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::reader::source::{AcquisitionMetadata, ChunkSource, PlaneCoord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AxisSel {
    Fixed(usize),
    Range(IndexRange),
}

/// Lazy, named-axis view over a [`ChunkSource`].
///
/// `select` and `slice` only narrow the selection; no pixel data is read until
/// [`ArrayView::materialize`]. Views are cheap to clone and share the underlying source, which
/// is released when the last view referencing it is dropped.
#[derive(Clone)]
pub struct ArrayView {
    source: Arc<dyn ChunkSource>,
    sel: Vec<AxisSel>,
}

impl ArrayView {
    /// Full view of `source`.
    pub fn new(source: Arc<dyn ChunkSource>) -> Self {
        let sel = source
            .dims()
            .lens()
            .iter()
            .map(|&n| AxisSel::Range(IndexRange::full(n)))
            .collect();
        Self { source, sel }
    }

    pub fn source(&self) -> &Arc<dyn ChunkSource> {
        &self.source
    }

    pub fn metadata(&self) -> AcquisitionMetadata {
        self.source.metadata()
    }

    /// Axes still present in the view, in storage order.
    pub fn axes(&self) -> Vec<AxisTag> {
        self.source
            .dims()
            .axes()
            .iter()
            .zip(&self.sel)
            .filter_map(|(a, s)| matches!(s, AxisSel::Range(_)).then_some(*a))
            .collect()
    }

    /// Lengths of [`ArrayView::axes`].
    pub fn shape(&self) -> Vec<usize> {
        self.sel
            .iter()
            .filter_map(|s| match s {
                AxisSel::Range(r) => Some(r.len()),
                AxisSel::Fixed(_) => None,
            })
            .collect()
    }

    pub fn has_axis(&self, axis: AxisTag) -> bool {
        self.range_of(axis).is_some()
    }

    /// Length of `axis` in this view, `None` when absent or already selected away.
    pub fn len(&self, axis: AxisTag) -> Option<usize> {
        self.range_of(axis).map(IndexRange::len)
    }

    /// Absolute index `axis` was fixed to by an earlier [`ArrayView::select`].
    pub fn fixed(&self, axis: AxisTag) -> Option<usize> {
        let i = self.source.dims().index_of(axis)?;
        match self.sel[i] {
            AxisSel::Fixed(v) => Some(v),
            AxisSel::Range(_) => None,
        }
    }

    fn range_of(&self, axis: AxisTag) -> Option<IndexRange> {
        let i = self.source.dims().index_of(axis)?;
        match self.sel[i] {
            AxisSel::Range(r) => Some(r),
            AxisSel::Fixed(_) => None,
        }
    }

    fn require(&self, axis: AxisTag) -> TimelapseResult<(usize, IndexRange)> {
        let dims = self.source.dims();
        let i = dims.index_of(axis).ok_or_else(|| {
            TimelapseError::invalid_shape(format!(
                "axis {axis} is not present in '{}'",
                dims_string(dims.axes())
            ))
        })?;
        match self.sel[i] {
            AxisSel::Range(r) => Ok((i, r)),
            AxisSel::Fixed(v) => Err(TimelapseError::invalid_shape(format!(
                "axis {axis} was already selected at index {v}"
            ))),
        }
    }

    /// Fix `axis` at `index` (relative to the current view), dropping it from [`Self::axes`].
    pub fn select(&self, axis: AxisTag, index: usize) -> TimelapseResult<Self> {
        let (i, r) = self.require(axis)?;
        if index >= r.len() {
            return Err(TimelapseError::invalid_shape(format!(
                "index {index} out of bounds for axis {axis} (len {})",
                r.len()
            )));
        }
        let mut out = self.clone();
        out.sel[i] = AxisSel::Fixed(r.start + index);
        Ok(out)
    }

    /// Restrict `axis` to `range` (relative to the current view).
    pub fn slice(&self, axis: AxisTag, range: IndexRange) -> TimelapseResult<Self> {
        let (i, r) = self.require(axis)?;
        if range.end > r.len() {
            return Err(TimelapseError::invalid_shape(format!(
                "range {}..{} out of bounds for axis {axis} (len {})",
                range.start,
                range.end,
                r.len()
            )));
        }
        let mut out = self.clone();
        out.sel[i] = AxisSel::Range(IndexRange {
            start: r.start + range.start,
            end: r.start + range.end,
        });
        Ok(out)
    }

    /// Fail unless the view's remaining axes are exactly `expected` (in any order).
    pub fn require_axes(&self, expected: &[AxisTag]) -> TimelapseResult<()> {
        let axes = self.axes();
        let same = axes.len() == expected.len() && expected.iter().all(|a| axes.contains(a));
        if !same {
            return Err(TimelapseError::invalid_shape(format!(
                "expected axes '{}', view has '{}'",
                dims_string(expected),
                dims_string(&axes)
            )));
        }
        Ok(())
    }

    /// Number of planes a [`Self::materialize`] call would read.
    pub fn plane_count(&self) -> usize {
        let outer = self.source.dims().outer_axes().len();
        self.sel[..outer]
            .iter()
            .map(|s| match s {
                AxisSel::Fixed(_) => 1,
                AxisSel::Range(r) => r.len(),
            })
            .product()
    }

    /// Read every plane the view covers and assemble them into an array shaped
    /// [`Self::shape`], axes in [`Self::axes`] order.
    pub fn materialize(&self) -> TimelapseResult<ArrayD<f32>> {
        let dims = self.source.dims();
        let outer_axes = dims.outer_axes();
        let outer_sel = &self.sel[..outer_axes.len()];
        let (y_sel, x_sel) = (self.sel[outer_axes.len()], self.sel[outer_axes.len() + 1]);
        let shape = self.shape();

        let mut data = Vec::with_capacity(shape.iter().product());
        let mut cursor: Vec<usize> = outer_sel
            .iter()
            .map(|s| match s {
                AxisSel::Fixed(v) => *v,
                AxisSel::Range(r) => r.start,
            })
            .collect();

        if self.plane_count() > 0 {
            loop {
                let mut coord = PlaneCoord::new();
                for (axis, i) in outer_axes.iter().zip(&cursor) {
                    coord.set(*axis, *i);
                }
                let plane = self.source.read_plane(&coord)?;
                if plane.dim() != (dims.height(), dims.width()) {
                    return Err(TimelapseError::invalid_shape(format!(
                        "plane {coord} has shape {:?}, expected ({}, {})",
                        plane.dim(),
                        dims.height(),
                        dims.width()
                    )));
                }
                let cropped = crop(plane.view().into_dyn(), y_sel, x_sel);
                data.extend(cropped.iter().copied());

                if !advance(&mut cursor, outer_sel) {
                    break;
                }
            }
        }

        ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| {
            TimelapseError::invalid_shape(format!("assembled data does not fit view shape: {e}"))
        })
    }
}

fn crop<'a>(plane: ArrayViewD<'a, f32>, y: AxisSel, x: AxisSel) -> ArrayViewD<'a, f32> {
    // X first so Axis(0) still refers to Y afterwards.
    let plane = narrow(plane, Axis(1), x);
    narrow(plane, Axis(0), y)
}

fn narrow<'a>(v: ArrayViewD<'a, f32>, axis: Axis, sel: AxisSel) -> ArrayViewD<'a, f32> {
    match sel {
        AxisSel::Fixed(i) => v.index_axis_move(axis, i),
        AxisSel::Range(r) => v.slice_axis_move(axis, Slice::from(r.start..r.end)),
    }
}

/// Odometer step over the ranged outer axes; `false` once every combination was visited.
fn advance(cursor: &mut [usize], sel: &[AxisSel]) -> bool {
    for k in (0..cursor.len()).rev() {
        if let AxisSel::Range(r) = sel[k] {
            cursor[k] += 1;
            if cursor[k] < r.end {
                return true;
            }
            cursor[k] = r.start;
        }
    }
    false
}

impl fmt::Debug for ArrayView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayView")
            .field("axes", &dims_string(&self.axes()))
            .field("shape", &self.shape())
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/reader/view.rs"]
mod tests;
