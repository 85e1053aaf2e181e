use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ndarray::{Array2, ArrayD, Axis, Dimension as _, IxDyn};

use crate::foundation::core::{AxisTag, dims_string};
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Ordered axis layout of a source array.
///
/// Y and X are always the last two axes, in that order: every chunk is one full (Y, X) plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dims {
    axes: Vec<AxisTag>,
    lens: Vec<usize>,
}

impl Dims {
    pub fn new(pairs: impl IntoIterator<Item = (AxisTag, usize)>) -> TimelapseResult<Self> {
        let (axes, lens): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        for (i, a) in axes.iter().enumerate() {
            if axes[..i].contains(a) {
                return Err(TimelapseError::invalid_shape(format!(
                    "axis {a} appears more than once in '{}'",
                    dims_string(&axes)
                )));
            }
        }
        let n = axes.len();
        if n < 2 || axes[n - 2] != AxisTag::SpatialY || axes[n - 1] != AxisTag::SpatialX {
            return Err(TimelapseError::invalid_shape(format!(
                "dims '{}' must end with Y then X",
                dims_string(&axes)
            )));
        }
        if lens[n - 2] == 0 || lens[n - 1] == 0 {
            return Err(TimelapseError::invalid_shape("plane height/width must be non-zero"));
        }
        Ok(Self { axes, lens })
    }

    pub fn axes(&self) -> &[AxisTag] {
        &self.axes
    }

    pub fn lens(&self) -> &[usize] {
        &self.lens
    }

    pub fn index_of(&self, axis: AxisTag) -> Option<usize> {
        self.axes.iter().position(|a| *a == axis)
    }

    pub fn height(&self) -> usize {
        self.lens[self.lens.len() - 2]
    }

    pub fn width(&self) -> usize {
        self.lens[self.lens.len() - 1]
    }

    /// Axes addressed by chunk coordinates (everything but Y and X).
    pub fn outer_axes(&self) -> &[AxisTag] {
        &self.axes[..self.axes.len() - 2]
    }

    pub fn pairs(&self) -> impl Iterator<Item = (AxisTag, usize)> + '_ {
        self.axes.iter().copied().zip(self.lens.iter().copied())
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.pairs().map(|(a, n)| format!("{a}={n}")).collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// Coordinate of one (Y, X) plane: an index for every outer axis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneCoord(BTreeMap<AxisTag, usize>);

impl PlaneCoord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: AxisTag, index: usize) -> Self {
        self.0.insert(axis, index);
        self
    }

    pub fn set(&mut self, axis: AxisTag, index: usize) {
        self.0.insert(axis, index);
    }

    pub fn get(&self, axis: AxisTag) -> Option<usize> {
        self.0.get(&axis).copied()
    }

    pub fn scene(&self) -> usize {
        self.get(AxisTag::Scene).unwrap_or(0)
    }

    pub fn time(&self) -> usize {
        self.get(AxisTag::Time).unwrap_or(0)
    }

    /// Check the coordinate addresses exactly the outer axes of `dims`, within bounds.
    pub fn validate(&self, dims: &Dims) -> TimelapseResult<()> {
        for (axis, len) in dims.pairs().take(dims.outer_axes().len()) {
            match self.get(axis) {
                Some(i) if i < len => {}
                Some(i) => {
                    return Err(TimelapseError::invalid_shape(format!(
                        "plane index {axis}={i} out of bounds (len {len})"
                    )));
                }
                None => {
                    return Err(TimelapseError::invalid_shape(format!(
                        "plane coordinate {self} is missing axis {axis}"
                    )));
                }
            }
        }
        if self.0.len() != dims.outer_axes().len() {
            return Err(TimelapseError::invalid_shape(format!(
                "plane coordinate {self} does not match dims {dims}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for PlaneCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(a, i)| format!("{a}={i}")).collect();
        write!(f, "[{}]", parts.join(" "))
    }
}

/// Acquisition metadata carried alongside pixel data. Display/logging only.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AcquisitionMetadata {
    /// Channel display names, in channel-index order.
    #[serde(default)]
    pub channel_names: Vec<String>,
    /// Acquisition start, as recorded by the instrument.
    #[serde(default)]
    pub acquisition_date: Option<String>,
    /// Nominal interval between timepoints, in seconds.
    #[serde(default)]
    pub time_interval_secs: Option<f64>,
}

impl AcquisitionMetadata {
    /// Total acquisition duration for `timepoints` frames, when the interval is known.
    pub fn total_duration_secs(&self, timepoints: usize) -> Option<f64> {
        self.time_interval_secs
            .map(|dt| dt * timepoints.saturating_sub(1) as f64)
    }
}

/// Random-access plane reader backing an [`ArrayView`](crate::ArrayView).
///
/// Implementations must be safe to call from many threads at once for disjoint or identical
/// coordinates; no read may depend on shared cursor state.
pub trait ChunkSource: Send + Sync + fmt::Debug {
    /// Axis layout of the full array.
    fn dims(&self) -> &Dims;

    /// Read one full (Y, X) plane.
    fn read_plane(&self, coord: &PlaneCoord) -> TimelapseResult<Array2<f32>>;

    fn metadata(&self) -> AcquisitionMetadata {
        AcquisitionMetadata::default()
    }

    /// Filesystem location that other processes can reopen, if any.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Source holding the whole array in memory.
///
/// Supports failure injection so scheduling and failure-policy paths can be exercised without
/// corrupt files on disk.
#[derive(Debug)]
pub struct InMemorySource {
    dims: Dims,
    data: ArrayD<f32>,
    metadata: AcquisitionMetadata,
    failing: Vec<(usize, usize)>,
    transient: Mutex<HashMap<(usize, usize), u32>>,
    delays: HashMap<usize, Duration>,
    reads: AtomicUsize,
}

impl InMemorySource {
    /// `data` must have one ndarray axis per entry of `axes`, in the same order.
    pub fn new(axes: &[AxisTag], data: ArrayD<f32>) -> TimelapseResult<Self> {
        if axes.len() != data.ndim() {
            return Err(TimelapseError::invalid_shape(format!(
                "{} axis names for a {}-dimensional array",
                axes.len(),
                data.ndim()
            )));
        }
        let dims = Dims::new(axes.iter().copied().zip(data.shape().iter().copied()))?;
        Ok(Self {
            dims,
            data,
            metadata: AcquisitionMetadata::default(),
            failing: Vec::new(),
            transient: Mutex::new(HashMap::new()),
            delays: HashMap::new(),
            reads: AtomicUsize::new(0),
        })
    }

    /// Build from a generator `f(coord, y, x)`.
    pub fn from_fn(
        pairs: &[(AxisTag, usize)],
        f: impl Fn(&PlaneCoord, usize, usize) -> f32,
    ) -> TimelapseResult<Self> {
        let dims = Dims::new(pairs.iter().copied())?;
        let shape: Vec<usize> = dims.lens().to_vec();
        let outer = dims.outer_axes().to_vec();
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
            let mut coord = PlaneCoord::new();
            for (k, axis) in outer.iter().enumerate() {
                coord.set(*axis, idx[k]);
            }
            let n = idx.ndim();
            f(&coord, idx[n - 2], idx[n - 1])
        });
        Self::new(dims.axes(), data)
    }

    pub fn with_metadata(mut self, metadata: AcquisitionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Every read of a plane at (`scene`, `time`) fails.
    pub fn with_failure(mut self, scene: usize, time: usize) -> Self {
        self.failing.push((scene, time));
        self
    }

    /// The first `count` reads of planes at (`scene`, `time`) fail, later reads succeed.
    pub fn with_transient_failure(self, scene: usize, time: usize, count: u32) -> Self {
        if let Ok(mut map) = self.transient.lock() {
            map.insert((scene, time), count);
        }
        self
    }

    /// Sleep before serving any plane at `time`.
    pub fn with_delay(mut self, time: usize, delay: Duration) -> Self {
        self.delays.insert(time, delay);
        self
    }

    /// Number of planes read so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ChunkSource for InMemorySource {
    fn dims(&self) -> &Dims {
        &self.dims
    }

    fn read_plane(&self, coord: &PlaneCoord) -> TimelapseResult<Array2<f32>> {
        coord.validate(&self.dims)?;
        let (scene, time) = (coord.scene(), coord.time());
        if let Some(d) = self.delays.get(&time) {
            std::thread::sleep(*d);
        }
        if self.failing.contains(&(scene, time)) {
            return Err(TimelapseError::chunk_read(
                scene,
                time,
                format!("injected failure at {coord}"),
            ));
        }
        {
            let mut map = self
                .transient
                .lock()
                .map_err(|_| TimelapseError::chunk_read(scene, time, "failure map poisoned"))?;
            if let Some(left) = map.get_mut(&(scene, time))
                && *left > 0
            {
                *left -= 1;
                return Err(TimelapseError::chunk_read(
                    scene,
                    time,
                    format!("injected transient failure at {coord}"),
                ));
            }
        }

        self.reads.fetch_add(1, Ordering::Relaxed);
        let mut plane = self.data.view();
        for axis in self.dims.outer_axes() {
            let i = coord.get(*axis).unwrap_or(0);
            plane = plane.index_axis_move(Axis(0), i);
        }
        plane
            .to_owned()
            .into_dimensionality()
            .map_err(|e| TimelapseError::invalid_shape(format!("plane is not 2-D: {e}")))
    }

    fn metadata(&self) -> AcquisitionMetadata {
        self.metadata.clone()
    }
}
