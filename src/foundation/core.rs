use std::fmt;

use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Named axis of a microscopy array.
///
/// The single-letter forms (`S`, `T`, `C`, `Z`, `Y`, `X`, `B`) are what scanner formats and
/// store attributes use; parsing is case-insensitive and also accepts the long names.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum AxisTag {
    /// Independently acquired region.
    Scene,
    /// Acquisition timepoint.
    Time,
    /// Fluorescence channel.
    Channel,
    /// Depth.
    SpatialZ,
    /// Image rows.
    SpatialY,
    /// Image columns.
    SpatialX,
    /// Scanner tiling block.
    Block,
}

impl AxisTag {
    /// Every axis, in canonical order.
    pub const ALL: [AxisTag; 7] = [
        AxisTag::Scene,
        AxisTag::Time,
        AxisTag::Channel,
        AxisTag::SpatialZ,
        AxisTag::SpatialY,
        AxisTag::SpatialX,
        AxisTag::Block,
    ];

    pub fn as_char(self) -> char {
        match self {
            AxisTag::Scene => 'S',
            AxisTag::Time => 'T',
            AxisTag::Channel => 'C',
            AxisTag::SpatialZ => 'Z',
            AxisTag::SpatialY => 'Y',
            AxisTag::SpatialX => 'X',
            AxisTag::Block => 'B',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_char() == c.to_ascii_uppercase())
    }

    /// Parse `"z"`, `"Z"`, `"depth"`, `"time"`, ...
    pub fn parse(name: &str) -> TimelapseResult<Self> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next())
            && let Some(axis) = Self::from_char(c)
        {
            return Ok(axis);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "scene" => Ok(AxisTag::Scene),
            "time" => Ok(AxisTag::Time),
            "channel" => Ok(AxisTag::Channel),
            "depth" | "spatial_z" => Ok(AxisTag::SpatialZ),
            "height" | "spatial_y" => Ok(AxisTag::SpatialY),
            "width" | "spatial_x" => Ok(AxisTag::SpatialX),
            "block" => Ok(AxisTag::Block),
            _ => Err(TimelapseError::conflicting(format!(
                "unknown axis name '{name}'"
            ))),
        }
    }

    /// Axes the frame pipeline iterates over rather than reduces.
    pub fn is_iterated(self) -> bool {
        matches!(self, AxisTag::Scene | AxisTag::Time)
    }

    pub fn is_spatial(self) -> bool {
        matches!(
            self,
            AxisTag::SpatialZ | AxisTag::SpatialY | AxisTag::SpatialX
        )
    }
}

impl fmt::Display for AxisTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Render an axis list as a dims string, e.g. `STCZYX`.
pub fn dims_string(axes: &[AxisTag]) -> String {
    axes.iter().map(|a| a.as_char()).collect()
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> TimelapseResult<Self> {
        if den == 0 {
            return Err(TimelapseError::conflicting("fps den must be > 0"));
        }
        if num == 0 {
            return Err(TimelapseError::conflicting("fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Whole frames per second.
    pub fn integer(num: u32) -> TimelapseResult<Self> {
        Self::new(num, 1)
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn validate(self) -> TimelapseResult<()> {
        Self::new(self.num, self.den).map(|_| ())
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self { num: 1, den: 1 }
    }
}

impl std::str::FromStr for Fps {
    type Err = TimelapseError;

    /// Parses `N` or `N/D`, e.g. `"5"` or `"30000/1001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimelapseError::conflicting(format!("invalid fps '{s}' (expected N or N/D)"));
        let (num, den) = match s.trim().split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s.trim(), "1"),
        };
        Self::new(num.parse().map_err(|_| bad())?, den.parse().map_err(|_| bad())?)
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Half-open index range `[start, end)` along one axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexRange {
    /// Inclusive start.
    pub start: usize,
    /// Exclusive end.
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> TimelapseResult<Self> {
        if start > end {
            return Err(TimelapseError::conflicting(format!(
                "range start {start} must be <= end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn full(len: usize) -> Self {
        Self { start: 0, end: len }
    }

    pub fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(self) -> bool {
        self.start >= self.end
    }

    pub fn contains(self, i: usize) -> bool {
        self.start <= i && i < self.end
    }

    /// Clamp the range into `[0, len)`.
    pub fn clamp_to(self, len: usize) -> Self {
        Self {
            start: self.start.min(len),
            end: self.end.min(len),
        }
    }

    pub fn iter(self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
