use ndarray::Array2;

use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::stages::{Params, StrategyConfig};

/// Lower percentile used when none is configured.
pub const DEFAULT_MIN_PERCENTILE: f64 = 50.0;
/// Upper percentile used when none is configured.
pub const DEFAULT_MAX_PERCENTILE: f64 = 99.8;

/// Rescaling of a projected frame to 8-bit display intensities.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Normalization {
    /// Map `[P_min, P_max]` of the frame's own intensity distribution linearly onto `[0, 255]`.
    Percentile {
        min_percentile: f64,
        max_percentile: f64,
        /// Estimate the percentiles from an evenly strided subset of this fraction of pixels.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_fraction: Option<f64>,
    },
    /// Clip to `[0, 255]` and round; for data that is already display-scaled.
    Passthrough,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Percentile {
            min_percentile: DEFAULT_MIN_PERCENTILE,
            max_percentile: DEFAULT_MAX_PERCENTILE,
            sample_fraction: None,
        }
    }
}

impl Normalization {
    /// Strategy names accepted by [`Normalization::configure`].
    pub const NAMES: [&'static str; 2] = ["percentile", "passthrough"];

    pub fn configure(cfg: &StrategyConfig) -> TimelapseResult<Self> {
        let params = Params::new(&cfg.name, &cfg.params);
        let norm = match cfg.name.as_str() {
            "percentile" => {
                params.check_keys(&["min_percentile", "max_percentile", "sample_fraction"])?;
                Normalization::Percentile {
                    min_percentile: params.f64_or("min_percentile", DEFAULT_MIN_PERCENTILE)?,
                    max_percentile: params.f64_or("max_percentile", DEFAULT_MAX_PERCENTILE)?,
                    sample_fraction: params.opt_f64("sample_fraction")?,
                }
            }
            "passthrough" => {
                params.check_keys(&[])?;
                Normalization::Passthrough
            }
            other => {
                return Err(TimelapseError::conflicting(format!(
                    "unknown normalization '{other}' (expected one of {:?})",
                    Self::NAMES
                )));
            }
        };
        norm.validate()?;
        Ok(norm)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Normalization::Percentile { .. } => "percentile",
            Normalization::Passthrough => "passthrough",
        }
    }

    pub fn validate(&self) -> TimelapseResult<()> {
        let Normalization::Percentile {
            min_percentile,
            max_percentile,
            sample_fraction,
        } = *self
        else {
            return Ok(());
        };
        check_percentiles(min_percentile, max_percentile)?;
        if let Some(f) = sample_fraction
            && !(f > 0.0 && f <= 1.0)
        {
            return Err(TimelapseError::conflicting(format!(
                "sample_fraction must be in (0, 1], got {f}"
            )));
        }
        Ok(())
    }

    /// Normalize one frame. Pure; the output has the input's shape.
    pub fn apply(&self, frame: &Array2<f32>) -> TimelapseResult<Array2<u8>> {
        match *self {
            Normalization::Percentile {
                min_percentile,
                max_percentile,
                sample_fraction,
            } => {
                check_percentiles(min_percentile, max_percentile)?;
                let (lo, hi) =
                    frame_percentiles(frame, min_percentile, max_percentile, sample_fraction);
                Ok(rescale(frame, lo, hi))
            }
            Normalization::Passthrough => Ok(frame.mapv(to_u8)),
        }
    }
}

/// Rescale `frame` so its `min_percentile` maps to 0 and `max_percentile` to 255.
///
/// Percentiles use linear interpolation between order statistics and ignore NaN. Values outside
/// the window are clipped. A frame whose two percentiles coincide maps to all zeros.
pub fn percentile_normalize(
    frame: &Array2<f32>,
    min_percentile: f64,
    max_percentile: f64,
) -> TimelapseResult<Array2<u8>> {
    Normalization::Percentile {
        min_percentile,
        max_percentile,
        sample_fraction: None,
    }
    .apply(frame)
}

fn check_percentiles(min: f64, max: f64) -> TimelapseResult<()> {
    let in_range = |p: f64| (0.0..=100.0).contains(&p);
    if !in_range(min) || !in_range(max) {
        return Err(TimelapseError::conflicting(format!(
            "percentiles must lie in [0, 100], got min {min} and max {max}"
        )));
    }
    if min >= max {
        return Err(TimelapseError::conflicting(format!(
            "min percentile {min} must be below max percentile {max}"
        )));
    }
    Ok(())
}

fn frame_percentiles(
    frame: &Array2<f32>,
    min: f64,
    max: f64,
    sample_fraction: Option<f64>,
) -> (f64, f64) {
    let step = match sample_fraction {
        Some(f) if f < 1.0 => (1.0 / f).ceil() as usize,
        _ => 1,
    };
    let mut values: Vec<f32> = frame
        .iter()
        .step_by(step.max(1))
        .copied()
        .filter(|v| !v.is_nan())
        .collect();
    values.sort_unstable_by(f32::total_cmp);
    (percentile(&values, min), percentile(&values, max))
}

/// Linear-interpolated percentile of an ascending, NaN-free slice. Empty input yields 0.
pub fn percentile(sorted: &[f32], p: f64) -> f64 {
    let Some(last) = sorted.len().checked_sub(1) else {
        return 0.0;
    };
    let rank = (p / 100.0).clamp(0.0, 1.0) * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let (a, b) = (f64::from(sorted[lo]), f64::from(sorted[hi]));
    a + (b - a) * (rank - lo as f64)
}

fn rescale(frame: &Array2<f32>, lo: f64, hi: f64) -> Array2<u8> {
    let span = hi - lo;
    if span.is_nan() || span <= 0.0 {
        return Array2::zeros(frame.raw_dim());
    }
    frame.mapv(|v| {
        if v.is_nan() {
            return 0;
        }
        let unit = ((f64::from(v) - lo) / span).clamp(0.0, 1.0);
        (unit * 255.0).round() as u8
    })
}

fn to_u8(v: f32) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.clamp(0.0, 255.0).round() as u8
    }
}

#[cfg(test)]
#[path = "../../tests/unit/stages/normalization.rs"]
mod tests;
