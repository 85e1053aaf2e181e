//! Per-frame image stages: Z reduction and intensity normalization.
//!
//! Both are closed sets of named strategies. Each strategy declares the parameter names it
//! accepts; configuration with any other key is rejected before a frame is scheduled.

/// Intensity rescaling strategies.
pub mod normalization;
/// Depth reduction strategies.
pub mod projection;

use serde_json::{Map, Value};

use crate::foundation::core::AxisTag;
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Strategy selection as it appears in configuration: a name plus keyword parameters.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StrategyConfig {
    /// Strategy name, e.g. `max` or `percentile`.
    pub name: String,
    /// Keyword parameters validated against the strategy's declared set.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StrategyConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Typed accessors over a strategy's parameter map.
pub(crate) struct Params<'a> {
    strategy: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Params<'a> {
    pub(crate) fn new(strategy: &'a str, map: &'a Map<String, Value>) -> Self {
        Self { strategy, map }
    }

    pub(crate) fn check_keys(&self, declared: &[&str]) -> TimelapseResult<()> {
        let unknown: Vec<&str> = self
            .map
            .keys()
            .map(String::as_str)
            .filter(|k| !declared.contains(k))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        Err(TimelapseError::conflicting(format!(
            "strategy '{}' does not accept {:?} (accepted: {:?})",
            self.strategy, unknown, declared
        )))
    }

    pub(crate) fn opt_f64(&self, key: &str) -> TimelapseResult<Option<f64>> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                TimelapseError::conflicting(format!(
                    "strategy '{}': '{key}' must be a number, got {v}",
                    self.strategy
                ))
            }),
        }
    }

    pub(crate) fn f64_or(&self, key: &str, default: f64) -> TimelapseResult<f64> {
        Ok(self.opt_f64(key)?.unwrap_or(default))
    }

    pub(crate) fn axis_or(&self, key: &str, default: AxisTag) -> TimelapseResult<AxisTag> {
        match self.map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::String(s)) => AxisTag::parse(s),
            Some(v) => Err(TimelapseError::conflicting(format!(
                "strategy '{}': '{key}' must be an axis name, got {v}",
                self.strategy
            ))),
        }
    }
}
