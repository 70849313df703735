use crate::error::{TimeSlicerError, TimeSlicerResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Env override for [`TimeSlicerConfig::budget_ms`].
pub const BUDGET_ENV: &str = "NEWENGINE_TIMESLICE_BUDGET_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlicerConfig {
    /// Per-pass wall-clock allowance for non-overdue work.
    #[serde(default = "default_budget_ms")]
    pub budget_ms: f64,
    /// Estimate new coroutine timeslices start from.
    #[serde(default = "default_initial_tick_estimate_sec")]
    pub initial_tick_estimate_sec: f64,
    /// `false`: the average simply tracks the last pass. `true`: 10% exponential blend.
    #[serde(default)]
    pub smooth_average_update: bool,
    #[serde(default = "default_warn_on_overdue")]
    pub warn_on_overdue: bool,
    /// Nodes preallocated per queue.
    #[serde(default = "default_list_capacity")]
    pub list_capacity: usize,
}

fn default_budget_ms() -> f64 { 2.0 }
fn default_initial_tick_estimate_sec() -> f64 { 0.02 }
fn default_warn_on_overdue() -> bool { true }
fn default_list_capacity() -> usize { 64 }

impl Default for TimeSlicerConfig {
    fn default() -> Self {
        Self {
            budget_ms: default_budget_ms(),
            initial_tick_estimate_sec: default_initial_tick_estimate_sec(),
            smooth_average_update: false,
            warn_on_overdue: default_warn_on_overdue(),
            list_capacity: default_list_capacity(),
        }
    }
}

impl TimeSlicerConfig {
    /// Budget in seconds, never negative.
    #[inline]
    pub fn budget_secs(&self) -> f64 {
        if self.budget_ms.is_finite() {
            (self.budget_ms / 1000.0).max(0.0)
        } else {
            0.0
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: impl AsRef<Path>) -> TimeSlicerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TimeSlicerError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| TimeSlicerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies [`BUDGET_ENV`] if set and parseable. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        let Ok(raw) = std::env::var(BUDGET_ENV) else {
            return;
        };
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => self.budget_ms = v,
            _ => log::warn!("{BUDGET_ENV}={raw:?} ignored: expected non-negative milliseconds"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = TimeSlicerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, TimeSlicerConfig::default());
        assert!((cfg.budget_secs() - 0.002).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let cfg = TimeSlicerConfig::from_toml_str(
            "budget_ms = 4.5\nsmooth_average_update = true\n",
        )
        .unwrap();
        assert_eq!(cfg.budget_ms, 4.5);
        assert!(cfg.smooth_average_update);
        assert_eq!(cfg.list_capacity, 64);
        assert!(cfg.warn_on_overdue);
    }

    #[test]
    fn negative_budget_clamps_to_zero() {
        let cfg = TimeSlicerConfig {
            budget_ms: -3.0,
            ..Default::default()
        };
        assert_eq!(cfg.budget_secs(), 0.0);
    }

    #[test]
    fn missing_file_is_config_io() {
        let err = TimeSlicerConfig::load("/definitely/not/here/timeslicer.toml").unwrap_err();
        assert!(matches!(err, TimeSlicerError::ConfigIo { .. }));
    }

    #[test]
    fn bad_toml_is_config_parse() {
        let dir = std::env::temp_dir().join(format!("timeslicer-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "budget_ms = \"fast\"").unwrap();

        let err = TimeSlicerConfig::load(&path).unwrap_err();
        assert!(matches!(err, TimeSlicerError::ConfigParse { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
