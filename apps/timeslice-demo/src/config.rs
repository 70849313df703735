use anyhow::Context;
use newengine_timeslicer::TimeSlicerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemoAppConfig {
    #[serde(default)]
    pub demo: DemoConfig,
    #[serde(default)]
    pub timeslicer: TimeSlicerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Multiplier applied to the scaled clock. `0.0` pauses scaled work.
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
    /// `0` runs until ctrl-c.
    #[serde(default = "default_frames")]
    pub frames: u64,
    #[serde(default = "default_stats_every")]
    pub stats_every: u64,
    /// Sleep out the rest of each frame instead of running flat out.
    #[serde(default = "default_pace")]
    pub pace: bool,
    #[serde(default = "default_workloads")]
    pub workloads: Vec<WorkloadConfig>,
}

fn default_frame_rate() -> f64 { 60.0 }
fn default_time_scale() -> f64 { 1.0 }
fn default_frames() -> u64 { 600 }
fn default_stats_every() -> u64 { 120 }
fn default_pace() -> bool { true }

fn default_workloads() -> Vec<WorkloadConfig> {
    vec![
        WorkloadConfig {
            name: "pathfinding".to_string(),
            instances: 8,
            execution_order: 0,
            work_ms: 0.4,
            min_delay: 0.05,
            max_delay: 0.5,
            unscaled: false,
        },
        WorkloadConfig {
            name: "ui-refresh".to_string(),
            instances: 2,
            execution_order: -10,
            work_ms: 0.2,
            min_delay: 0.0,
            max_delay: 0.25,
            unscaled: true,
        },
    ]
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frame_rate: default_frame_rate(),
            time_scale: default_time_scale(),
            frames: default_frames(),
            stats_every: default_stats_every(),
            pace: default_pace(),
            workloads: default_workloads(),
        }
    }
}

impl DemoConfig {
    /// Real seconds per frame.
    pub fn frame_secs(&self) -> f64 {
        if self.frame_rate.is_finite() && self.frame_rate > 0.0 {
            1.0 / self.frame_rate
        } else {
            1.0 / default_frame_rate()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    pub name: String,
    #[serde(default = "default_instances")]
    pub instances: u32,
    #[serde(default)]
    pub execution_order: i32,
    /// Simulated CPU cost of one step.
    pub work_ms: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    #[serde(default)]
    pub unscaled: bool,
}

fn default_instances() -> u32 { 1 }

impl DemoAppConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
