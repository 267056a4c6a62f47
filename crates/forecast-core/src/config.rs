//! Static configuration consumed by the forecasting core
//!
//! Every field has a default so a partial file or environment overlay is
//! enough to run.

use crate::models::Tag;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Shape of one tag's window
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WindowConfig {
    /// Maximum samples retained
    pub capacity: usize,
    /// Minimum seconds between two accepted samples
    pub spacing_secs: i64,
    /// Seasonal period in samples used by Holt-Winters and decomposition
    pub seasonal_period: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub hourly: WindowConfig,
    pub daily: WindowConfig,
    pub weekly: WindowConfig,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            hourly: WindowConfig {
                capacity: 60,
                spacing_secs: 60,
                seasonal_period: 15,
            },
            daily: WindowConfig {
                capacity: 96,
                spacing_secs: 300,
                seasonal_period: 24,
            },
            weekly: WindowConfig {
                capacity: 168,
                spacing_secs: 900,
                seasonal_period: 42,
            },
        }
    }
}

impl WindowsConfig {
    pub fn get(&self, tag: Tag) -> &WindowConfig {
        match tag {
            Tag::Hourly => &self.hourly,
            Tag::Daily => &self.daily,
            Tag::Weekly => &self.weekly,
        }
    }
}

/// Training budget for predictors that fit parameters iteratively
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub max_iterations: usize,
    /// Convergence: stop once an iteration improves the error by less
    pub epsilon: f64,
    /// Parameter step for the coordinate search
    pub step: f64,
    /// Pending training requests before dispatch starts refusing
    pub queue_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            epsilon: 1e-6,
            step: 0.05,
            queue_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

/// Store connection parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_dir: PathBuf,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            data_dir: PathBuf::from("/var/lib/forecaster"),
            timeout_ms: 500,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration for the forecasting core
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub windows: WindowsConfig,
    /// |r| above which two metrics are considered correlated
    pub correlation_threshold: f64,
    /// Level smoothing constant
    pub alpha: f64,
    /// Trend smoothing constant
    pub beta: f64,
    /// Seasonal smoothing constant
    pub gamma: f64,
    /// Band half-width in standard deviations of recent residuals
    pub band_k: f64,
    /// Number of most recent residuals used for the band
    pub band_window: usize,
    /// Samples before a tag is promoted; a full window when unset
    pub promotion_threshold: Option<usize>,
    pub agent_count: usize,
    pub restart_backoff_ms: u64,
    pub crash_loop_restarts: usize,
    pub crash_loop_window_secs: u64,
    pub promotion_interval_secs: u64,
    pub rebalance_interval_secs: u64,
    pub persist_interval_secs: u64,
    pub training: TrainingConfig,
    pub store: StoreConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            windows: WindowsConfig::default(),
            correlation_threshold: 0.7,
            alpha: 0.5,
            beta: 0.3,
            gamma: 0.1,
            band_k: 2.0,
            band_window: 30,
            promotion_threshold: None,
            agent_count: 16,
            restart_backoff_ms: 100,
            crash_loop_restarts: 5,
            crash_loop_window_secs: 60,
            promotion_interval_secs: 60,
            rebalance_interval_secs: 30,
            persist_interval_secs: 300,
            training: TrainingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ForecastConfig {
    pub fn window(&self, tag: Tag) -> &WindowConfig {
        self.windows.get(tag)
    }

    /// Sample count at which a tag becomes ready to train
    pub fn promotion_threshold_for(&self, tag: Tag) -> usize {
        let capacity = self.window(tag).capacity;
        self.promotion_threshold
            .map(|t| t.min(capacity))
            .unwrap_or(capacity)
            .max(1)
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn crash_loop_window(&self) -> Duration {
        Duration::from_secs(self.crash_loop_window_secs)
    }

    pub fn promotion_interval(&self) -> Duration {
        Duration::from_secs(self.promotion_interval_secs.max(1))
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs.max(1))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs.max(1))
    }

    /// Checks values the algorithms cannot work with
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta), ("gamma", self.gamma)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.agent_count == 0 {
            return Err("agent_count must be at least 1".to_string());
        }
        for tag in Tag::ALL {
            let window = self.window(tag);
            if window.capacity == 0 || window.spacing_secs <= 0 || window.seasonal_period < 2 {
                return Err(format!("invalid window configuration for {}", tag));
            }
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err("correlation_threshold must be in [0, 1]".to_string());
        }
        Ok(())
    }
}
