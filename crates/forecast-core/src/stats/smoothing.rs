//! Exponential smoothing family
//!
//! Simple (SES), double (Holt's linear trend) and triple (additive
//! Holt-Winters) smoothing. All inputs are chronological, oldest first.
//! Each `fit` also returns the in-sample one-step-ahead residuals, which the
//! predictors use for confidence bands and training.

use crate::error::{ForecastError, Result};

/// Outcome of running a smoothing recurrence over a series
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingFit {
    /// One-step-ahead in-sample predictions
    pub fitted: Vec<f64>,
    /// `actual - fitted`, aligned with `fitted`
    pub residuals: Vec<f64>,
    /// Out-of-sample forecast, one value per horizon step
    pub forecast: Vec<f64>,
}

impl SmoothingFit {
    /// Sum of squared residuals
    pub fn sse(&self) -> f64 {
        self.residuals.iter().map(|r| r * r).sum()
    }
}

/// Single exponential smoothing, for series without trend or seasonality
#[derive(Debug, Clone, Copy)]
pub struct SimpleSmoothing {
    pub alpha: f64,
}

impl SimpleSmoothing {
    pub const MIN_SAMPLES: usize = 1;

    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// Runs the recurrence; the forecast is the single next value
    pub fn fit(&self, series: &[f64]) -> Result<SmoothingFit> {
        if series.len() < Self::MIN_SAMPLES {
            return Err(ForecastError::insufficient(Self::MIN_SAMPLES, series.len()));
        }

        let mut level = series[0];
        let mut fitted = Vec::with_capacity(series.len() - 1);
        let mut residuals = Vec::with_capacity(series.len() - 1);

        for &x in &series[1..] {
            fitted.push(level);
            residuals.push(x - level);
            // Written as a correction so a constant series stays exact
            level += self.alpha * (x - level);
        }

        Ok(SmoothingFit {
            fitted,
            residuals,
            forecast: vec![level],
        })
    }

    pub fn forecast(&self, series: &[f64]) -> Result<f64> {
        Ok(self.fit(series)?.forecast[0])
    }
}

/// Holt's double exponential smoothing: level and trend
#[derive(Debug, Clone, Copy)]
pub struct DoubleSmoothing {
    pub alpha: f64,
    pub beta: f64,
}

impl DoubleSmoothing {
    pub const MIN_SAMPLES: usize = 2;

    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Runs the recurrence and extrapolates `level + h * trend` for every
    /// `h` in `1..=horizon`
    pub fn fit(&self, series: &[f64], horizon: usize) -> Result<SmoothingFit> {
        if series.len() < Self::MIN_SAMPLES {
            return Err(ForecastError::insufficient(Self::MIN_SAMPLES, series.len()));
        }

        let mut level = series[0];
        let mut trend = series[1] - series[0];
        let mut fitted = Vec::with_capacity(series.len() - 1);
        let mut residuals = Vec::with_capacity(series.len() - 1);

        for &x in &series[1..] {
            let predicted = level + trend;
            fitted.push(predicted);
            residuals.push(x - predicted);

            let last_level = level;
            level = predicted + self.alpha * (x - predicted);
            trend += self.beta * (level - last_level - trend);
        }

        let forecast = (1..=horizon.max(1))
            .map(|h| level + h as f64 * trend)
            .collect();

        Ok(SmoothingFit {
            fitted,
            residuals,
            forecast,
        })
    }

    /// Forecast exactly `horizon` steps ahead
    pub fn forecast(&self, series: &[f64], horizon: usize) -> Result<f64> {
        let fit = self.fit(series, horizon)?;
        Ok(fit.forecast[fit.forecast.len() - 1])
    }
}

/// Additive Holt-Winters: level, trend and `period` seasonal indices
#[derive(Debug, Clone, Copy)]
pub struct TripleSmoothing {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub period: usize,
}

impl TripleSmoothing {
    pub fn new(alpha: f64, beta: f64, gamma: f64, period: usize) -> Self {
        Self {
            alpha,
            beta,
            gamma,
            period: period.max(1),
        }
    }

    /// Two full seasonal cycles are needed to initialize trend and seasons
    pub fn min_samples(&self) -> usize {
        2 * self.period
    }

    fn initial_trend(&self, series: &[f64]) -> f64 {
        let p = self.period;
        (0..p).map(|i| (series[p + i] - series[i]) / p as f64).sum::<f64>() / p as f64
    }

    fn initial_seasonals(&self, series: &[f64]) -> (f64, Vec<f64>) {
        let p = self.period;
        let seasons = series.len() / p;
        let averages: Vec<f64> = (0..seasons)
            .map(|j| series[j * p..(j + 1) * p].iter().sum::<f64>() / p as f64)
            .collect();

        let seasonals = (0..p)
            .map(|i| {
                (0..seasons)
                    .map(|j| series[j * p + i] - averages[j])
                    .sum::<f64>()
                    / seasons as f64
            })
            .collect();

        (averages[0], seasonals)
    }

    pub fn fit(&self, series: &[f64], horizon: usize) -> Result<SmoothingFit> {
        let needed = self.min_samples();
        if series.len() < needed {
            return Err(ForecastError::insufficient(needed, series.len()));
        }

        let p = self.period;
        let (mut level, mut seasonals) = self.initial_seasonals(series);
        let mut trend = self.initial_trend(series);
        let mut fitted = Vec::with_capacity(series.len());
        let mut residuals = Vec::with_capacity(series.len());

        for (t, &x) in series.iter().enumerate() {
            let season = seasonals[t % p];
            let predicted = level + trend + season;
            fitted.push(predicted);
            residuals.push(x - predicted);

            let last_level = level;
            let projected = level + trend;
            level = projected + self.alpha * (x - season - projected);
            trend += self.beta * (level - last_level - trend);
            seasonals[t % p] = season + self.gamma * (x - level - season);
        }

        let n = series.len();
        let forecast = (1..=horizon.max(1))
            .map(|m| level + m as f64 * trend + seasonals[(n + m - 1) % p])
            .collect();

        Ok(SmoothingFit {
            fitted,
            residuals,
            forecast,
        })
    }

    pub fn forecast(&self, series: &[f64], horizon: usize) -> Result<Vec<f64>> {
        Ok(self.fit(series, horizon)?.forecast)
    }
}

/// One-step SES forecast
pub fn simple(series: &[f64], alpha: f64) -> Result<f64> {
    SimpleSmoothing::new(alpha).forecast(series)
}

/// Holt forecast `horizon` steps ahead
pub fn double(series: &[f64], alpha: f64, beta: f64, horizon: usize) -> Result<f64> {
    DoubleSmoothing::new(alpha, beta).forecast(series, horizon)
}

/// Holt-Winters forecasts for steps `1..=horizon`
pub fn triple(
    series: &[f64],
    alpha: f64,
    beta: f64,
    gamma: f64,
    period: usize,
    horizon: usize,
) -> Result<Vec<f64>> {
    TripleSmoothing::new(alpha, beta, gamma, period).forecast(series, horizon)
}
