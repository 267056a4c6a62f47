//! Built-in trainable predictor
//!
//! Training min-max normalizes the window and fits Holt-Winters (or Holt
//! when fewer than two seasons are available) by coordinate descent over the
//! smoothing constants. The artifact keeps the training series so that a
//! later forecast can run over history plus whatever arrived since the
//! window was reset.

use super::{seal, Forecast, ForecastRequest, Predictor};
use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::models::{NetworkModel, Sensor, Tag};
use crate::stats::{math, DoubleSmoothing, TripleSmoothing};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Bounds for every smoothing constant during the search
const LOWER: f64 = 0.01;
const UPPER: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FitMethod {
    Double,
    Triple,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Params {
    method: FitMethod,
    alpha: f64,
    beta: f64,
    gamma: f64,
    period: usize,
}

impl Params {
    fn with(&self, constants: [f64; 3]) -> Self {
        Self {
            alpha: constants[0],
            beta: constants[1],
            gamma: constants[2],
            ..*self
        }
    }

    fn constants(&self) -> [f64; 3] {
        [self.alpha, self.beta, self.gamma]
    }

    fn dimensions(&self) -> usize {
        match self.method {
            FitMethod::Double => 2,
            FitMethod::Triple => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct State {
    min: f64,
    max: f64,
    sse: f64,
    iterations: usize,
}

pub struct SmoothingPredictor {
    config: ForecastConfig,
}

impl SmoothingPredictor {
    pub const NAME: &'static str = "smoothing";

    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    fn sse(params: &Params, series: &[f64]) -> Result<f64> {
        let fit = match params.method {
            FitMethod::Double => DoubleSmoothing::new(params.alpha, params.beta).fit(series, 1)?,
            FitMethod::Triple => {
                TripleSmoothing::new(params.alpha, params.beta, params.gamma, params.period)
                    .fit(series, 1)?
            }
        };
        Ok(fit.sse())
    }

    /// Coordinate descent minimizing the one-step squared error
    ///
    /// Converges once an iteration at the finest step improves the error by
    /// less than `epsilon`.
    fn optimize(&self, start: Params, series: &[f64]) -> Result<(Params, f64, usize)> {
        let training = &self.config.training;
        let mut params = start.with(start.constants().map(|c| c.clamp(LOWER, UPPER)));
        let mut best = Self::sse(&params, series)?;
        if !best.is_finite() {
            return Err(ForecastError::TrainingDivergence {
                iterations: 0,
                error: best,
            });
        }

        let mut step = training.step;
        let finest = training.step / 8.0;

        for iteration in 1..=training.max_iterations {
            let previous = best;
            for dimension in 0..params.dimensions() {
                for direction in [1.0, -1.0] {
                    let mut constants = params.constants();
                    let moved = constants[dimension] + direction * step;
                    constants[dimension] = moved.clamp(LOWER, UPPER);
                    if constants == params.constants() {
                        continue;
                    }
                    let candidate = params.with(constants);
                    let error = Self::sse(&candidate, series)?;
                    if error.is_finite() && error < best {
                        best = error;
                        params = candidate;
                    }
                }
            }

            if previous - best < training.epsilon {
                if step > finest {
                    step /= 2.0;
                    continue;
                }
                return Ok((params, best, iteration));
            }
        }

        Err(ForecastError::TrainingDivergence {
            iterations: training.max_iterations,
            error: best,
        })
    }

    fn decode<T: for<'de> Deserialize<'de>>(value: &serde_json::Value, what: &str) -> Result<T> {
        serde_json::from_value(value.clone())
            .map_err(|e| ForecastError::InvalidModel(format!("bad {}: {}", what, e)))
    }
}

impl Predictor for SmoothingPredictor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn predict(&self, request: &ForecastRequest<'_>, model: &NetworkModel) -> Result<Forecast> {
        let params: Params = Self::decode(&model.model, "model")?;
        let state: State = Self::decode(&model.model_state, "model state")?;
        let history: Vec<f64> = Self::decode(&model.dataset, "dataset")?;
        if state.max <= state.min {
            return Err(ForecastError::InvalidModel("empty normalization range".to_string()));
        }

        let scale = |x: &f64| (x - state.min) / (state.max - state.min);
        let series: Vec<f64> = history.iter().chain(request.values).map(scale).collect();
        let horizon = request.horizon.max(1);

        let seasonal = TripleSmoothing::new(params.alpha, params.beta, params.gamma, params.period);
        let factors = request
            .decomposition
            .filter(|d| d.factors.iter().all(|f| *f > 0.0));

        let (forecast, residuals) = match (params.method, factors) {
            (FitMethod::Triple, _) if series.len() >= seasonal.min_samples() => {
                let fit = seasonal.fit(&series, horizon)?;
                (fit.forecast, fit.residuals)
            }
            (_, Some(decomposition)) => {
                // Seasonal factors are indexed from the start of the current
                // window; history positions wrap backwards.
                let offset = history.len() as isize;
                let period = decomposition.period as isize;
                let factor =
                    |i: isize| decomposition.factor_at((i - offset).rem_euclid(period) as usize);

                let adjusted: Vec<f64> = series
                    .iter()
                    .enumerate()
                    .map(|(i, x)| x / factor(i as isize))
                    .collect();
                let fit = DoubleSmoothing::new(params.alpha, params.beta).fit(&adjusted, horizon)?;

                let residuals: Vec<f64> = fit
                    .fitted
                    .iter()
                    .enumerate()
                    .map(|(i, f)| series[i + 1] - f * factor(i as isize + 1))
                    .collect();
                let n = series.len() as isize;
                let forecast: Vec<f64> = fit
                    .forecast
                    .iter()
                    .enumerate()
                    .map(|(h, f)| f * factor(n + h as isize))
                    .collect();
                (forecast, residuals)
            }
            _ => {
                let fit = DoubleSmoothing::new(params.alpha, params.beta).fit(&series, horizon)?;
                (fit.forecast, fit.residuals)
            }
        };

        let range = state.max - state.min;
        Ok(Forecast {
            values: forecast
                .into_iter()
                .map(|v| math::denormalize(v, state.min, state.max))
                .collect(),
            residuals: residuals.into_iter().map(|r| r * range).collect(),
        })
    }

    fn train(&self, sensor: &Sensor, tag: Tag) -> Result<NetworkModel> {
        let values = sensor.values(tag);
        let needed = DoubleSmoothing::MIN_SAMPLES + 1;
        if values.len() < needed {
            return Err(ForecastError::insufficient(needed, values.len()));
        }

        let (scaled, min, max) = math::normalize(&values)?;
        let period = self.config.window(tag).seasonal_period;
        let method = if period > 1 && scaled.len() >= 2 * period {
            FitMethod::Triple
        } else {
            FitMethod::Double
        };

        let start = Params {
            method,
            alpha: self.config.alpha,
            beta: self.config.beta,
            gamma: self.config.gamma,
            period,
        };
        let (params, sse, iterations) = self.optimize(start, &scaled)?;
        debug!(
            sensor_id = %sensor.id,
            tag = %tag,
            method = ?params.method,
            iterations,
            sse,
            "Smoothing constants fitted"
        );

        let state = State {
            min,
            max,
            sse,
            iterations,
        };
        Ok(seal(NetworkModel {
            id: NetworkModel::model_id(&sensor.id, tag),
            sensor_id: sensor.id,
            tag,
            dataset: json!(values),
            model: json!(params),
            model_state: json!(state),
            checksum: String::new(),
            trained_at: chrono::Utc::now().timestamp(),
        }))
    }
}
