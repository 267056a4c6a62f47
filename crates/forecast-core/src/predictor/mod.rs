//! Forecast production
//!
//! A [`Forecaster`] picks between the installed "complex" [`Predictor`]
//! (used when a valid trained model exists for the sensor and tag) and
//! single exponential smoothing for the next point only. Either way the
//! band is the point forecast plus or minus `band_k` standard deviations of
//! the most recent in-sample residuals.

pub mod analysis;
mod smoothing;
pub mod trainer;

pub use smoothing::SmoothingPredictor;

use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::models::{NetworkModel, Prediction, Sensor, Tag};
use crate::stats::decomposition::{self, Decomposition};
use crate::stats::{math, SimpleSmoothing};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Input handed to a complex predictor
#[derive(Debug, Clone, Copy)]
pub struct ForecastRequest<'a> {
    pub tag: Tag,
    /// Current window, chronological
    pub values: &'a [f64],
    pub horizon: usize,
    pub period: usize,
    /// Present when the window covers the decomposition's minimum length
    pub decomposition: Option<&'a Decomposition>,
}

/// Raw predictor output, before the band is applied
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    /// One point per horizon step
    pub values: Vec<f64>,
    /// In-sample one-step residuals, chronological
    pub residuals: Vec<f64>,
}

/// Trait for trainable predictors
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    /// Forecast `request.horizon` steps with a previously trained model
    fn predict(&self, request: &ForecastRequest<'_>, model: &NetworkModel) -> Result<Forecast>;

    /// Fit a model on the sensor's window for `tag`
    fn train(&self, sensor: &Sensor, tag: Tag) -> Result<NetworkModel>;
}

/// How a prediction was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Complex,
    Simple,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Complex => "complex",
            Method::Simple => "simple",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex SHA-256 over a model artifact's payload
pub fn checksum(model: &NetworkModel) -> String {
    let mut hasher = Sha256::new();
    for part in [&model.dataset, &model.model, &model.model_state] {
        hasher.update(part.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Stamp the checksum on a freshly trained artifact
pub fn seal(mut model: NetworkModel) -> NetworkModel {
    model.checksum = checksum(&model);
    model
}

pub fn verify(model: &NetworkModel) -> Result<()> {
    if model.checksum != checksum(model) {
        return Err(ForecastError::InvalidModel(format!(
            "checksum mismatch for {}",
            model.id
        )));
    }
    Ok(())
}

/// Prediction selection policy
#[derive(Clone)]
pub struct Forecaster {
    predictor: Arc<dyn Predictor>,
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(predictor: Arc<dyn Predictor>, config: ForecastConfig) -> Self {
        Self { predictor, config }
    }

    pub fn predictor(&self) -> &Arc<dyn Predictor> {
        &self.predictor
    }

    /// Forecast the sensor's `tag` window
    ///
    /// Falls back to the simple method when there is no model, the model
    /// fails validation, or the complex predictor cannot run on this data.
    pub fn forecast(
        &self,
        sensor: &Sensor,
        tag: Tag,
        horizon: usize,
        model: Option<&NetworkModel>,
    ) -> Result<(Prediction, Method)> {
        let values = sensor.values(tag);
        // A window reset by training keeps its clock through the other tags
        let last = sensor
            .latest(tag)
            .or_else(|| Tag::ALL.iter().filter_map(|t| sensor.latest(*t)).max_by_key(|s| s.0))
            .ok_or_else(|| ForecastError::insufficient(SimpleSmoothing::MIN_SAMPLES, 0))?;

        let complex = match model {
            Some(model) => match self.complex(&values, tag, horizon.max(1), model) {
                Ok(forecast) => Some(forecast),
                Err(e) => {
                    warn!(
                        sensor_id = %sensor.id,
                        tag = %tag,
                        predictor = %self.predictor.name(),
                        error = %e,
                        "Complex prediction unavailable, using simple method"
                    );
                    None
                }
            },
            None => None,
        };

        let (forecast, method) = match complex {
            Some(forecast) => (forecast, Method::Complex),
            None => {
                let fit = SimpleSmoothing::new(self.config.alpha).fit(&values)?;
                let forecast = Forecast {
                    values: fit.forecast,
                    residuals: fit.residuals,
                };
                (forecast, Method::Simple)
            }
        };

        let spacing = self.config.window(tag).spacing_secs;
        let prediction = self.band(forecast, last.0, spacing)?;
        debug!(
            sensor_id = %sensor.id,
            tag = %tag,
            method = %method,
            points = prediction.len(),
            "Forecast produced"
        );
        Ok((prediction, method))
    }

    fn complex(
        &self,
        values: &[f64],
        tag: Tag,
        horizon: usize,
        model: &NetworkModel,
    ) -> Result<Forecast> {
        verify(model)?;
        let period = self.config.window(tag).seasonal_period;
        let decomposed = if values.len() >= decomposition::min_samples(period) {
            decomposition::decompose(values, period)
                .ok()
                .filter(|d| d.factors.iter().all(|f| f.is_finite()))
        } else {
            None
        };

        let request = ForecastRequest {
            tag,
            values,
            horizon,
            period,
            decomposition: decomposed.as_ref(),
        };
        let forecast = self.predictor.predict(&request, model)?;
        if forecast.values.is_empty() || forecast.values.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::InvalidModel(format!(
                "{} produced no usable values",
                self.predictor.name()
            )));
        }
        Ok(forecast)
    }

    fn band(&self, forecast: Forecast, last_timestamp: i64, spacing: i64) -> Result<Prediction> {
        let recent = &forecast.residuals
            [forecast.residuals.len().saturating_sub(self.config.band_window.max(1))..];
        let spread = if recent.is_empty() {
            0.0
        } else {
            self.config.band_k * math::std(recent)?
        };

        let timestamps = (1..=forecast.values.len() as i64)
            .map(|step| last_timestamp + step * spacing)
            .collect();
        Ok(Prediction {
            timestamps,
            upper: forecast.values.iter().map(|v| v + spread).collect(),
            lower: forecast.values.iter().map(|v| v - spread).collect(),
            values: forecast.values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{self, SensorId};

    fn config() -> ForecastConfig {
        ForecastConfig::default()
    }

    fn forecaster() -> Forecaster {
        Forecaster::new(Arc::new(SmoothingPredictor::new(config())), config())
    }

    fn hourly_sensor(values: &[f64]) -> Sensor {
        let config = config();
        let id = SensorId::new("n1", "cpu");
        let mut sensor = Sensor::empty(id);
        for (i, v) in values.iter().enumerate() {
            sensor::update(&mut sensor, i as i64 * 60, *v, &config.windows);
        }
        sensor
    }

    #[test]
    fn test_simple_on_constant_series_is_exact() {
        let sensor = hourly_sensor(&[4.0; 10]);
        let (prediction, method) = forecaster().forecast(&sensor, Tag::Hourly, 5, None).unwrap();

        assert_eq!(method, Method::Simple);
        assert_eq!(prediction.values, vec![4.0]);
        assert_eq!(prediction.upper, vec![4.0]);
        assert_eq!(prediction.lower, vec![4.0]);
        assert_eq!(prediction.timestamps, vec![9 * 60 + 60]);
    }

    #[test]
    fn test_band_brackets_the_point() {
        let sensor = hourly_sensor(&[1.0, 3.0, 2.0, 4.0, 3.0, 5.0]);
        let (prediction, _) = forecaster().forecast(&sensor, Tag::Hourly, 1, None).unwrap();
        assert!(prediction.lower[0] < prediction.values[0]);
        assert!(prediction.upper[0] > prediction.values[0]);
        assert!((prediction.upper[0] - prediction.values[0]
            - (prediction.values[0] - prediction.lower[0]))
            .abs()
            < 1e-9);
    }

    #[test]
    fn test_empty_window_is_insufficient() {
        let sensor = Sensor::empty(SensorId::new("n1", "cpu"));
        assert!(matches!(
            forecaster().forecast(&sensor, Tag::Daily, 1, None),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_trained_model_yields_complex_horizon() {
        let values: Vec<f64> = (0..60).map(|i| 10.0 + i as f64 * 0.5 + (i % 15) as f64).collect();
        let sensor = hourly_sensor(&values);
        let forecaster = forecaster();
        let model = forecaster.predictor().train(&sensor, Tag::Hourly).unwrap();

        let (prediction, method) = forecaster
            .forecast(&sensor, Tag::Hourly, 4, Some(&model))
            .unwrap();
        assert_eq!(method, Method::Complex);
        assert_eq!(prediction.len(), 4);
        assert_eq!(prediction.timestamps[0], 59 * 60 + 60);
        assert_eq!(prediction.timestamps[3], 59 * 60 + 240);
    }

    #[test]
    fn test_reset_window_still_forecasts_from_model() {
        let values: Vec<f64> = (0..60).map(|i| 10.0 + (i % 15) as f64).collect();
        let mut sensor = hourly_sensor(&values);
        let forecaster = forecaster();
        let model = forecaster.predictor().train(&sensor, Tag::Hourly).unwrap();
        sensor::reset(&mut sensor, Tag::Hourly);

        let (prediction, method) = forecaster
            .forecast(&sensor, Tag::Hourly, 2, Some(&model))
            .unwrap();
        assert_eq!(method, Method::Complex);
        // Daily window's newest sample is at 3300
        assert_eq!(prediction.timestamps, vec![3_360, 3_420]);

        assert!(matches!(
            forecaster.forecast(&sensor, Tag::Hourly, 2, None),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_tampered_model_falls_back_to_simple() {
        let values: Vec<f64> = (0..30).map(|i| (i * 7 % 11) as f64).collect();
        let sensor = hourly_sensor(&values);
        let forecaster = forecaster();
        let mut model = forecaster.predictor().train(&sensor, Tag::Hourly).unwrap();
        model.model["alpha"] = serde_json::json!(0.123456);

        assert!(matches!(verify(&model), Err(ForecastError::InvalidModel(_))));
        let (prediction, method) = forecaster
            .forecast(&sensor, Tag::Hourly, 3, Some(&model))
            .unwrap();
        assert_eq!(method, Method::Simple);
        assert_eq!(prediction.len(), 1);
    }
}
