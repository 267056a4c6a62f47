//! Service configuration

use anyhow::Result;
use forecast_core::ForecastConfig;
use serde::Deserialize;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Instance name reported in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub forecast: ForecastConfig,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "forecaster".to_string())
}

fn default_api_port() -> u16 {
    8081
}

impl AppConfig {
    /// Load configuration from an optional `forecaster.toml` and
    /// `FORECASTER__*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("forecaster").required(false))
            .add_source(
                config::Environment::with_prefix("FORECASTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: config::Config) -> Result<Self> {
        let app: AppConfig = config.try_deserialize()?;
        app.forecast.validate().map_err(anyhow::Error::msg)?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sources_use_defaults() {
        let config = config::Config::builder().build().unwrap();
        let app = AppConfig::from_config(config).unwrap();

        assert_eq!(app.api_port, 8081);
        assert_eq!(app.forecast.agent_count, 16);
        assert_eq!(app.forecast.windows.daily.capacity, 96);
    }

    #[test]
    fn test_nested_overrides() {
        let config = config::Config::builder()
            .set_override("api_port", 9000)
            .unwrap()
            .set_override("forecast.agent_count", 4)
            .unwrap()
            .set_override("forecast.store.backend", "memory")
            .unwrap()
            .build()
            .unwrap();
        let app = AppConfig::from_config(config).unwrap();

        assert_eq!(app.api_port, 9000);
        assert_eq!(app.forecast.agent_count, 4);
        assert_eq!(
            app.forecast.store.backend,
            forecast_core::config::StoreBackend::Memory
        );
        // Untouched siblings keep their defaults
        assert_eq!(app.forecast.store.timeout_ms, 500);
    }

    #[test]
    fn test_invalid_forecast_config_is_rejected() {
        let config = config::Config::builder()
            .set_override("forecast.agent_count", 0)
            .unwrap()
            .build()
            .unwrap();
        assert!(AppConfig::from_config(config).is_err());
    }
}
