//! Logical operations exposed to a transport: feed, predict, analyse

use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result, StoreError};
use crate::manager::Manager;
use crate::models::{NetworkModel, Prediction, Sample, Sensor, Tag};
use crate::observability::ForecastMetrics;
use crate::pool::SensorPool;
use crate::predictor::analysis::{self, Analysis};
use crate::predictor::Forecaster;
use crate::sensor::SensorId;
use crate::store::{self, Store};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Aligned per-sensor windows supplied to `analyse`
pub type SeriesBundle = Vec<(SensorId, Vec<Sample>)>;

#[derive(Clone)]
pub struct ForecastService {
    config: ForecastConfig,
    store: Arc<dyn Store>,
    pool: SensorPool,
    manager: Arc<Manager>,
    forecaster: Forecaster,
    metrics: ForecastMetrics,
}

impl ForecastService {
    pub fn new(
        config: ForecastConfig,
        store: Arc<dyn Store>,
        pool: SensorPool,
        manager: Arc<Manager>,
        forecaster: Forecaster,
    ) -> Self {
        Self {
            config,
            store,
            pool,
            manager,
            forecaster,
            metrics: ForecastMetrics::new(),
        }
    }

    pub fn pool(&self) -> &SensorPool {
        &self.pool
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Register the metric under its node and apply the sample
    pub async fn feed(
        &self,
        node: &str,
        metric: &str,
        timestamp: i64,
        value: f64,
    ) -> Result<Sensor> {
        let id = SensorId::new(node, metric);
        if self.manager.register_metric(node, id).await {
            debug!(node = %node, metric = %metric, sensor_id = %id, "Sensor registered");
        }
        self.pool.put(id, timestamp, value).await
    }

    /// The sensor, or `None` when it was never fed
    pub async fn get(&self, node: &str, metric: &str) -> Result<Option<Sensor>> {
        match self.pool.get(SensorId::new(node, metric)).await {
            Ok(sensor) => Ok(Some(sensor)),
            Err(ForecastError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, node: &str, metric: &str) -> Result<()> {
        self.pool.delete(SensorId::new(node, metric)).await
    }

    /// Request a new pool size, applied by the next rebalance scan
    ///
    /// Returns the accepted count, never below one.
    pub async fn set_agent_count(&self, count: usize) -> usize {
        self.manager.set_desired_agents(count).await;
        self.manager.desired_agents().await
    }

    /// Forecast `horizon` steps of the sensor's `tag` window
    ///
    /// `None` when the sensor does not exist. The prediction is cached on
    /// the sensor.
    pub async fn predict(
        &self,
        node: &str,
        metric: &str,
        tag: Tag,
        horizon: usize,
    ) -> Result<Option<Prediction>> {
        self.predict_id(SensorId::new(node, metric), tag, horizon).await
    }

    pub async fn predict_id(
        &self,
        id: SensorId,
        tag: Tag,
        horizon: usize,
    ) -> Result<Option<Prediction>> {
        let started = Instant::now();
        let sensor = match self.pool.get(id).await {
            Ok(sensor) => sensor,
            Err(ForecastError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let model = self.load_model(&id, tag).await;
        let (prediction, method) = self
            .forecaster
            .forecast(&sensor, tag, horizon, model.as_ref())?;

        if let Err(e) = self.pool.record_prediction(id, tag, prediction.clone()).await {
            warn!(sensor_id = %id, tag = %tag, error = %e, "Could not cache prediction");
        }

        self.metrics.inc_predictions_served(method.as_str());
        self.metrics
            .observe_prediction_latency(started.elapsed().as_secs_f64());
        Ok(Some(prediction))
    }

    /// Model artifact for a (sensor, tag); store trouble means no model
    async fn load_model(&self, id: &SensorId, tag: Tag) -> Option<NetworkModel> {
        let key = NetworkModel::model_id(id, tag);
        let lookup = store::get_model(self.store.as_ref(), &key);
        let loaded = match tokio::time::timeout(self.config.store.timeout(), lookup).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };
        match loaded {
            Ok(model) => model,
            Err(e) => {
                warn!(sensor_id = %id, tag = %tag, error = %e, "Model lookup failed");
                None
            }
        }
    }

    /// Correlate the sensor with its node's other sensors and check its
    /// latest value against the cached band
    ///
    /// Without a `bundle` the node's registered sensors are gathered from
    /// the pool, the analysed sensor first. `None` when the sensor does not
    /// exist.
    pub async fn analyse(
        &self,
        node: &str,
        metric: &str,
        tag: Tag,
        bundle: Option<SeriesBundle>,
    ) -> Result<Option<Analysis>> {
        let id = SensorId::new(node, metric);
        let sensor = match self.pool.get(id).await {
            Ok(sensor) => sensor,
            Err(ForecastError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let bundle = match bundle {
            Some(bundle) => bundle,
            None => self.node_bundle(node, &sensor, tag).await?,
        };

        let analysis = analysis::analyse(
            id,
            tag,
            &bundle,
            sensor.latest(tag).map(|(_, value)| value),
            sensor.predictions.get(&tag),
            self.config.correlation_threshold,
        )?;
        Ok(Some(analysis))
    }

    async fn node_bundle(
        &self,
        node: &str,
        subject: &Sensor,
        tag: Tag,
    ) -> Result<SeriesBundle> {
        let mut bundle = vec![(subject.id, subject.window(tag).to_vec())];
        for other in self.manager.get_metrics(node).await {
            if other == subject.id {
                continue;
            }
            match self.pool.get(other).await {
                Ok(sensor) => bundle.push((other, sensor.window(tag).to_vec())),
                Err(ForecastError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRegistry;
    use crate::observability::StructuredLogger;
    use crate::predictor::analysis::RangeStatus;
    use crate::predictor::SmoothingPredictor;
    use crate::store::{MemoryStore, Record};
    use crate::stats::Correlation;
    use tokio::sync::broadcast;

    struct Fixture {
        service: ForecastService,
        store: Arc<MemoryStore>,
        _shutdown: broadcast::Sender<()>,
    }

    async fn fixture() -> Fixture {
        let config = ForecastConfig {
            agent_count: 4,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let pool = SensorPool::start(
            &config,
            store.clone(),
            Arc::new(HealthRegistry::new()),
            StructuredLogger::new("test"),
            shutdown_rx,
        )
        .await;
        let manager = Arc::new(Manager::new(store.clone(), &config));
        let forecaster = Forecaster::new(
            Arc::new(SmoothingPredictor::new(config.clone())),
            config.clone(),
        );
        let service = ForecastService::new(config, store.clone(), pool, manager, forecaster);
        Fixture {
            service,
            store,
            _shutdown: shutdown,
        }
    }

    #[tokio::test]
    async fn test_feed_registers_and_orders_newest_first() {
        let f = fixture().await;
        let t = 1_642_433_780;
        f.service.feed("n1", "s1", t, 5.0).await.unwrap();
        f.service.feed("n1", "s1", t + 60, 7.0).await.unwrap();

        let sensor = f.service.get("n1", "s1").await.unwrap().unwrap();
        assert_eq!(sensor.hourly, vec![(t + 60, 7.0), (t, 5.0)]);
        assert_eq!(
            f.service.manager().get_metrics("n1").await.into_iter().collect::<Vec<_>>(),
            vec![SensorId::new("n1", "s1")]
        );
    }

    #[tokio::test]
    async fn test_sixty_one_samples_keep_sixty() {
        let f = fixture().await;
        for i in 0..61i64 {
            f.service.feed("n1", "s1", i * 60, i as f64).await.unwrap();
        }
        let sensor = f.service.get("n1", "s1").await.unwrap().unwrap();
        assert_eq!(sensor.hourly.len(), 60);
        assert_eq!(sensor.hourly.last(), Some(&(60, 1.0)));
    }

    #[tokio::test]
    async fn test_predict_unknown_sensor_is_none() {
        let f = fixture().await;
        assert_eq!(f.service.predict("n1", "nope", Tag::Hourly, 3).await.unwrap(), None);
        assert_eq!(f.service.get("n1", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_predict_simple_caches_prediction() {
        let f = fixture().await;
        for i in 0..10i64 {
            f.service.feed("n1", "s1", i * 60, 4.0).await.unwrap();
        }

        let prediction = f
            .service
            .predict("n1", "s1", Tag::Hourly, 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prediction.values, vec![4.0]);
        assert_eq!(prediction.timestamps, vec![600]);

        let sensor = f.service.get("n1", "s1").await.unwrap().unwrap();
        assert_eq!(sensor.predictions.get(&Tag::Hourly), Some(&prediction));
    }

    #[tokio::test]
    async fn test_predict_uses_stored_model() {
        let f = fixture().await;
        for i in 0..60i64 {
            f.service
                .feed("n1", "s1", i * 60, 10.0 + (i % 15) as f64)
                .await
                .unwrap();
        }
        let sensor = f.service.get("n1", "s1").await.unwrap().unwrap();
        let predictor = SmoothingPredictor::new(ForecastConfig::default());
        let model = crate::predictor::Predictor::train(&predictor, &sensor, Tag::Hourly).unwrap();
        f.store.put(Record::NetworkModel(model)).await.unwrap();

        let prediction = f
            .service
            .predict("n1", "s1", Tag::Hourly, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prediction.len(), 3);
        assert_eq!(prediction.timestamps, vec![3_600, 3_660, 3_720]);
    }

    #[tokio::test]
    async fn test_analyse_gathers_node_sensors() {
        let f = fixture().await;
        let base = [1.0, 4.0, 2.0, 8.0, 5.0, 7.0, 3.0, 6.0];
        for (i, v) in base.iter().enumerate() {
            let t = i as i64 * 60;
            f.service.feed("n1", "cpu", t, *v).await.unwrap();
            f.service.feed("n1", "load", t, v * 3.0).await.unwrap();
            f.service.feed("n1", "idle", t, 10.0 - v).await.unwrap();
            f.service.feed("n2", "other", t, 1.0).await.unwrap();
        }

        let prediction = f
            .service
            .predict("n1", "cpu", Tag::Hourly, 1)
            .await
            .unwrap()
            .unwrap();
        f.service
            .feed("n1", "cpu", 8 * 60, prediction.upper[0] + 50.0)
            .await
            .unwrap();
        f.service.feed("n1", "load", 8 * 60, 200.0).await.unwrap();
        f.service.feed("n1", "idle", 8 * 60, -50.0).await.unwrap();

        let analysis = f
            .service
            .analyse("n1", "cpu", Tag::Hourly, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.range.unwrap().status, RangeStatus::Above);
        assert_eq!(analysis.pairs.len(), 3);

        let cpu = SensorId::new("n1", "cpu");
        let load = SensorId::new("n1", "load");
        let cpu_load = analysis
            .pairs
            .iter()
            .find(|p| p.left == cpu && p.right == load)
            .unwrap();
        assert_eq!(cpu_load.classification, Correlation::Positive);
        let other = SensorId::new("n2", "other");
        assert!(analysis
            .pairs
            .iter()
            .all(|p| p.left != other && p.right != other));
    }

    #[tokio::test]
    async fn test_offset_metric_does_not_break_node_analysis() {
        let f = fixture().await;
        for i in 0..30i64 {
            let v = ((i * 7) % 11) as f64;
            f.service.feed("n1", "cpu", i * 60, v).await.unwrap();
            f.service.feed("n1", "load", i * 60, 2.0 * v + 1.0).await.unwrap();
        }
        f.service.feed("n1", "disk", 1_830, 1.0).await.unwrap();

        let analysis = f
            .service
            .analyse("n1", "cpu", Tag::Hourly, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.pairs.len(), 3);

        let cpu = SensorId::new("n1", "cpu");
        let load = SensorId::new("n1", "load");
        let disk = SensorId::new("n1", "disk");
        let cpu_load = analysis
            .pairs
            .iter()
            .find(|p| p.left == cpu && p.right == load)
            .unwrap();
        assert_eq!(cpu_load.classification, Correlation::Positive);
        assert!(analysis
            .pairs
            .iter()
            .filter(|p| p.left == disk || p.right == disk)
            .all(|p| p.classification == Correlation::Uncorrelated));
    }

    #[tokio::test]
    async fn test_agent_count_request_reaches_manager() {
        let f = fixture().await;
        assert_eq!(f.service.manager().desired_agents().await, 4);

        assert_eq!(f.service.set_agent_count(6).await, 6);
        assert_eq!(f.service.manager().get_state().await.sensor_agents, 6);
        assert_eq!(f.service.set_agent_count(0).await, 1);
        // Applied by the rebalance scan, not here
        assert_eq!(f.service.pool().agent_count().await, 4);
    }

    #[tokio::test]
    async fn test_analyse_unknown_is_none_and_bundle_is_checked() {
        let f = fixture().await;
        assert!(f
            .service
            .analyse("n1", "ghost", Tag::Hourly, None)
            .await
            .unwrap()
            .is_none());

        f.service.feed("n1", "lonely", 0, 1.0).await.unwrap();
        assert!(matches!(
            f.service.analyse("n1", "lonely", Tag::Hourly, None).await,
            Err(ForecastError::InsufficientData { .. })
        ));

        let a = SensorId::new("n1", "lonely");
        let b = SensorId::new("n1", "given");
        let bundle = vec![
            (a, vec![(120, 3.0), (60, 2.0), (0, 1.0)]),
            (b, vec![(120, 1.0), (60, 2.0), (0, 3.0)]),
        ];
        let analysis = f
            .service
            .analyse("n1", "lonely", Tag::Hourly, Some(bundle))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.pairs[0].classification, Correlation::Negative);
    }
}
