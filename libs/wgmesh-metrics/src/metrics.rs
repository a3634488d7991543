use prometheus::{
    core::{Collector, Desc},
    proto::MetricFamily,
    IntCounterVec, IntGaugeVec, Opts, Registry,
};

pub mod label_values {
    /// Alloc RPC
    pub const METHOD_ALLOC: &str = "alloc";
    /// Release RPC
    pub const METHOD_RELEASE: &str = "release";
    /// Register RPC
    pub const METHOD_REGISTER: &str = "register";
    /// Unregister RPC
    pub const METHOD_UNREGISTER: &str = "unregister";
    /// Peers RPC
    pub const METHOD_PEERS: &str = "peers";
    /// GetPeer RPC
    pub const METHOD_GET_PEER: &str = "get_peer";
    /// Unknown RPC path
    pub const METHOD_UNKNOWN: &str = "unknown";

    /// Successful request
    pub const STATUS_OK: &str = "ok";
    /// Rejected or failed request
    pub const STATUS_ERROR: &str = "error";

    /// Allocated addresses
    pub const STATE_USED: &str = "used";
    /// Addresses still available
    pub const STATE_FREE: &str = "free";
}

/// Metrics owned by one running service
#[derive(Clone)]
pub struct Metrics {
    /// Registry every metric below is registered with
    registry: Registry,

    /// Counter for the number of RPC requests handled
    pub rpc_requests: IntCounterVec,
}

impl Metrics {
    /// Construct a new set of metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rpc_requests = IntCounterVec::new(
            Opts::new("wgmesh_rpc_requests", "Number of RPC requests handled"),
            &["method", "status"],
        )?;
        registry.register(Box::new(rpc_requests.clone()))?;

        Ok(Self {
            registry,
            rpc_requests,
        })
    }

    /// Get the underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register an additional collector
    pub fn register(&self, collector: Box<dyn Collector>) -> Result<(), prometheus::Error> {
        self.registry.register(collector)
    }
}

/// Usage of one address pool at the moment it was sampled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSample {
    pub pool: String,
    pub used: u128,
    pub free: u128,
}

/// Publishes pool usage, asking `source` for fresh numbers on every scrape
pub struct PoolUsageCollector<F> {
    gauge: IntGaugeVec,
    source: F,
}

impl<F> PoolUsageCollector<F>
where
    F: Fn() -> Vec<PoolSample> + Send + Sync,
{
    /// Construct a new `PoolUsageCollector`
    pub fn new(source: F) -> Result<Self, prometheus::Error> {
        Ok(Self {
            gauge: IntGaugeVec::new(
                Opts::new(
                    "wgmesh_pool_addresses",
                    "Number of addresses in each pool by allocation state",
                ),
                &["pool", "state"],
            )?,
            source,
        })
    }
}

impl<F> Collector for PoolUsageCollector<F>
where
    F: Fn() -> Vec<PoolSample> + Send + Sync,
{
    fn desc(&self) -> Vec<&Desc> {
        self.gauge.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.gauge.reset();
        for sample in (self.source)() {
            self.gauge
                .with_label_values(&[sample.pool.as_str(), label_values::STATE_USED])
                .set(i64::try_from(sample.used).unwrap_or(i64::MAX));
            self.gauge
                .with_label_values(&[sample.pool.as_str(), label_values::STATE_FREE])
                .set(i64::try_from(sample.free).unwrap_or(i64::MAX));
        }
        self.gauge.collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn test_pool_usage_is_recomputed_on_every_gather() {
        let used = Arc::new(AtomicU64::new(1));
        let metrics = Metrics::new().unwrap();
        let source = Arc::clone(&used);
        metrics
            .register(Box::new(
                PoolUsageCollector::new(move || {
                    let used = u128::from(source.load(Ordering::SeqCst));
                    vec![PoolSample {
                        pool: "cluster".to_string(),
                        used,
                        free: 254 - used,
                    }]
                })
                .unwrap(),
            ))
            .unwrap();

        let read_used = |metrics: &Metrics| {
            metrics
                .registry()
                .gather()
                .iter()
                .find(|family| family.get_name() == "wgmesh_pool_addresses")
                .unwrap()
                .get_metric()
                .iter()
                .find(|metric| {
                    metric
                        .get_label()
                        .iter()
                        .any(|label| label.get_value() == label_values::STATE_USED)
                })
                .unwrap()
                .get_gauge()
                .get_value()
        };

        assert!((read_used(&metrics) - 1.0).abs() < f64::EPSILON);
        used.store(7, Ordering::SeqCst);
        assert!((read_used(&metrics) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rpc_counter() {
        let metrics = Metrics::new().unwrap();
        let alloc_ok = [label_values::METHOD_ALLOC, label_values::STATUS_OK];
        metrics.rpc_requests.with_label_values(&alloc_ok).inc();
        metrics.rpc_requests.with_label_values(&alloc_ok).inc();
        assert_eq!(metrics.rpc_requests.with_label_values(&alloc_ok).get(), 2);
        assert_eq!(
            metrics
                .rpc_requests
                .with_label_values(&[label_values::METHOD_ALLOC, label_values::STATUS_ERROR])
                .get(),
            0
        );
    }
}
