//! Prometheus metrics for the metainfo endpoint.

use prometheus::{IntCounterVec, Opts, Registry};

pub struct MetainfoMetrics {
    pub requests_total: IntCounterVec,
    pub requests_failed_total: IntCounterVec,
}

impl MetainfoMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "orbit_metainfo_requests_total",
                "Total number of metainfo requests",
            ),
            &["operation"],
        )?;
        let requests_failed_total = IntCounterVec::new(
            Opts::new(
                "orbit_metainfo_requests_failed_total",
                "Total number of failed metainfo requests",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_failed_total.clone()))?;

        Ok(Self {
            requests_total,
            requests_failed_total,
        })
    }

    pub fn record(&self, operation: &str, failed: bool) {
        self.requests_total.with_label_values(&[operation]).inc();
        if failed {
            self.requests_failed_total
                .with_label_values(&[operation])
                .inc();
        }
    }
}
