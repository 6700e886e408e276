//! Prometheus meters for repair outcomes.

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};

pub struct RepairMetrics {
    pub repair_attempts: IntCounter,
    pub repair_nodes_unavailable: IntCounter,
    pub repair_unnecessary: IntCounter,
    pub repair_failed: IntCounter,
    pub repair_partial: IntCounter,
    pub repair_success: IntCounter,
    pub healthy_ratio_before_repair: Histogram,
    pub healthy_ratio_after_repair: Histogram,
}

impl RepairMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| IntCounter::with_opts(Opts::new(name, help));
        let repair_attempts = counter("orbit_repair_attempts_total", "Repairs attempted")?;
        let repair_nodes_unavailable = counter(
            "orbit_repair_nodes_unavailable_total",
            "Repairs abandoned with fewer healthy pieces than the reconstruction minimum",
        )?;
        let repair_unnecessary = counter(
            "orbit_repair_unnecessary_total",
            "Repairs requested above the repair threshold",
        )?;
        let repair_failed = counter(
            "orbit_repair_failed_total",
            "Repairs that ended at or below the repair threshold",
        )?;
        let repair_partial = counter(
            "orbit_repair_partial_total",
            "Repairs that improved the piece count without reaching the success threshold",
        )?;
        let repair_success = counter(
            "orbit_repair_success_total",
            "Repairs that reached the success threshold",
        )?;
        let healthy_ratio_before_repair = Histogram::with_opts(HistogramOpts::new(
            "orbit_repair_healthy_ratio_before",
            "Healthy piece ratio at repair entry",
        ))?;
        let healthy_ratio_after_repair = Histogram::with_opts(HistogramOpts::new(
            "orbit_repair_healthy_ratio_after",
            "Healthy piece ratio after repair",
        ))?;

        registry.register(Box::new(repair_attempts.clone()))?;
        registry.register(Box::new(repair_nodes_unavailable.clone()))?;
        registry.register(Box::new(repair_unnecessary.clone()))?;
        registry.register(Box::new(repair_failed.clone()))?;
        registry.register(Box::new(repair_partial.clone()))?;
        registry.register(Box::new(repair_success.clone()))?;
        registry.register(Box::new(healthy_ratio_before_repair.clone()))?;
        registry.register(Box::new(healthy_ratio_after_repair.clone()))?;

        Ok(Self {
            repair_attempts,
            repair_nodes_unavailable,
            repair_unnecessary,
            repair_failed,
            repair_partial,
            repair_success,
            healthy_ratio_before_repair,
            healthy_ratio_after_repair,
        })
    }
}
