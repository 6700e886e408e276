//! Prometheus metrics for audit passes.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

pub struct AuditMetrics {
    pub verifies_total: IntCounter,
    pub reverifies_total: IntCounter,
    /// Node classifications by outcome: success, fail, offline, contained.
    pub classifications_total: IntCounterVec,
}

impl AuditMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let verifies_total = IntCounter::with_opts(Opts::new(
            "orbit_audit_verifies_total",
            "Total number of audit verify passes",
        ))?;
        let reverifies_total = IntCounter::with_opts(Opts::new(
            "orbit_audit_reverifies_total",
            "Total number of audit reverify passes",
        ))?;
        let classifications_total = IntCounterVec::new(
            Opts::new(
                "orbit_audit_classifications_total",
                "Node classifications by audit outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(verifies_total.clone()))?;
        registry.register(Box::new(reverifies_total.clone()))?;
        registry.register(Box::new(classifications_total.clone()))?;

        Ok(Self {
            verifies_total,
            reverifies_total,
            classifications_total,
        })
    }

    pub fn record_report(&self, report: &crate::Report) {
        self.classifications_total
            .with_label_values(&["success"])
            .inc_by(report.successes.len() as u64);
        self.classifications_total
            .with_label_values(&["fail"])
            .inc_by(report.fails.len() as u64);
        self.classifications_total
            .with_label_values(&["offline"])
            .inc_by(report.offlines.len() as u64);
        self.classifications_total
            .with_label_values(&["contained"])
            .inc_by(report.pending_audits.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_report_counts() {
        let registry = Registry::new();
        let metrics = AuditMetrics::new(&registry).expect("metrics");

        let report = crate::Report {
            successes: vec![orbit_types::NodeId::random(); 2],
            ..crate::Report::default()
        };
        metrics.record_report(&report);

        assert_eq!(
            metrics
                .classifications_total
                .with_label_values(&["success"])
                .get(),
            2
        );
    }
}
