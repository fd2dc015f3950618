use crate::metrics::TelemetryReport;

/// An output channel for decoded device snapshots. Implementations must be
/// fire-and-forget: a slow or broken channel may drop data but must return.
pub trait MetricCollector {
    fn publish(&mut self, report: &TelemetryReport);
}
