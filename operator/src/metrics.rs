/*
 * Metrics are reported through a sink handed to every controller via its
 * context, instead of process-wide counters.
 */
pub trait MetricsSink: Send + Sync {
    fn reconcile_started(&self, kind: &str, name: &str);

    fn reconcile_failed(&self, kind: &str, name: &str, error: &str);

    fn bundle_objects_pending(&self, bundle: &str, pending: usize, total: usize);

    fn bundle_exported(&self, bundle: &str, objects: usize);
}

/* Reports every event as a debug log line */
#[derive(Clone, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn reconcile_started(&self, kind: &str, name: &str) {
	log::debug!("metric reconcile_started kind={} name={}", kind, name);
    }

    fn reconcile_failed(&self, kind: &str, name: &str, error: &str) {
	log::debug!("metric reconcile_failed kind={} name={} error={}", kind, name, error);
    }

    fn bundle_objects_pending(&self, bundle: &str, pending: usize, total: usize) {
	log::debug!("metric bundle_objects_pending bundle={} pending={} total={}", bundle, pending, total);
    }

    fn bundle_exported(&self, bundle: &str, objects: usize) {
	log::debug!("metric bundle_exported bundle={} objects={}", bundle, objects);
    }
}
