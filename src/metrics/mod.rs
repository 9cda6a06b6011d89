use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Event store operations (load/publish/remove throughput, latency)
// - Revision conflicts by expectation kind
// - Events appended per backend
// - Command execution outcomes
//
// Everything is registered on one `Registry`; `render` produces the text
// exposition format for whatever surface scrapes it.
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Event Store Metrics
    pub store_operations: IntCounterVec,
    pub store_operation_duration: HistogramVec,
    pub revision_conflicts: IntCounterVec,
    pub events_published: IntCounterVec,

    // Command Metrics
    pub commands_executed: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let store_operations = IntCounterVec::new(
            Opts::new("event_store_operations_total", "Total event store operations"),
            &["backend", "operation", "outcome"],
        )?;
        registry.register(Box::new(store_operations.clone()))?;

        let store_operation_duration = HistogramVec::new(
            HistogramOpts::new("event_store_operation_duration_seconds", "Event store operation duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["backend", "operation"],
        )?;
        registry.register(Box::new(store_operation_duration.clone()))?;

        let revision_conflicts = IntCounterVec::new(
            Opts::new("event_store_revision_conflicts_total", "Publishes rejected by a revision conflict"),
            &["backend", "expectation"],
        )?;
        registry.register(Box::new(revision_conflicts.clone()))?;

        let events_published = IntCounterVec::new(
            Opts::new("event_store_events_published_total", "Total events appended"),
            &["backend"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let commands_executed = IntCounterVec::new(
            Opts::new("commands_executed_total", "Total commands executed"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_executed.clone()))?;

        Ok(Self {
            registry,
            store_operations,
            store_operation_duration,
            revision_conflicts,
            events_published,
            commands_executed,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record one store operation
    pub fn record_store_operation(&self, backend: &str, operation: &str, duration_secs: f64, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.store_operations
            .with_label_values(&[backend, operation, outcome])
            .inc();
        self.store_operation_duration
            .with_label_values(&[backend, operation])
            .observe(duration_secs);
    }

    /// Helper to record a rejected publish
    pub fn record_revision_conflict(&self, backend: &str, expectation: &str) {
        self.revision_conflicts
            .with_label_values(&[backend, expectation])
            .inc();
    }

    /// Helper to record appended events
    pub fn record_events_published(&self, backend: &str, count: usize) {
        self.events_published
            .with_label_values(&[backend])
            .inc_by(count as u64);
    }

    /// Helper to record a command outcome
    pub fn record_command(&self, command: &str, outcome: &str) {
        self.commands_executed
            .with_label_values(&[command, outcome])
            .inc();
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
