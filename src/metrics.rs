use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector for the admission gateway
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Admission metrics
    total_requests: CounterVec,
    admitted_requests: CounterVec,
    rejected_requests: CounterVec,
    fail_open_requests: CounterVec,

    // Geolocation metrics
    geo_lookups: CounterVec,
    geo_lookup_duration: Histogram,

    // Service metrics
    rules_load_success: Counter,
    rules_load_error: Counter,
    decision_duration: Histogram,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let total_requests = CounterVec::new(
            Opts::new(
                "admission_total_requests",
                "Total number of rate-limited admission checks",
            ),
            &["country"],
        )?;

        let admitted_requests = CounterVec::new(
            Opts::new(
                "admission_admitted_requests",
                "Number of requests admitted under a rule",
            ),
            &["country"],
        )?;

        let rejected_requests = CounterVec::new(
            Opts::new(
                "admission_rejected_requests",
                "Number of requests rejected with 429",
            ),
            &["country"],
        )?;

        let fail_open_requests = CounterVec::new(
            Opts::new(
                "admission_fail_open_requests",
                "Number of requests admitted without rate limiting",
            ),
            &["reason"],
        )?;

        let geo_lookups = CounterVec::new(
            Opts::new(
                "admission_geo_lookups",
                "Number of geolocation lookups by result",
            ),
            &["result"],
        )?;

        let geo_lookup_duration = Histogram::with_opts(HistogramOpts::new(
            "admission_geo_lookup_duration_seconds",
            "Duration of geolocation lookups in seconds",
        ))?;

        let rules_load_success = Counter::new(
            "admission_rules_load_success",
            "Number of successful rules file loads",
        )?;

        let rules_load_error = Counter::new(
            "admission_rules_load_error",
            "Number of failed rules file loads",
        )?;

        let decision_duration = Histogram::with_opts(HistogramOpts::new(
            "admission_decision_duration_seconds",
            "Duration of admission decisions in seconds",
        ))?;

        // Register all metrics
        registry.register(Box::new(total_requests.clone()))?;
        registry.register(Box::new(admitted_requests.clone()))?;
        registry.register(Box::new(rejected_requests.clone()))?;
        registry.register(Box::new(fail_open_requests.clone()))?;
        registry.register(Box::new(geo_lookups.clone()))?;
        registry.register(Box::new(geo_lookup_duration.clone()))?;
        registry.register(Box::new(rules_load_success.clone()))?;
        registry.register(Box::new(rules_load_error.clone()))?;
        registry.register(Box::new(decision_duration.clone()))?;

        Ok(Self {
            registry,
            total_requests,
            admitted_requests,
            rejected_requests,
            fail_open_requests,
            geo_lookups,
            geo_lookup_duration,
            rules_load_success,
            rules_load_error,
            decision_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an admission check against a rule
    pub fn record_total_request(&self, country: &str) {
        self.total_requests.with_label_values(&[country]).inc();
    }

    /// Record an admitted request
    pub fn record_admitted(&self, country: &str) {
        self.admitted_requests.with_label_values(&[country]).inc();
    }

    /// Record a rejected request
    pub fn record_rejected(&self, country: &str) {
        self.rejected_requests.with_label_values(&[country]).inc();
    }

    /// Record a request admitted without rate limiting
    pub fn record_fail_open(&self, reason: &str) {
        self.fail_open_requests.with_label_values(&[reason]).inc();
    }

    /// Record a geolocation lookup and its duration
    pub fn record_geo_lookup(&self, success: bool, duration_seconds: f64) {
        let result = if success { "success" } else { "failure" };
        self.geo_lookups.with_label_values(&[result]).inc();
        self.geo_lookup_duration.observe(duration_seconds);
    }

    /// Record a successful rules file load
    pub fn record_rules_load_success(&self) {
        self.rules_load_success.inc();
    }

    /// Record a failed rules file load
    pub fn record_rules_load_error(&self) {
        self.rules_load_error.inc();
    }

    /// Create a timer for measuring decision duration
    pub fn start_decision_timer(&self) -> prometheus::HistogramTimer {
        self.decision_duration.start_timer()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}
