use std::{net::IpAddr, sync::Arc, time::Instant};
use tracing::debug;

use crate::{
    config::{Rule, RuleSet},
    geo::GeoResolver,
    metrics::Metrics,
    store::ClientStateStore,
};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject,
}

/// Main decider that coordinates geolocation, rule lookup and counter state
///
/// Every failure path degrades to `Decision::Admit`; the boundary never sees
/// an error from here.
pub struct RateLimitDecider {
    rules: RuleSet,
    geo: Arc<dyn GeoResolver>,
    store: ClientStateStore,
    metrics: Arc<Metrics>,
}

impl RateLimitDecider {
    pub fn new(
        rules: RuleSet,
        geo: Arc<dyn GeoResolver>,
        store: ClientStateStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            rules,
            geo,
            store,
            metrics,
        }
    }

    /// Decide whether the request for `path` from `addr` is admitted
    pub async fn decide(&self, path: &str, addr: IpAddr) -> Decision {
        let timer = self.metrics.start_decision_timer();

        let lookup_start = Instant::now();
        let country = self.geo.resolve(addr).await;
        self.metrics
            .record_geo_lookup(country.is_some(), lookup_start.elapsed().as_secs_f64());

        let Some(country) = country else {
            debug!(%addr, "No country resolved, admitting without rate limit");
            self.metrics.record_fail_open("no_country");
            return Decision::Admit;
        };

        let Some(rule) = self.rules.find_rule(&country) else {
            debug!(%addr, country = %country, "No rule for country, admitting without rate limit");
            self.metrics.record_fail_open("no_rule");
            return Decision::Admit;
        };

        self.metrics.record_total_request(&country);

        let key = client_key(path, addr);
        let decision = self.check_counter(&key, rule).await;

        match decision {
            Decision::Admit => self.metrics.record_admitted(&country),
            Decision::Reject => {
                debug!(%addr, country = %country, path, "Rate limit exceeded");
                self.metrics.record_rejected(&country);
            }
        }

        drop(timer);
        decision
    }

    /// Run the counter state machine for one key under its per-key lock
    ///
    /// The lock serializes concurrent read-modify-write sequences on the same
    /// key, so M concurrent requests against a budget of N admit exactly N.
    async fn check_counter(&self, key: &str, rule: &Rule) -> Decision {
        let handle = self.store.entry(key, rule.window()).await;
        let mut state = handle.state.lock().await;
        let now = Instant::now();

        if state.is_fresh() {
            state.admitted_count = 1;
            state.last_admission = now;
        } else {
            let window_expired = now >= state.last_admission + rule.window();

            if !window_expired && state.admitted_count == rule.max_requests {
                // Exhausted: reject without touching the state
                return Decision::Reject;
            }

            // Reset only happens when the window expired at the cap;
            // otherwise the count keeps climbing toward it.
            if state.admitted_count == rule.max_requests {
                state.admitted_count = 1;
            } else {
                state.admitted_count += 1;
            }
            state.last_admission = now;
        }

        drop(state);
        // Slide the entry's TTL forward from this admission
        self.store.touch(key, handle).await;
        Decision::Admit
    }
}

/// Cache key: route path and client address, so the same address is limited
/// independently per endpoint
pub fn client_key(path: &str, addr: IpAddr) -> String {
    format!("{}_{}", path, addr)
}
