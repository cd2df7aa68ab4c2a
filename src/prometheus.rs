//! Prometheus metric sink backed by `prometheus-client`.

use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use crate::metrics::{EvictionReason, MetricSink};
use crate::state::State;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DomainLabels {
    domain: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct TransitionLabels {
    domain: String,
    from: String,
    to: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CallLabels {
    domain: String,
    outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EvictionLabels {
    domain: String,
    reason: String,
}

fn call_duration_histogram() -> Histogram {
    // 1ms .. ~32s
    Histogram::new(exponential_buckets(0.001, 2.0, 16))
}

/// A [`MetricSink`] exporting breaker and pool events as Prometheus metrics.
#[derive(Debug, Clone)]
pub struct PrometheusMetricSink {
    transitions: Family<TransitionLabels, Counter>,
    calls: Family<CallLabels, Counter>,
    call_duration: Family<DomainLabels, Histogram>,
    rejections: Family<DomainLabels, Counter>,
    evictions: Family<EvictionLabels, Counter>,
}

impl PrometheusMetricSink {
    /// Creates the metric families and registers them under `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let sink = Self {
            transitions: Family::default(),
            calls: Family::default(),
            call_duration: Family::new_with_constructor(call_duration_histogram),
            rejections: Family::default(),
            evictions: Family::default(),
        };

        registry.register(
            "breaker_state_transitions",
            "Circuit breaker state changes",
            sink.transitions.clone(),
        );
        registry.register(
            "breaker_calls",
            "Operations run through a circuit breaker",
            sink.calls.clone(),
        );
        registry.register(
            "breaker_call_duration_seconds",
            "Duration of operations run through a circuit breaker",
            sink.call_duration.clone(),
        );
        registry.register(
            "breaker_rejections",
            "Calls rejected by an open circuit",
            sink.rejections.clone(),
        );
        registry.register(
            "breaker_pool_evictions",
            "Breakers removed from the pool",
            sink.evictions.clone(),
        );

        sink
    }
}

impl MetricSink for PrometheusMetricSink {
    fn record_state_transition(&self, domain: &str, from: State, to: State) {
        self.transitions
            .get_or_create(&TransitionLabels {
                domain: domain.to_owned(),
                from: from.as_str().to_owned(),
                to: to.as_str().to_owned(),
            })
            .inc();
    }

    fn record_call(&self, domain: &str, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.calls
            .get_or_create(&CallLabels {
                domain: domain.to_owned(),
                outcome: outcome.to_owned(),
            })
            .inc();
        self.call_duration
            .get_or_create(&DomainLabels {
                domain: domain.to_owned(),
            })
            .observe(duration.as_secs_f64());
    }

    fn record_rejection(&self, domain: &str) {
        self.rejections
            .get_or_create(&DomainLabels {
                domain: domain.to_owned(),
            })
            .inc();
    }

    fn record_eviction(&self, domain: &str, reason: EvictionReason) {
        self.evictions
            .get_or_create(&EvictionLabels {
                domain: domain.to_owned(),
                reason: reason.as_str().to_owned(),
            })
            .inc();
    }
}
