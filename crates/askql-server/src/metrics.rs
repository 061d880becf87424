//! Prometheus metrics for query tool calls

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("askql_requests_total", "Query requests by outcome"),
            &["outcome"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "askql_request_duration_seconds",
                "End-to-end query pipeline latency",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
        })
    }

    /// `outcome` is `completed` or a pipeline error kind.
    pub fn observe(&self, outcome: &str, elapsed: Duration) {
        self.requests.with_label_values(&[outcome]).inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
