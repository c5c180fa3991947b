use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Proxy call metrics. When disabled nothing is allocated and every record
/// call returns immediately.
pub struct ProxyMetrics {
    registry: Option<Registry>,
    calls_total: Option<IntCounterVec>,
    downstream_failures_total: Option<IntCounterVec>,
    call_duration: Option<HistogramVec>,
}

impl ProxyMetrics {
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new();

        let calls_total = IntCounterVec::new(
            Opts::new("calls_total", "Relayed calls by target, status and cache hit")
                .namespace("hermes"),
            &["target", "status", "cached"],
        )?;

        let downstream_failures_total = IntCounterVec::new(
            Opts::new("downstream_failures_total", "Failed downstream calls by kind")
                .namespace("hermes"),
            &["target", "kind"],
        )?;

        let call_duration = HistogramVec::new(
            HistogramOpts::new("call_duration_seconds", "End-to-end call latency")
                .namespace("hermes")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
            &["target"],
        )?;

        registry.register(Box::new(calls_total.clone()))?;
        registry.register(Box::new(downstream_failures_total.clone()))?;
        registry.register(Box::new(call_duration.clone()))?;

        Ok(Self {
            registry: Some(registry),
            calls_total: Some(calls_total),
            downstream_failures_total: Some(downstream_failures_total),
            call_duration: Some(call_duration),
        })
    }

    pub fn disabled() -> Self {
        Self {
            registry: None,
            calls_total: None,
            downstream_failures_total: None,
            call_duration: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.registry.is_some()
    }

    #[inline]
    pub fn record_call(&self, target: &str, status: u16, cached: bool, duration_secs: f64) {
        if let Some(ref counter) = self.calls_total {
            let mut buf = itoa::Buffer::new();
            let status = buf.format(status);
            let cached = if cached { "true" } else { "false" };
            counter.with_label_values(&[target, status, cached]).inc();
        }
        if let Some(ref hist) = self.call_duration {
            hist.with_label_values(&[target]).observe(duration_secs);
        }
    }

    #[inline]
    pub fn record_failure(&self, target: &str, kind: &str) {
        if let Some(ref counter) = self.downstream_failures_total {
            counter.with_label_values(&[target, kind]).inc();
        }
    }

    /// Prometheus text exposition; empty when disabled.
    pub fn render(&self) -> String {
        let Some(ref registry) = self.registry else {
            return String::new();
        };
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer).unwrap_or(());
        String::from_utf8(buffer).unwrap_or_default()
    }
}
