//! Prometheus-style metric primitives and the delivery-pipeline registry
//! named in spec §6.1/§10.4: `events_received_total`,
//! `deliveries_succeeded_total`, `deliveries_failed_total`,
//! `retry_attempts_total`, and the `delivery_latency_seconds` histogram.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time value that can move up or down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn inc(&self) {
        let current = f64::from_bits(self.value.load(Ordering::Relaxed));
        self.set(current + 1.0);
    }

    pub fn dec(&self) {
        let current = f64::from_bits(self.value.load(Ordering::Relaxed));
        self.set(current - 1.0);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Cumulative histogram with fixed buckets, bucket boundaries inclusive.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<f64>,
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let bucket_counts = (0..buckets.len() + 1).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            bucket_counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let mut idx = self.buckets.len();
        for (i, &bucket) in self.buckets.iter().enumerate() {
            if value <= bucket {
                idx = i;
                break;
            }
        }
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);

        loop {
            let current = self.sum.load(Ordering::Relaxed);
            let new_value = (f64::from_bits(current) + value).to_bits();
            if self
                .sum
                .compare_exchange(current, new_value, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        f64::from_bits(self.sum.load(Ordering::Relaxed))
    }

    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        self.buckets
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, self.bucket_counts[i].load(Ordering::Relaxed)))
            .collect()
    }
}

pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// The delivery pipeline's named metric registry (spec §6.1, §10.4).
pub struct DeliveryMetrics {
    pub events_received_total: Counter,
    pub deliveries_succeeded_total: Counter,
    pub deliveries_failed_total: Counter,
    pub retry_attempts_total: Counter,
    pub delivery_latency_seconds: Histogram,
    pub workers_in_flight: Gauge,
    pub stale_claim_reclaims_total: Counter,
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self {
            events_received_total: Counter::new(),
            deliveries_succeeded_total: Counter::new(),
            deliveries_failed_total: Counter::new(),
            retry_attempts_total: Counter::new(),
            delivery_latency_seconds: Histogram::new(vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
            ]),
            workers_in_flight: Gauge::new(),
            stale_claim_reclaims_total: Counter::new(),
        }
    }
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# TYPE events_received_total counter\n");
        out.push_str(&format!(
            "events_received_total {}\n",
            self.events_received_total.get()
        ));

        out.push_str("# TYPE deliveries_succeeded_total counter\n");
        out.push_str(&format!(
            "deliveries_succeeded_total {}\n",
            self.deliveries_succeeded_total.get()
        ));

        out.push_str("# TYPE deliveries_failed_total counter\n");
        out.push_str(&format!(
            "deliveries_failed_total {}\n",
            self.deliveries_failed_total.get()
        ));

        out.push_str("# TYPE retry_attempts_total counter\n");
        out.push_str(&format!(
            "retry_attempts_total {}\n",
            self.retry_attempts_total.get()
        ));

        out.push_str("# TYPE workers_in_flight gauge\n");
        out.push_str(&format!(
            "workers_in_flight {}\n",
            self.workers_in_flight.get()
        ));

        out.push_str("# TYPE stale_claim_reclaims_total counter\n");
        out.push_str(&format!(
            "stale_claim_reclaims_total {}\n",
            self.stale_claim_reclaims_total.get()
        ));

        out.push_str("# TYPE delivery_latency_seconds histogram\n");
        let mut cumulative = 0u64;
        for (bound, count) in self.delivery_latency_seconds.get_buckets() {
            cumulative += count;
            out.push_str(&format!(
                "delivery_latency_seconds_bucket{{le=\"{}\"}} {}\n",
                bound, cumulative
            ));
        }
        cumulative += self
            .delivery_latency_seconds
            .get_buckets()
            .last()
            .map(|_| 0)
            .unwrap_or(0);
        out.push_str(&format!(
            "delivery_latency_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.delivery_latency_seconds.get_count()
        ));
        out.push_str(&format!(
            "delivery_latency_seconds_sum {}\n",
            self.delivery_latency_seconds.get_sum()
        ));
        out.push_str(&format!(
            "delivery_latency_seconds_count {}\n",
            self.delivery_latency_seconds.get_count()
        ));

        let _ = cumulative;
        out
    }
}

/// Handle shared across the intake and worker paths.
pub type MetricsHandle = std::sync::Arc<DeliveryMetrics>;
