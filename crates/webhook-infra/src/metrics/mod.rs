pub mod prometheus;

pub use prometheus::{Counter, DeliveryMetrics, Gauge, Histogram, MetricsHandle};
