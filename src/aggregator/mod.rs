/// Event store and rolling-window aggregator
pub mod metrics_aggregator;

pub use metrics_aggregator::MetricsAggregator;
