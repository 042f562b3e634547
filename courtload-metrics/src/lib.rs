#![forbid(unsafe_code)]

//! Tagged run-time metrics for load generation.
//!
//! A [`MetricsRegistry`] owns every metric series produced during a run.
//! Writers hold cheap [`MetricHandle`]s and record through atomics or a
//! short-lived mutex; the registry is only walked once, at summary time.

mod agg;
mod registry;

pub use agg::{MetricValues, RateAgg, TrendAgg};
pub use registry::{
    Metric, MetricHandle, MetricKind, MetricSeriesSummary, MetricsRegistry,
};
