#![forbid(unsafe_code)]

//! Core engine for generating badminton scoring traffic.
//!
//! A [`profile::LoadProfile`] describes a traffic shape; the [`runner`]
//! drives a pool of virtual users through it, each iteration synthesizing a
//! rule-valid match via [`scenario`] and replaying it against the scoring
//! API through [`iteration`].

pub mod checks;
pub mod iteration;
pub mod profile;
pub mod runner;
pub mod scenario;
pub mod schedule;
pub mod stats;
pub mod thresholds;

pub use courtload_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};
pub use courtload_metrics::{MetricKind, MetricSeriesSummary, MetricValues, MetricsRegistry};
