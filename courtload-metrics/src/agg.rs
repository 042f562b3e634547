use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated values of one metric series, as reported at summary time.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValues {
    Trend {
        count: u64,
        min: Option<f64>,
        max: Option<f64>,
        avg: Option<f64>,
        p50: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
    },
    Counter {
        value: f64,
    },
    Gauge {
        value: f64,
    },
    Rate {
        total: u64,
        trues: u64,
        rate: Option<f64>,
    },
}

/// Distribution aggregate backed by an hdrhistogram.
///
/// Samples are scaled by 1000 before recording so sub-unit values (e.g.
/// fractional milliseconds) keep three digits of precision in the integer
/// histogram. Non-finite and non-positive samples are dropped.
#[derive(Debug)]
pub struct TrendAgg {
    count: AtomicU64,
    sum_scaled: AtomicU64,
    min_scaled: AtomicU64,
    max_scaled: AtomicU64,
    hist: Mutex<Histogram<u64>>,
}

const TREND_SCALE: f64 = 1000.0;

impl TrendAgg {
    pub(crate) fn new() -> Self {
        // Upper bound: 60s of milliseconds, scaled.
        let hist = Histogram::<u64>::new_with_bounds(1, 60_000_000_000, 3)
            .unwrap_or_else(|err| panic!("failed to init histogram: {err}"));
        Self {
            count: AtomicU64::new(0),
            sum_scaled: AtomicU64::new(0),
            min_scaled: AtomicU64::new(u64::MAX),
            max_scaled: AtomicU64::new(0),
            hist: Mutex::new(hist),
        }
    }

    pub(crate) fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let scaled = (value * TREND_SCALE).round();
        if scaled <= 0.0 {
            return;
        }
        let scaled = scaled as u64;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_scaled.fetch_add(scaled, Ordering::Relaxed);

        let mut cur = self.min_scaled.load(Ordering::Relaxed);
        while scaled < cur {
            match self.min_scaled.compare_exchange_weak(
                cur,
                scaled,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(v) => cur = v,
            }
        }

        let mut cur = self.max_scaled.load(Ordering::Relaxed);
        while scaled > cur {
            match self.max_scaled.compare_exchange_weak(
                cur,
                scaled,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(v) => cur = v,
            }
        }

        let mut h = self.hist.lock();
        let _ = h.record(scaled);
    }

    pub(crate) fn summarize(&self) -> MetricValues {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return MetricValues::Trend {
                count: 0,
                min: None,
                max: None,
                avg: None,
                p50: None,
                p90: None,
                p95: None,
                p99: None,
            };
        }

        let sum = self.sum_scaled.load(Ordering::Relaxed) as f64;
        let min = self.min_scaled.load(Ordering::Relaxed);
        let max = self.max_scaled.load(Ordering::Relaxed);

        let h = self.hist.lock();
        let unscale = |v: u64| v as f64 / TREND_SCALE;
        let (p50, p90, p95, p99) = if h.is_empty() {
            (None, None, None, None)
        } else {
            (
                Some(unscale(h.value_at_quantile(0.50))),
                Some(unscale(h.value_at_quantile(0.90))),
                Some(unscale(h.value_at_quantile(0.95))),
                Some(unscale(h.value_at_quantile(0.99))),
            )
        };

        MetricValues::Trend {
            count,
            min: Some(unscale(min)),
            max: Some(unscale(max)),
            avg: Some(sum / (count as f64) / TREND_SCALE),
            p50,
            p90,
            p95,
            p99,
        }
    }
}

/// Boolean-observation aggregate: fraction of `true` over total.
#[derive(Debug, Default)]
pub struct RateAgg {
    total: AtomicU64,
    trues: AtomicU64,
}

impl RateAgg {
    pub(crate) fn observe(&self, v: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if v {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn summarize(&self) -> MetricValues {
        let total = self.total.load(Ordering::Relaxed);
        let trues = self.trues.load(Ordering::Relaxed);
        let rate = if total == 0 {
            None
        } else {
            Some(trues as f64 / total as f64)
        };
        MetricValues::Rate { total, trues, rate }
    }
}

/// Mutex-guarded scalar used by counters (accumulating) and gauges (last write).
#[derive(Debug, Default)]
pub(crate) struct ScalarAgg {
    value: Mutex<f64>,
}

impl ScalarAgg {
    pub(crate) fn add(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        *self.value.lock() += v;
    }

    pub(crate) fn set(&self, v: f64) {
        if !v.is_finite() {
            return;
        }
        *self.value.lock() = v;
    }

    pub(crate) fn get(&self) -> f64 {
        *self.value.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_drops_non_positive_and_non_finite_samples() {
        let t = TrendAgg::new();
        t.record(f64::NAN);
        t.record(f64::INFINITY);
        t.record(0.0);
        t.record(-5.0);
        t.record(1.0);
        t.record(3.0);

        let MetricValues::Trend {
            count,
            min,
            max,
            avg,
            ..
        } = t.summarize()
        else {
            panic!("expected trend values");
        };
        assert_eq!(count, 2);
        assert_eq!(min, Some(1.0));
        assert_eq!(max, Some(3.0));
        assert_eq!(avg, Some(2.0));
    }

    #[test]
    fn trend_empty_reports_no_stats() {
        let t = TrendAgg::new();
        let MetricValues::Trend { count, p50, p99, .. } = t.summarize() else {
            panic!("expected trend values");
        };
        assert_eq!(count, 0);
        assert!(p50.is_none());
        assert!(p99.is_none());
    }

    #[test]
    fn rate_reports_trues_over_total() {
        let r = RateAgg::default();
        for _ in 0..3 {
            r.observe(true);
        }
        r.observe(false);

        let MetricValues::Rate { total, trues, rate } = r.summarize() else {
            panic!("expected rate values");
        };
        assert_eq!(total, 4);
        assert_eq!(trues, 3);
        assert_eq!(rate, Some(0.75));
    }

    #[test]
    fn counter_accumulates_n_increments() {
        let c = ScalarAgg::default();
        for _ in 0..10 {
            c.add(1.0);
        }
        assert_eq!(c.get(), 10.0);
    }
}
