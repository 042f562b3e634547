use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::agg::{MetricValues, RateAgg, ScalarAgg, TrendAgg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValues,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagSet(Arc<[(Arc<str>, Arc<str>)]>);

impl Hash for TagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (k, v) in self.0.iter() {
            k.hash(state);
            v.hash(state);
        }
    }
}

// Tag order must not split series: normalize by sorting on key then value.
fn normalize_tags(tags: &[(String, String)]) -> TagSet {
    if tags.is_empty() {
        return TagSet(Arc::from([]));
    }

    let mut v: Vec<(Arc<str>, Arc<str>)> = tags
        .iter()
        .map(|(k, v)| (Arc::<str>::from(k.as_str()), Arc::<str>::from(v.as_str())))
        .collect();
    v.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    TagSet(Arc::from(v.into_boxed_slice()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    kind: MetricKind,
    name: Arc<str>,
    tags: TagSet,
}

#[derive(Debug)]
enum MetricStore {
    Counter(ScalarAgg),
    Gauge(ScalarAgg),
    Rate(RateAgg),
    Trend(TrendAgg),
}

impl MetricStore {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(ScalarAgg::default()),
            MetricKind::Gauge => Self::Gauge(ScalarAgg::default()),
            MetricKind::Rate => Self::Rate(RateAgg::default()),
            MetricKind::Trend => Self::Trend(TrendAgg::new()),
        }
    }
}

/// One metric series (name + kind + normalized tag set).
#[derive(Debug)]
pub struct Metric {
    kind: MetricKind,
    name: Arc<str>,
    tags: TagSet,
    store: MetricStore,
}

impl Metric {
    fn new(kind: MetricKind, name: Arc<str>, tags: TagSet) -> Self {
        Self {
            kind,
            name,
            tags,
            store: MetricStore::new(kind),
        }
    }

    /// Record a numeric sample. Counters accumulate, gauges take the last
    /// value, trends feed the histogram. Rates ignore numeric samples;
    /// use [`Metric::add_bool`].
    pub fn add(&self, value: f64) {
        match &self.store {
            MetricStore::Counter(c) => c.add(value),
            MetricStore::Gauge(g) => g.set(value),
            MetricStore::Trend(t) => t.record(value),
            MetricStore::Rate(_) => {}
        }
    }

    /// Record a boolean observation. Only meaningful for rate metrics.
    pub fn add_bool(&self, value: bool) {
        if let MetricStore::Rate(r) = &self.store {
            r.observe(value);
        }
    }

    fn summarize(&self) -> MetricSeriesSummary {
        let tags: Vec<(String, String)> = self
            .tags
            .0
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let values = match &self.store {
            MetricStore::Counter(c) => MetricValues::Counter { value: c.get() },
            MetricStore::Gauge(g) => MetricValues::Gauge { value: g.get() },
            MetricStore::Rate(r) => r.summarize(),
            MetricStore::Trend(t) => t.summarize(),
        };

        MetricSeriesSummary {
            name: self.name.to_string(),
            kind: self.kind,
            tags,
            values,
        }
    }
}

/// Writer handle for one metric: records into the untagged base series and,
/// when tags are supplied, into the matching tagged sub-series as well.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    registry: Arc<MetricsRegistry>,
    base: Arc<Metric>,
}

impl MetricHandle {
    pub fn add(&self, value: f64) {
        self.base.add(value);
    }

    pub fn add_with_tags(&self, value: f64, tags: &[(String, String)]) {
        self.base.add(value);
        if tags.is_empty() {
            return;
        }
        self.registry
            .series(self.base.kind, &self.base.name, tags)
            .add(value);
    }

    pub fn add_bool(&self, value: bool) {
        self.base.add_bool(value);
    }

    pub fn add_bool_with_tags(&self, value: bool, tags: &[(String, String)]) {
        self.base.add_bool(value);
        if tags.is_empty() {
            return;
        }
        self.registry
            .series(self.base.kind, &self.base.name, tags)
            .add_bool(value);
    }

    pub fn kind(&self) -> MetricKind {
        self.base.kind
    }
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    series: Mutex<HashMap<SeriesKey, Arc<Metric>>>,
}

impl MetricsRegistry {
    /// Handle bound to the untagged base series of `name`.
    pub fn handle(self: &Arc<Self>, kind: MetricKind, name: &str) -> MetricHandle {
        let base = self.series(kind, name, &[]);
        MetricHandle {
            registry: self.clone(),
            base,
        }
    }

    pub fn series(
        self: &Arc<Self>,
        kind: MetricKind,
        name: &str,
        tags: &[(String, String)],
    ) -> Arc<Metric> {
        let name: Arc<str> = Arc::from(name);
        let tags = normalize_tags(tags);
        let key = SeriesKey {
            kind,
            name: name.clone(),
            tags: tags.clone(),
        };

        let mut map = self.series.lock();
        if let Some(existing) = map.get(&key) {
            return existing.clone();
        }

        let metric = Arc::new(Metric::new(kind, name, tags));
        map.insert(key, metric.clone());
        metric
    }

    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let map = self.series.lock();
        let mut out: Vec<MetricSeriesSummary> = map.values().map(|m| m.summarize()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_order_does_not_split_series() {
        let metrics = Arc::new(MetricsRegistry::default());

        let a = metrics.series(
            MetricKind::Counter,
            "m",
            &[
                ("phase".to_string(), "spike".to_string()),
                ("game_number".to_string(), "2".to_string()),
            ],
        );
        let b = metrics.series(
            MetricKind::Counter,
            "m",
            &[
                ("game_number".to_string(), "2".to_string()),
                ("phase".to_string(), "spike".to_string()),
            ],
        );

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn counter_reports_exact_sum_after_n_increments() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Counter, "matches_sent");
        for _ in 0..25 {
            h.add(1.0);
        }

        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "matches_sent" && s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing counter summary"));
        assert_eq!(s.values, MetricValues::Counter { value: 25.0 });
    }

    #[test]
    fn rate_reports_k_over_n() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Rate, "api_errors");
        for i in 0..10 {
            h.add_bool(i < 3);
        }

        let summary = metrics.summarize();
        let s = summary
            .iter()
            .find(|s| s.name == "api_errors")
            .unwrap_or_else(|| panic!("missing rate summary"));
        let MetricValues::Rate { total, trues, rate } = s.values else {
            panic!("expected rate values");
        };
        assert_eq!((total, trues), (10, 3));
        assert_eq!(rate, Some(0.3));
    }

    #[test]
    fn tagged_writes_feed_both_base_and_sub_series() {
        let metrics = Arc::new(MetricsRegistry::default());
        let h = metrics.handle(MetricKind::Counter, "http_reqs");

        h.add_with_tags(1.0, &[("phase".to_string(), "warmup".to_string())]);
        h.add_with_tags(1.0, &[("phase".to_string(), "spike".to_string())]);
        h.add(1.0);

        let summary = metrics.summarize();
        let base = summary
            .iter()
            .find(|s| s.name == "http_reqs" && s.tags.is_empty())
            .unwrap_or_else(|| panic!("missing base series"));
        assert_eq!(base.values, MetricValues::Counter { value: 3.0 });

        let spike = summary
            .iter()
            .find(|s| s.tags == vec![("phase".to_string(), "spike".to_string())])
            .unwrap_or_else(|| panic!("missing tagged series"));
        assert_eq!(spike.values, MetricValues::Counter { value: 1.0 });
    }
}
