use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;

use courtload_core::MetricValues;
use courtload_core::profile::LoadProfile;
use courtload_core::runner::{ProgressFn, ProgressUpdate, RunConfig, RunReport, ShapeProgress};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _profile: &LoadProfile, _cfg: &RunConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct JsonProgressLine {
    kind: &'static str,
    elapsed_secs: u64,
    profile: String,
    /// Current VU target (constant pool size, or the ramp's target now).
    vus: u64,

    requests_per_sec: f64,
    iterations_per_sec: f64,
    failed_requests_per_sec: f64,
    error_rate: f64,

    total_requests: u64,
    total_failed_requests: u64,
    total_iterations: u64,
    checks_failed_total: u64,

    latency_mean_ms: f64,
    latency_p50_ms: u64,
    latency_p90_ms: u64,
    latency_p99_ms: u64,
    latency_max_ms: u64,

    errors_now: BTreeMap<String, u64>,
}

fn current_vus(progress: &ShapeProgress) -> u64 {
    match progress {
        ShapeProgress::ConstantVus { vus, .. } => *vus,
        ShapeProgress::RampingVus { stage, .. } => {
            stage.as_ref().map(|s| s.current_target).unwrap_or(0)
        }
    }
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        elapsed_secs: u.elapsed.as_secs(),
        profile: u.profile.clone(),
        vus: current_vus(&u.progress),

        requests_per_sec: u.metrics.rps_now,
        iterations_per_sec: u.metrics.iterations_per_sec_now,
        failed_requests_per_sec: u.metrics.failed_rps_now,
        error_rate: u.metrics.error_rate_now,

        total_requests: u.metrics.requests_total,
        total_failed_requests: u.metrics.failed_requests_total,
        total_iterations: u.metrics.iterations_total,
        checks_failed_total: u.metrics.checks_failed_total,

        latency_mean_ms: u.metrics.latency_mean_ms,
        latency_p50_ms: u.metrics.latency_p50_ms,
        latency_p90_ms: u.metrics.latency_p90_ms,
        latency_p99_ms: u.metrics.latency_p99_ms,
        latency_max_ms: u.metrics.latency_max_ms,

        errors_now: u.metrics.errors_now.iter().map(|(k, v)| (k.clone(), *v)).collect(),
    }
}

#[derive(Debug, Serialize)]
struct JsonSummaryLine {
    kind: &'static str,
    healthy: bool,

    requests_total: u64,
    failed_requests_total: u64,
    iterations_total: u64,
    run_duration_ms: u64,
    rps: f64,

    checks_total: u64,
    checks_failed: u64,
    checks: BTreeMap<String, JsonCheck>,

    latency: Option<JsonLatency>,

    metrics: BTreeMap<String, serde_json::Value>,
    threshold_violations: Vec<JsonViolation>,
}

#[derive(Debug, Serialize)]
struct JsonCheck {
    total: u64,
    failed: u64,
}

#[derive(Debug, Serialize)]
struct JsonLatency {
    p50_ms: f64,
    p75_ms: f64,
    p90_ms: f64,
    p95_ms: f64,
    p99_ms: f64,
    mean_ms: f64,
    stdev_ms: f64,
    max_ms: u64,
}

#[derive(Debug, Serialize)]
struct JsonViolation {
    metric: String,
    expression: String,
    observed: Option<f64>,
}

fn metric_values_json(values: &MetricValues) -> serde_json::Value {
    match values {
        MetricValues::Counter { value } => serde_json::json!({ "count": value }),
        MetricValues::Gauge { value } => serde_json::json!({ "value": value }),
        MetricValues::Rate { total, trues, rate } => {
            serde_json::json!({ "total": total, "trues": trues, "rate": rate })
        }
        MetricValues::Trend {
            count,
            min,
            max,
            avg,
            p50,
            p90,
            p95,
            p99,
        } => serde_json::json!({
            "count": count,
            "min": min,
            "max": max,
            "avg": avg,
            "p50": p50,
            "p90": p90,
            "p95": p95,
            "p99": p99,
        }),
    }
}

fn build_summary_line(report: &RunReport) -> JsonSummaryLine {
    let s = &report.summary;

    let checks = s
        .checks_by_name
        .iter()
        .map(|c| {
            (
                c.name.clone(),
                JsonCheck {
                    total: c.total,
                    failed: c.failed,
                },
            )
        })
        .collect();

    let latency = s.latency_p50_ms.map(|p50| JsonLatency {
        p50_ms: p50,
        p75_ms: s.latency_p75_ms.unwrap_or(0.0),
        p90_ms: s.latency_p90_ms.unwrap_or(0.0),
        p95_ms: s.latency_p95_ms.unwrap_or(0.0),
        p99_ms: s.latency_p99_ms.unwrap_or(0.0),
        mean_ms: s.latency_mean_ms.unwrap_or(0.0),
        stdev_ms: s.latency_stdev_ms.unwrap_or(0.0),
        max_ms: s.latency_max_ms.unwrap_or(0),
    });

    let metrics = s
        .metrics
        .iter()
        .filter(|m| m.tags.is_empty())
        .map(|m| (m.name.clone(), metric_values_json(&m.values)))
        .collect();

    let threshold_violations = report
        .violations
        .iter()
        .map(|v| JsonViolation {
            metric: v.metric.clone(),
            expression: v.expression.clone(),
            observed: v.observed,
        })
        .collect();

    JsonSummaryLine {
        kind: "summary",
        healthy: report.healthy,
        requests_total: s.requests_total,
        failed_requests_total: s.failed_requests_total,
        iterations_total: s.iterations_total,
        run_duration_ms: s.run_duration_ms,
        rps: s.rps,
        checks_total: s.checks_total,
        checks_failed: s.checks_failed,
        checks,
        latency,
        metrics,
        threshold_violations,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courtload_core::stats::RunSummary;
    use serde_json::Value;

    fn empty_summary() -> RunSummary {
        RunSummary {
            requests_total: 12,
            failed_requests_total: 2,
            iterations_total: 4,
            checks_total: 36,
            checks_failed: 3,
            checks_by_name: vec![courtload_core::stats::CheckSummary {
                name: "status is 200".to_string(),
                total: 12,
                failed: 2,
            }],
            run_duration_ms: 2000,
            rps: 6.0,
            req_per_sec_avg: 6.0,
            req_per_sec_stdev: 0.0,
            req_per_sec_max: 6.0,
            req_per_sec_stdev_pct: 0.0,
            latency_p50_ms: Some(10.0),
            latency_p75_ms: Some(12.0),
            latency_p90_ms: Some(15.0),
            latency_p95_ms: Some(18.0),
            latency_p99_ms: Some(25.0),
            latency_mean_ms: Some(11.0),
            latency_stdev_ms: Some(2.0),
            latency_max_ms: Some(30),
            metrics: Vec::new(),
        }
    }

    #[test]
    fn summary_line_carries_quality_gates() {
        let report = RunReport {
            summary: empty_summary(),
            violations: vec![courtload_core::thresholds::ThresholdViolation {
                metric: "http_req_duration".to_string(),
                expression: "p(95)<500".to_string(),
                observed: Some(612.0),
            }],
            healthy: true,
        };

        let line = build_summary_line(&report);
        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };

        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("requests_total").and_then(Value::as_u64), Some(12));
        assert_eq!(
            v.pointer("/checks/status is 200/failed")
                .and_then(Value::as_u64),
            Some(2)
        );
        assert_eq!(
            v.pointer("/threshold_violations/0/metric")
                .and_then(Value::as_str),
            Some("http_req_duration")
        );
        assert_eq!(
            v.pointer("/latency/p50_ms").and_then(Value::as_f64),
            Some(10.0)
        );
    }
}
