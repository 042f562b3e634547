use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use url::Url;

use courtload_http::{HttpClient, HttpRequest};

use super::error::{Error, Result};
use super::gate::IterationGate;
use super::progress::{LiveMetrics, ProgressFn, ProgressUpdate, ShapeProgress, StageProgress};
use super::vu::{StartSignal, VuRuntime, VuWork, run_vu};
use crate::checks::{Endpoint, health_is_up};
use crate::iteration::{CallSink, LiveSink};
use crate::profile::LoadProfile;
use crate::schedule::RampingSchedule;
use crate::stats::{RunStats, RunSummary};
use crate::thresholds::{ThresholdViolation, evaluate_thresholds, validate_thresholds};

/// Command-line inputs layered on top of a profile. Any of `vus`,
/// `iterations`, or `duration` collapses the profile's ramp into a constant
/// VU run with that shape.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub simulate: bool,
    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
    pub request_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            simulate: false,
            vus: None,
            iterations: None,
            duration: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub violations: Vec<ThresholdViolation>,
    /// Outcome of the pre-flight health probe (always true when simulating).
    pub healthy: bool,
}

enum RunShape {
    Constant {
        vus: u64,
        gate: Arc<IterationGate>,
        duration: Option<Duration>,
    },
    Ramping {
        schedule: Arc<RampingSchedule>,
    },
}

fn resolve_shape(profile: &LoadProfile, cfg: &RunConfig) -> Result<RunShape> {
    let overridden = cfg.vus.is_some() || cfg.iterations.is_some() || cfg.duration.is_some();

    if overridden {
        let vus = cfg.vus.unwrap_or_else(|| profile.start_vus.max(1));
        if vus == 0 {
            return Err(Error::InvalidVus);
        }

        if cfg.iterations == Some(0) {
            return Err(Error::InvalidIterations);
        }

        // With neither bound set the gate admits a single pass.
        let iterations = cfg.iterations;
        let duration = cfg.duration;

        return Ok(RunShape::Constant {
            vus,
            gate: Arc::new(IterationGate::new(iterations, duration)),
            duration,
        });
    }

    if profile.stages.is_empty() {
        return Err(Error::InvalidStages);
    }

    let schedule = Arc::new(RampingSchedule::new(
        profile.start_vus,
        profile.stages.clone(),
    ));
    if schedule.max_target() == 0 {
        return Err(Error::InvalidVus);
    }

    Ok(RunShape::Ramping { schedule })
}

async fn probe_health(client: &HttpClient, base_url: &str, timeout: Duration) -> bool {
    let url = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        Endpoint::Health.path()
    );
    let req = HttpRequest::get(&url).with_timeout(timeout);

    match client.request(req).await {
        Ok(res) => {
            let up = health_is_up(res.status, &res.body);
            if !up {
                tracing::warn!(status = res.status, "health probe reports API down");
            }
            up
        }
        Err(err) => {
            tracing::warn!(%err, "health probe failed");
            false
        }
    }
}

/// Runs one profile to completion and reports the aggregate outcome.
pub async fn run_profile(
    profile: LoadProfile,
    cfg: RunConfig,
    progress: Option<ProgressFn>,
) -> Result<RunReport> {
    Url::parse(&cfg.base_url).map_err(|_| Error::InvalidBaseUrl(cfg.base_url.clone()))?;
    validate_thresholds(&profile.thresholds).map_err(Error::InvalidThreshold)?;

    let shape = resolve_shape(&profile, &cfg)?;

    let client = HttpClient::default();
    let healthy = if cfg.simulate {
        true
    } else {
        probe_health(&client, &cfg.base_url, cfg.request_timeout).await
    };

    let sink = Arc::new(LiveSink::new(client, cfg.base_url.clone(), cfg.request_timeout));
    drive(profile, cfg, shape, sink, healthy, progress).await
}

async fn drive<S: CallSink + 'static>(
    profile: LoadProfile,
    cfg: RunConfig,
    shape: RunShape,
    sink: Arc<S>,
    healthy: bool,
    progress: Option<ProgressFn>,
) -> Result<RunReport> {
    let profile = Arc::new(profile);
    let stats = Arc::new(RunStats::default());
    let start_signal = Arc::new(StartSignal::default());
    let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());

    let (total_vus, work, shape_info) = match &shape {
        RunShape::Constant {
            vus,
            gate,
            duration,
        } => (
            *vus,
            VuWork::Constant { gate: gate.clone() },
            ShapeInfo::Constant {
                vus: *vus,
                duration: *duration,
            },
        ),
        RunShape::Ramping { schedule } => (
            schedule.max_target(),
            VuWork::RampingVus {
                schedule: schedule.clone(),
            },
            ShapeInfo::Ramping {
                schedule: schedule.clone(),
            },
        ),
    };

    let mut handles = Vec::with_capacity(total_vus.min(usize::MAX as u64) as usize);
    for vu_id in 1..=total_vus {
        let rt = VuRuntime {
            vu_id,
            profile: profile.clone(),
            stats: stats.clone(),
            sink: sink.clone(),
            work: work.clone(),
            simulate: cfg.simulate,
            healthy,
            run_started: run_started.clone(),
            start_signal: start_signal.clone(),
        };
        handles.push(tokio::spawn(run_vu(rt)));
    }

    let started = Instant::now();
    let _ = run_started.set(started);
    if let RunShape::Constant { gate, .. } = &shape {
        gate.start_at(started);
    }
    start_signal.start();

    let progress_handle = progress.map(|progress| {
        let stats = stats.clone();
        let profile_name = profile.name.to_string();
        let shape_info = shape_info.clone();
        tokio::spawn(async move {
            ticker(started, stats, profile_name, shape_info, progress).await;
        })
    });

    for h in handles {
        h.await?;
    }

    if let Some(h) = progress_handle {
        h.abort();
        let _ = h.await;
    }

    let summary = stats.summarize(started.elapsed());
    // A simulated run produces no API samples to judge.
    let violations = if cfg.simulate {
        Vec::new()
    } else {
        evaluate_thresholds(&profile.thresholds, &summary.metrics)
            .map_err(Error::InvalidThreshold)?
    };

    Ok(RunReport {
        summary,
        violations,
        healthy,
    })
}

#[derive(Clone)]
enum ShapeInfo {
    Constant {
        vus: u64,
        duration: Option<Duration>,
    },
    Ramping {
        schedule: Arc<RampingSchedule>,
    },
}

async fn ticker(
    started: Instant,
    stats: Arc<RunStats>,
    profile_name: String,
    shape: ShapeInfo,
    progress: ProgressFn,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so deltas cover a full second.
    interval.tick().await;

    let mut tick_id: u64 = 0;
    let mut last_at = Instant::now();
    let mut last_requests_total = stats.requests_total();
    let mut last_failed_total = stats.failed_requests_total();
    let mut last_iterations_total = stats.iterations_total();
    let mut last_errors: HashMap<String, u64> = stats.errors_snapshot();

    loop {
        interval.tick().await;

        tick_id = tick_id.saturating_add(1);
        let now = Instant::now();
        let dt = now.duration_since(last_at).as_secs_f64().max(1e-9);
        last_at = now;
        let elapsed = started.elapsed();

        let requests_total = stats.requests_total();
        let delta_req = requests_total.saturating_sub(last_requests_total);
        last_requests_total = requests_total;
        let rps_now = (delta_req as f64) / dt;
        stats.record_rps_sample(rps_now);

        let failed_requests_total = stats.failed_requests_total();
        let delta_failed = failed_requests_total.saturating_sub(last_failed_total);
        last_failed_total = failed_requests_total;
        let failed_rps_now = (delta_failed as f64) / dt;
        let error_rate_now = if delta_req == 0 {
            0.0
        } else {
            (delta_failed as f64) / (delta_req as f64)
        };

        let iterations_total = stats.iterations_total();
        let delta_iters = iterations_total.saturating_sub(last_iterations_total);
        last_iterations_total = iterations_total;
        let iterations_per_sec_now = (delta_iters as f64) / dt;

        let errors_total = stats.errors_snapshot();
        let mut errors_now: HashMap<String, u64> = HashMap::new();
        for (key, total) in &errors_total {
            let prev = last_errors.get(key).copied().unwrap_or(0);
            let delta = total.saturating_sub(prev);
            if delta != 0 {
                errors_now.insert(key.clone(), delta);
            }
        }
        last_errors = errors_total;

        let (p50_now, p95_now) = stats.take_latency_window_ms();
        let latency = stats.latency_snapshot_ms();
        let (req_per_sec_avg, req_per_sec_stdev, req_per_sec_max, req_per_sec_stdev_pct) =
            stats.req_per_sec_summary();

        let metrics = LiveMetrics {
            rps_now,
            requests_total,
            failed_requests_total,
            checks_failed_total: stats.checks_failed_total(),
            iterations_total,
            iterations_per_sec_now,
            req_per_sec_avg,
            req_per_sec_stdev,
            req_per_sec_max,
            req_per_sec_stdev_pct,
            latency_mean_ms: latency.mean_ms,
            latency_stdev_ms: latency.stdev_ms,
            latency_max_ms: latency.max_ms,
            latency_p50_ms: latency.p50_ms,
            latency_p75_ms: latency.p75_ms,
            latency_p90_ms: latency.p90_ms,
            latency_p99_ms: latency.p99_ms,
            latency_p50_ms_now: p50_now,
            latency_p95_ms_now: p95_now,
            failed_rps_now,
            error_rate_now,
            errors_now,
        };

        let progress_val = match &shape {
            ShapeInfo::Constant { vus, duration } => ShapeProgress::ConstantVus {
                vus: *vus,
                duration: *duration,
            },
            ShapeInfo::Ramping { schedule } => {
                let stage = schedule.stage_snapshot_at(elapsed).map(|st| StageProgress {
                    stage: st.index + 1,
                    stages: st.count,
                    stage_elapsed: st.stage_elapsed,
                    stage_remaining: st.stage_remaining,
                    start_target: st.start_target,
                    end_target: st.end_target,
                    current_target: st.current_target,
                });
                ShapeProgress::RampingVus {
                    total_duration: schedule.total_duration(),
                    stage,
                }
            }
        };

        (progress)(ProgressUpdate {
            tick: tick_id,
            elapsed,
            profile: profile_name.clone(),
            metrics,
            progress: progress_val,
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::iteration::CallResult;
    use crate::profile::{ModeWeights, PhaseBand};
    use crate::schedule::Stage;
    use crate::thresholds::ThresholdSet;
    use bytes::Bytes;
    use std::future;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink {
        calls: AtomicU64,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
            }
        }
    }

    impl CallSink for CountingSink {
        fn call(
            &self,
            _endpoint: Endpoint,
            _body: Bytes,
        ) -> impl std::future::Future<Output = CallResult> + Send {
            self.calls.fetch_add(1, Ordering::Relaxed);
            future::ready(CallResult {
                status: Some(200),
                body: Bytes::from_static(b"{\"message\":\"sent to Kafka\"}"),
                content_type_present: true,
                elapsed: Duration::from_millis(2),
                transport_error: None,
            })
        }
    }

    fn quick_profile() -> LoadProfile {
        LoadProfile {
            name: "test",
            id_prefix: "test",
            start_vus: 1,
            stages: vec![Stage::new(Duration::from_secs(1), 2)],
            phases: vec![PhaseBand {
                label: "steady",
                until_secs: u64::MAX,
                think_min_ms: 0,
                think_max_ms: 0,
            }],
            phase_stride: 1,
            phase_window_secs: 1,
            include_players: false,
            point_think_min_ms: 0,
            point_think_max_ms: 0,
            backoff_threshold: Duration::from_secs(60),
            mode_weights: ModeWeights::SINGLE_RESULT_ONLY,
            thresholds: vec![ThresholdSet::new("http_req_failed", &["rate<0.5"])],
        }
    }

    #[tokio::test]
    async fn iteration_budget_is_split_across_vus() {
        let profile = quick_profile();
        let cfg = RunConfig {
            vus: Some(2),
            iterations: Some(6),
            ..RunConfig::default()
        };
        let shape = resolve_shape(&profile, &cfg).unwrap();
        let sink = Arc::new(CountingSink::new());

        let report = drive(profile, cfg, shape, sink.clone(), true, None)
            .await
            .unwrap();

        assert_eq!(report.summary.iterations_total, 6);
        assert_eq!(sink.calls.load(Ordering::Relaxed), 6);
        assert!(report.violations.is_empty());
        assert!(report.healthy);
    }

    #[tokio::test]
    async fn unhealthy_run_sends_nothing() {
        let profile = quick_profile();
        let cfg = RunConfig {
            vus: Some(1),
            iterations: Some(2),
            ..RunConfig::default()
        };
        let shape = resolve_shape(&profile, &cfg).unwrap();
        let sink = Arc::new(CountingSink::new());

        let report = drive(profile, cfg, shape, sink.clone(), false, None)
            .await
            .unwrap();

        assert!(!report.healthy);
        assert_eq!(sink.calls.load(Ordering::Relaxed), 0);
        assert_eq!(report.summary.requests_total, 0);
    }

    #[tokio::test]
    async fn failing_threshold_is_reported() {
        let mut profile = quick_profile();
        profile.thresholds = vec![ThresholdSet::new("http_req_failed", &["rate<0.0001"])];
        // A rate of exactly 0 passes; force one failure.
        let cfg = RunConfig {
            vus: Some(1),
            iterations: Some(1),
            ..RunConfig::default()
        };
        let shape = resolve_shape(&profile, &cfg).unwrap();

        struct FailingSink;
        impl CallSink for FailingSink {
            fn call(
                &self,
                _endpoint: Endpoint,
                _body: Bytes,
            ) -> impl std::future::Future<Output = CallResult> + Send {
                future::ready(CallResult {
                    status: Some(500),
                    body: Bytes::from_static(b"oops"),
                    content_type_present: false,
                    elapsed: Duration::from_millis(2),
                    transport_error: None,
                })
            }
        }

        let report = drive(profile, cfg, shape, Arc::new(FailingSink), true, None)
            .await
            .unwrap();

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].metric, "http_req_failed");
    }

    #[tokio::test]
    async fn simulate_skips_threshold_evaluation() {
        let mut profile = quick_profile();
        profile.thresholds = vec![ThresholdSet::new("http_req_duration", &["p(95)<1"])];
        let cfg = RunConfig {
            simulate: true,
            vus: Some(1),
            iterations: Some(1),
            ..RunConfig::default()
        };
        let shape = resolve_shape(&profile, &cfg).unwrap();
        let sink = Arc::new(CountingSink::new());

        let report = drive(profile, cfg, shape, sink.clone(), true, None)
            .await
            .unwrap();

        assert!(report.violations.is_empty());
        assert_eq!(sink.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn cli_overrides_collapse_ramping_to_constant() {
        let profile = quick_profile();
        let cfg = RunConfig {
            duration: Some(Duration::from_secs(5)),
            ..RunConfig::default()
        };
        match resolve_shape(&profile, &cfg) {
            Ok(RunShape::Constant { vus, .. }) => assert_eq!(vus, 1),
            _ => panic!("expected constant shape"),
        }
    }

    #[test]
    fn zero_iterations_is_rejected() {
        let profile = quick_profile();
        let cfg = RunConfig {
            iterations: Some(0),
            ..RunConfig::default()
        };
        assert!(matches!(
            resolve_shape(&profile, &cfg),
            Err(Error::InvalidIterations)
        ));
    }
}
