use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use courtload_core::MetricValues;
use courtload_core::profile::LoadProfile;
use courtload_core::runner::{ProgressFn, RunConfig, RunReport, ShapeProgress};
use courtload_core::stats::RunSummary;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, profile: &LoadProfile, cfg: &RunConfig) {
        println!("profile: {}", profile.name);
        println!("target: {}", cfg.base_url);

        let overridden = cfg.vus.is_some() || cfg.iterations.is_some() || cfg.duration.is_some();
        if overridden {
            println!(
                "shape: constant vus={} iterations={:?} duration={:?}",
                cfg.vus.unwrap_or_else(|| profile.start_vus.max(1)),
                cfg.iterations,
                cfg.duration,
            );
        } else {
            let total = profile.total_secs();
            let max = profile
                .stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(profile.start_vus);
            println!(
                "shape: ramping stages={} total={} max_vus={max}",
                profile.stages.len(),
                format_duration(Duration::from_secs(total)),
            );
        }
        if cfg.simulate {
            println!("mode: simulate (no requests will be sent)");
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();

        Some(Arc::new(move |u| {
            let rates = format!(
                " iters/s={} rps={} errors={}/{}",
                format_rate(u.metrics.iterations_per_sec_now),
                format_rate(u.metrics.rps_now),
                format_rate(u.metrics.failed_rps_now),
                u.metrics
                    .failed_requests_total
                    .saturating_add(u.metrics.checks_failed_total),
            );

            let (total_duration, message) = match &u.progress {
                ShapeProgress::ConstantVus { vus, duration } => (
                    *duration,
                    format!("vus={vus} elapsed={}{}", format_duration(u.elapsed), rates),
                ),
                ShapeProgress::RampingVus {
                    total_duration,
                    stage,
                } => {
                    let msg = if let Some(stage) = stage {
                        format!(
                            "stage={}/{} target={} elapsed={} stage_remaining={}{}",
                            stage.stage,
                            stage.stages,
                            stage.current_target,
                            format_duration(u.elapsed),
                            format_duration(stage.stage_remaining),
                            rates
                        )
                    } else {
                        format!("elapsed={}{}", format_duration(u.elapsed), rates)
                    };
                    (Some(*total_duration), msg)
                }
            };

            progress.update(&u.profile, total_duration, u.elapsed, message);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        if !report.violations.is_empty() {
            eprintln!("thresholds failed:");
            for v in &report.violations {
                match v.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs:.4})", v.metric, v.expression),
                    None => eprintln!("  {}: {} (missing series)", v.metric, v.expression),
                }
            }
        }

        Ok(())
    }
}

enum BarKind {
    Bar,
    Spinner,
}

struct HumanProgress {
    inner: Mutex<Option<(BarKind, ProgressBar)>>,
}

impl HumanProgress {
    fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    fn update(&self, prefix: &str, total_duration: Option<Duration>, elapsed: Duration, message: String) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let wants_bar = total_duration.is_some();
        let recreate = match inner.as_ref() {
            None => true,
            Some((BarKind::Bar, _)) => !wants_bar,
            Some((BarKind::Spinner, _)) => wants_bar,
        };

        if recreate {
            if let Some((_, old)) = inner.take() {
                old.finish_and_clear();
            }

            let pb = if wants_bar {
                let pb = ProgressBar::new(0);
                pb.set_style(bar_style());
                pb
            } else {
                let pb = ProgressBar::new_spinner();
                pb.set_style(spinner_style());
                pb
            };
            pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
            pb.set_prefix(prefix.to_string());
            *inner = Some((
                if wants_bar {
                    BarKind::Bar
                } else {
                    BarKind::Spinner
                },
                pb,
            ));
        }

        if let Some((kind, pb)) = inner.as_ref() {
            pb.set_message(message);
            match (kind, total_duration) {
                (BarKind::Bar, Some(total)) => {
                    let total_ms = total.as_millis() as u64;
                    let elapsed_ms = elapsed.as_millis() as u64;
                    pb.set_length(total_ms);
                    pb.set_position(elapsed_ms.min(total_ms));
                }
                _ => pb.tick(),
            }
        }
    }

    fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((_, pb)) = inner.take() {
            pb.finish_and_clear();
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn render(report: &RunReport) -> String {
    let s = &report.summary;
    let mut out = String::new();

    out.push_str("summary\n");
    if !report.healthy {
        out.push_str("  health: API was DOWN, no load was generated\n");
    }
    writeln!(
        &mut out,
        "  requests: {} (failed {})",
        s.requests_total, s.failed_requests_total
    )
    .ok();
    writeln!(&mut out, "  iterations: {}", s.iterations_total).ok();
    writeln!(
        &mut out,
        "  duration: {}",
        format_duration(Duration::from_millis(s.run_duration_ms))
    )
    .ok();
    writeln!(
        &mut out,
        "  rates: rps={} (avg={} stdev={} max={})",
        format_rate(s.rps),
        format_rate(s.req_per_sec_avg),
        format_rate(s.req_per_sec_stdev),
        format_rate(s.req_per_sec_max),
    )
    .ok();

    match (s.latency_p50_ms, s.latency_p90_ms, s.latency_p99_ms) {
        (Some(p50), Some(p90), Some(p99)) => {
            writeln!(
                &mut out,
                "  latency = p50={} p90={} p99={} mean={} max={}",
                format_ms(p50),
                format_ms(p90),
                format_ms(p99),
                format_ms(s.latency_mean_ms.unwrap_or(0.0)),
                format_ms(s.latency_max_ms.unwrap_or(0) as f64),
            )
            .ok();
        }
        _ => out.push_str("  latency: n/a\n"),
    }

    render_checks(s, &mut out);
    render_metrics(s, &mut out);

    out
}

fn render_checks(s: &RunSummary, out: &mut String) {
    if s.checks_total == 0 {
        return;
    }

    writeln!(
        out,
        "\nchecks: {} total, {} failed",
        s.checks_total, s.checks_failed
    )
    .ok();

    for check in &s.checks_by_name {
        let mark = if check.failed == 0 { "✓" } else { "✗" };
        let passed = check.total.saturating_sub(check.failed);
        writeln!(out, "  {mark} {}: {passed}/{}", check.name, check.total).ok();
    }
}

fn render_metrics(s: &RunSummary, out: &mut String) {
    let mut base: Vec<_> = s.metrics.iter().filter(|m| m.tags.is_empty()).collect();
    if base.is_empty() {
        return;
    }
    base.sort_by(|a, b| a.name.cmp(&b.name));

    out.push_str("\nmetrics\n");
    for m in base {
        match &m.values {
            MetricValues::Counter { value } => {
                writeln!(out, "  {}: {}", m.name, *value as u64).ok();
            }
            MetricValues::Gauge { value } => {
                writeln!(out, "  {}: {value:.2}", m.name).ok();
            }
            MetricValues::Rate { total, trues, rate } => {
                let pct = rate.map(|r| r * 100.0).unwrap_or(0.0);
                writeln!(out, "  {}: {pct:.2}% ({trues}/{total})", m.name).ok();
            }
            MetricValues::Trend {
                count,
                avg,
                p50,
                p95,
                p99,
                max,
                ..
            } => {
                writeln!(
                    out,
                    "  {}: avg={} p50={} p95={} p99={} max={} (n={count})",
                    m.name,
                    format_ms(avg.unwrap_or(0.0)),
                    format_ms(p50.unwrap_or(0.0)),
                    format_ms(p95.unwrap_or(0.0)),
                    format_ms(p99.unwrap_or(0.0)),
                    format_ms(max.unwrap_or(0.0)),
                )
                .ok();
            }
        }
    }
}

fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

fn format_ms(v: f64) -> String {
    if v >= 1000.0 {
        format!("{:.2}s", v / 1000.0)
    } else {
        format!("{v:.1}ms")
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        return format!("{}h{}m", secs / 3600, (secs % 3600) / 60);
    }
    if secs >= 60 {
        return format!("{}m{}s", secs / 60, secs % 60);
    }
    if secs > 0 {
        return format!("{secs}s");
    }
    format!("{}ms", d.as_millis())
}
