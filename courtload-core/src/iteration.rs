use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;

use courtload_http::{HttpClient, HttpRequest, HttpTransportErrorKind};

use crate::checks::{Endpoint, ResponseView, evaluate_response};
use crate::profile::{LoadProfile, ModeWeights};
use crate::scenario::{MatchEventPayload, MatchScenario};
use crate::stats::{ApiCallMeta, RunStats};

/// How one iteration replays its generated match against the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// One consolidated result event carrying the terminal score.
    SingleResult,
    /// Only the start-of-game event, no score progression.
    NewGameOnly,
    /// Start-of-game followed by every incremental score event.
    StartPlusIncremental,
}

impl ReplayMode {
    /// Resolves a uniform roll in `[0, 1)` against the cumulative weights.
    #[must_use]
    pub fn pick(weights: ModeWeights, roll: f64) -> Self {
        if roll < weights.single_result {
            Self::SingleResult
        } else if roll < weights.single_result + weights.new_game_only {
            Self::NewGameOnly
        } else {
            Self::StartPlusIncremental
        }
    }

    fn pick_random(weights: ModeWeights) -> Self {
        Self::pick(weights, rand::thread_rng().r#gen::<f64>())
    }
}

/// Outcome of one call as observed by the generator, transport failures
/// included.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub status: Option<u16>,
    pub body: Bytes,
    pub content_type_present: bool,
    pub elapsed: Duration,
    pub transport_error: Option<HttpTransportErrorKind>,
}

/// Seam between the replay engine and the wire. The live implementation posts
/// to the scoring API; tests substitute scripted responses.
pub trait CallSink: Send + Sync {
    fn call(&self, endpoint: Endpoint, body: Bytes) -> impl Future<Output = CallResult> + Send;
}

/// Posts events to a running scoring API over HTTP.
#[derive(Debug, Clone)]
pub struct LiveSink {
    client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl LiveSink {
    pub fn new(client: HttpClient, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout,
        }
    }

    fn url_for(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint.path())
    }
}

impl CallSink for LiveSink {
    fn call(&self, endpoint: Endpoint, body: Bytes) -> impl Future<Output = CallResult> + Send {
        async move {
            let url = self.url_for(endpoint);
            let req = HttpRequest::post_json(&url, body).with_timeout(self.timeout);

            let started = Instant::now();
            match self.client.request(req).await {
                Ok(res) => {
                    let content_type_present =
                        res.headers.iter().any(|(name, _)| name == "content-type");
                    CallResult {
                        status: Some(res.status),
                        body: res.body,
                        content_type_present,
                        elapsed: started.elapsed(),
                        transport_error: None,
                    }
                }
                Err(err) => CallResult {
                    status: None,
                    body: Bytes::new(),
                    content_type_present: false,
                    elapsed: started.elapsed(),
                    transport_error: Some(err.transport_error_kind()),
                },
            }
        }
    }
}

/// The ordered calls a scenario produces under a replay mode. Simulate runs
/// log this plan; live runs send it.
#[must_use]
pub fn planned_calls(
    scenario: &MatchScenario,
    mode: ReplayMode,
) -> Vec<(Endpoint, MatchEventPayload)> {
    match mode {
        ReplayMode::SingleResult => {
            vec![(Endpoint::MatchResults, scenario.final_result_payload())]
        }
        ReplayMode::NewGameOnly => vec![(Endpoint::NewGame, scenario.new_game_payload())],
        ReplayMode::StartPlusIncremental => {
            let mut calls = vec![(Endpoint::NewGame, scenario.new_game_payload())];
            calls.extend(
                scenario
                    .point_payloads()
                    .map(|p| (Endpoint::UpdateScore, p)),
            );
            calls
        }
    }
}

/// Per-iteration inputs shared by every replay mode.
pub struct IterationContext<'a> {
    pub profile: &'a LoadProfile,
    pub stats: &'a RunStats,
    pub vu_id: u64,
    pub iteration: u64,
    /// When set, scenarios are generated and logged but nothing is sent.
    pub simulate: bool,
}

/// Generates one match scenario and replays it. Returns whether every call
/// passed its primary check.
pub async fn run_iteration<S: CallSink>(sink: &S, ctx: &IterationContext<'_>) -> bool {
    let started = Instant::now();

    let phase = ctx.profile.phase_of(ctx.vu_id, ctx.iteration);
    let scenario = MatchScenario::generate(ctx.profile.id_prefix, ctx.profile.include_players);
    let mode = ReplayMode::pick_random(ctx.profile.mode_weights);

    let tags: Vec<(String, String)> = vec![
        ("phase".to_string(), phase.label.to_string()),
        ("tournament".to_string(), scenario.tournament.clone()),
        ("match_type".to_string(), scenario.match_type.to_string()),
        ("game_number".to_string(), scenario.game_number.to_string()),
    ];

    let (ok, last_call) = if ctx.simulate {
        let calls = planned_calls(&scenario, mode);
        let last = scenario.final_score();
        tracing::info!(
            match_id = %scenario.id,
            teams = %format!("{} vs {}", scenario.team_a, scenario.team_b),
            score = %format!("{}-{}", last.a, last.b),
            winner = %scenario.winner,
            events = calls.len(),
            ?mode,
            "simulated match"
        );
        for (endpoint, payload) in &calls {
            tracing::debug!(
                %endpoint,
                score = %format!("{}-{}", payload.team_a_score, payload.team_b_score),
                "planned event"
            );
        }
        (true, None)
    } else {
        let outcome = replay(sink, ctx, &scenario, mode, &tags).await;
        ctx.stats.record_match_processing(started.elapsed(), &tags);
        (outcome.ok, outcome.last_call)
    };

    ctx.stats.record_iteration(started.elapsed());

    // Pace the next iteration off a clean pass; a failed match moves on
    // immediately. The stretch keys off the last observed call latency.
    if ok {
        let backoff = last_call.is_some_and(|d| d > ctx.profile.backoff_threshold);
        let think = think_duration(phase.think_min_ms, phase.think_max_ms, backoff);
        if !think.is_zero() {
            tokio::time::sleep(think).await;
        }
    }

    ok
}

struct ReplayOutcome {
    ok: bool,
    /// Latency of the last call that went out, as reported by the sink.
    last_call: Option<Duration>,
}

async fn replay<S: CallSink>(
    sink: &S,
    ctx: &IterationContext<'_>,
    scenario: &MatchScenario,
    mode: ReplayMode,
    tags: &[(String, String)],
) -> ReplayOutcome {
    let mut last_call = None;
    for (index, (endpoint, payload)) in planned_calls(scenario, mode).iter().enumerate() {
        // Pace the dependent score events, not the opening call.
        if index > 0 {
            let think = think_duration(
                ctx.profile.point_think_min_ms,
                ctx.profile.point_think_max_ms,
                false,
            );
            if !think.is_zero() {
                tokio::time::sleep(think).await;
            }
        }

        let (ok, elapsed) = send_event(sink, ctx.stats, *endpoint, payload, tags).await;
        last_call = Some(elapsed);
        if !ok {
            // Score N+1 is meaningless if score N was never accepted.
            tracing::warn!(
                match_id = %scenario.id,
                %endpoint,
                score = %format!("{}-{}", payload.team_a_score, payload.team_b_score),
                "event rejected, abandoning the rest of the match"
            );
            return ReplayOutcome {
                ok: false,
                last_call,
            };
        }
    }

    ReplayOutcome {
        ok: true,
        last_call,
    }
}

async fn send_event<S: CallSink>(
    sink: &S,
    stats: &RunStats,
    endpoint: Endpoint,
    payload: &MatchEventPayload,
    tags: &[(String, String)],
) -> (bool, Duration) {
    let body = match serde_json::to_vec(payload) {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            tracing::error!(%err, "failed to encode event payload");
            return (false, Duration::ZERO);
        }
    };

    let res = sink.call(endpoint, body).await;

    let report = evaluate_response(
        endpoint,
        ResponseView {
            status: res.status,
            body: &res.body,
            content_type_present: res.content_type_present,
            elapsed: res.elapsed,
        },
    );

    for (name, ok) in &report.outcomes {
        let handle = stats.check_handle(name);
        stats.record_check_handle(&handle, *ok);
    }

    stats.record_api_call(
        ApiCallMeta {
            endpoint,
            status: res.status,
            transport_error_kind: res.transport_error,
            elapsed: res.elapsed,
            body_len: res.body.len() as u64,
        },
        tags,
    );
    stats.record_primary_result(report.primary_ok, tags);

    if !report.primary_ok {
        let body_text = std::str::from_utf8(&res.body).unwrap_or("<non-utf8>");
        let snippet: String = body_text.chars().take(200).collect();
        tracing::debug!(
            %endpoint,
            match_id = %payload.id,
            status = ?res.status,
            transport_error = ?res.transport_error,
            body = %snippet,
            "call failed primary check"
        );
    }

    (report.primary_ok, res.elapsed)
}

fn think_duration(min_ms: u64, max_ms: u64, backoff: bool) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }

    let ms = if min_ms >= max_ms {
        min_ms
    } else {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    };
    let ms = if backoff { ms.saturating_add(ms / 2) } else { ms };
    Duration::from_millis(ms)
}
