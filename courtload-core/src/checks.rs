use std::time::Duration;

/// Scoring-API endpoint reached by one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Endpoint {
    NewGame,
    UpdateScore,
    MatchResults,
    Health,
}

impl Endpoint {
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::NewGame => "/api/new-game",
            Self::UpdateScore => "/api/update-score",
            Self::MatchResults => "/api/match-results",
            Self::Health => "/actuator/health",
        }
    }

    /// Per-endpoint counter metric, following the original dashboards.
    #[must_use]
    pub fn counter_metric(self) -> Option<&'static str> {
        match self {
            Self::NewGame => Some("new_games_sent"),
            Self::UpdateScore => Some("score_updates_sent"),
            Self::MatchResults => Some("matches_sent"),
            Self::Health => None,
        }
    }

    fn status_ok(self, status: u16) -> bool {
        // The API answers 201 on accepted incremental score events.
        status == 200 || (self == Self::UpdateScore && status == 201)
    }
}

/// The success marker the API embeds in every accepted-dispatch body.
const SUCCESS_MARKER: &str = "Kafka";

/// Per-response observation handed to the check set. A transport failure
/// leaves `status` unset, which fails every status-derived predicate.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'a> {
    pub status: Option<u16>,
    pub body: &'a [u8],
    pub content_type_present: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Expected status AND body success marker. Failing this aborts a
    /// dependent sequence and increments the error rate.
    pub primary_ok: bool,
    pub outcomes: Vec<(&'static str, bool)>,
}

/// Evaluates the full assertion set against one response. Every predicate is
/// recorded independently; only the primary one decides the call's fate.
#[must_use]
pub fn evaluate_response(endpoint: Endpoint, res: ResponseView<'_>) -> CheckReport {
    let status_ok = res.status.is_some_and(|s| endpoint.status_ok(s));
    let body_text = std::str::from_utf8(res.body).unwrap_or("");
    let marker_ok = body_text.contains(SUCCESS_MARKER);
    let elapsed_ms = res.elapsed.as_millis();

    let status_name = if endpoint == Endpoint::UpdateScore {
        "status is 200/201"
    } else {
        "status is 200"
    };

    let outcomes = vec![
        (status_name, status_ok),
        ("body confirms dispatch", marker_ok),
        ("response time < 500ms", elapsed_ms < 500),
        ("response time < 1000ms", elapsed_ms < 1000),
        ("response time < 2000ms", elapsed_ms < 2000),
        ("has content-type header", res.content_type_present),
        ("body not empty", !res.body.is_empty()),
        (
            "no server errors",
            res.status.is_some_and(|s| s < 500),
        ),
        ("response size reasonable", res.body.len() < 1000),
    ];

    CheckReport {
        primary_ok: status_ok && marker_ok,
        outcomes,
    }
}

/// The pre-flight probe succeeds when the health endpoint reports `"UP"`.
#[must_use]
pub fn health_is_up(status: u16, body: &[u8]) -> bool {
    if status != 200 {
        return false;
    }

    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(v) => v.get("status").and_then(|s| s.as_str()) == Some("UP"),
        Err(_) => std::str::from_utf8(body).unwrap_or("").contains("UP"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(status: Option<u16>, body: &[u8], elapsed_ms: u64) -> ResponseView<'_> {
        ResponseView {
            status,
            body,
            content_type_present: true,
            elapsed: Duration::from_millis(elapsed_ms),
        }
    }

    #[test]
    fn primary_requires_status_and_marker() {
        let ok = evaluate_response(
            Endpoint::MatchResults,
            view(Some(200), b"Match result sent to Kafka", 50),
        );
        assert!(ok.primary_ok);

        let wrong_status = evaluate_response(
            Endpoint::MatchResults,
            view(Some(500), b"Match result sent to Kafka", 50),
        );
        assert!(!wrong_status.primary_ok);

        let wrong_body =
            evaluate_response(Endpoint::MatchResults, view(Some(200), b"accepted", 50));
        assert!(!wrong_body.primary_ok);
    }

    #[test]
    fn update_score_accepts_created() {
        let report =
            evaluate_response(Endpoint::UpdateScore, view(Some(201), b"Kafka queued", 50));
        assert!(report.primary_ok);

        let new_game = evaluate_response(Endpoint::NewGame, view(Some(201), b"Kafka queued", 50));
        assert!(!new_game.primary_ok);
    }

    #[test]
    fn transport_failure_fails_status_predicates() {
        let report = evaluate_response(
            Endpoint::NewGame,
            ResponseView {
                status: None,
                body: b"",
                content_type_present: false,
                elapsed: Duration::from_millis(3000),
            },
        );
        assert!(!report.primary_ok);
        for (name, ok) in &report.outcomes {
            if *name == "response size reasonable" {
                continue;
            }
            assert!(!ok, "{name} unexpectedly passed");
        }
    }

    #[test]
    fn endpoint_paths_and_counters() {
        assert_eq!(Endpoint::NewGame.path(), "/api/new-game");
        assert_eq!(Endpoint::MatchResults.counter_metric(), Some("matches_sent"));
        assert_eq!(Endpoint::Health.counter_metric(), None);
        assert_eq!(Endpoint::UpdateScore.to_string(), "update-score");
    }

    #[test]
    fn health_probe_parses_actuator_body() {
        assert!(health_is_up(200, br#"{"status":"UP"}"#));
        assert!(!health_is_up(200, br#"{"status":"DOWN"}"#));
        assert!(!health_is_up(503, br#"{"status":"UP"}"#));
        assert!(health_is_up(200, b"UP"));
    }
}
