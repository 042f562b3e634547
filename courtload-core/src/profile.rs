use std::time::Duration;

use crate::schedule::Stage;
use crate::thresholds::ThresholdSet;

/// Weighted choice between the three replay shapes of one iteration.
#[derive(Debug, Clone, Copy)]
pub struct ModeWeights {
    pub single_result: f64,
    pub new_game_only: f64,
    pub start_plus_incremental: f64,
}

impl ModeWeights {
    pub const SINGLE_RESULT_ONLY: Self = Self {
        single_result: 1.0,
        new_game_only: 0.0,
        start_plus_incremental: 0.0,
    };

    pub const INCREMENTAL_ONLY: Self = Self {
        single_result: 0.0,
        new_game_only: 0.0,
        start_plus_incremental: 1.0,
    };
}

/// One legacy phase bucket: iterations whose bucketed offset falls below
/// `until_secs` carry this label and think-time band.
#[derive(Debug, Clone, Copy)]
pub struct PhaseBand {
    pub label: &'static str,
    pub until_secs: u64,
    pub think_min_ms: u64,
    pub think_max_ms: u64,
}

/// A complete parameterized traffic shape: stage list, phase labeling,
/// pacing bands, replay-mode mix, and the pass/fail thresholds.
#[derive(Debug, Clone)]
pub struct LoadProfile {
    pub name: &'static str,
    pub id_prefix: &'static str,
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    pub phases: Vec<PhaseBand>,
    /// Multiplier applied to the iteration index in the legacy phase bucketing.
    pub phase_stride: u64,
    /// Divisor for the legacy phase bucketing. The original shapes bucket
    /// against a fixed window, which for `comprehensive` is 1560s even though
    /// its stages sum to 1580s.
    pub phase_window_secs: u64,
    /// Carry `player1`/`player2` names in the payloads.
    pub include_players: bool,
    /// Think time between incremental score events.
    pub point_think_min_ms: u64,
    pub point_think_max_ms: u64,
    /// Latency above which the next think time is stretched by 1.5x.
    pub backoff_threshold: Duration,
    pub mode_weights: ModeWeights,
    pub thresholds: Vec<ThresholdSet>,
}

impl LoadProfile {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "smoke" => Some(Self::smoke()),
            "load" => Some(Self::load()),
            "spike" => Some(Self::spike()),
            "soak" => Some(Self::soak()),
            "comprehensive" => Some(Self::comprehensive()),
            _ => None,
        }
    }

    pub fn total_secs(&self) -> u64 {
        self.stages.iter().map(|s| s.duration.as_secs()).sum()
    }

    /// Legacy phase bucketing carried over from the original traffic shapes:
    /// a cheap, reproducible segmentation derived from identities rather than
    /// wall-clock time.
    pub fn phase_of(&self, vu_id: u64, iteration: u64) -> PhaseBand {
        let total = self.phase_window_secs.max(1);
        let offset = vu_id
            .wrapping_add(iteration.wrapping_mul(self.phase_stride))
            % total;

        for band in &self.phases {
            if offset < band.until_secs {
                return *band;
            }
        }
        self.phases.last().copied().unwrap_or(PhaseBand {
            label: "steady",
            until_secs: u64::MAX,
            think_min_ms: 100,
            think_max_ms: 700,
        })
    }

    /// Short functional sanity run: a few users for a couple of minutes,
    /// mixed across all three endpoints.
    pub fn smoke() -> Self {
        Self {
            name: "smoke",
            id_prefix: "match",
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 5),
                Stage::new(Duration::from_secs(60), 5),
                Stage::new(Duration::from_secs(30), 0),
            ],
            phases: vec![PhaseBand {
                label: "steady",
                until_secs: u64::MAX,
                think_min_ms: 100,
                think_max_ms: 700,
            }],
            phase_stride: 10,
            phase_window_secs: 120,
            include_players: true,
            point_think_min_ms: 50,
            point_think_max_ms: 150,
            backoff_threshold: Duration::from_millis(1000),
            mode_weights: ModeWeights {
                single_result: 0.40,
                new_game_only: 0.25,
                start_plus_incremental: 0.35,
            },
            thresholds: vec![
                ThresholdSet::new(
                    "http_req_duration",
                    &["p(50)<200", "p(90)<500", "p(95)<800"],
                ),
                ThresholdSet::new("http_req_failed", &["rate<0.05"]),
                ThresholdSet::new("matches_sent", &["count>30"]),
                ThresholdSet::new("api_errors", &["rate<0.01"]),
                ThresholdSet::new("match_processing_duration", &["p(95)<1000"]),
            ],
        }
    }

    /// Stepwise ramp to 100 VUs, full match replay per iteration.
    pub fn load() -> Self {
        Self {
            name: "load",
            id_prefix: "match",
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(60), 10),
                Stage::new(Duration::from_secs(120), 25),
                Stage::new(Duration::from_secs(120), 50),
                Stage::new(Duration::from_secs(180), 75),
                Stage::new(Duration::from_secs(120), 100),
                Stage::new(Duration::from_secs(60), 50),
                Stage::new(Duration::from_secs(60), 0),
            ],
            phases: vec![PhaseBand {
                label: "steady",
                until_secs: u64::MAX,
                think_min_ms: 0,
                think_max_ms: 0,
            }],
            phase_stride: 10,
            phase_window_secs: 720,
            include_players: false,
            point_think_min_ms: 50,
            point_think_max_ms: 150,
            backoff_threshold: Duration::from_millis(1000),
            mode_weights: ModeWeights::INCREMENTAL_ONLY,
            thresholds: vec![
                ThresholdSet::new(
                    "http_req_duration",
                    &["p(50)<200", "p(90)<500", "p(95)<800"],
                ),
                ThresholdSet::new("http_req_failed", &["rate<0.05"]),
                ThresholdSet::new("api_errors", &["rate<0.01"]),
                ThresholdSet::new("matches_sent", &["count>500"]),
                ThresholdSet::new("match_processing_duration", &["p(95)<1000"]),
            ],
        }
    }

    /// Two traffic bursts with recovery periods in between.
    pub fn spike() -> Self {
        Self {
            name: "spike",
            id_prefix: "spike",
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 5),
                Stage::new(Duration::from_secs(15), 150),
                Stage::new(Duration::from_secs(60), 150),
                Stage::new(Duration::from_secs(15), 10),
                Stage::new(Duration::from_secs(30), 10),
                Stage::new(Duration::from_secs(10), 200),
                Stage::new(Duration::from_secs(45), 200),
                Stage::new(Duration::from_secs(30), 20),
                Stage::new(Duration::from_secs(30), 0),
            ],
            phases: vec![PhaseBand {
                label: "spike",
                until_secs: u64::MAX,
                think_min_ms: 50,
                think_max_ms: 200,
            }],
            phase_stride: 10,
            phase_window_secs: 265,
            include_players: false,
            point_think_min_ms: 50,
            point_think_max_ms: 150,
            backoff_threshold: Duration::from_millis(2000),
            mode_weights: ModeWeights::SINGLE_RESULT_ONLY,
            thresholds: vec![
                ThresholdSet::new("http_req_duration", &["p(90)<3000", "p(95)<5000"]),
                ThresholdSet::new("http_req_failed", &["rate<0.15"]),
            ],
        }
    }

    /// Hour-scale endurance run with a mid-test load increase.
    pub fn soak() -> Self {
        Self {
            name: "soak",
            id_prefix: "soak",
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(120), 5),
                Stage::new(Duration::from_secs(180), 15),
                Stage::new(Duration::from_secs(1800), 15),
                Stage::new(Duration::from_secs(180), 25),
                Stage::new(Duration::from_secs(600), 25),
                Stage::new(Duration::from_secs(180), 15),
                Stage::new(Duration::from_secs(300), 5),
                Stage::new(Duration::from_secs(120), 0),
            ],
            phases: vec![
                PhaseBand {
                    label: "ramp",
                    until_secs: 300,
                    think_min_ms: 1000,
                    think_max_ms: 5000,
                },
                PhaseBand {
                    label: "soak",
                    until_secs: 2100,
                    think_min_ms: 1000,
                    think_max_ms: 5000,
                },
                PhaseBand {
                    label: "increased",
                    until_secs: 2880,
                    think_min_ms: 1000,
                    think_max_ms: 4000,
                },
                PhaseBand {
                    label: "wind-down",
                    until_secs: u64::MAX,
                    think_min_ms: 1000,
                    think_max_ms: 5000,
                },
            ],
            phase_stride: 1,
            phase_window_secs: 58 * 60,
            include_players: false,
            point_think_min_ms: 50,
            point_think_max_ms: 150,
            backoff_threshold: Duration::from_millis(1000),
            mode_weights: ModeWeights::INCREMENTAL_ONLY,
            thresholds: vec![
                ThresholdSet::new(
                    "http_req_duration",
                    &["p(50)<300", "p(90)<800", "p(95)<1200"],
                ),
                ThresholdSet::new("http_req_failed", &["rate<0.01"]),
                ThresholdSet::new("checks", &["rate>0.95"]),
            ],
        }
    }

    /// 26-minute combined load/spike/endurance shape with phase-tagged metrics.
    pub fn comprehensive() -> Self {
        Self {
            name: "comprehensive",
            id_prefix: "perf",
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(60), 5),
                Stage::new(Duration::from_secs(120), 20),
                Stage::new(Duration::from_secs(180), 40),
                Stage::new(Duration::from_secs(300), 60),
                Stage::new(Duration::from_secs(30), 120),
                Stage::new(Duration::from_secs(120), 120),
                Stage::new(Duration::from_secs(30), 60),
                Stage::new(Duration::from_secs(480), 40),
                Stage::new(Duration::from_secs(20), 100),
                Stage::new(Duration::from_secs(60), 100),
                Stage::new(Duration::from_secs(120), 20),
                Stage::new(Duration::from_secs(60), 0),
            ],
            phases: vec![
                PhaseBand {
                    label: "warmup",
                    until_secs: 180,
                    think_min_ms: 1000,
                    think_max_ms: 3000,
                },
                PhaseBand {
                    label: "ramp",
                    until_secs: 480,
                    think_min_ms: 1000,
                    think_max_ms: 3000,
                },
                PhaseBand {
                    label: "sustained",
                    until_secs: 780,
                    think_min_ms: 500,
                    think_max_ms: 1500,
                },
                PhaseBand {
                    label: "spike",
                    until_secs: 960,
                    think_min_ms: 100,
                    think_max_ms: 300,
                },
                PhaseBand {
                    label: "endurance",
                    until_secs: 1440,
                    think_min_ms: 500,
                    think_max_ms: 1500,
                },
                PhaseBand {
                    label: "final-spike",
                    until_secs: 1500,
                    think_min_ms: 100,
                    think_max_ms: 300,
                },
                PhaseBand {
                    label: "cooldown",
                    until_secs: u64::MAX,
                    think_min_ms: 1000,
                    think_max_ms: 3000,
                },
            ],
            phase_stride: 10,
            // The original buckets phases against 26 minutes; the stage list
            // itself sums to 1580s.
            phase_window_secs: 26 * 60,
            include_players: false,
            point_think_min_ms: 50,
            point_think_max_ms: 150,
            backoff_threshold: Duration::from_millis(1000),
            mode_weights: ModeWeights::SINGLE_RESULT_ONLY,
            thresholds: vec![
                ThresholdSet::new(
                    "http_req_duration",
                    &["p(50)<250", "p(90)<600", "p(95)<1000", "p(99)<2000"],
                ),
                ThresholdSet::new("http_req_failed", &["rate<0.02"]),
                ThresholdSet::new("api_errors", &["rate<0.005"]),
                ThresholdSet::new("matches_sent", &["count>800"]),
                ThresholdSet::new("match_processing_duration", &["p(90)<800"]),
                ThresholdSet::new("api_response_size_bytes", &["p(95)<1000"]),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_bucketing_is_deterministic() {
        let p = LoadProfile::comprehensive();
        let a = p.phase_of(7, 42);
        let b = p.phase_of(7, 42);
        assert_eq!(a.label, b.label);
    }

    #[test]
    fn phase_boundaries_match_bucketed_offsets() {
        let p = LoadProfile::comprehensive();
        assert_eq!(p.total_secs(), 1580);
        assert_eq!(p.phase_window_secs, 26 * 60);

        // offset = (vu + iter*10) mod 1560
        assert_eq!(p.phase_of(0, 0).label, "warmup");
        assert_eq!(p.phase_of(179, 0).label, "warmup");
        assert_eq!(p.phase_of(180, 0).label, "ramp");
        assert_eq!(p.phase_of(0, 50).label, "sustained");
        assert_eq!(p.phase_of(0, 90).label, "spike");
        assert_eq!(p.phase_of(0, 145).label, "endurance");
        assert_eq!(p.phase_of(0, 145).think_min_ms, 500);
        assert_eq!(p.phase_of(1440, 0).label, "final-spike");
        assert_eq!(p.phase_of(1500, 0).label, "cooldown");
        // Offsets wrap at the phase window, not the stage sum.
        assert_eq!(p.phase_of(0, 156).label, "warmup");
        assert_eq!(p.phase_of(1559, 0).label, "cooldown");
    }

    #[test]
    fn builtin_profiles_resolve_by_name() {
        for name in ["smoke", "load", "spike", "soak", "comprehensive"] {
            let p = LoadProfile::by_name(name).unwrap_or_else(|| panic!("missing {name}"));
            assert_eq!(p.name, name);
            assert!(!p.stages.is_empty());
            assert!(!p.phases.is_empty());
        }
        assert!(LoadProfile::by_name("stress").is_none());
    }

    #[test]
    fn stage_totals_match_script_shapes() {
        assert_eq!(LoadProfile::smoke().total_secs(), 120);
        assert_eq!(LoadProfile::load().total_secs(), 12 * 60);
        assert_eq!(LoadProfile::spike().total_secs(), 265);
        assert_eq!(LoadProfile::soak().total_secs(), 58 * 60);
        assert_eq!(LoadProfile::comprehensive().total_secs(), 1580);
    }

    #[test]
    fn bucketing_window_matches_stage_sum_except_comprehensive() {
        for p in [
            LoadProfile::smoke(),
            LoadProfile::load(),
            LoadProfile::spike(),
            LoadProfile::soak(),
        ] {
            assert_eq!(p.phase_window_secs, p.total_secs(), "{}", p.name);
        }
        let p = LoadProfile::comprehensive();
        assert_eq!(p.phase_window_secs, 1560);
        assert_eq!(p.total_secs(), 1580);
    }
}
