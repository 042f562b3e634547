use rand::Rng;
use serde::Serialize;

/// Hard score cap; a game ends outright when either side reaches it.
pub const SCORE_CAP: u32 = 30;

const TEAM_POOL: &[&str] = &[
    "Malaysia",
    "Indonesia",
    "China",
    "Japan",
    "Denmark",
    "Taiwan",
    "Thailand",
    "India",
    "Korea",
    "England",
    "Singapore",
    "Vietnam",
];

const PLAYER_POOL: &[&str] = &[
    "Lin Dan",
    "Lee Chong Wei",
    "Viktor Axelsen",
    "Kento Momota",
    "Chen Long",
    "Anthony Ginting",
    "Anders Antonsen",
    "Chou Tien Chen",
    "Shi Yuqi",
    "Ng Ka Long",
    "Kidambi Srikanth",
    "Lakshya Sen",
];

const TOURNAMENT_POOL: &[&str] = &[
    "Thomas Cup 2024",
    "Uber Cup 2024",
    "BWF World Championships",
    "All England Open",
    "Indonesia Masters",
    "Malaysia Open",
];

const ROUND_POOL: &[&str] = &[
    "Group Stage",
    "Round of 16",
    "Quarter Final",
    "Semi Final",
    "Final",
];

/// Points needed to win the given game (before deuce extensions).
#[must_use]
pub fn score_ceiling(game_number: u32) -> u32 {
    if game_number == 3 { 15 } else { 21 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScorePair {
    pub a: u32,
    pub b: u32,
}

impl ScorePair {
    fn is_terminal(self, ceiling: u32) -> bool {
        let max = self.a.max(self.b);
        let margin = self.a.abs_diff(self.b);
        (max >= ceiling && margin >= 2) || self.a == SCORE_CAP || self.b == SCORE_CAP
    }
}

/// Rough intensity classification of a finished game, used only as a metric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    Decisive,
    Close,
    Deuce,
}

/// One wire event sent to the scoring API. Field names follow the API's JSON schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEventPayload {
    pub id: String,
    pub team_a: String,
    pub team_b: String,
    pub team_a_score: u32,
    pub team_b_score: u32,
    pub winner: String,
    pub match_date_time: String,
    pub game_number: u32,
    pub tournament: String,
    pub round: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player2: Option<String>,
}

/// A fully simulated badminton game: identity, the complete point-by-point
/// score progression, and the resolved winner. Immutable once generated;
/// each iteration owns its own instance.
#[derive(Debug, Clone)]
pub struct MatchScenario {
    pub id: String,
    pub team_a: String,
    pub team_b: String,
    pub tournament: String,
    pub round: String,
    /// Representative players, present only in the profiles that send them.
    pub players: Option<(String, String)>,
    pub game_number: u32,
    pub sequence: Vec<ScorePair>,
    pub winner: String,
    pub match_date_time: String,
    pub match_type: MatchType,
}

impl MatchScenario {
    /// Generates a fresh scenario with a uniformly random game number (1..=3).
    #[must_use]
    pub fn generate(id_prefix: &str, include_players: bool) -> Self {
        let game_number = rand::thread_rng().gen_range(1..=3);
        Self::generate_with_game(id_prefix, game_number, include_players)
    }

    #[must_use]
    pub fn generate_with_game(id_prefix: &str, game_number: u32, include_players: bool) -> Self {
        let mut rng = rand::thread_rng();

        let team_a = TEAM_POOL[rng.gen_range(0..TEAM_POOL.len())].to_string();
        let mut team_b = TEAM_POOL[rng.gen_range(0..TEAM_POOL.len())].to_string();
        while team_b == team_a {
            team_b = TEAM_POOL[rng.gen_range(0..TEAM_POOL.len())].to_string();
        }

        let tournament = TOURNAMENT_POOL[rng.gen_range(0..TOURNAMENT_POOL.len())].to_string();
        let round = ROUND_POOL[rng.gen_range(0..ROUND_POOL.len())].to_string();

        let players = include_players.then(|| {
            let player1 = PLAYER_POOL[rng.gen_range(0..PLAYER_POOL.len())].to_string();
            let mut player2 = PLAYER_POOL[rng.gen_range(0..PLAYER_POOL.len())].to_string();
            while player2 == player1 {
                player2 = PLAYER_POOL[rng.gen_range(0..PLAYER_POOL.len())].to_string();
            }
            (player1, player2)
        });

        let sequence = simulate_game_sequence(&mut rng, game_number);
        let last = sequence[sequence.len() - 1];
        let winner = if last.a > last.b {
            team_a.clone()
        } else {
            team_b.clone()
        };

        let now = chrono::Utc::now();
        let id = format!(
            "{id_prefix}-{}-{}",
            now.timestamp_millis(),
            rng.gen_range(0..10_000)
        );

        // The API parses this as a LocalDateTime: no trailing zone marker.
        let match_date_time = now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let match_type = classify(last, score_ceiling(game_number));

        Self {
            id,
            team_a,
            team_b,
            tournament,
            round,
            players,
            game_number,
            sequence,
            winner,
            match_date_time,
            match_type,
        }
    }

    fn payload(&self, score: ScorePair, winner: &str) -> MatchEventPayload {
        MatchEventPayload {
            id: self.id.clone(),
            team_a: self.team_a.clone(),
            team_b: self.team_b.clone(),
            team_a_score: score.a,
            team_b_score: score.b,
            winner: winner.to_string(),
            match_date_time: self.match_date_time.clone(),
            game_number: self.game_number,
            tournament: self.tournament.clone(),
            round: self.round.clone(),
            player1: self.players.as_ref().map(|(p, _)| p.clone()),
            player2: self.players.as_ref().map(|(_, p)| p.clone()),
        }
    }

    /// Start-of-game event: scores forced to 0-0, no winner.
    #[must_use]
    pub fn new_game_payload(&self) -> MatchEventPayload {
        self.payload(ScorePair { a: 0, b: 0 }, "")
    }

    /// Incremental score event for `sequence[index]`. The winner is populated
    /// only on the final snapshot.
    #[must_use]
    pub fn point_payload(&self, index: usize) -> MatchEventPayload {
        let is_last = index == self.sequence.len() - 1;
        let winner = if is_last { self.winner.as_str() } else { "" };
        self.payload(self.sequence[index], winner)
    }

    /// Single consolidated result event with the terminal score.
    #[must_use]
    pub fn final_result_payload(&self) -> MatchEventPayload {
        let last = self.sequence[self.sequence.len() - 1];
        self.payload(last, &self.winner)
    }

    /// Incremental payloads in sequence order, skipping the initial 0-0 snapshot.
    pub fn point_payloads(&self) -> impl Iterator<Item = MatchEventPayload> + '_ {
        (1..self.sequence.len()).map(|i| self.point_payload(i))
    }

    #[must_use]
    pub fn final_score(&self) -> ScorePair {
        self.sequence[self.sequence.len() - 1]
    }
}

fn simulate_game_sequence(rng: &mut impl Rng, game_number: u32) -> Vec<ScorePair> {
    let ceiling = score_ceiling(game_number);

    // Random per-game bias keeps the rally outcomes from flip-flopping symmetrically.
    let bias: f64 = rng.gen_range(0.4..=0.6);

    let mut score = ScorePair { a: 0, b: 0 };
    let mut sequence = vec![score];

    loop {
        if rng.r#gen::<f64>() < bias {
            score.a += 1;
        } else {
            score.b += 1;
        }
        sequence.push(score);

        if score.is_terminal(ceiling) {
            return sequence;
        }
    }
}

fn classify(last: ScorePair, ceiling: u32) -> MatchType {
    let max = last.a.max(last.b);
    let margin = last.a.abs_diff(last.b);
    if max > ceiling {
        MatchType::Deuce
    } else if margin <= 3 {
        MatchType::Close
    } else {
        MatchType::Decisive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_start_at_zero_zero_and_strictly_progress() {
        for _ in 0..200 {
            let s = MatchScenario::generate("match", false);
            assert_eq!(s.sequence[0], ScorePair { a: 0, b: 0 });
            for pair in s.sequence.windows(2) {
                assert_eq!(pair[1].a + pair[1].b, pair[0].a + pair[0].b + 1);
            }
            assert!(s.sequence.len() <= (2 * SCORE_CAP + 1) as usize);
        }
    }

    #[test]
    fn terminal_pair_satisfies_termination_predicate() {
        for _ in 0..200 {
            let s = MatchScenario::generate("match", false);
            let ceiling = score_ceiling(s.game_number);
            let last = s.final_score();
            let max = last.a.max(last.b);
            let margin = last.a.abs_diff(last.b);
            assert!(
                (max >= ceiling && margin >= 2) || last.a == SCORE_CAP || last.b == SCORE_CAP,
                "non-terminal final pair {last:?} for game {}",
                s.game_number
            );
            // No intermediate snapshot may already be terminal.
            for pair in &s.sequence[..s.sequence.len() - 1] {
                assert!(!pair.is_terminal(ceiling), "early terminal pair {pair:?}");
            }
        }
    }

    #[test]
    fn ceiling_is_fifteen_only_for_game_three() {
        assert_eq!(score_ceiling(1), 21);
        assert_eq!(score_ceiling(2), 21);
        assert_eq!(score_ceiling(3), 15);
    }

    #[test]
    fn winner_matches_higher_final_score() {
        for _ in 0..200 {
            let s = MatchScenario::generate("match", false);
            let last = s.final_score();
            assert_ne!(last.a, last.b, "tied final score");
            if last.a > last.b {
                assert_eq!(s.winner, s.team_a);
            } else {
                assert_eq!(s.winner, s.team_b);
            }
        }
    }

    #[test]
    fn teams_are_distinct() {
        for _ in 0..200 {
            let s = MatchScenario::generate("match", false);
            assert_ne!(s.team_a, s.team_b);
        }
    }

    #[test]
    fn cap_ends_game_without_margin() {
        let pair = ScorePair { a: 29, b: 29 };
        assert!(!pair.is_terminal(21));
        let pair = ScorePair { a: 30, b: 29 };
        assert!(pair.is_terminal(21));
    }

    #[test]
    fn payload_views_share_identity() {
        let s = MatchScenario::generate_with_game("perf", 3, false);

        let start = s.new_game_payload();
        assert_eq!(start.team_a_score, 0);
        assert_eq!(start.team_b_score, 0);
        assert_eq!(start.winner, "");

        let last_index = s.sequence.len() - 1;
        let last = s.point_payload(last_index);
        assert_eq!(last.winner, s.winner);
        assert_eq!(last, s.final_result_payload());

        for (i, p) in s.point_payloads().enumerate() {
            assert_eq!(p.id, s.id);
            assert_eq!(p.game_number, 3);
            if i + 1 < last_index {
                assert_eq!(p.winner, "");
            }
        }
    }

    #[test]
    fn payload_serializes_camel_case_without_zone_marker() {
        let s = MatchScenario::generate("match", false);
        let json = serde_json::to_value(s.new_game_payload()).unwrap_or_default();
        assert!(json.get("teamAScore").is_some());
        assert!(json.get("matchDateTime").is_some());
        let ts = json["matchDateTime"].as_str().unwrap_or_default();
        assert!(!ts.ends_with('Z'), "timestamp must not carry a zone marker");
    }

    #[test]
    fn players_serialize_only_when_requested() {
        let with = MatchScenario::generate("match", true);
        let (p1, p2) = with.players.clone().unwrap_or_default();
        assert!(PLAYER_POOL.contains(&p1.as_str()));
        assert!(PLAYER_POOL.contains(&p2.as_str()));
        assert_ne!(p1, p2);

        let json = serde_json::to_value(with.final_result_payload()).unwrap_or_default();
        assert_eq!(json["player1"].as_str(), Some(p1.as_str()));
        assert_eq!(json["player2"].as_str(), Some(p2.as_str()));

        let without = MatchScenario::generate("match", false);
        let json = serde_json::to_value(without.new_game_payload()).unwrap_or_default();
        assert!(json.get("player1").is_none());
        assert!(json.get("player2").is_none());
    }

    #[test]
    fn id_carries_prefix() {
        let s = MatchScenario::generate("spike", false);
        assert!(s.id.starts_with("spike-"));
    }
}
