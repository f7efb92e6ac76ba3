use std::collections::HashMap;

use crate::state::{ids::PlayerId, roster::Player};

/// Points awarded for any correct answer.
pub const BASE_POINTS: i64 = 100;
/// Points awarded per speed bonus step.
pub const BONUS_STEP_POINTS: i64 = 50;

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name at snapshot time.
    pub name: String,
    /// Cumulative score.
    pub score: i64,
}

/// Cumulative per-player scores for a session.
#[derive(Debug, Clone, Default)]
pub struct ScoreBoard {
    scores: HashMap<PlayerId, i64>,
}

impl ScoreBoard {
    /// Create an empty scoreboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Score of `id`, zero when unknown.
    pub fn score(&self, id: &PlayerId) -> i64 {
        self.scores.get(id).copied().unwrap_or(0)
    }

    /// Overwrite the score of `id`.
    pub fn set_score(&mut self, id: &PlayerId, value: i64) {
        self.scores.insert(id.clone(), value);
    }

    /// Add `delta` (possibly negative) to the score of `id` and return the new total.
    pub fn add_points(&mut self, id: &PlayerId, delta: i64) -> i64 {
        let entry = self.scores.entry(id.clone()).or_insert(0);
        *entry += delta;
        *entry
    }

    /// Points earned by one answer.
    ///
    /// Correct answers earn [`BASE_POINTS`] plus [`BONUS_STEP_POINTS`] per bonus step:
    /// two steps when more than 80% of the time limit remained, one step above 60%.
    pub fn compute_answer_points(is_correct: bool, response_time_ms: u64, time_limit_ms: u64) -> i64 {
        if !is_correct {
            return 0;
        }

        let remaining = u128::from(time_limit_ms.saturating_sub(response_time_ms));
        let limit = u128::from(time_limit_ms);
        let bonus = if limit == 0 {
            0
        } else if remaining * 5 > limit * 4 {
            2
        } else if remaining * 5 > limit * 3 {
            1
        } else {
            0
        };

        BASE_POINTS + bonus * BONUS_STEP_POINTS
    }

    /// Ranked rows for `players` with a positive score.
    ///
    /// Sorted by descending score; ties keep the order of `players`.
    pub fn snapshot_leaderboard(&self, players: &[Player]) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<LeaderboardEntry> = players
            .iter()
            .filter_map(|player| {
                let score = self.score(&player.id);
                (score > 0).then(|| LeaderboardEntry {
                    id: player.id.clone(),
                    name: player.name.clone(),
                    score,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.score.cmp(&a.score));
        rows
    }

    /// First `n` rows of [`ScoreBoard::snapshot_leaderboard`].
    pub fn top_n(&self, players: &[Player], n: usize) -> Vec<LeaderboardEntry> {
        let mut rows = self.snapshot_leaderboard(players);
        rows.truncate(n);
        rows
    }

    /// Every known score, in no particular order.
    pub fn scores(&self) -> impl Iterator<Item = (&PlayerId, i64)> {
        self.scores.iter().map(|(id, score)| (id, *score))
    }

    /// Forget every score.
    pub fn reset(&mut self) {
        self.scores.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_points_follow_speed_thresholds() {
        assert_eq!(ScoreBoard::compute_answer_points(true, 1_000, 10_000), 200);
        assert_eq!(ScoreBoard::compute_answer_points(true, 3_000, 10_000), 150);
        assert_eq!(ScoreBoard::compute_answer_points(true, 7_000, 10_000), 100);
        assert_eq!(ScoreBoard::compute_answer_points(false, 0, 10_000), 0);
    }

    #[test]
    fn answer_points_thresholds_are_strict() {
        // exactly 80% remaining only reaches the lower step
        assert_eq!(ScoreBoard::compute_answer_points(true, 2_000, 10_000), 150);
        // exactly 60% remaining earns no bonus
        assert_eq!(ScoreBoard::compute_answer_points(true, 4_000, 10_000), 100);
    }

    #[test]
    fn answer_points_without_time_left() {
        assert_eq!(ScoreBoard::compute_answer_points(true, 15_000, 10_000), 100);
        assert_eq!(ScoreBoard::compute_answer_points(true, 0, 0), 100);
    }

    #[test]
    fn add_points_accumulates_and_allows_negative_deltas() {
        let mut board = ScoreBoard::new();
        let a = PlayerId::from("a");
        assert_eq!(board.score(&a), 0);
        assert_eq!(board.add_points(&a, 150), 150);
        assert_eq!(board.add_points(&a, -200), -50);
        board.set_score(&a, 10);
        assert_eq!(board.score(&a), 10);
    }

    #[test]
    fn leaderboard_skips_zero_scores_and_keeps_input_order_on_ties() {
        let mut board = ScoreBoard::new();
        let players = vec![
            Player::new("a", "A"),
            Player::new("b", "B"),
            Player::new("c", "C"),
            Player::new("d", "D"),
        ];
        board.set_score(&PlayerId::from("c"), 100);
        board.set_score(&PlayerId::from("b"), 300);
        board.set_score(&PlayerId::from("a"), 300);

        let ranked: Vec<_> = board
            .snapshot_leaderboard(&players)
            .into_iter()
            .map(|row| row.id.to_string())
            .collect();
        assert_eq!(ranked, vec!["a", "b", "c"]);

        let top = board.top_n(&players, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].name, "B");
    }

    #[test]
    fn reset_clears_everything() {
        let mut board = ScoreBoard::new();
        board.add_points(&PlayerId::from("a"), 100);
        board.reset();
        assert_eq!(board.scores().count(), 0);
        assert!(
            board
                .snapshot_leaderboard(&[Player::new("a", "A")])
                .is_empty()
        );
    }
}
