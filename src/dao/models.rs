use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Persistent best score of one player on one named leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardRecord {
    /// Name of the leaderboard the score belongs to.
    pub leaderboard: String,
    /// Stable player identifier.
    pub player_id: String,
    /// Stored score.
    pub score: i64,
    /// Timestamp of the last score update.
    pub updated_at: SystemTime,
}

impl LeaderboardRecord {
    /// Build a record stamped with the current time.
    pub fn new(leaderboard: impl Into<String>, player_id: impl Into<String>, score: i64) -> Self {
        Self {
            leaderboard: leaderboard.into(),
            player_id: player_id.into(),
            score,
            updated_at: SystemTime::now(),
        }
    }
}

/// Score to store given the current one: `overwrite` always replaces, otherwise the best wins.
pub fn merge_score(existing: Option<i64>, incoming: i64, overwrite: bool) -> i64 {
    match existing {
        Some(current) if !overwrite => current.max(incoming),
        _ => incoming,
    }
}

/// Order records best first; equal scores keep the earliest update first.
pub fn rank_records(records: &mut [LeaderboardRecord]) {
    records.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.updated_at.cmp(&b.updated_at))
            .then_with(|| a.player_id.cmp(&b.player_id))
    });
}
