use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::dao::models::LeaderboardRecord;

pub const LEADERBOARD_PREFIX: &str = "leaderboard::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<CouchScoreDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchScoreDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub leaderboard: String,
    pub player_id: String,
    pub score: i64,
    pub updated_at: SystemTime,
}

impl CouchScoreDocument {
    pub fn from_record(record: LeaderboardRecord, rev: Option<String>) -> Self {
        Self {
            id: score_doc_id(&record.leaderboard, &record.player_id),
            rev,
            leaderboard: record.leaderboard,
            player_id: record.player_id,
            score: record.score,
            updated_at: record.updated_at,
        }
    }

    pub fn into_record(self) -> LeaderboardRecord {
        LeaderboardRecord {
            leaderboard: self.leaderboard,
            player_id: self.player_id,
            score: self.score,
            updated_at: self.updated_at,
        }
    }
}

/// Prefix shared by every score document of `leaderboard`.
pub fn board_prefix(leaderboard: &str) -> String {
    format!("{LEADERBOARD_PREFIX}{leaderboard}::")
}

pub fn score_doc_id(leaderboard: &str, player_id: &str) -> String {
    format!("{}{player_id}", board_prefix(leaderboard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_ids_group_scores_by_board() {
        let id = score_doc_id("weekly", "player-7");
        assert_eq!(id, "leaderboard::weekly::player-7");
        assert!(id.starts_with(&board_prefix("weekly")));
        assert!(!id.starts_with(&board_prefix("week")));
    }
}
