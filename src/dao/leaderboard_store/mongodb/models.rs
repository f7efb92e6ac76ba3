use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::LeaderboardRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub leaderboard: String,
    pub player_id: String,
    pub score: i64,
    pub updated_at: DateTime,
}

impl From<MongoScoreDocument> for LeaderboardRecord {
    fn from(value: MongoScoreDocument) -> Self {
        Self {
            leaderboard: value.leaderboard,
            player_id: value.player_id,
            score: value.score,
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

pub fn score_doc_id(leaderboard: &str, player_id: &str) -> Document {
    doc! { "_id": format!("{leaderboard}::{player_id}") }
}
