use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::phase::VisibleGamePhase,
    state::{
        game::{GameSettings, Question},
        ids::PlayerId,
        scoreboard::LeaderboardEntry,
    },
};

/// Leaderboard row as sent to clients.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct LeaderboardRow {
    /// Player id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Session score.
    pub score: i64,
}

impl From<LeaderboardEntry> for LeaderboardRow {
    fn from(entry: LeaderboardEntry) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            score: entry.score,
        }
    }
}

/// Question as shown to players; the correct option stays server-side until results.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct QuestionPayload {
    /// Question text.
    pub prompt: String,
    /// Answer options in display order.
    pub options: Vec<String>,
}

impl From<&Question> for QuestionPayload {
    fn from(question: &Question) -> Self {
        Self {
            prompt: question.prompt.clone(),
            options: question.options.clone(),
        }
    }
}

/// Shared snapshot describing the session, used to resync late subscribers.
#[derive(Debug, Serialize, ToSchema, Clone)]
pub struct SessionSnapshot {
    /// Phase as seen by clients.
    pub phase: VisibleGamePhase,
    /// Changes whenever the session is recreated.
    pub session_id: Uuid,
    /// True when the backend operates without a leaderboard store.
    pub degraded: bool,
    /// Present while a question is on screen or being revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionPayload>,
    /// Position of the current question (0-based).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_index: Option<usize>,
    /// Number of questions loaded.
    pub question_count: usize,
    /// Present while answers are open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining_ms: Option<u64>,
    /// Present once answers are closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<usize>,
    /// Answers per option once answers are closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_option_counts: Option<Vec<u32>>,
    /// Current host.
    pub host_id: Option<PlayerId>,
    /// Settings in effect.
    pub settings: GameSettings,
    /// Session standings.
    pub leaderboard: Vec<LeaderboardRow>,
    /// Connected players.
    pub present_count: usize,
    /// Players taking part.
    pub active_count: usize,
    /// Answers received for the current question.
    pub answered_count: usize,
}
