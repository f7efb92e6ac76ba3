use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::{GamePhase, RoundPhase};

/// Publicly visible game phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleGamePhase {
    /// Lobby, no game running.
    Idle,
    /// A question accepts answers.
    AwaitingAnswers,
    /// Results of the last question are on screen.
    ShowingResults,
    /// Moving on to the next question.
    Advancing,
    /// Final leaderboard on screen.
    Finished,
}

impl From<&GamePhase> for VisibleGamePhase {
    fn from(value: &GamePhase) -> Self {
        match value {
            GamePhase::Idle => VisibleGamePhase::Idle,
            GamePhase::Finished => VisibleGamePhase::Finished,
            GamePhase::Running(RoundPhase::AwaitingAnswers { .. }) => {
                VisibleGamePhase::AwaitingAnswers
            }
            GamePhase::Running(RoundPhase::ShowingResults { .. }) => {
                VisibleGamePhase::ShowingResults
            }
            GamePhase::Running(RoundPhase::Advancing { .. }) => VisibleGamePhase::Advancing,
        }
    }
}
