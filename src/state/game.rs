use std::{collections::HashMap, time::Duration};

use rand::{rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{
    devices::DeviceAssignmentManager,
    ids::{DeviceId, PlayerId},
    roster::PlayerRoster,
    scoreboard::ScoreBoard,
};

/// Shortest allowed answer window.
pub const MIN_TIME_LIMIT_MS: u64 = 1_000;
/// Longest allowed answer window.
pub const MAX_TIME_LIMIT_MS: u64 = 300_000;
/// Longest allowed results display.
pub const MAX_RESULTS_DURATION_MS: u64 = 60_000;

/// One trivia question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Question {
    /// Text shown to players.
    pub prompt: String,
    /// Answer options, in display order.
    pub options: Vec<String>,
    /// Index of the right option in `options`.
    pub correct_index: usize,
    /// Per-question answer window overriding the session setting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
}

/// Host-editable settings of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct GameSettings {
    /// Answer window for questions without their own limit.
    pub time_limit_ms: u64,
    /// How long results stay on screen before the next question.
    pub results_duration_ms: u64,
    /// Play at most this many questions of the catalog.
    pub question_count: Option<usize>,
    /// Shuffle the catalog at game start.
    pub shuffle_questions: bool,
    /// Close answers as soon as every active player answered.
    pub close_when_all_answered: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            time_limit_ms: 20_000,
            results_duration_ms: 5_000,
            question_count: None,
            shuffle_questions: false,
            close_when_all_answered: true,
        }
    }
}

impl GameSettings {
    /// Check value ranges, describing the first problem found.
    pub fn check(&self) -> Result<(), String> {
        if !(MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS).contains(&self.time_limit_ms) {
            return Err(format!(
                "time limit must be between {MIN_TIME_LIMIT_MS} and {MAX_TIME_LIMIT_MS} ms"
            ));
        }
        if self.results_duration_ms > MAX_RESULTS_DURATION_MS {
            return Err(format!(
                "results duration must not exceed {MAX_RESULTS_DURATION_MS} ms"
            ));
        }
        if self.question_count == Some(0) {
            return Err("question count must be strictly positive".into());
        }
        Ok(())
    }

    /// Results display duration.
    pub fn results_duration(&self) -> Duration {
        Duration::from_millis(self.results_duration_ms)
    }
}

/// Live data of the question currently on screen.
#[derive(Debug, Clone)]
pub struct RoundState {
    /// Position of the question in the game.
    pub index: usize,
    /// Question being asked.
    pub question: Question,
    /// Answer window in milliseconds.
    pub time_limit_ms: u64,
    /// When the question was shown.
    pub started_at: Instant,
    /// Answers per option, corrected when a player opts out.
    pub option_counts: Vec<u32>,
    /// Response time of each recorded answer.
    pub response_times: HashMap<PlayerId, u64>,
    /// Cleared once answers are closed and scored.
    pub open: bool,
}

impl RoundState {
    fn new(index: usize, question: Question, time_limit_ms: u64) -> Self {
        let option_counts = vec![0; question.options.len()];
        Self {
            index,
            question,
            time_limit_ms,
            started_at: Instant::now(),
            option_counts,
            response_times: HashMap::new(),
            open: true,
        }
    }

    /// Milliseconds elapsed since the question was shown.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Milliseconds left before answers close.
    pub fn remaining_ms(&self) -> u64 {
        self.time_limit_ms.saturating_sub(self.elapsed_ms())
    }

    /// Count one answer for `choice`; out-of-range choices are ignored.
    pub fn tally(&mut self, choice: usize) {
        if let Some(count) = self.option_counts.get_mut(choice) {
            *count += 1;
        }
    }

    /// Withdraw one answer for `choice`.
    pub fn untally(&mut self, choice: usize) {
        if let Some(count) = self.option_counts.get_mut(choice) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Everything one game session owns. A single instance is held by the application
/// state and handed by reference to each collaborator.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Session identifier, renewed on every game start.
    pub id: Uuid,
    /// Presence, opt-outs, answers and host.
    pub roster: PlayerRoster,
    /// Cumulative scores.
    pub scores: ScoreBoard,
    /// Device pool.
    pub devices: DeviceAssignmentManager,
    /// Host-editable settings.
    pub settings: GameSettings,
    /// Loaded question catalog.
    pub catalog: Vec<Question>,
    /// Catalog indexes played by the current game, in play order.
    pub order: Vec<usize>,
    /// Question currently on screen or just answered.
    pub round: Option<RoundState>,
}

impl GameSession {
    /// Build an idle session around a device pool and default settings.
    pub fn new(devices: impl IntoIterator<Item = DeviceId>, settings: GameSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            roster: PlayerRoster::new(),
            scores: ScoreBoard::new(),
            devices: DeviceAssignmentManager::with_devices(devices),
            settings,
            catalog: Vec::new(),
            order: Vec::new(),
            round: None,
        }
    }

    /// Prepare a new game: fresh id, zeroed scores, cleared answers and a play order.
    ///
    /// Returns the number of questions to play.
    pub fn prepare_game(&mut self) -> usize {
        self.id = Uuid::new_v4();
        self.scores.reset();
        self.roster.clear_round();
        self.round = None;

        let mut order: Vec<usize> = (0..self.catalog.len()).collect();
        if self.settings.shuffle_questions && order.len() > 1 {
            order.shuffle(&mut rng());
        }
        if let Some(limit) = self.settings.question_count {
            order.truncate(limit);
        }
        self.order = order;
        self.order.len()
    }

    /// Forget the running game, keeping players, devices, settings and catalog.
    pub fn reset_game(&mut self) {
        self.scores.reset();
        self.roster.clear_round();
        self.round = None;
        self.order.clear();
    }

    /// Number of questions in the current game.
    pub fn question_count(&self) -> usize {
        self.order.len()
    }

    /// Question played at `index` of the current game.
    pub fn question_at(&self, index: usize) -> Option<&Question> {
        let catalog_index = *self.order.get(index)?;
        self.catalog.get(catalog_index)
    }

    /// Show question `index`: answers are cleared and a fresh tally starts.
    pub fn begin_round(&mut self, index: usize) -> Option<&RoundState> {
        let question = self.question_at(index)?.clone();
        let time_limit_ms = question.time_limit_ms.unwrap_or(self.settings.time_limit_ms);
        self.roster.clear_round();
        self.round = Some(RoundState::new(index, question, time_limit_ms));
        self.round.as_ref()
    }

    /// Round data for question `index`, if it is the current one.
    pub fn round_at(&self, index: usize) -> Option<&RoundState> {
        self.round.as_ref().filter(|round| round.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(prompt: &str) -> Question {
        Question {
            prompt: prompt.into(),
            options: vec!["yes".into(), "no".into()],
            correct_index: 0,
            time_limit_ms: None,
        }
    }

    fn session_with(count: usize) -> GameSession {
        let mut session = GameSession::new(Vec::new(), GameSettings::default());
        session.catalog = (0..count).map(|i| question(&format!("q{i}"))).collect();
        session
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(GameSettings::default().check().is_ok());
        let settings = GameSettings {
            time_limit_ms: 10,
            ..GameSettings::default()
        };
        assert!(settings.check().is_err());
    }

    #[test]
    fn prepare_game_honours_question_count() {
        let mut session = session_with(5);
        session.settings.question_count = Some(3);
        session.settings.shuffle_questions = true;

        assert_eq!(session.prepare_game(), 3);
        let mut played: Vec<_> = session.order.clone();
        played.sort();
        played.dedup();
        assert_eq!(played.len(), 3);
        assert!(played.iter().all(|index| *index < 5));
    }

    #[tokio::test(start_paused = true)]
    async fn begin_round_uses_question_time_limit_when_present() {
        let mut session = session_with(2);
        session.catalog[1].time_limit_ms = Some(7_000);
        session.prepare_game();

        assert_eq!(session.begin_round(0).unwrap().time_limit_ms, 20_000);
        let round = session.begin_round(1).unwrap();
        assert_eq!(round.time_limit_ms, 7_000);
        assert_eq!(round.option_counts, vec![0, 0]);
        assert!(session.begin_round(2).is_none());
    }

    #[test]
    fn tally_ignores_out_of_range_choices() {
        let mut round = RoundState::new(0, question("q"), 1_000);
        round.tally(1);
        round.tally(9);
        round.untally(0);
        assert_eq!(round.option_counts, vec![0, 1]);
    }
}
