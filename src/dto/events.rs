//! Closed catalog of broadcast messages shared by the coordinator and every renderer.
//!
//! Each message has one wire name ([`EventName`]) and one typed payload. Payloads are
//! checked by [`GameBroadcast::validate`] before they reach any subscriber.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    dto::common::{LeaderboardRow, QuestionPayload, SessionSnapshot},
    state::{
        game::GameSettings,
        ids::{DeviceId, PlayerId},
        state_machine::FinishReason,
    },
};

/// Wire name of every broadcast message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum EventName {
    /// A question is on screen and accepting answers.
    #[serde(rename = "question.show")]
    QuestionShow,
    /// Answers are closed and the correct option revealed.
    #[serde(rename = "round.results")]
    Results,
    /// A player answered the current question.
    #[serde(rename = "answer.submitted")]
    AnswerSubmitted,
    /// A game started.
    #[serde(rename = "game.start")]
    GameStart,
    /// A game finished and the final leaderboard is known.
    #[serde(rename = "game.end")]
    GameEnd,
    /// A game was reset back to the lobby.
    #[serde(rename = "game.reset")]
    GameReset,
    /// Points were awarded to a player.
    #[serde(rename = "score.award")]
    ScoreAward,
    /// The host role moved.
    #[serde(rename = "host.changed")]
    HostChanged,
    /// Game settings were edited by the host.
    #[serde(rename = "settings.update")]
    SettingsUpdate,
    /// A late subscriber asked for the current state.
    #[serde(rename = "state.request")]
    StateRequest,
    /// Answer to a state request.
    #[serde(rename = "state.response")]
    StateResponse,
    /// One second of the question countdown elapsed.
    #[serde(rename = "timer.tick")]
    TimerTick,
    /// The question countdown reached zero.
    #[serde(rename = "timer.end")]
    TimerEnd,
    /// A device was handed to a player.
    #[serde(rename = "device.assigned")]
    DeviceAssigned,
    /// A device went back to the pool.
    #[serde(rename = "device.released")]
    DeviceReleased,
    /// A player opted out or rejoined.
    #[serde(rename = "player.participation")]
    Participation,
}

impl EventName {
    /// Every name of the catalog.
    pub const ALL: [EventName; 16] = [
        EventName::QuestionShow,
        EventName::Results,
        EventName::AnswerSubmitted,
        EventName::GameStart,
        EventName::GameEnd,
        EventName::GameReset,
        EventName::ScoreAward,
        EventName::HostChanged,
        EventName::SettingsUpdate,
        EventName::StateRequest,
        EventName::StateResponse,
        EventName::TimerTick,
        EventName::TimerEnd,
        EventName::DeviceAssigned,
        EventName::DeviceReleased,
        EventName::Participation,
    ];

    /// Wire representation of the name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::QuestionShow => "question.show",
            EventName::Results => "round.results",
            EventName::AnswerSubmitted => "answer.submitted",
            EventName::GameStart => "game.start",
            EventName::GameEnd => "game.end",
            EventName::GameReset => "game.reset",
            EventName::ScoreAward => "score.award",
            EventName::HostChanged => "host.changed",
            EventName::SettingsUpdate => "settings.update",
            EventName::StateRequest => "state.request",
            EventName::StateResponse => "state.response",
            EventName::TimerTick => "timer.tick",
            EventName::TimerEnd => "timer.end",
            EventName::DeviceAssigned => "device.assigned",
            EventName::DeviceReleased => "device.released",
            EventName::Participation => "player.participation",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = EventError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == trimmed)
            .ok_or_else(|| EventError::UnknownName(trimmed.to_string()))
    }
}

/// Payload rejected at the publish boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Name outside the catalog.
    #[error("unknown event name `{0}`")]
    UnknownName(String),
    /// Payload breaks the schema of its event.
    #[error("invalid `{event}` payload: {reason}")]
    InvalidPayload {
        /// Event whose payload was rejected.
        event: EventName,
        /// What was wrong.
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `question.show`
pub struct QuestionShowEvent {
    /// Question as shown to players, without the answer.
    pub question: QuestionPayload,
    /// Position of the question in the game (0-based).
    pub index: usize,
    /// Number of questions in the game.
    pub count: usize,
    /// Time players have to answer.
    pub time_limit_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `round.results`
pub struct ResultsEvent {
    /// Question that was just closed.
    pub question: QuestionPayload,
    /// Position of the question in the game (0-based).
    pub index: usize,
    /// Option that earned points.
    pub correct_index: usize,
    /// Number of answers per option, aligned with `question.options`.
    pub per_option_counts: Vec<u32>,
    /// Leaderboard after this round.
    pub scores: Vec<LeaderboardRow>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `answer.submitted`
pub struct AnswerSubmittedEvent {
    /// Player who answered.
    pub player_id: PlayerId,
    /// Chosen option.
    pub answer_index: usize,
    /// Time from question display to answer.
    pub response_time_ms: u64,
    /// Answers received so far this round.
    pub answered_count: usize,
    /// Players expected to answer.
    pub active_count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `game.start`
pub struct GameStartEvent {
    /// Host who started the game.
    pub host_id: Option<PlayerId>,
    /// Number of questions in the game.
    pub question_count: usize,
    /// Settings frozen for this game.
    pub settings: GameSettings,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `game.end`
pub struct GameEndEvent {
    /// Host who stopped the game, if any.
    pub host_id: Option<PlayerId>,
    /// Why the game ended.
    pub reason: FinishReason,
    /// Final standings.
    pub leaderboard: Vec<LeaderboardRow>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `game.reset`
pub struct GameResetEvent {
    /// Host who reset the session, if any.
    pub host_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `score.award`
pub struct ScoreAwardEvent {
    /// Player whose score changed.
    pub player_id: PlayerId,
    /// Points added, negative for a penalty.
    pub points: i64,
    /// Score after the change.
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `host.changed`
pub struct HostChangedEvent {
    /// Current host.
    pub new_host_id: Option<PlayerId>,
    /// Previous host.
    pub old_host_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `settings.update`
pub struct SettingsUpdateEvent {
    /// Host who changed the settings.
    pub host_id: PlayerId,
    /// Settings now in effect.
    pub settings: GameSettings,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `state.request`
pub struct StateRequestEvent {
    /// Player asking for a snapshot.
    pub requester_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `state.response`
pub struct StateResponseEvent {
    /// Player the snapshot answers, `None` for everyone.
    pub requester_id: Option<PlayerId>,
    /// Current session state.
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `timer.tick`
pub struct TimerTickEvent {
    /// Whole seconds left before answers close.
    pub time_remaining: u64,
    /// Question being timed.
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `timer.end`
pub struct TimerEndEvent {
    /// Question whose countdown ran out.
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `device.assigned`
pub struct DeviceAssignedEvent {
    /// Player now holding the device.
    pub player_id: PlayerId,
    /// Buzzer device.
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `device.released`
pub struct DeviceReleasedEvent {
    /// Buzzer device now free.
    pub device_id: DeviceId,
    /// Player that gave the device back, when known.
    pub player_id: Option<PlayerId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// `player.participation`
pub struct ParticipationEvent {
    /// Player who changed participation.
    pub player_id: PlayerId,
    /// `true` while the player sits out.
    pub opted_out: bool,
}

/// Every message that can travel on the event hub.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GameBroadcast {
    /// `question.show`
    QuestionShow(QuestionShowEvent),
    /// `round.results`
    Results(ResultsEvent),
    /// `answer.submitted`
    AnswerSubmitted(AnswerSubmittedEvent),
    /// `game.start`
    GameStart(GameStartEvent),
    /// `game.end`
    GameEnd(GameEndEvent),
    /// `game.reset`
    GameReset(GameResetEvent),
    /// `score.award`
    ScoreAward(ScoreAwardEvent),
    /// `host.changed`
    HostChanged(HostChangedEvent),
    /// `settings.update`
    SettingsUpdate(SettingsUpdateEvent),
    /// `state.request`
    StateRequest(StateRequestEvent),
    /// `state.response`
    StateResponse(Box<StateResponseEvent>),
    /// `timer.tick`
    TimerTick(TimerTickEvent),
    /// `timer.end`
    TimerEnd(TimerEndEvent),
    /// `device.assigned`
    DeviceAssigned(DeviceAssignedEvent),
    /// `device.released`
    DeviceReleased(DeviceReleasedEvent),
    /// `player.participation`
    Participation(ParticipationEvent),
}

impl GameBroadcast {
    /// Wire name of the message.
    pub fn name(&self) -> EventName {
        match self {
            GameBroadcast::QuestionShow(_) => EventName::QuestionShow,
            GameBroadcast::Results(_) => EventName::Results,
            GameBroadcast::AnswerSubmitted(_) => EventName::AnswerSubmitted,
            GameBroadcast::GameStart(_) => EventName::GameStart,
            GameBroadcast::GameEnd(_) => EventName::GameEnd,
            GameBroadcast::GameReset(_) => EventName::GameReset,
            GameBroadcast::ScoreAward(_) => EventName::ScoreAward,
            GameBroadcast::HostChanged(_) => EventName::HostChanged,
            GameBroadcast::SettingsUpdate(_) => EventName::SettingsUpdate,
            GameBroadcast::StateRequest(_) => EventName::StateRequest,
            GameBroadcast::StateResponse(_) => EventName::StateResponse,
            GameBroadcast::TimerTick(_) => EventName::TimerTick,
            GameBroadcast::TimerEnd(_) => EventName::TimerEnd,
            GameBroadcast::DeviceAssigned(_) => EventName::DeviceAssigned,
            GameBroadcast::DeviceReleased(_) => EventName::DeviceReleased,
            GameBroadcast::Participation(_) => EventName::Participation,
        }
    }

    /// Check the payload against the schema of its event.
    pub fn validate(&self) -> Result<(), EventError> {
        let name = self.name();
        let invalid = |reason: &str| {
            Err(EventError::InvalidPayload {
                event: name,
                reason: reason.to_string(),
            })
        };

        match self {
            GameBroadcast::QuestionShow(event) => {
                validate_question(name, &event.question)?;
                if event.index >= event.count {
                    return invalid("index must be lower than count");
                }
                if event.time_limit_ms == 0 {
                    return invalid("time limit must be strictly positive");
                }
            }
            GameBroadcast::Results(event) => {
                validate_question(name, &event.question)?;
                if event.correct_index >= event.question.options.len() {
                    return invalid("correct index out of range");
                }
                if event.per_option_counts.len() != event.question.options.len() {
                    return invalid("per-option counts must match the option count");
                }
            }
            GameBroadcast::AnswerSubmitted(event) => validate_player(name, &event.player_id)?,
            GameBroadcast::GameStart(event) => {
                if event.question_count == 0 {
                    return invalid("a game needs at least one question");
                }
            }
            GameBroadcast::ScoreAward(event) => validate_player(name, &event.player_id)?,
            GameBroadcast::HostChanged(event) => {
                if event.new_host_id.is_some() && event.new_host_id == event.old_host_id {
                    return invalid("host did not change");
                }
            }
            GameBroadcast::SettingsUpdate(event) => {
                validate_player(name, &event.host_id)?;
                if let Err(reason) = event.settings.check() {
                    return invalid(&reason);
                }
            }
            GameBroadcast::DeviceAssigned(event) => {
                validate_player(name, &event.player_id)?;
                if event.device_id.as_str().is_empty() {
                    return invalid("device id must not be empty");
                }
            }
            GameBroadcast::DeviceReleased(event) => {
                if event.device_id.as_str().is_empty() {
                    return invalid("device id must not be empty");
                }
            }
            GameBroadcast::Participation(event) => validate_player(name, &event.player_id)?,
            GameBroadcast::GameEnd(_)
            | GameBroadcast::GameReset(_)
            | GameBroadcast::StateRequest(_)
            | GameBroadcast::StateResponse(_)
            | GameBroadcast::TimerTick(_)
            | GameBroadcast::TimerEnd(_) => {}
        }

        Ok(())
    }
}

fn validate_question(event: EventName, question: &QuestionPayload) -> Result<(), EventError> {
    if question.prompt.trim().is_empty() || question.options.len() < 2 {
        return Err(EventError::InvalidPayload {
            event,
            reason: "question needs a prompt and at least two options".into(),
        });
    }
    Ok(())
}

fn validate_player(event: EventName, id: &PlayerId) -> Result<(), EventError> {
    if id.as_str().trim().is_empty() {
        return Err(EventError::InvalidPayload {
            event,
            reason: "player id must not be empty".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> QuestionPayload {
        QuestionPayload {
            prompt: "Capital of Peru?".into(),
            options: vec!["Lima".into(), "Quito".into(), "Bogota".into()],
        }
    }

    #[test]
    fn names_round_trip_through_wire_strings() {
        for name in EventName::ALL {
            assert_eq!(name.as_str().parse::<EventName>(), Ok(name));
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json, format!("\"{}\"", name.as_str()));
        }
        assert_eq!(
            "question.hide".parse::<EventName>(),
            Err(EventError::UnknownName("question.hide".into()))
        );
    }

    #[test]
    fn results_require_aligned_counts_and_valid_answer() {
        let mut event = ResultsEvent {
            question: question(),
            index: 0,
            correct_index: 0,
            per_option_counts: vec![2, 1, 0],
            scores: Vec::new(),
        };
        assert!(GameBroadcast::Results(event.clone()).validate().is_ok());

        event.per_option_counts.pop();
        assert!(GameBroadcast::Results(event.clone()).validate().is_err());

        event.per_option_counts.push(0);
        event.correct_index = 3;
        let err = GameBroadcast::Results(event).validate().unwrap_err();
        assert!(matches!(
            err,
            EventError::InvalidPayload {
                event: EventName::Results,
                ..
            }
        ));
    }

    #[test]
    fn question_show_rejects_zero_time_limit() {
        let event = QuestionShowEvent {
            question: question(),
            index: 0,
            count: 1,
            time_limit_ms: 0,
        };
        assert!(GameBroadcast::QuestionShow(event).validate().is_err());
    }

    #[test]
    fn payload_serializes_without_envelope() {
        let event = GameBroadcast::TimerTick(TimerTickEvent {
            time_remaining: 4,
            index: 2,
        });
        assert_eq!(event.name(), EventName::TimerTick);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({ "time_remaining": 4, "index": 2 })
        );
    }
}
