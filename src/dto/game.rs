use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::LeaderboardRecord,
    dto::{
        common::LeaderboardRow,
        format_system_time,
        phase::VisibleGamePhase,
        validation::validate_player_id,
    },
    state::{
        devices::DeviceRecord,
        game::{GameSettings, MAX_TIME_LIMIT_MS, MIN_TIME_LIMIT_MS, Question},
        ids::{DeviceId, PlayerId},
        state_machine::GamePhase,
    },
};

/// Most options a question may offer.
pub const MAX_OPTIONS: usize = 8;

/// Incoming question definition.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionInput {
    /// Question text.
    pub prompt: String,
    /// Answer options, two or more.
    pub options: Vec<String>,
    /// Option that earns points.
    pub correct_index: usize,
    /// Overrides the session answer window for this question.
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.prompt.trim().is_empty() {
            errors.add("prompt", field_error("prompt_empty", "Prompt must not be empty"));
        }

        if !(2..=MAX_OPTIONS).contains(&self.options.len()) {
            errors.add(
                "options",
                field_error(
                    "options_count",
                    format!("A question needs between 2 and {MAX_OPTIONS} options"),
                ),
            );
        } else if self.options.iter().any(|option| option.trim().is_empty()) {
            errors.add("options", field_error("option_empty", "Options must not be empty"));
        }

        if self.correct_index >= self.options.len() {
            errors.add(
                "correct_index",
                field_error("correct_index_range", "Correct index must name one of the options"),
            );
        }

        let allowed = MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS;
        if self.time_limit_ms.is_some_and(|limit| !allowed.contains(&limit)) {
            errors.add(
                "time_limit_ms",
                field_error(
                    "time_limit_range",
                    format!(
                        "Time limit must be between {MIN_TIME_LIMIT_MS} and {MAX_TIME_LIMIT_MS} ms"
                    ),
                ),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<QuestionInput> for Question {
    fn from(value: QuestionInput) -> Self {
        Self {
            prompt: value.prompt.trim().to_string(),
            options: value
                .options
                .into_iter()
                .map(|option| option.trim().to_string())
                .collect(),
            correct_index: value.correct_index,
            time_limit_ms: value.time_limit_ms,
        }
    }
}

fn field_error(code: &'static str, message: impl Into<String>) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into().into());
    err
}

/// Replace the question catalog of the lobby.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct LoadQuestionsRequest {
    /// Host loading the catalog.
    #[validate(custom(function = "validate_player_id"))]
    pub host_id: PlayerId,
    /// Questions replacing the catalog.
    #[validate(length(min = 1, message = "at least one question is required"), nested)]
    pub questions: Vec<QuestionInput>,
}

/// Host-only action without further arguments (start, advance, reset, end).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct HostActionRequest {
    /// Host issuing the action.
    #[validate(custom(function = "validate_player_id"))]
    pub host_id: PlayerId,
}

/// Hand the host role to a present player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SetHostRequest {
    /// Current host. May be omitted while nobody holds the role.
    #[serde(default)]
    #[validate(custom(function = "validate_player_id"))]
    pub acting_host_id: Option<PlayerId>,
    /// Player taking over the role.
    #[validate(custom(function = "validate_player_id"))]
    pub player_id: PlayerId,
}

/// Replace the lobby settings.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateSettingsRequest {
    /// Host issuing the change.
    #[validate(custom(function = "validate_player_id"))]
    pub host_id: PlayerId,
    /// New settings.
    pub settings: GameSettings,
}

/// Manual score correction issued by the host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ScoreAdjustmentRequest {
    /// Host issuing the correction.
    #[validate(custom(function = "validate_player_id"))]
    pub host_id: PlayerId,
    /// Player whose score changes.
    #[validate(custom(function = "validate_player_id"))]
    pub player_id: PlayerId,
    /// Points to add, negative to remove.
    #[validate(range(min = -10_000, max = 10_000))]
    pub delta: i64,
}

/// Phase reached after a host action.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// Phase after the action.
    pub phase: VisibleGamePhase,
}

impl From<GamePhase> for ActionResponse {
    fn from(phase: GamePhase) -> Self {
        Self {
            phase: (&phase).into(),
        }
    }
}

/// Number of questions now in the catalog.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoadQuestionsResponse {
    /// Questions now loaded.
    pub question_count: usize,
}

/// Result of a host hand-off.
#[derive(Debug, Serialize, ToSchema)]
pub struct HostChangeResponse {
    /// New host.
    pub host_id: PlayerId,
    /// Host before the change.
    pub previous_host_id: Option<PlayerId>,
}

/// Total of a player after a score correction.
#[derive(Debug, Serialize, ToSchema)]
pub struct ScoreUpdateResponse {
    /// Player whose score changed.
    pub player_id: PlayerId,
    /// Score after the correction.
    pub score: i64,
}

/// Query string accepted by leaderboard reads.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Maximum number of rows, defaults to 10.
    pub limit: Option<usize>,
}

/// Session leaderboard.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    /// Rows sorted by score.
    pub leaderboard: Vec<LeaderboardRow>,
}

/// One row of the persistent leaderboard.
#[derive(Debug, Serialize, ToSchema)]
pub struct GlobalLeaderboardRow {
    /// Player id.
    pub player_id: String,
    /// Stored score.
    pub score: i64,
    /// RFC 3339 timestamp of the last change.
    pub updated_at: String,
}

impl From<LeaderboardRecord> for GlobalLeaderboardRow {
    fn from(record: LeaderboardRecord) -> Self {
        Self {
            player_id: record.player_id,
            score: record.score,
            updated_at: format_system_time(record.updated_at),
        }
    }
}

/// Persistent leaderboard page.
#[derive(Debug, Serialize, ToSchema)]
pub struct GlobalLeaderboardResponse {
    /// Name of the persistent leaderboard.
    pub leaderboard: String,
    /// Rows sorted by score.
    pub rows: Vec<GlobalLeaderboardRow>,
}

/// Device of the pool and its holder.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceSummary {
    /// Device id.
    pub device_id: DeviceId,
    /// Player holding the device.
    pub assigned_player: Option<PlayerId>,
    /// `true` while assigned.
    pub in_use: bool,
}

impl From<&DeviceRecord> for DeviceSummary {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            assigned_player: record.assigned_player.clone(),
            in_use: record.in_use,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> QuestionInput {
        QuestionInput {
            prompt: "Largest planet?".into(),
            options: vec!["Mars".into(), "Jupiter".into()],
            correct_index: 1,
            time_limit_ms: None,
        }
    }

    #[test]
    fn accepts_well_formed_question() {
        assert!(question().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_correct_index() {
        let input = QuestionInput {
            correct_index: 2,
            ..question()
        };
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("correct_index"));
    }

    #[test]
    fn rejects_single_option_and_blank_prompt() {
        let input = QuestionInput {
            prompt: "  ".into(),
            options: vec!["only".into()],
            correct_index: 0,
            time_limit_ms: Some(10),
        };
        let errors = input.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("prompt"));
        assert!(fields.contains_key("options"));
        assert!(fields.contains_key("time_limit_ms"));
    }

    #[test]
    fn load_request_requires_questions_and_valid_host() {
        let request: LoadQuestionsRequest =
            serde_json::from_str(r#"{ "host_id": "", "questions": [] }"#).unwrap();
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("host_id"));
        assert!(fields.contains_key("questions"));
    }

    #[test]
    fn load_request_validates_nested_questions() {
        let request = LoadQuestionsRequest {
            host_id: PlayerId::from("host"),
            questions: vec![
                question(),
                QuestionInput {
                    correct_index: 9,
                    ..question()
                },
            ],
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn question_input_is_trimmed() {
        let question: Question = QuestionInput {
            prompt: " Largest planet? ".into(),
            options: vec![" Mars".into(), "Jupiter ".into()],
            ..question()
        }
        .into();
        assert_eq!(question.prompt, "Largest planet?");
        assert_eq!(question.options, vec!["Mars", "Jupiter"]);
    }
}
