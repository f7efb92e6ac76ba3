use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::{validate_device_id, validate_player_id},
    state::{
        ids::{DeviceId, PlayerId},
        roster::Player,
    },
};

/// Player as reported by the platform.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PlatformPlayer {
    /// Platform identity of the player.
    pub player_id: PlayerId,
    /// Display name, defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
}

impl From<PlatformPlayer> for Player {
    fn from(value: PlatformPlayer) -> Self {
        let name = value
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| value.player_id.to_string());
        Player::new(value.player_id, name)
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from the platform WebSocket.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformInboundMessage {
    /// A player connected.
    PlayerJoined {
        /// Player that joined.
        player_id: PlayerId,
        /// Display name, defaults to the id.
        #[serde(default)]
        name: Option<String>,
    },
    /// A player disconnected.
    PlayerLeft {
        /// Player that left.
        player_id: PlayerId,
    },
    /// Full list of present players; everyone missing is treated as gone.
    PresenceSync {
        /// Everyone currently connected.
        players: Vec<PlatformPlayer>,
    },
    /// Answer to the open question.
    AnswerSubmitted {
        /// Player answering.
        player_id: PlayerId,
        /// Chosen option.
        answer_index: usize,
        /// Measured by the client; the server clock is used when omitted.
        #[serde(default)]
        response_time_ms: Option<u64>,
    },
    /// Player sits out the coming questions.
    OptOut {
        /// Player opting out.
        player_id: PlayerId,
    },
    /// Player takes part again.
    Rejoin {
        /// Player coming back.
        player_id: PlayerId,
    },
    /// A buzzer device became available.
    DeviceRegistered {
        /// Device to hand out.
        device_id: DeviceId,
    },
    /// A buzzer device went away.
    DeviceReleased {
        /// Device to take back.
        device_id: DeviceId,
    },
    /// Ask for a session snapshot.
    StateRequest {
        /// Player asking, if any.
        #[serde(default)]
        requester_id: Option<PlayerId>,
    },
    /// Any other `type`; ignored.
    #[serde(other)]
    Unknown,
}

impl PlatformInboundMessage {
    /// Parse and validate one text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, PlatformMessageError> {
        let message: Self = serde_json::from_str(raw)?;
        message.validate()?;
        Ok(message)
    }

    /// Wire name of the message type, for logs and acknowledgements.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayerJoined { .. } => "player_joined",
            Self::PlayerLeft { .. } => "player_left",
            Self::PresenceSync { .. } => "presence_sync",
            Self::AnswerSubmitted { .. } => "answer_submitted",
            Self::OptOut { .. } => "opt_out",
            Self::Rejoin { .. } => "rejoin",
            Self::DeviceRegistered { .. } => "device_registered",
            Self::DeviceReleased { .. } => "device_released",
            Self::StateRequest { .. } => "state_request",
            Self::Unknown => "unknown",
        }
    }
}

impl Validate for PlatformInboundMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let players: Vec<&PlayerId> = match self {
            Self::PresenceSync { players } => players.iter().map(|p| &p.player_id).collect(),
            Self::PlayerJoined { player_id, .. }
            | Self::PlayerLeft { player_id }
            | Self::AnswerSubmitted { player_id, .. }
            | Self::OptOut { player_id }
            | Self::Rejoin { player_id } => vec![player_id],
            Self::StateRequest { requester_id } => requester_id.iter().collect(),
            Self::DeviceRegistered { device_id } | Self::DeviceReleased { device_id } => {
                if let Err(err) = validate_device_id(device_id) {
                    errors.add("device_id", err);
                }
                Vec::new()
            }
            Self::Unknown => Vec::new(),
        };
        for id in players {
            if let Err(err) = validate_player_id(id) {
                errors.add("player_id", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Rejected platform frame.
#[derive(Debug, thiserror::Error)]
pub enum PlatformMessageError {
    /// Not valid JSON or an unexpected shape.
    #[error("malformed message: {0}")]
    Parse(#[from] serde_json::Error),
    /// Ids failed validation.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Reply sent for every platform frame.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformReply {
    /// Message accepted.
    Ack {
        /// Type of the acknowledged message.
        message: String,
        /// False when the message was well formed but had no effect.
        applied: bool,
    },
    /// Message rejected.
    Error {
        /// Why the message was rejected.
        message: String,
    },
}
