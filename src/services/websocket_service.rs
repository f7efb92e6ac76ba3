use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{PlatformInboundMessage, PlatformPlayer, PlatformReply},
    error::ServiceError,
    services::{device_service, game_service, presence_service},
    state::{SharedState, roster::Player},
};

/// Handle the lifetime of one platform WebSocket connection.
///
/// Every text frame is parsed, applied, then answered with an `ack` or `error` frame.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps replies flowing while the next frame is being applied.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    info!("platform connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(payload = %text, "received platform message");
                let reply = handle_text(&state, &text).await;
                if send_reply(&outbound_tx, &reply).is_err() {
                    info!("platform connection closed while replying, terminating");
                    break;
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!("platform closed the connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                let reply = PlatformReply::Error {
                    message: "binary frames are not supported".into(),
                };
                if send_reply(&outbound_tx, &reply).is_err() {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(error = %err, "websocket error");
                break;
            }
        }
    }

    info!("platform disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Parse and apply one text frame, turning every failure into an `error` reply.
pub async fn handle_text(state: &SharedState, raw: &str) -> PlatformReply {
    let message = match PlatformInboundMessage::from_json_str(raw) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "failed to parse or validate platform message");
            return PlatformReply::Error {
                message: err.to_string(),
            };
        }
    };

    let kind = message.kind();
    match dispatch(state, message).await {
        Ok(applied) => PlatformReply::Ack {
            message: kind.to_string(),
            applied,
        },
        Err(err) => {
            warn!(kind, error = %err, "platform message rejected");
            PlatformReply::Error {
                message: err.to_string(),
            }
        }
    }
}

/// Apply a validated platform message. `Ok(false)` means it was accepted but changed nothing.
pub async fn dispatch(
    state: &SharedState,
    message: PlatformInboundMessage,
) -> Result<bool, ServiceError> {
    match message {
        PlatformInboundMessage::PlayerJoined { player_id, name } => {
            let player = PlatformPlayer { player_id, name };
            Ok(presence_service::player_joined(state, Player::from(player)).await)
        }
        PlatformInboundMessage::PlayerLeft { player_id } => {
            Ok(presence_service::player_left(state, &player_id).await)
        }
        PlatformInboundMessage::PresenceSync { players } => {
            let players = players.into_iter().map(Player::from).collect();
            presence_service::presence_sync(state, players).await;
            Ok(true)
        }
        PlatformInboundMessage::AnswerSubmitted {
            player_id,
            answer_index,
            response_time_ms,
        } => game_service::submit_answer(state, &player_id, answer_index, response_time_ms).await,
        PlatformInboundMessage::OptOut { player_id } => {
            Ok(presence_service::opt_out(state, &player_id).await)
        }
        PlatformInboundMessage::Rejoin { player_id } => {
            Ok(presence_service::rejoin(state, &player_id).await)
        }
        PlatformInboundMessage::DeviceRegistered { device_id } => {
            Ok(device_service::device_registered(state, device_id).await)
        }
        PlatformInboundMessage::DeviceReleased { device_id } => {
            device_service::device_released(state, &device_id).await?;
            Ok(true)
        }
        PlatformInboundMessage::StateRequest { requester_id } => {
            presence_service::state_request(state, requester_id).await;
            Ok(true)
        }
        PlatformInboundMessage::Unknown => Err(ServiceError::InvalidInput(
            "unsupported message type".into(),
        )),
    }
}

/// Serialize a reply and queue it on the writer.
///
/// Serialization failures are logged and swallowed; only a closed writer is an error.
fn send_reply(tx: &mpsc::UnboundedSender<Message>, reply: &PlatformReply) -> Result<(), ()> {
    let payload = match serde_json::to_string(reply) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize platform reply `{reply:?}`");
            return Ok(());
        }
    };
    tx.send(Message::Text(payload.into())).map_err(|_| ())
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dto::events::{EventName, GameBroadcast},
        state::{AppState, ids::PlayerId},
    };

    fn ack(applied: bool, message: &str) -> PlatformReply {
        PlatformReply::Ack {
            message: message.into(),
            applied,
        }
    }

    #[tokio::test]
    async fn join_is_acknowledged_and_promotes_host() {
        let state = AppState::new(AppConfig::default());
        let reply = handle_text(
            &state,
            r#"{"type":"player_joined","player_id":"p1","name":"Ada"}"#,
        )
        .await;
        assert_eq!(reply, ack(true, "player_joined"));

        let again = handle_text(&state, r#"{"type":"player_joined","player_id":"p1"}"#).await;
        assert_eq!(again, ack(false, "player_joined"));

        let host = state.with_session(|session| session.roster.host().cloned()).await;
        assert_eq!(host, Some(PlayerId::from("p1")));
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_get_errors() {
        let state = AppState::new(AppConfig::default());
        assert!(matches!(
            handle_text(&state, "not json").await,
            PlatformReply::Error { .. }
        ));
        assert!(matches!(
            handle_text(&state, r#"{"type":"dance"}"#).await,
            PlatformReply::Error { .. }
        ));
        assert!(matches!(
            handle_text(&state, r#"{"type":"player_left","player_id":"  "}"#).await,
            PlatformReply::Error { .. }
        ));
    }

    #[tokio::test]
    async fn answers_outside_a_round_are_rejected() {
        let state = AppState::new(AppConfig::default());
        handle_text(&state, r#"{"type":"player_joined","player_id":"p1"}"#).await;
        let reply = handle_text(
            &state,
            r#"{"type":"answer_submitted","player_id":"p1","answer_index":0}"#,
        )
        .await;
        assert!(matches!(reply, PlatformReply::Error { .. }));
    }

    #[tokio::test]
    async fn state_request_publishes_a_snapshot() {
        let state = AppState::new(AppConfig::default());
        let mut events = state.events().subscribe([EventName::StateResponse]);

        let reply = handle_text(&state, r#"{"type":"state_request","requester_id":"p9"}"#).await;
        assert_eq!(reply, ack(true, "state_request"));
        match events.try_recv() {
            Some(GameBroadcast::StateResponse(event)) => {
                assert_eq!(event.requester_id, Some(PlayerId::from("p9")));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_device_release_is_an_error() {
        let state = AppState::new(AppConfig::default());
        let reply = handle_text(&state, r#"{"type":"device_released","device_id":"x"}"#).await;
        assert!(matches!(reply, PlatformReply::Error { .. }));
    }
}
