use tracing::warn;

use crate::{
    dto::events::{
        DeviceAssignedEvent, DeviceReleasedEvent, GameBroadcast, HostChangedEvent,
        ParticipationEvent, ScoreAwardEvent,
    },
    state::{
        AppState,
        ids::{DeviceId, PlayerId},
    },
};

/// Publish `event` on the hub, logging instead of failing when it is rejected.
///
/// Returns whether the event passed validation.
pub fn publish(state: &AppState, event: GameBroadcast) -> bool {
    let name = event.name();
    match state.events().publish(event) {
        Ok(_) => true,
        Err(err) => {
            warn!(event = %name, error = %err, "dropped invalid broadcast");
            false
        }
    }
}

/// Broadcast a host hand-off. Nothing is sent when the host did not change.
pub fn broadcast_host_changed(state: &AppState, new: Option<PlayerId>, old: Option<PlayerId>) {
    if new == old {
        return;
    }
    publish(
        state,
        GameBroadcast::HostChanged(HostChangedEvent {
            new_host_id: new,
            old_host_id: old,
        }),
    );
}

/// Broadcast one device hand-out per pair.
pub fn broadcast_devices_assigned(state: &AppState, assignments: Vec<(PlayerId, DeviceId)>) {
    for (player_id, device_id) in assignments {
        publish(
            state,
            GameBroadcast::DeviceAssigned(DeviceAssignedEvent {
                player_id,
                device_id,
            }),
        );
    }
}

/// Broadcast that `device_id` went back to the pool.
pub fn broadcast_device_released(
    state: &AppState,
    device_id: DeviceId,
    player_id: Option<PlayerId>,
) {
    publish(
        state,
        GameBroadcast::DeviceReleased(DeviceReleasedEvent {
            device_id,
            player_id,
        }),
    );
}

/// Broadcast a change of participation.
pub fn broadcast_participation(state: &AppState, player_id: PlayerId, opted_out: bool) {
    publish(
        state,
        GameBroadcast::Participation(ParticipationEvent {
            player_id,
            opted_out,
        }),
    );
}

/// Broadcast score awards in order.
pub fn broadcast_score_awards(state: &AppState, awards: &[ScoreAwardEvent]) {
    for award in awards {
        publish(state, GameBroadcast::ScoreAward(award.clone()));
    }
}
