use tracing::info;

use crate::{
    dto::game::DeviceSummary,
    error::ServiceError,
    services::broadcasts,
    state::{SharedState, ids::DeviceId},
};

/// Add a device to the pool and hand it to the first player waiting for one.
///
/// Returns `false` when the device was already known.
pub async fn device_registered(state: &SharedState, device_id: DeviceId) -> bool {
    let (added, assigned) = state
        .with_session_mut(|session| {
            let added = session.devices.register_device(device_id.clone());
            let assigned = session.devices.assign_waiting(&session.roster);
            (added, assigned)
        })
        .await;

    if added {
        info!(device = %device_id, "device registered");
    }
    broadcasts::broadcast_devices_assigned(state, assigned);
    added
}

/// The platform reclaimed `device_id`: its holder loses it and the next waiting
/// player, other than that holder, receives it.
pub async fn device_released(state: &SharedState, device_id: &DeviceId) -> Result<(), ServiceError> {
    let (previous, next) = state
        .with_session_mut(|session| {
            let record = session
                .devices
                .devices()
                .iter()
                .find(|record| &record.device_id == device_id)
                .ok_or_else(|| ServiceError::NotFound(format!("device `{device_id}` not found")))?;
            let previous = record.assigned_player.clone();
            let next = session
                .devices
                .release_by_device(device_id, &session.roster);
            Ok::<_, ServiceError>((previous, next))
        })
        .await?;

    broadcasts::broadcast_device_released(state, device_id.clone(), previous);
    if let Some(player_id) = next {
        broadcasts::broadcast_devices_assigned(state, vec![(player_id, device_id.clone())]);
    }
    Ok(())
}

/// Current device pool.
pub async fn list_devices(state: &SharedState) -> Vec<DeviceSummary> {
    state
        .with_session(|session| {
            session
                .devices
                .devices()
                .iter()
                .map(DeviceSummary::from)
                .collect()
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dto::events::{EventName, GameBroadcast},
        services::presence_service,
        state::{AppState, ids::PlayerId, roster::Player},
    };

    #[tokio::test]
    async fn registering_a_device_serves_waiting_players() {
        let state = AppState::new(AppConfig::default());
        presence_service::player_joined(&state, Player::new("a", "A")).await;
        let mut events = state.events().subscribe([EventName::DeviceAssigned]);

        assert!(device_registered(&state, DeviceId::from("phone-1")).await);
        assert!(!device_registered(&state, DeviceId::from("phone-1")).await);

        match events.try_recv() {
            Some(GameBroadcast::DeviceAssigned(event)) => {
                assert_eq!(event.player_id, PlayerId::from("a"));
                assert_eq!(event.device_id, DeviceId::from("phone-1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn released_device_skips_previous_holder() {
        let state = AppState::new(AppConfig::default());
        device_registered(&state, DeviceId::from("phone-1")).await;
        presence_service::player_joined(&state, Player::new("a", "A")).await;
        presence_service::player_joined(&state, Player::new("b", "B")).await;

        device_released(&state, &DeviceId::from("phone-1")).await.unwrap();

        let devices = list_devices(&state).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].assigned_player, Some(PlayerId::from("b")));
        assert!(devices[0].in_use);
    }

    #[tokio::test]
    async fn unknown_device_is_not_found() {
        let state = AppState::new(AppConfig::default());
        let err = device_released(&state, &DeviceId::from("nope")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
