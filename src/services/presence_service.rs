//! Platform-driven roster changes: joins, departures, presence sync, opt-outs and
//! host hand-offs.

use tracing::{info, warn};

use crate::{
    dto::{
        common::SessionSnapshot,
        events::{GameBroadcast, StateRequestEvent, StateResponseEvent},
        game::HostChangeResponse,
    },
    error::ServiceError,
    services::{broadcasts, game_service},
    state::{
        SharedState,
        game::GameSession,
        ids::{DeviceId, PlayerId},
        roster::Player,
        state_machine::{GamePhase, RoundPhase},
    },
};

/// Effects of a departure, published once the session lock is released.
#[derive(Debug, Default)]
struct Departure {
    released: Vec<(DeviceId, PlayerId)>,
    assigned: Vec<(PlayerId, DeviceId)>,
    host_change: Option<(Option<PlayerId>, Option<PlayerId>)>,
}

/// A player entered the world: add them, hand them a device and, when nobody
/// hosts yet, make them host.
pub async fn player_joined(state: &SharedState, player: Player) -> bool {
    let auto_host = state.config().auto_host();
    let player_id = player.id.clone();

    let (joined, device, waiting, promoted) = state
        .with_session_mut(|session| {
            let joined = session.roster.join(player);
            let held = session.devices.lookup(&player_id);
            let device = match held {
                Some(_) => None,
                None => session.devices.assign(&player_id),
            };
            let waiting = held.is_none() && device.is_none();
            let promoted = auto_host
                && session.roster.host().is_none()
                && session.roster.set_host(&player_id).is_ok();
            (joined, device, waiting, promoted)
        })
        .await;

    if joined {
        info!(player = %player_id, "player joined");
    }
    if let Some(device_id) = device {
        broadcasts::broadcast_devices_assigned(state, vec![(player_id.clone(), device_id)]);
    } else if waiting {
        warn!(player = %player_id, "no free device; player waits for a release");
    }
    if promoted {
        broadcasts::broadcast_host_changed(state, Some(player_id), None);
    }
    joined
}

/// A player left the world. Unknown ids are a no-op.
pub async fn player_left(state: &SharedState, player_id: &PlayerId) -> bool {
    let auto_host = state.config().auto_host();
    let tallying = tallying_index(state).await;

    let departure = state
        .with_session_mut(|session| {
            if !session.roster.is_present(player_id) {
                return None;
            }
            let mut departure = Departure::default();
            purge_player(session, player_id, tallying, &mut departure);
            promote_if_needed(session, auto_host, &mut departure);
            departure.assigned = session.devices.assign_waiting(&session.roster);
            Some(departure)
        })
        .await;

    let Some(departure) = departure else {
        return false;
    };
    info!(player = %player_id, "player left");
    publish_departure(state, departure);
    game_service::close_if_all_answered(state).await;
    true
}

/// Replace the present set with what the platform reports, purging everyone missing.
///
/// Returns the ids that left.
pub async fn presence_sync(state: &SharedState, players: Vec<Player>) -> Vec<PlayerId> {
    let auto_host = state.config().auto_host();
    let tallying = tallying_index(state).await;

    let (departed, departure) = state
        .with_session_mut(|session| {
            let departed = session.roster.set_present(players);
            let mut departure = Departure::default();
            for player_id in &departed {
                purge_player(session, player_id, tallying, &mut departure);
            }
            promote_if_needed(session, auto_host, &mut departure);
            departure.assigned = session.devices.assign_waiting(&session.roster);
            (departed, departure)
        })
        .await;

    if !departed.is_empty() {
        info!(count = departed.len(), "players left during presence sync");
    }
    publish_departure(state, departure);
    game_service::close_if_all_answered(state).await;
    departed
}

/// Opt a player out of answering. An answer already given to the open question
/// is withdrawn from the live tally.
pub async fn opt_out(state: &SharedState, player_id: &PlayerId) -> bool {
    let tallying = tallying_index(state).await;
    let present = state
        .with_session_mut(|session| {
            if !session.roster.is_present(player_id) {
                return false;
            }
            let withdrawn = session.roster.opt_out(player_id);
            withdraw_answer(session, player_id, withdrawn, tallying);
            true
        })
        .await;
    if !present {
        return false;
    }

    broadcasts::broadcast_participation(state, player_id.clone(), true);
    game_service::close_if_all_answered(state).await;
    true
}

/// Let an opted-out player answer again from the next answer on.
pub async fn rejoin(state: &SharedState, player_id: &PlayerId) -> bool {
    let rejoined = state
        .with_session_mut(|session| {
            let was_out = session.roster.is_opted_out(player_id);
            session.roster.rejoin(player_id);
            was_out && session.roster.is_present(player_id)
        })
        .await;
    if rejoined {
        broadcasts::broadcast_participation(state, player_id.clone(), false);
    }
    rejoined
}

/// Hand the host role to `new_host`.
///
/// Allowed for the current host, or for anyone while nobody holds the role.
pub async fn set_host(
    state: &SharedState,
    acting_host: Option<&PlayerId>,
    new_host: &PlayerId,
) -> Result<HostChangeResponse, ServiceError> {
    let previous = state
        .with_session_mut(|session| {
            let current = session.roster.host().cloned();
            if current.is_some() && current.as_ref() != acting_host {
                return Err(ServiceError::Unauthorized(
                    "only the current host can hand over the role".into(),
                ));
            }
            Ok(session.roster.set_host(new_host)?)
        })
        .await?;

    info!(host = %new_host, previous = ?previous, "host changed");
    broadcasts::broadcast_host_changed(state, Some(new_host.clone()), previous.clone());
    Ok(HostChangeResponse {
        host_id: new_host.clone(),
        previous_host_id: previous,
    })
}

/// Answer a resync request: `state.request` is echoed, then `state.response`
/// carries the snapshot.
pub async fn state_request(state: &SharedState, requester_id: Option<PlayerId>) -> SessionSnapshot {
    broadcasts::publish(
        state,
        GameBroadcast::StateRequest(StateRequestEvent {
            requester_id: requester_id.clone(),
        }),
    );
    let snapshot = game_service::build_snapshot(state).await;
    broadcasts::publish(
        state,
        GameBroadcast::StateResponse(Box::new(StateResponseEvent {
            requester_id,
            snapshot: snapshot.clone(),
        })),
    );
    snapshot
}

async fn tallying_index(state: &SharedState) -> Option<usize> {
    match state.state_machine_phase().await {
        GamePhase::Running(RoundPhase::AwaitingAnswers { index }) => Some(index),
        _ => None,
    }
}

fn withdraw_answer(
    session: &mut GameSession,
    player_id: &PlayerId,
    choice: Option<usize>,
    tallying: Option<usize>,
) {
    let Some(index) = tallying else {
        return;
    };
    let Some(round) = session
        .round
        .as_mut()
        .filter(|round| round.index == index && round.open)
    else {
        return;
    };
    if let Some(choice) = choice {
        round.untally(choice);
    }
    round.response_times.remove(player_id);
}

fn purge_player(
    session: &mut GameSession,
    player_id: &PlayerId,
    tallying: Option<usize>,
    departure: &mut Departure,
) {
    let choice = session.roster.answer_choice(player_id);
    withdraw_answer(session, player_id, choice, tallying);

    let was_host = session.roster.remove_player(player_id);
    if was_host && departure.host_change.is_none() {
        departure.host_change = Some((None, Some(player_id.clone())));
    }
    if let Some(device_id) = session.devices.release(player_id) {
        departure.released.push((device_id, player_id.clone()));
    }
}

fn promote_if_needed(session: &mut GameSession, auto_host: bool, departure: &mut Departure) {
    if !auto_host || session.roster.host().is_some() {
        return;
    }
    let Some(candidate) = session.roster.players().into_iter().next() else {
        return;
    };
    if session.roster.set_host(&candidate.id).is_ok() {
        let old = departure.host_change.take().and_then(|(_, old)| old);
        departure.host_change = Some((Some(candidate.id), old));
    }
}

fn publish_departure(state: &SharedState, departure: Departure) {
    for (device_id, player_id) in departure.released {
        broadcasts::broadcast_device_released(state, device_id, Some(player_id));
    }
    broadcasts::broadcast_devices_assigned(state, departure.assigned);
    if let Some((new, old)) = departure.host_change {
        broadcasts::broadcast_host_changed(state, new, old);
    }
}
