use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dto::events::{EventName, GameBroadcast, StateResponseEvent},
    error::ServiceError,
    services::game_service,
    state::{SharedState, bus::Subscription},
};

/// Parse the comma-separated `names` filter. `None` streams every event.
pub fn parse_names(raw: Option<&str>) -> Result<Option<Vec<EventName>>, ServiceError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| name.parse::<EventName>().map_err(ServiceError::from))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Subscribe to the hub with an optional name filter.
pub fn subscribe(state: &SharedState, names: Option<Vec<EventName>>) -> Subscription {
    match names {
        Some(names) => state.events().subscribe(names),
        None => state.events().subscribe_all(),
    }
}

/// Serialize one broadcast as an SSE event carrying its wire name.
pub fn to_sse_event(event: &GameBroadcast) -> Option<Event> {
    let name = event.name();
    match Event::default().event(name.as_str()).json_data(event) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = %name, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}

/// Forward a subscription to an SSE response, starting with a session snapshot
/// when the subscriber listens to `state.response`. The subscription is removed
/// from the hub once the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    mut subscription: Subscription,
    with_snapshot: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        if with_snapshot {
            let snapshot = game_service::build_snapshot(&state).await;
            let greeting = GameBroadcast::StateResponse(Box::new(StateResponseEvent {
                requester_id: None,
                snapshot,
            }));
            if let Some(event) = to_sse_event(&greeting) {
                if tx.send(Ok(event)).await.is_err() {
                    state.events().unsubscribe(subscription.id());
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                received = subscription.recv() => {
                    let Some(broadcast) = received else { break };
                    let Some(event) = to_sse_event(&broadcast) else { continue };
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        state.events().unsubscribe(subscription.id());
        info!("event stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
