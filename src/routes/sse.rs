use std::convert::Infallible;

use axum::{
    Router,
    extract::{Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::{events::EventName, sse::EventStreamQuery},
    error::AppError,
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/events",
    tag = "events",
    params(EventStreamQuery),
    responses(
        (status = 200, description = "Game event stream", content_type = "text/event-stream", body = String),
        (status = 400, description = "Unknown event name in the filter")
    )
)]
/// Stream game events to renderers, optionally filtered by name.
///
/// Subscribers to `state.response` receive a session snapshot first.
pub async fn events_stream(
    State(state): State<SharedState>,
    Query(query): Query<EventStreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let names = sse_service::parse_names(query.names.as_deref())?;
    let with_snapshot = names
        .as_ref()
        .is_none_or(|names| names.contains(&EventName::StateResponse));
    info!(filter = ?names, "new event stream connection");
    let subscription = sse_service::subscribe(&state, names);
    Ok(sse_service::to_sse_stream(state, subscription, with_snapshot))
}

/// Configure the SSE endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sse/events", get(events_stream))
}
