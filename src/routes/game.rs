use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        common::SessionSnapshot,
        game::{
            ActionResponse, DeviceSummary, GlobalLeaderboardResponse, HostActionRequest,
            HostChangeResponse, LeaderboardQuery, LeaderboardResponse, LoadQuestionsRequest,
            LoadQuestionsResponse, ScoreAdjustmentRequest, ScoreUpdateResponse, SetHostRequest,
            UpdateSettingsRequest,
        },
    },
    error::AppError,
    services::{device_service, game_service, presence_service},
    state::{SharedState, game::GameSettings},
};

/// Host controls and read-only views of the running session.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/game/questions", post(load_questions))
        .route("/game/start", post(start_game))
        .route("/game/advance", post(advance))
        .route("/game/reset", post(reset))
        .route("/game/end", post(end_game))
        .route("/game/host", post(set_host))
        .route("/game/settings", post(update_settings))
        .route("/game/score", post(adjust_score))
        .route("/game/state", get(session_state))
        .route("/game/leaderboard", get(leaderboard))
        .route("/game/leaderboard/global", get(global_leaderboard))
        .route("/game/devices", get(list_devices))
}

/// Replace the question catalog. Lobby only.
#[utoipa::path(
    post,
    path = "/game/questions",
    tag = "game",
    request_body = LoadQuestionsRequest,
    responses(
        (status = 200, description = "Catalog replaced", body = LoadQuestionsResponse),
        (status = 400, description = "Invalid questions"),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "A game is running")
    )
)]
pub async fn load_questions(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<LoadQuestionsRequest>>,
) -> Result<Json<LoadQuestionsResponse>, AppError> {
    let questions = payload.questions.into_iter().map(Into::into).collect();
    let question_count = game_service::load_questions(&state, &payload.host_id, questions).await?;
    Ok(Json(LoadQuestionsResponse { question_count }))
}

#[utoipa::path(
    post,
    path = "/game/start",
    tag = "game",
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "First question shown", body = ActionResponse),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Game already running or catalog empty")
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<HostActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(game_service::start_game(&state, &payload.host_id).await?))
}

/// Close answers early, or skip the results pause.
#[utoipa::path(
    post,
    path = "/game/advance",
    tag = "game",
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Round advanced", body = ActionResponse),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "No round to advance")
    )
)]
pub async fn advance(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<HostActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(game_service::advance(&state, &payload.host_id).await?))
}

/// Abort whatever runs and go back to the lobby with scores cleared.
#[utoipa::path(
    post,
    path = "/game/reset",
    tag = "game",
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Session reset", body = ActionResponse),
        (status = 401, description = "Caller is not the host")
    )
)]
pub async fn reset(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<HostActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(game_service::reset(&state, &payload.host_id).await?))
}

/// Stop a running game, or dismiss a finished one.
#[utoipa::path(
    post,
    path = "/game/end",
    tag = "game",
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Game ended", body = ActionResponse),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "No game to end")
    )
)]
pub async fn end_game(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<HostActionRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    Ok(Json(game_service::end_game(&state, &payload.host_id).await?))
}

#[utoipa::path(
    post,
    path = "/game/host",
    tag = "game",
    request_body = SetHostRequest,
    responses(
        (status = 200, description = "Host changed", body = HostChangeResponse),
        (status = 400, description = "Player is not present"),
        (status = 401, description = "Caller is not the host")
    )
)]
pub async fn set_host(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<SetHostRequest>>,
) -> Result<Json<HostChangeResponse>, AppError> {
    let response = presence_service::set_host(
        &state,
        payload.acting_host_id.as_ref(),
        &payload.player_id,
    )
    .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/game/settings",
    tag = "game",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings stored", body = GameSettings),
        (status = 400, description = "Settings out of range"),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "A game is running")
    )
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<UpdateSettingsRequest>>,
) -> Result<Json<GameSettings>, AppError> {
    let settings =
        game_service::update_settings(&state, &payload.host_id, payload.settings).await?;
    Ok(Json(settings))
}

/// Apply a manual score correction.
#[utoipa::path(
    post,
    path = "/game/score",
    tag = "game",
    request_body = ScoreAdjustmentRequest,
    responses(
        (status = 200, description = "Score updated", body = ScoreUpdateResponse),
        (status = 401, description = "Caller is not the host"),
        (status = 404, description = "Player is not present")
    )
)]
pub async fn adjust_score(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<ScoreAdjustmentRequest>>,
) -> Result<Json<ScoreUpdateResponse>, AppError> {
    let response = game_service::adjust_score(
        &state,
        &payload.host_id,
        &payload.player_id,
        payload.delta,
    )
    .await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/game/state",
    tag = "game",
    responses((status = 200, description = "Current session snapshot", body = SessionSnapshot))
)]
pub async fn session_state(State(state): State<SharedState>) -> Json<SessionSnapshot> {
    Json(game_service::build_snapshot(&state).await)
}

/// Session leaderboard, best first.
#[utoipa::path(
    get,
    path = "/game/leaderboard",
    tag = "game",
    params(LeaderboardQuery),
    responses((status = 200, description = "Session leaderboard", body = LeaderboardResponse))
)]
pub async fn leaderboard(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<LeaderboardResponse> {
    Json(game_service::leaderboard(&state, query.limit).await)
}

/// Persistent leaderboard read from the store.
#[utoipa::path(
    get,
    path = "/game/leaderboard/global",
    tag = "game",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Stored leaderboard", body = GlobalLeaderboardResponse),
        (status = 503, description = "No leaderboard store is reachable")
    )
)]
pub async fn global_leaderboard(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<GlobalLeaderboardResponse>, AppError> {
    Ok(Json(game_service::global_leaderboard(&state, query.limit).await?))
}

#[utoipa::path(
    get,
    path = "/game/devices",
    tag = "game",
    responses((status = 200, description = "Device pool", body = [DeviceSummary]))
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<Vec<DeviceSummary>> {
    Json(device_service::list_devices(&state).await)
}
