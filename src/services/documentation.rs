use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Trivia Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::events_stream,
        crate::routes::websocket::ws_handler,
        crate::routes::game::load_questions,
        crate::routes::game::start_game,
        crate::routes::game::advance,
        crate::routes::game::reset,
        crate::routes::game::end_game,
        crate::routes::game::set_host,
        crate::routes::game::update_settings,
        crate::routes::game::adjust_score,
        crate::routes::game::session_state,
        crate::routes::game::leaderboard,
        crate::routes::game::global_leaderboard,
        crate::routes::game::list_devices,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::PlatformInboundMessage,
            crate::dto::ws::PlatformPlayer,
            crate::dto::ws::PlatformReply,
            crate::dto::events::EventName,
            crate::dto::events::QuestionShowEvent,
            crate::dto::events::ResultsEvent,
            crate::dto::events::AnswerSubmittedEvent,
            crate::dto::events::GameStartEvent,
            crate::dto::events::GameEndEvent,
            crate::dto::events::GameResetEvent,
            crate::dto::events::ScoreAwardEvent,
            crate::dto::events::HostChangedEvent,
            crate::dto::events::SettingsUpdateEvent,
            crate::dto::events::StateRequestEvent,
            crate::dto::events::StateResponseEvent,
            crate::dto::events::TimerTickEvent,
            crate::dto::events::TimerEndEvent,
            crate::dto::events::DeviceAssignedEvent,
            crate::dto::events::DeviceReleasedEvent,
            crate::dto::events::ParticipationEvent,
            crate::dto::common::SessionSnapshot,
            crate::dto::common::LeaderboardRow,
            crate::dto::common::QuestionPayload,
            crate::dto::phase::VisibleGamePhase,
            crate::state::game::GameSettings,
            crate::state::state_machine::FinishReason,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "events", description = "Server-sent game event stream"),
        (name = "platform", description = "WebSocket fed by the hosting platform"),
        (name = "game", description = "Host controls and session views"),
    )
)]
pub struct ApiDoc;
