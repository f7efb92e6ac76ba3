/// Helpers publishing on the event hub.
pub mod broadcasts;
/// Device pool operations triggered by the platform.
pub mod device_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Session coordinator: rounds, timers, scoring and host actions.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// Presence, participation and host hand-offs.
pub mod presence_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
/// Leaderboard store connection supervisor.
pub mod storage_supervisor;
/// WebSocket connection and message handling service.
pub mod websocket_service;
