use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether a leaderboard store is installed, pinging it on the way.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.leaderboard_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "leaderboard store health check failed");
            }
        }
        None => warn!("leaderboard store unavailable (degraded mode)"),
    }

    if state.is_degraded().await {
        HealthResponse::degraded()
    } else {
        HealthResponse::ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig, dao::leaderboard_store::MemoryLeaderboardStore, state::AppState,
    };

    #[tokio::test]
    async fn degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .install_leaderboard_store(Arc::new(MemoryLeaderboardStore::new()))
            .await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
