use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{leaderboard_store::LeaderboardStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a leaderboard store installed, running in degraded mode while none is reachable.
///
/// Connects with exponential backoff, then polls the store health. A failed health
/// check uninstalls the store until a reconnect succeeds; after
/// [`MAX_RECONNECT_ATTEMPTS`] failures a fresh connection is attempted.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn LeaderboardStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_leaderboard_store(store.clone()).await;
                info!("leaderboard store connected; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded().await {
                                info!("leaderboard store healthy again; leaving degraded mode");
                                state.install_leaderboard_store(store.clone()).await;
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(err) => {
                            warn!(error = %err, "leaderboard store health check failed");
                            if reconnect(&state, store.as_ref()).await {
                                state.install_leaderboard_store(store.clone()).await;
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            }
                            warn!("exhausted store reconnect attempts; staying in degraded mode");
                            break;
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "leaderboard store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

async fn reconnect(state: &SharedState, store: &dyn LeaderboardStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "leaderboard store reconnected after health check failure");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(
                        attempt, error = %err,
                        "store reconnect first attempt failed; entering degraded mode"
                    );
                    state.clear_leaderboard_store().await;
                } else {
                    warn!(attempt, error = %err, "store reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{leaderboard_store::MemoryLeaderboardStore, models::LeaderboardRecord},
        state::AppState,
    };

    /// Store whose health can be toggled from the test.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemoryLeaderboardStore,
        healthy: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn status(&self) -> Result<(), StorageError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StorageError::unavailable(
                    "store offline".into(),
                    std::io::Error::other("health check refused"),
                ))
            }
        }
    }

    impl LeaderboardStore for FlakyStore {
        fn set_score_for_player(
            &self,
            leaderboard: &str,
            player_id: &str,
            score: i64,
            overwrite: bool,
        ) -> BoxFuture<'static, Result<LeaderboardRecord, StorageError>> {
            self.inner
                .set_score_for_player(leaderboard, player_id, score, overwrite)
        }

        fn top_scores(
            &self,
            leaderboard: &str,
            limit: usize,
        ) -> BoxFuture<'static, Result<Vec<LeaderboardRecord>, StorageError>> {
            self.inner.top_scores(leaderboard, limit)
        }

        fn health_check(&self) -> BoxFuture<'static, Result<(), StorageError>> {
            let status = self.status();
            Box::pin(async move { status })
        }

        fn try_reconnect(&self) -> BoxFuture<'static, Result<(), StorageError>> {
            self.health_check()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_connection_then_tracks_health() {
        let state = AppState::new(AppConfig::default());
        let store = FlakyStore::default();
        store.healthy.store(true, Ordering::SeqCst);
        let attempts = Arc::new(AtomicUsize::new(0));

        let connect_store = store.clone();
        let connect_attempts = Arc::clone(&attempts);
        tokio::spawn(run(Arc::clone(&state), move || {
            let store = connect_store.clone();
            let attempt = connect_attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(StorageError::unavailable(
                        "connection refused".into(),
                        std::io::Error::other("first attempt"),
                    ))
                } else {
                    Ok(Arc::new(store) as Arc<dyn LeaderboardStore>)
                }
            }
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(state.is_degraded().await);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(!state.is_degraded().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        store.healthy.store(false, Ordering::SeqCst);
        tokio::time::sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(100)).await;
        assert!(state.is_degraded().await);

        store.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!state.is_degraded().await);
    }
}
