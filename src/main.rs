//! Trivia Back binary entrypoint wiring REST, WebSocket, SSE and leaderboard store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trivia_back::{
    config::AppConfig,
    dao::{
        leaderboard_store::{LeaderboardStore, MemoryLeaderboardStore},
        storage::StorageError,
    },
    routes,
    services::{game_service, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let initial_questions = config.initial_questions();
    let app_state = AppState::new(config);
    let loaded = game_service::install_catalog(&app_state, initial_questions).await;
    info!(questions = loaded, "question catalog ready");

    let backend = StoreBackend::from_env();
    info!(backend = ?backend, "leaderboard store selected");
    tokio::spawn(storage_supervisor::run(app_state.clone(), move || {
        connect_store(backend)
    }));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Which leaderboard backend the supervisor keeps connected.
#[derive(Debug, Clone, Copy)]
enum StoreBackend {
    #[cfg(feature = "mongo-store")]
    Mongo,
    #[cfg(feature = "couch-store")]
    Couch,
    Memory,
}

impl StoreBackend {
    /// `MONGO_URI` wins over `COUCH_BASE_URL`; without either scores live in memory.
    fn from_env() -> Self {
        #[cfg(feature = "mongo-store")]
        {
            if env::var_os("MONGO_URI").is_some() {
                return Self::Mongo;
            }
        }
        #[cfg(feature = "couch-store")]
        {
            if env::var_os("COUCH_BASE_URL").is_some() {
                return Self::Couch;
            }
        }
        Self::Memory
    }
}

async fn connect_store(backend: StoreBackend) -> Result<Arc<dyn LeaderboardStore>, StorageError> {
    match backend {
        #[cfg(feature = "mongo-store")]
        StoreBackend::Mongo => {
            use trivia_back::dao::leaderboard_store::mongodb::{MongoConfig, MongoLeaderboardStore};

            let config = MongoConfig::from_env().await?;
            let store = MongoLeaderboardStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "couch-store")]
        StoreBackend::Couch => {
            use trivia_back::dao::leaderboard_store::couchdb::{CouchConfig, CouchLeaderboardStore};

            let config = CouchConfig::from_env()?;
            let store = CouchLeaderboardStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryLeaderboardStore::new())),
    }
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
