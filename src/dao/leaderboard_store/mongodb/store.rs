use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{DateTime, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoScoreDocument, score_doc_id},
};
use crate::dao::{
    leaderboard_store::LeaderboardStore, models::LeaderboardRecord, storage::StorageResult,
};

const SCORE_COLLECTION_NAME: &str = "leaderboard_scores";

#[derive(Clone)]
pub struct MongoLeaderboardStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Kept alive alongside the database handle.
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoLeaderboardStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! { "leaderboard": 1, "score": -1 })
            .options(
                IndexOptions::builder()
                    .name(Some("leaderboard_score_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SCORE_COLLECTION_NAME,
                index: "leaderboard,score",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoScoreDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoScoreDocument>(SCORE_COLLECTION_NAME)
    }

    /// Single atomic upsert: `$max` keeps the best score, `$set` replaces it.
    async fn upsert_score(
        &self,
        leaderboard: String,
        player_id: String,
        score: i64,
        overwrite: bool,
    ) -> MongoResult<LeaderboardRecord> {
        let collection = self.collection().await;
        let now = DateTime::now();
        let update = if overwrite {
            doc! {
                "$set": {
                    "leaderboard": leaderboard.as_str(),
                    "player_id": player_id.as_str(),
                    "score": score,
                    "updated_at": now,
                }
            }
        } else {
            doc! {
                "$max": { "score": score },
                "$set": {
                    "leaderboard": leaderboard.as_str(),
                    "player_id": player_id.as_str(),
                    "updated_at": now,
                }
            }
        };

        let stored = collection
            .find_one_and_update(score_doc_id(&leaderboard, &player_id), update)
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::SaveScore {
                leaderboard: leaderboard.clone(),
                player_id: player_id.clone(),
                source,
            })?;

        Ok(stored.map(Into::into).unwrap_or_else(|| LeaderboardRecord {
            leaderboard,
            player_id,
            score,
            updated_at: now.to_system_time(),
        }))
    }

    async fn ranked_scores(
        &self,
        leaderboard: String,
        limit: usize,
    ) -> MongoResult<Vec<LeaderboardRecord>> {
        let collection = self.collection().await;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let documents: Vec<MongoScoreDocument> = collection
            .find(doc! { "leaderboard": leaderboard.as_str() })
            .sort(doc! { "score": -1, "updated_at": 1, "player_id": 1 })
            .limit(limit)
            .await
            .map_err(|source| MongoDaoError::ListScores {
                leaderboard: leaderboard.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListScores {
                leaderboard: leaderboard.clone(),
                source,
            })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }
}

impl LeaderboardStore for MongoLeaderboardStore {
    fn set_score_for_player(
        &self,
        leaderboard: &str,
        player_id: &str,
        score: i64,
        overwrite: bool,
    ) -> BoxFuture<'static, StorageResult<LeaderboardRecord>> {
        let store = self.clone();
        let leaderboard = leaderboard.to_string();
        let player_id = player_id.to_string();
        Box::pin(async move {
            store
                .upsert_score(leaderboard, player_id, score, overwrite)
                .await
                .map_err(Into::into)
        })
    }

    fn top_scores(
        &self,
        leaderboard: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LeaderboardRecord>>> {
        let store = self.clone();
        let leaderboard = leaderboard.to_string();
        Box::pin(async move {
            store
                .ranked_scores(leaderboard, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
