#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;

use crate::dao::{models::LeaderboardRecord, storage::StorageResult};

pub use memory::MemoryLeaderboardStore;

/// Abstraction over the persistent, cross-session leaderboard.
pub trait LeaderboardStore: Send + Sync {
    /// Upsert the score of `player_id` on `leaderboard`.
    ///
    /// With `overwrite` the score always replaces the stored one, otherwise the best
    /// of both is kept. Returns the stored record.
    fn set_score_for_player(
        &self,
        leaderboard: &str,
        player_id: &str,
        score: i64,
        overwrite: bool,
    ) -> BoxFuture<'static, StorageResult<LeaderboardRecord>>;
    /// Best `limit` records of `leaderboard`, best first.
    fn top_scores(
        &self,
        leaderboard: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LeaderboardRecord>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
