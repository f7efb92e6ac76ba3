use std::{collections::HashMap, sync::Arc, time::SystemTime};

use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::dao::{
    leaderboard_store::LeaderboardStore,
    models::{LeaderboardRecord, merge_score, rank_records},
    storage::StorageResult,
};

/// Process-local store, used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryLeaderboardStore {
    boards: Arc<DashMap<String, HashMap<String, LeaderboardRecord>>>,
}

impl MemoryLeaderboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(
        &self,
        leaderboard: &str,
        player_id: &str,
        score: i64,
        overwrite: bool,
    ) -> LeaderboardRecord {
        let mut board = self.boards.entry(leaderboard.to_string()).or_default();
        let record = board
            .entry(player_id.to_string())
            .or_insert_with(|| LeaderboardRecord::new(leaderboard, player_id, score));

        let merged = merge_score(Some(record.score), score, overwrite);
        if merged != record.score {
            record.score = merged;
            record.updated_at = SystemTime::now();
        }
        record.clone()
    }

    fn top(&self, leaderboard: &str, limit: usize) -> Vec<LeaderboardRecord> {
        let mut records: Vec<_> = self
            .boards
            .get(leaderboard)
            .map(|board| board.values().cloned().collect())
            .unwrap_or_default();
        rank_records(&mut records);
        records.truncate(limit);
        records
    }
}

impl LeaderboardStore for MemoryLeaderboardStore {
    fn set_score_for_player(
        &self,
        leaderboard: &str,
        player_id: &str,
        score: i64,
        overwrite: bool,
    ) -> BoxFuture<'static, StorageResult<LeaderboardRecord>> {
        let record = self.upsert(leaderboard, player_id, score, overwrite);
        Box::pin(async move { Ok(record) })
    }

    fn top_scores(
        &self,
        leaderboard: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LeaderboardRecord>>> {
        let records = self.top(leaderboard, limit);
        Box::pin(async move { Ok(records) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn best_score_survives_lower_submission() {
        let store = MemoryLeaderboardStore::new();
        store.set_score_for_player("weekly", "a", 300, false).await.unwrap();
        let record = store.set_score_for_player("weekly", "a", 100, false).await.unwrap();
        assert_eq!(record.score, 300);

        let record = store.set_score_for_player("weekly", "a", 100, true).await.unwrap();
        assert_eq!(record.score, 100);
    }

    #[tokio::test]
    async fn top_scores_are_ranked_and_scoped_per_board() {
        let store = MemoryLeaderboardStore::new();
        store.set_score_for_player("weekly", "a", 100, false).await.unwrap();
        store.set_score_for_player("weekly", "b", 250, false).await.unwrap();
        store.set_score_for_player("weekly", "c", 200, false).await.unwrap();
        store.set_score_for_player("monthly", "d", 900, false).await.unwrap();

        let top = store.top_scores("weekly", 2).await.unwrap();
        let ids: Vec<_> = top.iter().map(|record| record.player_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(store.top_scores("unknown", 5).await.unwrap().is_empty());
    }
}
