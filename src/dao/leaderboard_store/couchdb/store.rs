use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};

use crate::dao::{
    leaderboard_store::LeaderboardStore,
    models::{LeaderboardRecord, merge_score, rank_records},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{AllDocsResponse, CouchScoreDocument, END_SUFFIX, board_prefix, score_doc_id},
};

const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct CouchLeaderboardStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

enum PutOutcome {
    Stored,
    Conflict,
}

impl CouchLeaderboardStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    // Document ids carry player ids, which may need escaping.
    fn document_url(&self, doc_id: &str) -> CouchResult<Url> {
        let invalid = || CouchDaoError::RequestStatus {
            path: doc_id.to_string(),
            status: StatusCode::BAD_REQUEST,
        };
        let mut url = Url::parse(&self.database_url()).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .push(doc_id);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, self.document_url(doc_id)?)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<PutOutcome>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, self.document_url(doc_id)?)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Stored),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn upsert_score(
        &self,
        leaderboard: &str,
        player_id: &str,
        score: i64,
        overwrite: bool,
    ) -> CouchResult<LeaderboardRecord> {
        let doc_id = score_doc_id(leaderboard, player_id);

        // Optimistic concurrency on `_rev`: re-read and retry when another writer won.
        for _ in 0..MAX_CONFLICT_RETRIES {
            let existing = self.get_document::<CouchScoreDocument>(&doc_id).await?;
            let (rev, current) = match existing {
                Some(doc) => (doc.rev.clone(), Some(doc.into_record())),
                None => (None, None),
            };

            let merged = merge_score(current.as_ref().map(|record| record.score), score, overwrite);
            if let Some(current) = current.filter(|record| record.score == merged) {
                return Ok(current);
            }

            let record = LeaderboardRecord::new(leaderboard, player_id, merged);
            let document = CouchScoreDocument::from_record(record.clone(), rev);
            match self.put_document(&doc_id, &document).await? {
                PutOutcome::Stored => return Ok(record),
                PutOutcome::Conflict => continue,
            }
        }

        Err(CouchDaoError::Conflict {
            path: doc_id,
            attempts: MAX_CONFLICT_RETRIES,
        })
    }

    async fn list_board(&self, leaderboard: &str) -> CouchResult<Vec<LeaderboardRecord>> {
        const ALL_DOCS: &str = "_all_docs";
        let prefix = board_prefix(leaderboard);
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, self.document_url(ALL_DOCS)?)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        Ok(payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(CouchScoreDocument::into_record)
            .collect())
    }
}

impl LeaderboardStore for CouchLeaderboardStore {
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
                .upsert_score(&leaderboard, &player_id, score, overwrite)
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
            let mut records = store.list_board(&leaderboard).await?;
            rank_records(&mut records);
            records.truncate(limit);
            Ok(records)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
