// ABOUTME: Typed dataset handles and the bot-facing entry points for players, tokens and game state.
// ABOUTME: Also defines DatasetSource, the collaborator that supplies a full dataset for cache refreshes.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quizlog_core::{
    Dataset, GameSession, GameStates, LogEntry, PlayerStats, Players, TokenMetadata, Tokens,
};
use serde::Serialize;

use crate::store::{Store, StoreError};

/// Error type returned by a DatasetSource.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Something that can produce the complete current contents of a dataset,
/// such as the NFT metadata client. The store does not care where the data
/// comes from.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    type Value: Serialize + Send + Sync;

    async fn fetch_all(&self) -> Result<BTreeMap<String, Self::Value>, SourceError>;
}

/// A view of one dataset with its record type fixed by `D`.
pub struct DatasetHandle<'a, D: Dataset> {
    store: &'a Store,
    _dataset: PhantomData<D>,
}

impl<D: Dataset> DatasetHandle<'_, D> {
    pub fn name(&self) -> &'static str {
        D::NAME
    }

    pub async fn upsert(&self, key: &str, value: &D::Value) -> Result<LogEntry, StoreError> {
        self.store.upsert(D::NAME, key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<LogEntry, StoreError> {
        self.store.delete(D::NAME, key).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<D::Value>, StoreError> {
        self.store.get(D::NAME, key).await
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, D::Value>, StoreError> {
        self.store.get_all(D::NAME).await
    }

    pub async fn replace_all(&self, mapping: &BTreeMap<String, D::Value>) -> Result<(), StoreError> {
        self.store.replace_all(D::NAME, mapping).await
    }
}

impl Store {
    /// Typed access to a well-known dataset.
    pub fn dataset<D: Dataset>(&self) -> DatasetHandle<'_, D> {
        DatasetHandle {
            store: self,
            _dataset: PhantomData,
        }
    }

    /// Persist a player's updated statistics.
    pub async fn record_player_stats(
        &self,
        user_id: &str,
        stats: &PlayerStats,
    ) -> Result<LogEntry, StoreError> {
        self.dataset::<Players>().upsert(user_id, stats).await
    }

    pub async fn player_stats(&self, user_id: &str) -> Result<Option<PlayerStats>, StoreError> {
        self.dataset::<Players>().get(user_id).await
    }

    /// Save the in-progress game for a channel.
    pub async fn save_game_state(
        &self,
        channel_id: &str,
        session: &GameSession,
    ) -> Result<LogEntry, StoreError> {
        self.dataset::<GameStates>().upsert(channel_id, session).await
    }

    /// Forget the game for a channel once its round is over.
    pub async fn clear_game_state(&self, channel_id: &str) -> Result<LogEntry, StoreError> {
        self.dataset::<GameStates>().delete(channel_id).await
    }

    pub async fn game_state(&self, channel_id: &str) -> Result<Option<GameSession>, StoreError> {
        self.dataset::<GameStates>().get(channel_id).await
    }

    /// Replace the token metadata cache with a freshly fetched set.
    pub async fn cache_tokens(
        &self,
        tokens: &BTreeMap<String, TokenMetadata>,
    ) -> Result<(), StoreError> {
        self.dataset::<Tokens>().replace_all(tokens).await
    }

    pub async fn cached_tokens(&self) -> Result<BTreeMap<String, TokenMetadata>, StoreError> {
        self.dataset::<Tokens>().get_all().await
    }

    /// Refill a dataset from `source` if its snapshot is missing or older
    /// than `max_age`. Returns whether a refresh happened.
    pub async fn refresh_from_source<S: DatasetSource>(
        &self,
        dataset: &str,
        source: &S,
        max_age: Duration,
    ) -> Result<bool, StoreError> {
        if let Some(saved_at) = self.last_updated(dataset).await? {
            let age = (Utc::now() - saved_at).to_std().unwrap_or_default();
            if age < max_age {
                tracing::debug!("{} refreshed {:?} ago, skipping", dataset, age);
                return Ok(false);
            }
        }

        let mapping = source.fetch_all().await.map_err(StoreError::Source)?;
        tracing::info!("refreshing {} with {} records from source", dataset, mapping.len());
        self.replace_all(dataset, &mapping).await?;
        Ok(true)
    }
}
