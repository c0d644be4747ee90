//! Signal lifecycle: window dedup and the raise-only update rule.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::storage::{NewToken, SignalCandidate, SignalUpsert, Storage, StorageError};

/// Window starts within this many seconds of each other are the same window.
pub const WINDOW_TOLERANCE_SECS: i64 = 60;

pub struct SignalStore {
    storage: Arc<Storage>,
    default_chain: String,
}

impl SignalStore {
    pub fn new(storage: Arc<Storage>, default_chain: String) -> Self {
        Self {
            storage,
            default_chain,
        }
    }

    /// Create or update the signal for the candidate's (token, window).
    ///
    /// A missing token row is created on demand from the best metadata
    /// available; when no metadata is derivable the candidate is dropped
    /// and `None` is returned, never an error.
    pub async fn upsert(
        &self,
        candidate: SignalCandidate,
    ) -> Result<Option<SignalUpsert>, StorageError> {
        if self.storage.get_token(&candidate.token_id).await?.is_none() {
            let Some(metadata) = self.derive_token_metadata(&candidate.token_id) else {
                warn!(
                    "Dropping signal for token {:?}: no metadata derivable for lazy creation",
                    candidate.token_id
                );
                return Ok(None);
            };
            self.storage.ensure_token(&metadata).await?;
            info!("Lazily cataloged token {} before signal write", candidate.token_id);
        }

        let outcome = self
            .storage
            .upsert_signal(&candidate, WINDOW_TOLERANCE_SECS)
            .await?;

        match &outcome {
            SignalUpsert::Inserted(signal) => {
                info!(
                    "Signal created: token={} type={:?} score={:.1}",
                    signal.token_id, signal.signal_type, signal.score
                );
            }
            SignalUpsert::Raised(signal) => {
                info!(
                    "Signal raised in place: token={} type={:?} score={:.1}",
                    signal.token_id, signal.signal_type, signal.score
                );
            }
            SignalUpsert::Kept(signal) => {
                debug!(
                    "Signal unchanged: token={} existing score {:.1} >= candidate {:.1}",
                    signal.token_id, signal.score, candidate.score
                );
            }
        }

        Ok(Some(outcome))
    }

    fn derive_token_metadata(&self, token_id: &str) -> Option<NewToken> {
        if token_id.trim().is_empty() {
            return None;
        }
        // The contract address is the only metadata activity rows carry
        let symbol = token_id
            .trim_start_matches("0x")
            .chars()
            .take(6)
            .collect::<String>()
            .to_uppercase();
        Some(NewToken {
            chain: self.default_chain.clone(),
            address: token_id.to_string(),
            symbol,
            decimals: 18,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SignalType, Window};

    fn candidate(token_id: &str, score: f64) -> SignalCandidate {
        SignalCandidate {
            token_id: token_id.to_string(),
            score,
            signal_type: SignalType::WhaleInflow,
            window: Window { start: 0, end: 3600 },
            wallets_involved: Vec::new(),
        }
    }

    #[tokio::test]
    async fn unknown_token_is_lazily_cataloged() {
        let storage = Arc::new(Storage::connect_in_memory().await.unwrap());
        let store = SignalStore::new(storage.clone(), "ethereum".to_string());

        let outcome = store.upsert(candidate("0xfeedface", 85.0)).await.unwrap();
        assert!(outcome.is_some());

        let token = storage.get_token("0xfeedface").await.unwrap().unwrap();
        assert_eq!(token.chain, "ethereum");
        assert_eq!(token.symbol, "FEEDFA");
        assert!(token.is_active);
    }

    #[tokio::test]
    async fn candidate_without_metadata_is_dropped_quietly() {
        let storage = Arc::new(Storage::connect_in_memory().await.unwrap());
        let store = SignalStore::new(storage, "ethereum".to_string());

        let outcome = store.upsert(candidate("", 85.0)).await.unwrap();
        assert!(outcome.is_none());
    }
}
