//! Read-only evaluation input assembled fresh per (token, window).

use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::{
    DexSwap, LiquidityEvent, Storage, StorageError, Token, Transaction, WalletPosition, Window,
};

/// Ephemeral snapshot of one token's activity; lifetime is one evaluation.
#[derive(Debug, Clone)]
pub struct DetectionContext {
    pub token: Token,
    pub window: Window,
    pub transactions: Vec<Transaction>,
    pub top_positions: Vec<WalletPosition>,
    pub swaps: Vec<DexSwap>,
    pub liquidity_events: Vec<LiquidityEvent>,
}

impl DetectionContext {
    /// Total inbound transfer volume per receiving address.
    pub fn inbound_by_address(&self) -> HashMap<&str, f64> {
        let mut inbound: HashMap<&str, f64> = HashMap::new();
        for tx in &self.transactions {
            *inbound.entry(tx.to_address.as_str()).or_insert(0.0) += tx.amount;
        }
        inbound
    }

    /// Net balance delta per wallet over the window (inbound minus outbound).
    pub fn net_delta_by_address(&self) -> HashMap<&str, f64> {
        let mut deltas: HashMap<&str, f64> = HashMap::new();
        for tx in &self.transactions {
            *deltas.entry(tx.to_address.as_str()).or_insert(0.0) += tx.amount;
            *deltas.entry(tx.from_address.as_str()).or_insert(0.0) -= tx.amount;
        }
        deltas
    }

    pub fn total_volume(&self) -> f64 {
        self.transactions.iter().map(|tx| tx.amount).sum()
    }
}

pub struct ContextBuilder {
    storage: Arc<Storage>,
    top_positions: i64,
}

impl ContextBuilder {
    pub fn new(storage: Arc<Storage>, top_positions: i64) -> Self {
        Self {
            storage,
            top_positions,
        }
    }

    pub async fn build(
        &self,
        token: Token,
        window: Window,
    ) -> Result<DetectionContext, StorageError> {
        let transactions = self.storage.list_transactions(&token.id, window).await?;
        let top_positions = self
            .storage
            .top_wallet_positions(&token.id, self.top_positions)
            .await?;
        let swaps = self.storage.list_dex_swaps(&token.id, window).await?;
        let liquidity_events = self.storage.list_liquidity_events(&token.id, window).await?;

        Ok(DetectionContext {
            token,
            window,
            transactions,
            top_positions,
            swaps,
            liquidity_events,
        })
    }
}
