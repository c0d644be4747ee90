use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// A tracked asset. Owned by the catalog; the engine reads it and may
/// request lazy creation when activity references an unknown token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: String,
    pub chain: String,
    pub address: String,
    pub symbol: String,
    pub decimals: i64,
    pub is_active: bool,
}

/// Best-available metadata for lazy token creation
#[derive(Debug, Clone)]
pub struct NewToken {
    pub chain: String,
    pub address: String,
    pub symbol: String,
    pub decimals: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub token_id: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletPosition {
    pub token_id: String,
    pub address: String,
    pub balance: f64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DexSwap {
    pub id: i64,
    pub token_id: String,
    pub wallet: String,
    pub amount_usd: f64,
    pub side: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LiquidityEvent {
    pub id: i64,
    pub token_id: String,
    pub delta_usd: f64,
    pub timestamp: i64,
}

/// Bounded `[start, end)` range in unix seconds over which activity is
/// aggregated for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn ending_at(end: i64, length_secs: i64) -> Self {
        Self {
            start: end - length_secs,
            end,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum SignalType {
    #[serde(rename = "WHALE_INFLOW")]
    #[sqlx(rename = "WHALE_INFLOW")]
    WhaleInflow,
    #[serde(rename = "CONCENTRATED_BUYS")]
    #[sqlx(rename = "CONCENTRATED_BUYS")]
    ConcentratedBuys,
}

/// Persisted, scored, time-windowed detection result for a token
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Signal {
    pub id: String,
    pub token_id: String,
    pub score: f64,
    pub signal_type: SignalType,
    pub window_start: i64,
    pub window_end: i64,
    pub wallets_involved: Json<Vec<String>>,
    pub created_at: i64,
}

/// Candidate produced by one evaluation, before window dedup
#[derive(Debug, Clone)]
pub struct SignalCandidate {
    pub token_id: String,
    pub score: f64,
    pub signal_type: SignalType,
    pub window: Window,
    pub wallets_involved: Vec<String>,
}

/// Outcome of the transactional signal upsert
#[derive(Debug, Clone)]
pub enum SignalUpsert {
    /// No signal existed in the window; a new one was inserted
    Inserted(Signal),
    /// An existing signal was superseded by a strictly higher score
    Raised(Signal),
    /// The existing signal already had an equal or higher score
    Kept(Signal),
}

impl SignalUpsert {
    pub fn signal(&self) -> &Signal {
        match self {
            SignalUpsert::Inserted(s) | SignalUpsert::Raised(s) | SignalUpsert::Kept(s) => s,
        }
    }

    pub fn into_signal(self) -> Signal {
        match self {
            SignalUpsert::Inserted(s) | SignalUpsert::Raised(s) | SignalUpsert::Kept(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum AlertStatus {
    #[serde(rename = "PENDING")]
    #[sqlx(rename = "PENDING")]
    Pending,
    #[serde(rename = "DELIVERED")]
    #[sqlx(rename = "DELIVERED")]
    Delivered,
    #[serde(rename = "FAILED")]
    #[sqlx(rename = "FAILED")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum AlertType {
    #[serde(rename = "ACCUMULATION")]
    #[sqlx(rename = "ACCUMULATION")]
    Accumulation,
    #[serde(rename = "WHALE_MOVEMENT")]
    #[sqlx(rename = "WHALE_MOVEMENT")]
    WhaleMovement,
}

/// Per-variant alert payload; serialized into the alert's metadata column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AlertMetadata {
    #[serde(rename = "accumulation")]
    Accumulation {
        score: f64,
        signal_type: SignalType,
        wallets_involved: Vec<String>,
    },
    #[serde(rename = "whale_movement")]
    WhaleMovement {
        amount: f64,
        from_address: String,
        to_address: String,
    },
}

/// Delivery channel flags carried on each alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertChannels {
    pub telegram: bool,
    pub email: bool,
}

impl Default for AlertChannels {
    fn default() -> Self {
        Self {
            telegram: false,
            email: true,
        }
    }
}

impl AlertChannels {
    pub fn none(&self) -> bool {
        !self.telegram && !self.email
    }
}

/// Per-user, per-signal notification record with delivery status
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: String,
    pub user_id: i64,
    pub signal_id: Option<String>,
    pub token_id: String,
    pub alert_type: AlertType,
    pub channel_telegram: bool,
    pub channel_email: bool,
    pub status: AlertStatus,
    pub metadata: Json<AlertMetadata>,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
}

impl Alert {
    pub fn channels(&self) -> AlertChannels {
        AlertChannels {
            telegram: self.channel_telegram,
            email: self.channel_email,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: i64,
    pub signal_id: Option<String>,
    pub token_id: String,
    pub alert_type: AlertType,
    pub channels: AlertChannels,
    pub metadata: AlertMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_as_tagged_json() {
        let metadata = AlertMetadata::Accumulation {
            score: 82.5,
            signal_type: SignalType::WhaleInflow,
            wallets_involved: vec!["0xabc".to_string()],
        };
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains(r#""kind":"accumulation""#));
        assert!(json.contains(r#""WHALE_INFLOW""#));
        let back: AlertMetadata = serde_json::from_str(&json).unwrap();
        match back {
            AlertMetadata::Accumulation { score, .. } => assert_eq!(score, 82.5),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn default_channels_are_email_only() {
        let channels = AlertChannels::default();
        assert!(channels.email);
        assert!(!channels.telegram);
        assert!(!channels.none());
    }
}
