//! SQLite persistence collaborator for the detection and alert engine.
//!
//! Everything below is plain read/write contract surface: the engine never
//! holds its own locks around these calls, it relies on the pool and on the
//! transactional upsert path for consistency.

use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

pub mod migrations;
pub mod models;

pub use models::*;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Connect, tune the SQLite handle, and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let db_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        if db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::Connection(format!("create data dir: {}", e)))?;
            }
        }

        let options: SqliteConnectOptions = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| StorageError::Connection(format!("invalid database URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::run(&pool).await?;

        tracing::info!("Storage connected: {}", database_url);
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    pub async fn connect_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- token catalog ----

    pub async fn get_token(&self, id: &str) -> Result<Option<Token>, StorageError> {
        let token = sqlx::query_as::<_, Token>(
            "SELECT id, chain, address, symbol, decimals, is_active FROM tokens WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    /// Lazy creation: insert if missing, re-activate if present.
    pub async fn ensure_token(&self, new: &NewToken) -> Result<Token, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO tokens (id, chain, address, symbol, decimals, is_active)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET is_active = 1
            "#,
        )
        .bind(&new.address)
        .bind(&new.chain)
        .bind(&new.address)
        .bind(&new.symbol)
        .bind(new.decimals)
        .execute(&self.pool)
        .await?;

        let token = sqlx::query_as::<_, Token>(
            "SELECT id, chain, address, symbol, decimals, is_active FROM tokens WHERE id = ?",
        )
        .bind(&new.address)
        .fetch_one(&self.pool)
        .await?;
        Ok(token)
    }

    pub async fn list_active_tokens(&self) -> Result<Vec<Token>, StorageError> {
        let tokens = sqlx::query_as::<_, Token>(
            "SELECT id, chain, address, symbol, decimals, is_active FROM tokens WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    /// Token ids seen in recent transactions but absent from the catalog.
    pub async fn uncataloged_token_ids(&self, since: i64) -> Result<Vec<String>, StorageError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT token_id FROM transactions
            WHERE timestamp >= ? AND token_id NOT IN (SELECT id FROM tokens)
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // ---- activity reads ----

    pub async fn list_transactions(
        &self,
        token_id: &str,
        window: Window,
    ) -> Result<Vec<Transaction>, StorageError> {
        let txs = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, token_id, from_address, to_address, amount, timestamp
            FROM transactions
            WHERE token_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp
            "#,
        )
        .bind(token_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(txs)
    }

    pub async fn top_wallet_positions(
        &self,
        token_id: &str,
        n: i64,
    ) -> Result<Vec<WalletPosition>, StorageError> {
        let positions = sqlx::query_as::<_, WalletPosition>(
            r#"
            SELECT token_id, address, balance, updated_at
            FROM wallet_balances
            WHERE token_id = ?
            ORDER BY balance DESC
            LIMIT ?
            "#,
        )
        .bind(token_id)
        .bind(n)
        .fetch_all(&self.pool)
        .await?;
        Ok(positions)
    }

    pub async fn list_dex_swaps(
        &self,
        token_id: &str,
        window: Window,
    ) -> Result<Vec<DexSwap>, StorageError> {
        let swaps = sqlx::query_as::<_, DexSwap>(
            r#"
            SELECT id, token_id, wallet, amount_usd, side, timestamp
            FROM dex_swaps
            WHERE token_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp
            "#,
        )
        .bind(token_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(swaps)
    }

    pub async fn list_liquidity_events(
        &self,
        token_id: &str,
        window: Window,
    ) -> Result<Vec<LiquidityEvent>, StorageError> {
        let events = sqlx::query_as::<_, LiquidityEvent>(
            r#"
            SELECT id, token_id, delta_usd, timestamp
            FROM liquidity_events
            WHERE token_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp
            "#,
        )
        .bind(token_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    // ---- activity writes (ingestion-facing) ----

    pub async fn record_transaction(
        &self,
        token_id: &str,
        from_address: &str,
        to_address: &str,
        amount: f64,
        timestamp: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (token_id, from_address, to_address, amount, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(token_id)
        .bind(from_address)
        .bind(to_address)
        .bind(amount)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_wallet_balance(
        &self,
        token_id: &str,
        address: &str,
        balance: f64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO wallet_balances (token_id, address, balance, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(token_id, address) DO UPDATE SET
                balance = excluded.balance,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(token_id)
        .bind(address)
        .bind(balance)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_dex_swap(
        &self,
        token_id: &str,
        wallet: &str,
        amount_usd: f64,
        side: &str,
        timestamp: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO dex_swaps (token_id, wallet, amount_usd, side, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token_id)
        .bind(wallet)
        .bind(amount_usd)
        .bind(side)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_liquidity_event(
        &self,
        token_id: &str,
        delta_usd: f64,
        timestamp: i64,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO liquidity_events (token_id, delta_usd, timestamp) VALUES (?, ?, ?)")
            .bind(token_id)
            .bind(delta_usd)
            .bind(timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---- signal lifecycle ----

    /// Transactional window-dedup upsert.
    ///
    /// At most one signal may exist per token per overlapping window
    /// (window starts within `tolerance_secs` are the same window), and an
    /// existing signal's score is only ever raised in place, never lowered.
    /// The read-check-write runs inside one transaction so two
    /// near-simultaneous ticks cannot both insert.
    pub async fn upsert_signal(
        &self,
        candidate: &SignalCandidate,
        tolerance_secs: i64,
    ) -> Result<SignalUpsert, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, Signal>(
            r#"
            SELECT id, token_id, score, signal_type, window_start, window_end,
                   wallets_involved, created_at
            FROM signals
            WHERE token_id = ? AND ABS(window_start - ?) <= ?
            ORDER BY ABS(window_start - ?)
            LIMIT 1
            "#,
        )
        .bind(&candidate.token_id)
        .bind(candidate.window.start)
        .bind(tolerance_secs)
        .bind(candidate.window.start)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some(signal) if candidate.score <= signal.score => {
                tx.commit().await?;
                SignalUpsert::Kept(signal)
            }
            Some(mut signal) => {
                sqlx::query(
                    r#"
                    UPDATE signals
                    SET score = ?, signal_type = ?, wallets_involved = ?
                    WHERE id = ?
                    "#,
                )
                .bind(candidate.score)
                .bind(candidate.signal_type)
                .bind(serde_json::to_string(&candidate.wallets_involved)?)
                .bind(&signal.id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                signal.score = candidate.score;
                signal.signal_type = candidate.signal_type;
                signal.wallets_involved = Json(candidate.wallets_involved.clone());
                SignalUpsert::Raised(signal)
            }
            None => {
                let signal = Signal {
                    id: Uuid::new_v4().to_string(),
                    token_id: candidate.token_id.clone(),
                    score: candidate.score,
                    signal_type: candidate.signal_type,
                    window_start: candidate.window.start,
                    window_end: candidate.window.end,
                    wallets_involved: Json(candidate.wallets_involved.clone()),
                    created_at: Utc::now().timestamp(),
                };
                sqlx::query(
                    r#"
                    INSERT INTO signals
                        (id, token_id, score, signal_type, window_start, window_end,
                         wallets_involved, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&signal.id)
                .bind(&signal.token_id)
                .bind(signal.score)
                .bind(signal.signal_type)
                .bind(signal.window_start)
                .bind(signal.window_end)
                .bind(serde_json::to_string(&candidate.wallets_involved)?)
                .bind(signal.created_at)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                SignalUpsert::Inserted(signal)
            }
        };

        Ok(outcome)
    }

    pub async fn get_signal(&self, id: &str) -> Result<Option<Signal>, StorageError> {
        let signal = sqlx::query_as::<_, Signal>(
            r#"
            SELECT id, token_id, score, signal_type, window_start, window_end,
                   wallets_involved, created_at
            FROM signals WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(signal)
    }

    // ---- alert lifecycle ----

    pub async fn create_alert(&self, new: NewAlert) -> Result<Alert, StorageError> {
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            user_id: new.user_id,
            signal_id: new.signal_id,
            token_id: new.token_id,
            alert_type: new.alert_type,
            channel_telegram: new.channels.telegram,
            channel_email: new.channels.email,
            status: AlertStatus::Pending,
            metadata: Json(new.metadata),
            created_at: Utc::now().timestamp(),
            delivered_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, user_id, signal_id, token_id, alert_type,
                 channel_telegram, channel_email, status, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(alert.user_id)
        .bind(&alert.signal_id)
        .bind(&alert.token_id)
        .bind(alert.alert_type)
        .bind(alert.channel_telegram)
        .bind(alert.channel_email)
        .bind(alert.status)
        .bind(serde_json::to_string(&alert.metadata.0)?)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;

        Ok(alert)
    }

    pub async fn update_alert_status(
        &self,
        id: &str,
        status: AlertStatus,
        delivered_at: Option<i64>,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE alerts SET status = ?, delivered_at = ? WHERE id = ?")
            .bind(status)
            .bind(delivered_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recent PENDING alert of the same (user, type, token) created at
    /// or after `since`. Terminal alerts never suppress a fresh one.
    pub async fn find_recent_alert(
        &self,
        user_id: i64,
        alert_type: AlertType,
        token_id: &str,
        since: i64,
    ) -> Result<Option<Alert>, StorageError> {
        let alert = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, user_id, signal_id, token_id, alert_type,
                   channel_telegram, channel_email, status, metadata,
                   created_at, delivered_at
            FROM alerts
            WHERE user_id = ? AND alert_type = ? AND token_id = ?
              AND status = ? AND created_at >= ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(alert_type)
        .bind(token_id)
        .bind(AlertStatus::Pending)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(alert)
    }

    /// Channel flags of the user's most recent alert for this token, used to
    /// inherit preferences on the next alert.
    pub async fn latest_alert_channels(
        &self,
        user_id: i64,
        token_id: &str,
    ) -> Result<Option<AlertChannels>, StorageError> {
        let row = sqlx::query_as::<_, (bool, bool)>(
            r#"
            SELECT channel_telegram, channel_email
            FROM alerts
            WHERE user_id = ? AND token_id = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(telegram, email)| AlertChannels { telegram, email }))
    }

    pub async fn list_alerts_for_signal(
        &self,
        signal_id: &str,
        status: AlertStatus,
    ) -> Result<Vec<Alert>, StorageError> {
        let alerts = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, user_id, signal_id, token_id, alert_type,
                   channel_telegram, channel_email, status, metadata,
                   created_at, delivered_at
            FROM alerts
            WHERE signal_id = ? AND status = ?
            ORDER BY created_at
            "#,
        )
        .bind(signal_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    /// Bounded batch of PENDING alerts created at or before `created_before`,
    /// oldest first.
    pub async fn list_pending_alerts(
        &self,
        created_before: i64,
        limit: i64,
    ) -> Result<Vec<Alert>, StorageError> {
        let alerts = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, user_id, signal_id, token_id, alert_type,
                   channel_telegram, channel_email, status, metadata,
                   created_at, delivered_at
            FROM alerts
            WHERE status = 'PENDING' AND created_at <= ?
            ORDER BY created_at
            LIMIT ?
            "#,
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>, StorageError> {
        let alert = sqlx::query_as::<_, Alert>(
            r#"
            SELECT id, user_id, signal_id, token_id, alert_type,
                   channel_telegram, channel_email, status, metadata,
                   created_at, delivered_at
            FROM alerts WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(alert)
    }

    // ---- subscription fixtures (user management itself lives elsewhere) ----

    pub async fn upsert_subscriber(
        &self,
        user_id: i64,
        telegram_chat_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (user_id, telegram_chat_id, email, is_active)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(user_id) DO UPDATE SET
                telegram_chat_id = excluded.telegram_chat_id,
                email = excluded.email,
                is_active = 1
            "#,
        )
        .bind(user_id)
        .bind(telegram_chat_id)
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `token_id = None` subscribes the user to every tracked token.
    pub async fn upsert_subscription(
        &self,
        user_id: i64,
        token_id: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, token_id, is_active)
            VALUES (?, ?, 1)
            ON CONFLICT(user_id, token_id) DO UPDATE SET is_active = 1
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(token_id: &str, score: f64, start: i64) -> SignalCandidate {
        SignalCandidate {
            token_id: token_id.to_string(),
            score,
            signal_type: SignalType::ConcentratedBuys,
            window: Window {
                start,
                end: start + 3600,
            },
            wallets_involved: vec!["0xaaa".to_string()],
        }
    }

    #[tokio::test]
    async fn upsert_keeps_higher_existing_score() {
        let storage = Storage::connect_in_memory().await.unwrap();

        let first = storage.upsert_signal(&candidate("tok", 90.0, 1000), 60).await.unwrap();
        assert!(matches!(first, SignalUpsert::Inserted(_)));

        let second = storage.upsert_signal(&candidate("tok", 75.0, 1000), 60).await.unwrap();
        match second {
            SignalUpsert::Kept(signal) => assert_eq!(signal.score, 90.0),
            other => panic!("expected Kept, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn upsert_raises_lower_existing_score() {
        let storage = Storage::connect_in_memory().await.unwrap();

        storage.upsert_signal(&candidate("tok", 72.0, 1000), 60).await.unwrap();
        let mut raised = candidate("tok", 88.0, 1030);
        raised.signal_type = SignalType::WhaleInflow;
        raised.wallets_involved = vec!["0xbbb".to_string()];

        let outcome = storage.upsert_signal(&raised, 60).await.unwrap();
        match outcome {
            SignalUpsert::Raised(ref signal) => {
                assert_eq!(signal.score, 88.0);
                assert_eq!(signal.signal_type, SignalType::WhaleInflow);
                assert_eq!(signal.wallets_involved.0, vec!["0xbbb".to_string()]);
                // The original window is kept; only the reading changed
                assert_eq!(signal.window_start, 1000);
            }
            other => panic!("expected Raised, got {:?}", other),
        }

        let stored = storage.get_signal(outcome.signal().id.as_str()).await.unwrap().unwrap();
        assert_eq!(stored.score, 88.0);
    }

    #[tokio::test]
    async fn windows_within_tolerance_share_a_signal() {
        let storage = Storage::connect_in_memory().await.unwrap();

        let a = storage.upsert_signal(&candidate("tok", 70.0, 1000), 60).await.unwrap();
        // 60 seconds later: same window
        let b = storage.upsert_signal(&candidate("tok", 71.0, 1060), 60).await.unwrap();
        assert_eq!(a.signal().id, b.signal().id);

        // 61 seconds later: a distinct window
        let c = storage.upsert_signal(&candidate("tok", 70.5, 1061), 60).await.unwrap();
        assert!(matches!(c, SignalUpsert::Inserted(_)));
        assert_ne!(a.signal().id, c.signal().id);
    }

    #[tokio::test]
    async fn ensure_token_is_idempotent() {
        let storage = Storage::connect_in_memory().await.unwrap();
        let new = NewToken {
            chain: "ethereum".to_string(),
            address: "0xdeadbeef".to_string(),
            symbol: "0XDEAD".to_string(),
            decimals: 18,
        };
        let a = storage.ensure_token(&new).await.unwrap();
        let b = storage.ensure_token(&new).await.unwrap();
        assert_eq!(a.id, b.id);
        assert!(b.is_active);
    }

    #[tokio::test]
    async fn pending_alert_listing_is_bounded_and_ordered() {
        let storage = Storage::connect_in_memory().await.unwrap();
        for user_id in 0..5 {
            storage
                .create_alert(NewAlert {
                    user_id,
                    signal_id: None,
                    token_id: "tok".to_string(),
                    alert_type: AlertType::Accumulation,
                    channels: AlertChannels::default(),
                    metadata: AlertMetadata::Accumulation {
                        score: 80.0,
                        signal_type: SignalType::WhaleInflow,
                        wallets_involved: vec![],
                    },
                })
                .await
                .unwrap();
        }

        let now = Utc::now().timestamp();
        let batch = storage.list_pending_alerts(now, 3).await.unwrap();
        assert_eq!(batch.len(), 3);

        // Delivered alerts leave the sweep queue
        storage
            .update_alert_status(&batch[0].id, AlertStatus::Delivered, Some(now))
            .await
            .unwrap();
        let batch = storage.list_pending_alerts(now, 10).await.unwrap();
        assert_eq!(batch.len(), 4);
    }

    #[tokio::test]
    async fn file_backed_connect_creates_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("engine.db");
        let url = format!("sqlite:{}", db_path.display());

        let storage = Storage::connect(&url).await.unwrap();
        assert!(db_path.parent().unwrap().is_dir());

        // Schema ran: writes survive to a fresh connection over the same file
        storage
            .ensure_token(&NewToken {
                chain: "ethereum".to_string(),
                address: "0xdisk".to_string(),
                symbol: "DISK".to_string(),
                decimals: 18,
            })
            .await
            .unwrap();
        drop(storage);

        let reopened = Storage::connect(&url).await.unwrap();
        let token = reopened.get_token("0xdisk").await.unwrap().unwrap();
        assert_eq!(token.symbol, "DISK");
    }
}
