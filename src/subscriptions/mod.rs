//! Eligible-recipient collaborator. User and billing management live
//! elsewhere; the engine only asks who should hear about a token and how
//! to reach them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::Storage;

/// Delivery destinations on file for one user.
#[derive(Debug, Clone, Default)]
pub struct Contact {
    pub telegram_chat_id: Option<String>,
    pub email: Option<String>,
}

#[async_trait]
pub trait Subscriptions: Send + Sync {
    /// Users subscribed to this token (or to all tokens), active only.
    async fn eligible_users(&self, token_id: &str) -> anyhow::Result<Vec<i64>>;

    async fn contact(&self, user_id: i64) -> anyhow::Result<Option<Contact>>;
}

/// Storage-backed implementation over the subscriptions/subscribers tables.
pub struct SqliteSubscriptions {
    storage: Arc<Storage>,
}

impl SqliteSubscriptions {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Subscriptions for SqliteSubscriptions {
    async fn eligible_users(&self, token_id: &str) -> anyhow::Result<Vec<i64>> {
        let users = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT s.user_id
            FROM subscriptions s
            JOIN subscribers u ON u.user_id = s.user_id AND u.is_active = 1
            WHERE s.is_active = 1 AND (s.token_id = ? OR s.token_id IS NULL)
            ORDER BY s.user_id
            "#,
        )
        .bind(token_id)
        .fetch_all(self.storage.pool())
        .await?;
        Ok(users)
    }

    async fn contact(&self, user_id: i64) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT telegram_chat_id, email FROM subscribers WHERE user_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_optional(self.storage.pool())
        .await?;
        Ok(row.map(|(telegram_chat_id, email)| Contact {
            telegram_chat_id,
            email,
        }))
    }
}
