use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// One entry of the access controller's swipe log.
///
/// Ids increase by one per log entry and are used as the archive cursor.
/// Id 0 marks a reboot or otherwise unreadable row and is never handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwipeRecord {
    pub id: i64,
    pub card_id: i64,
    /// Display name or dash-stripped user id, as stored on the card
    pub name: String,
    pub status: String,
    /// Door the swipe was allowed through, empty for denied swipes
    pub door_id: String,
    pub time: DateTime<Utc>,
}

impl SwipeRecord {
    /// Highest swipe id already archived
    pub async fn latest_id(pool: &PgPool) -> Result<Option<i64>, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM swipes ORDER BY id DESC LIMIT 1
            "#,
        )
        .fetch_optional(pool)
        .await?;

        Ok(id)
    }

    /// Archives this swipe under the resolved display name.
    ///
    /// Returns false when the id was already present.
    pub async fn insert(&self, pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO swipes (id, card_id, door_id, time, name, seen_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(self.id)
        .bind(self.card_id)
        .bind(&self.door_id)
        .bind(self.time)
        .bind(name)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
