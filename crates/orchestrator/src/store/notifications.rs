use super::Database;
use anyhow::Result;
use chrono::Utc;

impl Database {
    /// Records one delivery attempt. `content` is truncated to `max_chars`.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails.
    pub async fn log_notification(
        &self,
        channel: &str,
        content: &str,
        status: &str,
        max_chars: usize,
    ) -> Result<()> {
        let truncated: String = content.chars().take(max_chars).collect();

        sqlx::query(
            r"
            INSERT INTO notification_log (channel, content, status, timestamp)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(channel)
        .bind(truncated)
        .bind(status)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent notification attempts as `(channel, status, content)`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn notification_history(&self, limit: i64) -> Result<Vec<(String, String, String)>> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT channel, status, content FROM notification_log ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
