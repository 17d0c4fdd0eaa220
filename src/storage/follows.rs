use chrono::Utc;
use uuid::Uuid;

use super::schema::Database;
use super::types::{is_unique_violation, to_millis, DatabaseError, FeedFollow, FollowRow};

impl Database {
    // ========================================================================
    // Follow Operations
    // ========================================================================

    /// Subscribe `user_id` to `feed_id`. Each (user, feed) pair exists once.
    pub async fn create_feed_follow(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
    ) -> Result<FeedFollow, DatabaseError> {
        let id = Uuid::new_v4();
        let now = to_millis(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO feed_follows (id, user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::AlreadyFollowing
            } else {
                DatabaseError::Other(e)
            }
        })?;

        let row = sqlx::query_as::<_, FollowRow>(
            r#"
            SELECT ff.id, ff.user_id, ff.feed_id, f.name AS feed_name, f.url AS feed_url,
                   ff.created_at
            FROM feed_follows ff
            JOIN feeds f ON f.id = ff.feed_id
            WHERE ff.id = ?
        "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Remove a subscription. Returns false when the user did not follow the feed.
    pub async fn delete_feed_follow(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Feeds a user follows, in subscription order
    pub async fn list_follows_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FeedFollow>, DatabaseError> {
        let rows = sqlx::query_as::<_, FollowRow>(
            r#"
            SELECT ff.id, ff.user_id, ff.feed_id, f.name AS feed_name, f.url AS feed_url,
                   ff.created_at
            FROM feed_follows ff
            JOIN feeds f ON f.id = ff.feed_id
            WHERE ff.user_id = ?
            ORDER BY ff.created_at, f.name
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FeedFollow::from).collect())
    }

    /// IDs of the users following a feed (the fan-out set for new items)
    pub async fn list_followers_of_feed(&self, feed_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM feed_follows WHERE feed_id = ? ORDER BY created_at")
                .bind(feed_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
