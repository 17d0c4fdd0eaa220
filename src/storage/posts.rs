use chrono::Utc;
use uuid::Uuid;

use super::schema::Database;
use super::types::{is_unique_violation, to_millis, DatabaseError, ItemInsert, NewItem, Post, PostRow};

/// Hard cap on rows returned by listing queries
const MAX_POSTS: i64 = 500;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Whether `feed_id` already has an item with this URL (the dedupe key).
    pub async fn item_exists(&self, feed_id: Uuid, url: &str) -> Result<bool, DatabaseError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM posts WHERE feed_id = ? AND url = ?)")
                .bind(feed_id)
                .bind(url)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Insert an item.
    ///
    /// A `UNIQUE(feed_id, url)` violation means another worker (or an earlier
    /// run) stored the item first; it is reported as [`ItemInsert::Duplicate`].
    pub async fn create_item(&self, item: &NewItem) -> Result<ItemInsert, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (id, feed_id, title, url, description, published_at, fetched_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(item.feed_id)
        .bind(&item.title)
        .bind(&item.url)
        .bind(&item.description)
        .bind(item.published_at.map(to_millis))
        .bind(to_millis(item.fetched_at))
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(ItemInsert::Created),
            Err(e) if is_unique_violation(&e) => Ok(ItemInsert::Duplicate),
            Err(e) => Err(DatabaseError::Other(e)),
        }
    }

    /// Posts of one feed, newest publication first
    pub async fn list_posts_for_feed(&self, feed_id: Uuid) -> Result<Vec<Post>, DatabaseError> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, feed_id, title, url, description, published_at, fetched_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY published_at DESC NULLS LAST, fetched_at DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_POSTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// Latest posts across every feed the user follows
    pub async fn list_posts_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(1, MAX_POSTS);
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.description, p.published_at, p.fetched_at
            FROM posts p
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC NULLS LAST, p.fetched_at DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seed() -> (Database, Uuid, Uuid) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        let feed = db
            .create_feed("Blog", "https://example.com/rss", user.id)
            .await
            .unwrap();
        (db, user.id, feed.id)
    }

    fn item(feed_id: Uuid, url: &str) -> NewItem {
        NewItem {
            feed_id,
            title: format!("Post at {url}"),
            url: url.to_string(),
            description: None,
            published_at: None,
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_item_then_exists() {
        let (db, _, feed_id) = seed().await;
        assert!(!db.item_exists(feed_id, "https://example.com/1").await.unwrap());

        let outcome = db
            .create_item(&item(feed_id, "https://example.com/1"))
            .await
            .unwrap();
        assert_eq!(outcome, ItemInsert::Created);
        assert!(db.item_exists(feed_id, "https://example.com/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_item_is_not_an_error() {
        let (db, _, feed_id) = seed().await;
        let first = item(feed_id, "https://example.com/1");
        db.create_item(&first).await.unwrap();

        let outcome = db.create_item(&first).await.unwrap();
        assert_eq!(outcome, ItemInsert::Duplicate);
        assert_eq!(db.list_posts_for_feed(feed_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_url_allowed_on_different_feeds() {
        let (db, user_id, feed_id) = seed().await;
        let other = db
            .create_feed("Other", "https://other.example/rss", user_id)
            .await
            .unwrap();

        let url = "https://example.com/shared";
        assert_eq!(db.create_item(&item(feed_id, url)).await.unwrap(), ItemInsert::Created);
        assert_eq!(db.create_item(&item(other.id, url)).await.unwrap(), ItemInsert::Created);
    }

    #[tokio::test]
    async fn test_posts_for_user_only_followed_feeds_newest_first() {
        let (db, user_id, feed_id) = seed().await;
        let unfollowed = db
            .create_feed("Other", "https://other.example/rss", user_id)
            .await
            .unwrap();
        db.create_feed_follow(user_id, feed_id).await.unwrap();

        let now = Utc::now();
        let mut old = item(feed_id, "https://example.com/old");
        old.published_at = Some(now - Duration::days(2));
        let mut new = item(feed_id, "https://example.com/new");
        new.published_at = Some(now - Duration::hours(1));
        db.create_item(&old).await.unwrap();
        db.create_item(&new).await.unwrap();
        db.create_item(&item(unfollowed.id, "https://other.example/1"))
            .await
            .unwrap();

        let urls: Vec<_> = db
            .list_posts_for_user(user_id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.url)
            .collect();
        assert_eq!(urls, vec!["https://example.com/new", "https://example.com/old"]);
    }
}
