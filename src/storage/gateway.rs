use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::schema::Database;
use super::types::{DatabaseError, Feed, ItemInsert, NewItem};

/// The persistence operations the ingestion core depends on.
///
/// Implementations must enforce `(feed_id, url)` uniqueness themselves:
/// `create_item` reports a conflicting insert as [`ItemInsert::Duplicate`]
/// rather than creating a second row, whatever `item_exists` said earlier.
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError>;

    /// Stalest first; never-fetched feeds lead.
    async fn list_feeds_by_staleness(&self) -> Result<Vec<Feed>, DatabaseError>;

    async fn item_exists(&self, feed_id: Uuid, url: &str) -> Result<bool, DatabaseError>;

    async fn create_item(&self, item: &NewItem) -> Result<ItemInsert, DatabaseError>;

    async fn update_feed_last_fetched(
        &self,
        feed_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn list_followers_of_feed(&self, feed_id: Uuid) -> Result<Vec<Uuid>, DatabaseError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        Database::get_feed_by_url(self, url).await
    }

    async fn list_feeds_by_staleness(&self) -> Result<Vec<Feed>, DatabaseError> {
        Database::list_feeds_by_staleness(self).await
    }

    async fn item_exists(&self, feed_id: Uuid, url: &str) -> Result<bool, DatabaseError> {
        Database::item_exists(self, feed_id, url).await
    }

    async fn create_item(&self, item: &NewItem) -> Result<ItemInsert, DatabaseError> {
        Database::create_item(self, item).await
    }

    async fn update_feed_last_fetched(
        &self,
        feed_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        Database::update_feed_last_fetched(self, feed_id, at).await
    }

    async fn list_followers_of_feed(&self, feed_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        Database::list_followers_of_feed(self, feed_id).await
    }
}
