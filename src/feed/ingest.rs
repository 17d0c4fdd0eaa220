use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::fetcher::{FeedFetcher, FetchError};
use super::parser::{parse_feed, ParseError, ParseOptions, ParsedItem};
use crate::shutdown::Shutdown;
use crate::storage::{DatabaseError, Feed, FeedStore, ItemInsert, NewItem};

/// Failures that end an ingestion cycle early.
///
/// None of these stop the scheduler; they are reported per feed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),
}

impl IngestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Fetch(FetchError::Cancelled))
    }
}

/// Outcome of one fetch-parse-reconcile cycle.
#[derive(Debug)]
pub struct IngestReport {
    pub feed_id: Uuid,
    /// Items created by this cycle
    pub new_items: usize,
    /// Items the parser rejected plus items without a URL
    pub skipped_items: usize,
    /// Followers of the feed, looked up only when `new_items > 0`
    pub followers: Vec<Uuid>,
    /// First error encountered, if any
    pub error: Option<IngestError>,
}

impl IngestReport {
    fn new(feed_id: Uuid) -> Self {
        Self {
            feed_id,
            new_items: 0,
            skipped_items: 0,
            followers: Vec::new(),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn record_error(&mut self, error: impl Into<IngestError>) {
        self.error.get_or_insert(error.into());
    }
}

/// Runs fetch-parse-reconcile cycles for single feeds.
///
/// Safe to call concurrently, including for the same feed: the store's
/// `(feed_id, url)` constraint turns a lost check-then-insert race into
/// [`ItemInsert::Duplicate`].
pub struct IngestionEngine {
    store: Arc<dyn FeedStore>,
    fetcher: FeedFetcher,
    parse_options: ParseOptions,
}

impl IngestionEngine {
    pub fn new(store: Arc<dyn FeedStore>, fetcher: FeedFetcher, parse_options: ParseOptions) -> Self {
        Self {
            store,
            fetcher,
            parse_options,
        }
    }

    /// Runs one ingestion cycle for `feed`.
    ///
    /// Fetch and parse failures still advance the feed's `last_fetched_at`
    /// so a broken feed waits its turn like any other. A fetch cancelled by
    /// `shutdown` did not complete and leaves the timestamp alone.
    pub async fn run(&self, feed: &Feed, shutdown: &Shutdown) -> IngestReport {
        let mut report = IngestReport::new(feed.id);

        match self.fetch_and_parse(feed, shutdown).await {
            Ok((items, rejected)) => {
                report.skipped_items += rejected;
                let fetched_at = Utc::now();
                if let Err(e) = self.reconcile(feed, items, fetched_at, &mut report).await {
                    tracing::warn!(feed = %feed.url, error = %e, "Storing feed items failed");
                    report.record_error(e);
                }
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(feed = %feed.url, "Ingestion cancelled before fetch completed");
                report.record_error(e);
                return report;
            }
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Feed fetch failed");
                report.record_error(e);
            }
        }

        if let Err(e) = self.store.update_feed_last_fetched(feed.id, Utc::now()).await {
            tracing::warn!(feed = %feed.url, error = %e, "Failed to record fetch time");
            report.record_error(e);
        }

        if report.new_items > 0 {
            match self.store.list_followers_of_feed(feed.id).await {
                Ok(followers) => report.followers = followers,
                Err(e) => {
                    tracing::warn!(feed = %feed.url, error = %e, "Failed to load feed followers");
                }
            }
        }

        if report.is_ok() {
            tracing::info!(
                feed = %feed.url,
                new = report.new_items,
                skipped = report.skipped_items,
                followers = report.followers.len(),
                "Feed ingested"
            );
        }

        report
    }

    /// Returns the parsed items and the number of items the parser rejected.
    async fn fetch_and_parse(
        &self,
        feed: &Feed,
        shutdown: &Shutdown,
    ) -> Result<(Vec<ParsedItem>, usize), IngestError> {
        let bytes = self.fetcher.fetch(&feed.url, shutdown).await?;
        let parsed = parse_feed(&bytes, &self.parse_options)?;

        for err in &parsed.errors {
            tracing::warn!(feed = %feed.url, error = %err, "Skipped malformed item");
        }
        tracing::debug!(
            feed = %feed.url,
            title = %parsed.title,
            items = parsed.items.len(),
            "Parsed feed"
        );

        Ok((parsed.items, parsed.errors.len()))
    }

    /// Stores every item not yet present under `feed`, in parser order.
    async fn reconcile(
        &self,
        feed: &Feed,
        items: Vec<ParsedItem>,
        fetched_at: DateTime<Utc>,
        report: &mut IngestReport,
    ) -> Result<(), DatabaseError> {
        for (index, item) in items.into_iter().enumerate() {
            if item.link.is_empty() {
                tracing::warn!(
                    feed = %feed.url,
                    item = index,
                    title = %item.title,
                    "Skipping item without a URL"
                );
                report.skipped_items += 1;
                continue;
            }

            if self.store.item_exists(feed.id, &item.link).await? {
                continue;
            }

            let new_item = NewItem {
                feed_id: feed.id,
                title: item.title,
                url: item.link,
                description: Some(item.description).filter(|d| !d.is_empty()),
                published_at: item.published,
                fetched_at,
            };

            match self.store.create_item(&new_item).await? {
                ItemInsert::Created => report.new_items += 1,
                ItemInsert::Duplicate => {
                    tracing::debug!(feed = %feed.url, url = %new_item.url, "Item stored concurrently");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::fetcher::FetcherOptions;
    use crate::shutdown;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TWO_ITEMS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Test</title>
    <item><title>Cats &amp; Dogs</title><link>https://example.com/1</link><pubDate>Mon, 02 Jan 2006 15:04:05 +0000</pubDate></item>
    <item><title>Second</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    async fn serve(body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;
        mock_server
    }

    async fn setup_db_with_feed(url: &str) -> (Database, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        let feed = db.create_feed("Test", url, user.id).await.unwrap();
        (db, feed)
    }

    fn engine(store: Arc<dyn FeedStore>) -> IngestionEngine {
        let fetcher = FeedFetcher::new(&FetcherOptions::default()).unwrap();
        IngestionEngine::new(store, fetcher, ParseOptions::default())
    }

    async fn last_fetched(db: &Database, url: &str) -> Option<DateTime<Utc>> {
        db.get_feed_by_url(url).await.unwrap().unwrap().last_fetched_at
    }

    #[tokio::test]
    async fn test_run_stores_new_items() {
        let mock_server = serve(TWO_ITEMS).await;
        let url = format!("{}/feed", mock_server.uri());
        let (db, feed) = setup_db_with_feed(&url).await;

        let report = engine(Arc::new(db.clone())).run(&feed, &Shutdown::never()).await;
        assert!(report.is_ok(), "{:?}", report.error);
        assert_eq!(report.new_items, 2);

        let posts = db.list_posts_for_feed(feed.id).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().any(|p| p.title == "Cats & Dogs"));
        assert!(last_fetched(&db, &url).await.is_some());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let mock_server = serve(TWO_ITEMS).await;
        let (db, feed) = setup_db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let engine = engine(Arc::new(db.clone()));

        assert_eq!(engine.run(&feed, &Shutdown::never()).await.new_items, 2);
        let second = engine.run(&feed, &Shutdown::never()).await;
        assert!(second.is_ok());
        assert_eq!(second.new_items, 0);
        assert_eq!(db.list_posts_for_feed(feed.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_still_advances_last_fetched() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        let url = format!("{}/feed", mock_server.uri());
        let (db, feed) = setup_db_with_feed(&url).await;

        let report = engine(Arc::new(db.clone())).run(&feed, &Shutdown::never()).await;
        assert!(matches!(
            report.error,
            Some(IngestError::Fetch(FetchError::HttpStatus(404)))
        ));
        assert_eq!(report.new_items, 0);
        assert!(last_fetched(&db, &url).await.is_some());
    }

    #[tokio::test]
    async fn test_parse_failure_still_advances_last_fetched() {
        let mock_server = serve("<not valid xml").await;
        let url = format!("{}/feed", mock_server.uri());
        let (db, feed) = setup_db_with_feed(&url).await;

        let report = engine(Arc::new(db.clone())).run(&feed, &Shutdown::never()).await;
        assert!(matches!(report.error, Some(IngestError::Parse(_))));
        assert!(last_fetched(&db, &url).await.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_leaves_last_fetched() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(TWO_ITEMS)
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&mock_server)
            .await;
        let url = format!("{}/feed", mock_server.uri());
        let (db, feed) = setup_db_with_feed(&url).await;

        let (trigger, shutdown) = shutdown::channel();
        let engine = engine(Arc::new(db.clone()));
        let run = engine.run(&feed, &shutdown);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.trigger();
        };
        let (report, ()) = tokio::join!(run, cancel);

        assert!(report.error.as_ref().is_some_and(IngestError::is_cancelled));
        assert!(last_fetched(&db, &url).await.is_none());
    }

    #[tokio::test]
    async fn test_items_without_url_skipped() {
        let mock_server = serve(
            r#"<rss><channel>
            <item><title>No link</title></item>
            <item><title>Linked</title><link>https://example.com/a</link></item>
            </channel></rss>"#,
        )
        .await;
        let (db, feed) = setup_db_with_feed(&format!("{}/feed", mock_server.uri())).await;

        let report = engine(Arc::new(db.clone())).run(&feed, &Shutdown::never()).await;
        assert!(report.is_ok());
        assert_eq!(report.new_items, 1);
        assert_eq!(report.skipped_items, 1);
    }

    #[tokio::test]
    async fn test_followers_reported_for_new_items() {
        let mock_server = serve(TWO_ITEMS).await;
        let (db, feed) = setup_db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let bob = db.create_user("bob").await.unwrap();
        db.create_feed_follow(bob.id, feed.id).await.unwrap();

        let engine = engine(Arc::new(db.clone()));
        let first = engine.run(&feed, &Shutdown::never()).await;
        assert_eq!(first.followers, vec![bob.id]);

        let second = engine.run(&feed, &Shutdown::never()).await;
        assert!(second.followers.is_empty());
    }

    /// Store that claims nothing exists, forcing every insert through the
    /// uniqueness constraint.
    struct ForgetfulStore {
        inner: Database,
        exists_calls: AtomicUsize,
    }

    #[async_trait]
    impl FeedStore for ForgetfulStore {
        async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
            self.inner.get_feed_by_url(url).await
        }
        async fn list_feeds_by_staleness(&self) -> Result<Vec<Feed>, DatabaseError> {
            self.inner.list_feeds_by_staleness().await
        }
        async fn item_exists(&self, _feed_id: Uuid, _url: &str) -> Result<bool, DatabaseError> {
            self.exists_calls.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
        async fn create_item(&self, item: &NewItem) -> Result<ItemInsert, DatabaseError> {
            self.inner.create_item(item).await
        }
        async fn update_feed_last_fetched(
            &self,
            feed_id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<(), DatabaseError> {
            self.inner.update_feed_last_fetched(feed_id, at).await
        }
        async fn list_followers_of_feed(&self, feed_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
            self.inner.list_followers_of_feed(feed_id).await
        }
    }

    #[tokio::test]
    async fn test_constraint_violation_treated_as_existing() {
        let mock_server = serve(TWO_ITEMS).await;
        let (db, feed) = setup_db_with_feed(&format!("{}/feed", mock_server.uri())).await;
        let store = Arc::new(ForgetfulStore {
            inner: db.clone(),
            exists_calls: AtomicUsize::new(0),
        });
        let engine = engine(store.clone());

        assert_eq!(engine.run(&feed, &Shutdown::never()).await.new_items, 2);
        let second = engine.run(&feed, &Shutdown::never()).await;
        assert!(second.is_ok(), "{:?}", second.error);
        assert_eq!(second.new_items, 0);
        assert_eq!(store.exists_calls.load(Ordering::Relaxed), 4);
        assert_eq!(db.list_posts_for_feed(feed.id).await.unwrap().len(), 2);
    }
}
