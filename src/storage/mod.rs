//! SQLite persistence for users, feeds, follows and posts.
//!
//! [`Database`] owns the connection pool and exposes CRUD helpers grouped by
//! table. The ingestion core only sees the narrower [`FeedStore`] trait.

mod feeds;
mod follows;
mod gateway;
mod posts;
mod schema;
mod types;
mod users;

pub use gateway::FeedStore;
pub use schema::Database;
pub use types::{
    DatabaseError, Feed, FeedFollow, FeedListing, ItemInsert, NewItem, Post, User,
};
