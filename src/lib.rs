//! gator: a multi-user RSS aggregator.
//!
//! Users register feeds and follow them; a background collector fetches the
//! stalest feeds on an interval and stores new posts in SQLite.

pub mod commands;
pub mod config;
pub mod feed;
pub mod shutdown;
pub mod storage;
pub mod util;
