//! CLI commands and their handlers.
//!
//! `main` parses a [`Command`] once and hands it to [`run`] together with the
//! explicit [`State`] every handler works against.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::feed::{FeedFetcher, IngestReport, IngestionEngine, Scheduler};
use crate::shutdown::Shutdown;
use crate::storage::{Database, DatabaseError, FeedStore, User};
use crate::util::{strip_control_chars, truncate_chars, validate_url};

/// Default number of posts shown by `browse`
pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

const DESCRIPTION_PREVIEW_CHARS: usize = 200;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// List all users
    Users,
    /// Delete every user along with their feeds, follows and posts
    Reset,
    /// Register a feed and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// List every registered feed
    Feeds,
    /// Follow an already registered feed
    Follow { url: String },
    /// Stop following a feed
    Unfollow { url: String },
    /// List the feeds the current user follows
    Following,
    /// Collect feeds on an interval until interrupted
    Agg {
        /// Time between ticks, e.g. 30s, 5m, 1h. Defaults to the configured interval.
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Duration>,
        /// Ingest the stalest feed once and exit
        #[arg(long)]
        once: bool,
    },
    /// Ingest one registered feed now
    Fetch { url: String },
    /// Show the newest posts from followed feeds
    Browse {
        #[arg(long, default_value_t = DEFAULT_BROWSE_LIMIT)]
        limit: i64,
    },
}

/// Everything a command handler may touch.
pub struct State {
    pub db: Database,
    pub config: Config,
    /// Where `config` is persisted when a command changes it
    pub config_path: PathBuf,
    pub shutdown: Shutdown,
}

impl State {
    fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path).with_context(|| {
            format!("Failed to save config to {}", self.config_path.display())
        })
    }

    async fn current_user(&self) -> Result<User> {
        let name = self
            .config
            .current_user
            .as_deref()
            .ok_or_else(|| anyhow!("No user logged in. Run `gator register <name>` first"))?;
        self.db
            .get_user_by_name(name)
            .await?
            .ok_or_else(|| anyhow!("Current user '{name}' no longer exists. Run `gator login <name>`"))
    }

    fn engine(&self) -> Result<(Arc<dyn FeedStore>, Arc<IngestionEngine>)> {
        let store: Arc<dyn FeedStore> = Arc::new(self.db.clone());
        let fetcher = FeedFetcher::new(&self.config.fetcher_options())
            .context("Failed to build HTTP client")?;
        let engine = IngestionEngine::new(Arc::clone(&store), fetcher, self.config.parse_options());
        Ok((store, Arc::new(engine)))
    }
}

/// Executes `command`, writing user-facing output to `out`.
pub async fn run<W: Write + Send>(state: &mut State, command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Register { name } => register(state, &name, out).await,
        Command::Login { name } => login(state, &name, out).await,
        Command::Users => users(state, out).await,
        Command::Reset => reset(state, out).await,
        Command::AddFeed { name, url } => add_feed(state, &name, &url, out).await,
        Command::Feeds => feeds(state, out).await,
        Command::Follow { url } => follow(state, &url, out).await,
        Command::Unfollow { url } => unfollow(state, &url, out).await,
        Command::Following => following(state, out).await,
        Command::Agg { interval, once } => aggregate(state, interval, once, out).await,
        Command::Fetch { url } => fetch(state, &url, out).await,
        Command::Browse { limit } => browse(state, limit, out).await,
    }
}

// ============================================================================
// Users
// ============================================================================

async fn register<W: Write>(state: &mut State, name: &str, out: &mut W) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("User name must not be empty");
    }

    let user = match state.db.create_user(name).await {
        Ok(user) => user,
        Err(DatabaseError::UserExists(_)) => bail!("User '{name}' already exists"),
        Err(e) => return Err(e).context("Failed to create user"),
    };

    state.config.current_user = Some(user.name.clone());
    state.save_config()?;

    tracing::info!(user = %user.name, user_id = %user.id, "Registered user");
    writeln!(out, "User {} created and logged in", user.name)?;
    Ok(())
}

async fn login<W: Write>(state: &mut State, name: &str, out: &mut W) -> Result<()> {
    let user = state
        .db
        .get_user_by_name(name)
        .await?
        .ok_or_else(|| anyhow!("User '{name}' does not exist"))?;

    state.config.current_user = Some(user.name.clone());
    state.save_config()?;

    writeln!(out, "Logged in as {}", user.name)?;
    Ok(())
}

async fn users<W: Write>(state: &State, out: &mut W) -> Result<()> {
    let current = state.config.current_user.as_deref();
    for user in state.db.list_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

async fn reset<W: Write>(state: &mut State, out: &mut W) -> Result<()> {
    let removed = state
        .db
        .delete_all_users()
        .await
        .context("Failed to reset database")?;

    if state.config.current_user.take().is_some() {
        state.save_config()?;
    }

    tracing::info!(users = removed, "Database reset");
    writeln!(out, "Removed {removed} users and everything they owned")?;
    Ok(())
}

// ============================================================================
// Feeds and follows
// ============================================================================

/// Canonical form used to store and look up feed URLs.
fn normalize_url(url: &str) -> Result<String> {
    Ok(validate_url(url)
        .with_context(|| format!("'{}' is not a usable feed URL", url.trim()))?
        .to_string())
}

async fn add_feed<W: Write>(state: &State, name: &str, url: &str, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let url = normalize_url(url)?;

    let feed = match state.db.create_feed(name.trim(), &url, user.id).await {
        Ok(feed) => feed,
        Err(DatabaseError::FeedExists(_)) => {
            bail!("Feed {url} is already registered. Use `gator follow {url}` instead")
        }
        Err(e) => return Err(e).context("Failed to add feed"),
    };
    state.db.create_feed_follow(user.id, feed.id).await?;

    tracing::info!(feed = %feed.url, feed_id = %feed.id, user = %user.name, "Added feed");
    writeln!(out, "Added feed {} ({})", feed.name, feed.url)?;
    writeln!(out, "{} now follows {}", user.name, feed.name)?;
    Ok(())
}

async fn feeds<W: Write>(state: &State, out: &mut W) -> Result<()> {
    for feed in state.db.list_feeds().await? {
        writeln!(
            out,
            "* {} ({}) added by {}, last fetched {}",
            feed.name,
            feed.url,
            feed.owner,
            format_time(feed.last_fetched_at)
        )?;
    }
    Ok(())
}

async fn follow<W: Write>(state: &State, url: &str, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let url = normalize_url(url)?;
    let feed = state
        .db
        .get_feed_by_url(&url)
        .await?
        .ok_or_else(|| anyhow!("No feed registered for {url}. Add it with `gator addfeed`"))?;

    match state.db.create_feed_follow(user.id, feed.id).await {
        Ok(follow) => writeln!(out, "{} now follows {}", user.name, follow.feed_name)?,
        Err(DatabaseError::AlreadyFollowing) => {
            bail!("{} already follows {}", user.name, feed.name)
        }
        Err(e) => return Err(e).context("Failed to follow feed"),
    }
    Ok(())
}

async fn unfollow<W: Write>(state: &State, url: &str, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let url = normalize_url(url)?;
    let feed = state
        .db
        .get_feed_by_url(&url)
        .await?
        .ok_or_else(|| anyhow!("No feed registered for {url}"))?;

    if !state.db.delete_feed_follow(user.id, feed.id).await? {
        bail!("{} does not follow {}", user.name, feed.name);
    }
    writeln!(out, "{} unfollowed {}", user.name, feed.name)?;
    Ok(())
}

async fn following<W: Write>(state: &State, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    for follow in state.db.list_follows_for_user(user.id).await? {
        writeln!(out, "* {} ({})", follow.feed_name, follow.feed_url)?;
    }
    Ok(())
}

// ============================================================================
// Aggregation
// ============================================================================

async fn aggregate<W: Write>(
    state: &State,
    interval: Option<Duration>,
    once: bool,
    out: &mut W,
) -> Result<()> {
    let interval = interval.unwrap_or_else(|| state.config.scrape_interval());
    let (store, engine) = state.engine()?;
    let scheduler = Scheduler::new(engine, store, interval, state.config.workers);

    if once {
        match scheduler.tick_once(&state.shutdown).await {
            Some(report) => write_report(out, &report)?,
            None => writeln!(out, "No feeds to collect")?,
        }
        return Ok(());
    }

    writeln!(out, "Collecting feeds every {}s", interval.as_secs_f64())?;
    scheduler.run_forever(&state.shutdown).await;
    Ok(())
}

async fn fetch<W: Write>(state: &State, url: &str, out: &mut W) -> Result<()> {
    let url = normalize_url(url)?;
    let feed = state
        .db
        .get_feed_by_url(&url)
        .await?
        .ok_or_else(|| anyhow!("No feed registered for {url}"))?;

    let (_, engine) = state.engine()?;
    let report = engine.run(&feed, &state.shutdown).await;
    write_report(out, &report)?;

    match report.error {
        Some(e) => Err(e).with_context(|| format!("Failed to ingest {}", feed.url)),
        None => Ok(()),
    }
}

fn write_report<W: Write>(out: &mut W, report: &IngestReport) -> Result<()> {
    write!(
        out,
        "Feed {}: {} new, {} skipped",
        report.feed_id, report.new_items, report.skipped_items
    )?;
    if !report.followers.is_empty() {
        write!(out, ", {} followers to notify", report.followers.len())?;
    }
    if let Some(e) = &report.error {
        write!(out, " (error: {e})")?;
    }
    writeln!(out)?;
    Ok(())
}

async fn browse<W: Write>(state: &State, limit: i64, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let posts = state.db.list_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(out, "No posts yet. Run `gator agg` to collect your feeds")?;
        return Ok(());
    }

    for post in posts {
        writeln!(out, "{} | {}", format_time(post.published_at), post.title)?;
        writeln!(out, "    {}", post.url)?;
        if let Some(description) = &post.description {
            let clean = strip_control_chars(description);
            writeln!(out, "    {}", truncate_chars(&clean, DESCRIPTION_PREVIEW_CHARS))?;
        }
    }
    Ok(())
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// Parses `30s`, `5m`, `1h`, `500ms` or a bare number of seconds.
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval '{raw}'"))?;

    let interval = match unit {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        _ => return Err(format!("unknown unit '{unit}' in interval '{raw}'")),
    };

    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(interval)
}
