//! C3: the store gateway.
//!
//! All store access is funneled through a single Tokio task owning one `SqlitePool` (capped at
//! one connection, so the single-writer discipline the source relied on for `sqlite3` is
//! preserved even though sqlx itself could run several connections concurrently). Callers send
//! `(Command, oneshot reply)` pairs over an `mpsc` channel; the serializer task executes them in
//! FIFO order. `Store` is a cheap, `Clone`-able handle around the channel's sender -- cloning it
//! for every site worker does not clone the connection.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Row, SqlitePool};
use tokio::sync::{mpsc, oneshot};

use crate::error::StoreError;
use crate::weburl::PageUrl;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// One row of a PageRank backlink scan: `(origin's current rank, origin's forward-link count,
/// edge weight)`.
#[derive(Debug, Clone)]
pub struct Backlink {
    pub origin_rank: Option<f64>,
    pub forward_links: i64,
    pub occurrences: i64,
}

/// One query result row: a candidate page plus its current PageRank score.
#[derive(Debug, Clone)]
pub struct CandidatePage {
    pub url: PageUrl,
    pub rank: f64,
}

enum Command {
    UpsertPage {
        url: PageUrl,
        next_check_at: DateTime<Utc>,
    },
    ReplaceLinks {
        origin: PageUrl,
        targets: HashMap<PageUrl, u32>,
    },
    ReplaceTokens {
        page: PageUrl,
        tokens: HashMap<String, u32>,
    },
    NeedsCheck {
        url: PageUrl,
    },
    RecentlyChecked {
        url: PageUrl,
    },
    OldLinks {
        limit: i64,
    },
    SubdomainPage {
        limit: i64,
        offset: i64,
    },
    SubdomainCount,
    Backlinks {
        url: PageUrl,
    },
    SetTempRank {
        url: PageUrl,
        value: f64,
    },
    CommitTempRanks,
    QueryCandidates {
        tokens: Vec<String>,
    },
    PageTokens {
        url: PageUrl,
    },
    LastChangeAt,
}

/// Every possible reply shape a `Command` can produce. The serializer packs its result into the
/// matching variant; `Store`'s typed methods unpack it back out.
enum Reply {
    Unit(Result<(), StoreError>),
    Bool(Result<bool, StoreError>),
    Urls(Result<Vec<PageUrl>, StoreError>),
    I64(Result<i64, StoreError>),
    Backlinks(Result<Vec<Backlink>, StoreError>),
    Candidates(Result<Vec<CandidatePage>, StoreError>),
    Tokens(Result<HashMap<String, i64>, StoreError>),
    Time(Result<DateTime<Utc>, StoreError>),
}

struct Message {
    command: Command,
    reply: oneshot::Sender<Reply>,
}

/// A cheap, clonable handle to the store's serializer task.
#[derive(Clone)]
pub struct Store {
    tx: mpsc::Sender<Message>,
    allow_duplicates_despite_timing: bool,
}

impl Store {
    /// Open (creating if necessary) the SQLite store at `database_path`, run the schema-hash
    /// check described in the store gateway design, and spawn the serializer task.
    pub async fn open(
        database_path: &str,
        auto_reset_on_db_init_changes: bool,
        allow_duplicates_despite_timing: bool,
    ) -> Result<Store, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        initialize_schema(&pool, auto_reset_on_db_init_changes).await?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_serializer(pool, rx));

        Ok(Store { tx, allow_duplicates_despite_timing })
    }

    async fn call(&self, command: Command) -> Result<Reply, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Message { command, reply: reply_tx })
            .await
            .map_err(|_| StoreError::Disconnected)?;
        reply_rx.await.map_err(|_| StoreError::Disconnected)
    }

    pub async fn upsert_page(&self, url: PageUrl, next_check_at: DateTime<Utc>) -> Result<(), StoreError> {
        match self.call(Command::UpsertPage { url, next_check_at }).await? {
            Reply::Unit(r) => r,
            _ => unreachable!("UpsertPage always replies with Reply::Unit"),
        }
    }

    pub async fn replace_links(&self, origin: PageUrl, targets: HashMap<PageUrl, u32>) -> Result<(), StoreError> {
        match self.call(Command::ReplaceLinks { origin, targets }).await? {
            Reply::Unit(r) => r,
            _ => unreachable!("ReplaceLinks always replies with Reply::Unit"),
        }
    }

    pub async fn replace_tokens(&self, page: PageUrl, tokens: HashMap<String, u32>) -> Result<(), StoreError> {
        match self.call(Command::ReplaceTokens { page, tokens }).await? {
            Reply::Unit(r) => r,
            _ => unreachable!("ReplaceTokens always replies with Reply::Unit"),
        }
    }

    pub async fn needs_check(&self, url: PageUrl) -> Result<bool, StoreError> {
        match self.call(Command::NeedsCheck { url }).await? {
            Reply::Bool(r) => r,
            _ => unreachable!("NeedsCheck always replies with Reply::Bool"),
        }
    }

    /// Returns `false` unconditionally when `allow_duplicates_despite_timing` is configured,
    /// without a round-trip to the serializer task.
    pub async fn recently_checked(&self, url: PageUrl) -> Result<bool, StoreError> {
        if self.allow_duplicates_despite_timing {
            return Ok(false);
        }
        match self.call(Command::RecentlyChecked { url }).await? {
            Reply::Bool(r) => r,
            _ => unreachable!("RecentlyChecked always replies with Reply::Bool"),
        }
    }

    pub async fn old_links(&self, limit: i64) -> Result<Vec<PageUrl>, StoreError> {
        match self.call(Command::OldLinks { limit }).await? {
            Reply::Urls(r) => r,
            _ => unreachable!("OldLinks always replies with Reply::Urls"),
        }
    }

    pub async fn subdomain_page(&self, limit: i64, offset: i64) -> Result<Vec<PageUrl>, StoreError> {
        match self.call(Command::SubdomainPage { limit, offset }).await? {
            Reply::Urls(r) => r,
            _ => unreachable!("SubdomainPage always replies with Reply::Urls"),
        }
    }

    pub async fn subdomain_count(&self) -> Result<i64, StoreError> {
        match self.call(Command::SubdomainCount).await? {
            Reply::I64(r) => r,
            _ => unreachable!("SubdomainCount always replies with Reply::I64"),
        }
    }

    pub async fn backlinks(&self, url: PageUrl) -> Result<Vec<Backlink>, StoreError> {
        match self.call(Command::Backlinks { url }).await? {
            Reply::Backlinks(r) => r,
            _ => unreachable!("Backlinks always replies with Reply::Backlinks"),
        }
    }

    pub async fn set_temp_rank(&self, url: PageUrl, value: f64) -> Result<(), StoreError> {
        match self.call(Command::SetTempRank { url, value }).await? {
            Reply::Unit(r) => r,
            _ => unreachable!("SetTempRank always replies with Reply::Unit"),
        }
    }

    pub async fn commit_temp_ranks(&self) -> Result<(), StoreError> {
        match self.call(Command::CommitTempRanks).await? {
            Reply::Unit(r) => r,
            _ => unreachable!("CommitTempRanks always replies with Reply::Unit"),
        }
    }

    pub async fn query_candidates(&self, tokens: Vec<String>) -> Result<Vec<CandidatePage>, StoreError> {
        match self.call(Command::QueryCandidates { tokens }).await? {
            Reply::Candidates(r) => r,
            _ => unreachable!("QueryCandidates always replies with Reply::Candidates"),
        }
    }

    pub async fn page_tokens(&self, url: PageUrl) -> Result<HashMap<String, i64>, StoreError> {
        match self.call(Command::PageTokens { url }).await? {
            Reply::Tokens(r) => r,
            _ => unreachable!("PageTokens always replies with Reply::Tokens"),
        }
    }

    pub async fn last_change_at(&self) -> Result<DateTime<Utc>, StoreError> {
        match self.call(Command::LastChangeAt).await? {
            Reply::Time(r) => r,
            _ => unreachable!("LastChangeAt always replies with Reply::Time"),
        }
    }
}

async fn initialize_schema(pool: &SqlitePool, auto_reset: bool) -> Result<(), StoreError> {
    let hash = format!("{:x}", Sha256::digest(SCHEMA_SQL.as_bytes()));

    if !auto_reset {
        sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
        ensure_meta_row(pool).await?;
        return Ok(());
    }

    let needs_reset = match sqlx::query("SELECT hash FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
    {
        Ok(Some(row)) => row.get::<String, _>("hash") != hash,
        Ok(None) => true,
        Err(_) => true, // table doesn't exist yet
    };

    if needs_reset {
        tracing::warn!("schema hash changed (or store is new); resetting store");
        reset_store(pool, &hash).await?;
    }

    ensure_meta_row(pool).await?;
    Ok(())
}

async fn reset_store(pool: &SqlitePool, hash: &str) -> Result<(), StoreError> {
    sqlx::raw_sql(
        "DROP TABLE IF EXISTS postings; DROP TABLE IF EXISTS edges; DROP TABLE IF EXISTS tokens; \
         DROP TABLE IF EXISTS pages; DROP TABLE IF EXISTS crawl_meta; DROP TABLE IF EXISTS schema_version;",
    )
    .execute(pool)
    .await?;
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    sqlx::query("INSERT INTO schema_version (hash) VALUES (?)")
        .bind(hash)
        .execute(pool)
        .await?;
    Ok(())
}

async fn ensure_meta_row(pool: &SqlitePool) -> Result<(), StoreError> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM crawl_meta")
        .fetch_one(pool)
        .await?
        .get("c");
    if count == 0 {
        sqlx::query("INSERT INTO crawl_meta (last_change_at) VALUES (?)")
            .bind(Utc::now())
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn bump_last_change(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("UPDATE crawl_meta SET last_change_at = ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(FromRow)]
struct PageRow {
    host: String,
    path: String,
}

async fn run_serializer(pool: SqlitePool, mut rx: mpsc::Receiver<Message>) {
    while let Some(Message { command, reply }) = rx.recv().await {
        let result = execute(&pool, command).await;
        // The caller may have given up waiting (e.g. timed out); that's fine, just drop it.
        let _ = reply.send(result);
    }
}

async fn execute(pool: &SqlitePool, command: Command) -> Reply {
    match command {
        Command::UpsertPage { url, next_check_at } => {
            Reply::Unit(upsert_page(pool, &url, next_check_at).await)
        }
        Command::ReplaceLinks { origin, targets } => {
            Reply::Unit(replace_links(pool, &origin, &targets).await)
        }
        Command::ReplaceTokens { page, tokens } => {
            Reply::Unit(replace_tokens(pool, &page, &tokens).await)
        }
        Command::NeedsCheck { url } => Reply::Bool(needs_check(pool, &url).await),
        Command::RecentlyChecked { url } => Reply::Bool(recently_checked(pool, &url).await),
        Command::OldLinks { limit } => Reply::Urls(old_links(pool, limit).await),
        Command::SubdomainPage { limit, offset } => {
            Reply::Urls(subdomain_page(pool, limit, offset).await)
        }
        Command::SubdomainCount => Reply::I64(subdomain_count(pool).await),
        Command::Backlinks { url } => Reply::Backlinks(backlinks(pool, &url).await),
        Command::SetTempRank { url, value } => Reply::Unit(set_temp_rank(pool, &url, value).await),
        Command::CommitTempRanks => Reply::Unit(commit_temp_ranks(pool).await),
        Command::QueryCandidates { tokens } => Reply::Candidates(query_candidates(pool, &tokens).await),
        Command::PageTokens { url } => Reply::Tokens(page_tokens(pool, &url).await),
        Command::LastChangeAt => Reply::Time(last_change_at(pool).await),
    }
}

async fn upsert_page(pool: &SqlitePool, url: &PageUrl, next_check_at: DateTime<Utc>) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO pages (host, path, next_check_at, rank, shadow_rank) VALUES (?, ?, ?, NULL, NULL) \
         ON CONFLICT (host, path) DO UPDATE SET next_check_at = excluded.next_check_at",
    )
    .bind(url.host())
    .bind(url.path())
    .bind(next_check_at)
    .execute(pool)
    .await?;
    bump_last_change(pool).await
}

async fn replace_links(pool: &SqlitePool, origin: &PageUrl, targets: &HashMap<PageUrl, u32>) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM edges WHERE origin_host = ? AND origin_path = ?")
        .bind(origin.host())
        .bind(origin.path())
        .execute(&mut *tx)
        .await?;
    for (target, occurrences) in targets {
        sqlx::query(
            "INSERT INTO edges (origin_host, origin_path, target_host, target_path, occurrences) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(origin.host())
        .bind(origin.path())
        .bind(target.host())
        .bind(target.path())
        .bind(*occurrences as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    bump_last_change(pool).await
}

async fn replace_tokens(pool: &SqlitePool, page: &PageUrl, tokens: &HashMap<String, u32>) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM postings WHERE host = ? AND path = ?")
        .bind(page.host())
        .bind(page.path())
        .execute(&mut *tx)
        .await?;
    for (name, count) in tokens {
        sqlx::query("INSERT OR IGNORE INTO tokens (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO postings (host, path, token, occurrences) VALUES (?, ?, ?, ?)",
        )
        .bind(page.host())
        .bind(page.path())
        .bind(name)
        .bind(*count as i64)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    bump_last_change(pool).await
}

async fn needs_check(pool: &SqlitePool, url: &PageUrl) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT next_check_at FROM pages WHERE host = ? AND path = ?")
        .bind(url.host())
        .bind(url.path())
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else { return Ok(true) };
    let next_check_at: DateTime<Utc> = row.get("next_check_at");
    Ok(Utc::now() >= next_check_at)
}

async fn recently_checked(pool: &SqlitePool, url: &PageUrl) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT next_check_at FROM pages WHERE host = ? AND path = ?")
        .bind(url.host())
        .bind(url.path())
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else { return Ok(false) };
    let next_check_at: DateTime<Utc> = row.get("next_check_at");
    Ok(Utc::now() < next_check_at)
}

async fn old_links(pool: &SqlitePool, limit: i64) -> Result<Vec<PageUrl>, StoreError> {
    let rows: Vec<PageRow> = sqlx::query_as(
        "SELECT host, path FROM pages WHERE next_check_at <= ? ORDER BY next_check_at LIMIT ?",
    )
    .bind(Utc::now())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| PageUrl::from_parts(r.host, r.path)).collect())
}

async fn subdomain_page(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<PageUrl>, StoreError> {
    let rows: Vec<PageRow> = sqlx::query_as(
        "SELECT host, path FROM pages ORDER BY host, path LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| PageUrl::from_parts(r.host, r.path)).collect())
}

async fn subdomain_count(pool: &SqlitePool) -> Result<i64, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS c FROM pages").fetch_one(pool).await?;
    Ok(row.get("c"))
}

async fn backlinks(pool: &SqlitePool, url: &PageUrl) -> Result<Vec<Backlink>, StoreError> {
    let rows = sqlx::query(
        "SELECT p.rank AS origin_rank, \
                (SELECT COUNT(*) FROM edges e2 WHERE e2.origin_host = e.origin_host AND e2.origin_path = e.origin_path) AS forward_links, \
                e.occurrences AS occurrences \
         FROM edges e \
         JOIN pages p ON p.host = e.origin_host AND p.path = e.origin_path \
         WHERE e.target_host = ? AND e.target_path = ?",
    )
    .bind(url.host())
    .bind(url.path())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Backlink {
            origin_rank: row.try_get::<f64, _>("origin_rank").ok(),
            forward_links: row.get::<i64, _>("forward_links"),
            occurrences: row.get::<i64, _>("occurrences"),
        })
        .collect())
}

async fn set_temp_rank(pool: &SqlitePool, url: &PageUrl, value: f64) -> Result<(), StoreError> {
    sqlx::query("UPDATE pages SET shadow_rank = ? WHERE host = ? AND path = ?")
        .bind(value)
        .bind(url.host())
        .bind(url.path())
        .execute(pool)
        .await?;
    Ok(())
}

async fn commit_temp_ranks(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("UPDATE pages SET rank = COALESCE(shadow_rank, rank), shadow_rank = NULL")
        .execute(pool)
        .await?;
    Ok(())
}

async fn query_candidates(pool: &SqlitePool, tokens: &[String]) -> Result<Vec<CandidatePage>, StoreError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = std::iter::repeat("?").take(tokens.len()).collect::<Vec<_>>().join(", ");
    // An unranked page (PageRank hasn't swept it yet) scores as rank 1.0, i.e. neutral --
    // neither boosted nor penalized relative to term relevance alone.
    let sql = format!(
        "SELECT DISTINCT p.host AS host, p.path AS path, COALESCE(p.rank, 1.0) AS rank \
         FROM pages p JOIN postings po ON po.host = p.host AND po.path = p.path \
         WHERE po.token IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for token in tokens {
        query = query.bind(token);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| CandidatePage {
            url: PageUrl::from_parts(row.get::<String, _>("host"), row.get::<String, _>("path")),
            rank: row.get("rank"),
        })
        .collect())
}

async fn page_tokens(pool: &SqlitePool, url: &PageUrl) -> Result<HashMap<String, i64>, StoreError> {
    let rows = sqlx::query("SELECT token, occurrences FROM postings WHERE host = ? AND path = ?")
        .bind(url.host())
        .bind(url.path())
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get::<String, _>("token"), row.get::<i64, _>("occurrences")))
        .collect())
}

async fn last_change_at(pool: &SqlitePool) -> Result<DateTime<Utc>, StoreError> {
    let row = sqlx::query("SELECT last_change_at FROM crawl_meta LIMIT 1").fetch_one(pool).await?;
    Ok(row.get("last_change_at"))
}

/// A small stateful pager over the `pages` table used by the PageRank daemon so it never loads
/// the whole table into memory at once -- the Rust analogue of the source's generator-based
/// `subdomain_generator`.
pub struct SubdomainPager {
    store: Store,
    batch_size: i64,
    offset: i64,
    exhausted: bool,
}

impl SubdomainPager {
    pub fn new(store: Store, batch_size: i64) -> Self {
        SubdomainPager { store, batch_size, offset: 0, exhausted: false }
    }

    /// Returns the next non-empty batch, or `None` once the table has been fully scanned.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<PageUrl>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }
        let batch = self.store.subdomain_page(self.batch_size, self.offset).await?;
        if batch.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        self.offset += self.batch_size;
        Ok(Some(batch))
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Store>();
}
