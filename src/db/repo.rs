use super::model::{
    ConsumeOutcome, DraftBatch, InsertOutcome, NewPost, PostForSummary, SummaryLinkState, SummaryWithPosts,
};
use crate::model::{Channel, ChannelStats, MediaKind, Post, Stats, Summary};
use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns the possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let query = match query_part {
        Some(q) if q.contains("mode=") => q.to_string(),
        Some(q) => format!("{}&mode=rwc", q),
        None => "mode=rwc".to_string(),
    };
    format!("sqlite://{}?{}", expanded_path, query)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Create the channel on first sighting, otherwise refresh its name/handle and
/// mark it active again. Returns the internal channel id.
#[instrument(skip_all)]
pub async fn upsert_channel(
    pool: &Pool,
    chat_id: &str,
    name: &str,
    username: Option<&str>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO channels (chat_id, name, username, is_active) VALUES (?, ?, ?, 1) \
         ON CONFLICT(chat_id) DO UPDATE SET name = excluded.name, username = excluded.username, \
         is_active = 1, updated_at = CURRENT_TIMESTAMP \
         RETURNING id",
    )
    .bind(chat_id)
    .bind(name)
    .bind(username)
    .fetch_one(pool)
    .await
    .context("failed to upsert channel")?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn deactivate_channel(pool: &Pool, chat_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE channels SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE chat_id = ?",
    )
    .bind(chat_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_channel(pool: &Pool, chat_id: &str) -> Result<Option<Channel>> {
    let row = sqlx::query(
        "SELECT id, chat_id, name, username, is_active, created_at FROM channels WHERE chat_id = ?",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<Channel> {
        Ok(Channel {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            name: row.try_get("name")?,
            username: row.try_get("username")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}

/// Insert an accepted post. A repeat of (channel, message id) is reported as
/// `Duplicate` and leaves the existing row untouched.
#[instrument(skip_all)]
pub async fn insert_post(pool: &Pool, post: &NewPost) -> Result<InsertOutcome> {
    let media = serde_json::to_string(&post.media)?;
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO posts (channel_id, message_id, content, author_id, media_tags, is_used) \
         VALUES (?, ?, ?, ?, ?, 0) \
         ON CONFLICT(channel_id, message_id) DO NOTHING \
         RETURNING id",
    )
    .bind(post.channel_id)
    .bind(&post.message_id)
    .bind(&post.content)
    .bind(post.author_id.as_deref())
    .bind(media)
    .fetch_optional(pool)
    .await
    .context("failed to insert post")?;

    Ok(match id {
        Some(id) => InsertOutcome::Inserted(id),
        None => InsertOutcome::Duplicate,
    })
}

pub async fn get_post(pool: &Pool, post_id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(
        "SELECT id, channel_id, message_id, content, author_id, media_tags, is_used, summary_id, created_at \
         FROM posts WHERE id = ?",
    )
    .bind(post_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<Post> {
        let media_tags: String = row.try_get("media_tags")?;
        let media: Vec<MediaKind> = serde_json::from_str(&media_tags)
            .with_context(|| format!("post {} has malformed media tags", post_id))?;
        Ok(Post {
            id: row.try_get("id")?,
            channel_id: row.try_get("channel_id")?,
            message_id: row.try_get("message_id")?,
            content: row.try_get("content")?,
            author_id: row.try_get("author_id")?,
            media,
            is_used: row.try_get("is_used")?,
            summary_id: row.try_get("summary_id")?,
            created_at: row.try_get("created_at")?,
        })
    })
    .transpose()
}

fn post_for_summary(row: &SqliteRow) -> Result<PostForSummary> {
    Ok(PostForSummary {
        id: row.try_get("id")?,
        channel_name: row.try_get("channel_name")?,
        author_id: row.try_get("author_id")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Newest unconsumed, non-empty posts, capped at `limit`.
#[instrument(skip_all)]
pub async fn fetch_unused_posts(pool: &Pool, limit: u32) -> Result<Vec<PostForSummary>> {
    let rows = sqlx::query(
        "SELECT p.id, p.author_id, p.content, p.created_at, c.name AS channel_name \
         FROM posts p JOIN channels c ON c.id = p.channel_id \
         WHERE p.is_used = 0 AND p.content <> '' \
         ORDER BY datetime(p.created_at) DESC, p.id DESC \
         LIMIT ?",
    )
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(post_for_summary).collect()
}

fn summary_from_row(row: &SqliteRow) -> Result<Summary> {
    Ok(Summary {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        target_channel: row.try_get("target_channel")?,
        is_posted: row.try_get("is_posted")?,
        posted_message_id: row.try_get("posted_message_id")?,
        created_at: row.try_get("created_at")?,
    })
}

const SUMMARY_COLUMNS: &str =
    "id, title, content, target_channel, is_posted, posted_message_id, created_at";

/// Persist a draft summary together with the batch it was generated from, in
/// one transaction.
#[instrument(skip_all, fields(posts = post_ids.len()))]
pub async fn create_draft_summary(
    pool: &Pool,
    title: &str,
    content: &str,
    target_channel: &str,
    post_ids: &[i64],
) -> Result<Summary> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(&format!(
        "INSERT INTO summaries (title, content, target_channel, is_posted) VALUES (?, ?, ?, 0) \
         RETURNING {}",
        SUMMARY_COLUMNS
    ))
    .bind(title)
    .bind(content)
    .bind(target_channel)
    .fetch_one(&mut *tx)
    .await
    .context("failed to persist draft summary")?;
    let summary = summary_from_row(&row)?;

    if !post_ids.is_empty() {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO summary_batches (summary_id, post_id) ");
        qb.push_values(post_ids, |mut b, post_id| {
            b.push_bind(summary.id).push_bind(*post_id);
        });
        qb.build()
            .execute(&mut *tx)
            .await
            .context("failed to record draft batch")?;
    }

    tx.commit()
        .await
        .context("failed to commit draft summary")?;
    Ok(summary)
}

/// The batch recorded for a draft, with how many of its posts have since been
/// consumed by another summary.
pub async fn draft_batch(pool: &Pool, summary_id: i64) -> Result<DraftBatch> {
    let rows = sqlx::query(
        "SELECT b.post_id, p.is_used FROM summary_batches b \
         JOIN posts p ON p.id = b.post_id \
         WHERE b.summary_id = ? ORDER BY b.post_id",
    )
    .bind(summary_id)
    .fetch_all(pool)
    .await?;

    let mut batch = DraftBatch::default();
    for row in &rows {
        batch.post_ids.push(row.try_get("post_id")?);
        if row.try_get::<bool, _>("is_used")? {
            batch.consumed += 1;
        }
    }
    Ok(batch)
}

pub async fn get_summary(pool: &Pool, summary_id: i64) -> Result<Option<Summary>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM summaries WHERE id = ?",
        SUMMARY_COLUMNS
    ))
    .bind(summary_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(summary_from_row).transpose()
}

async fn link_batch(
    conn: &mut SqliteConnection,
    summary_id: i64,
    post_ids: &[i64],
    posted_message_id: &str,
) -> Result<(u64, u64)> {
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE posts SET is_used = 1, summary_id = ");
    qb.push_bind(summary_id);
    qb.push(" WHERE is_used = 0 AND summary_id IS NULL AND id IN (");
    let mut ids = qb.separated(", ");
    for id in post_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    let posts_updated = qb.build().execute(&mut *conn).await?.rows_affected();

    let summary_updated = sqlx::query(
        "UPDATE summaries SET is_posted = 1, posted_message_id = ?, posted_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND is_posted = 0",
    )
    .bind(posted_message_id)
    .bind(summary_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    Ok((posts_updated, summary_updated))
}

/// Atomically link every post in the batch to the summary, flag them used, and
/// flag the summary posted. Writes nothing unless every row is still in the
/// expected state (posts unused, summary unposted).
#[instrument(skip_all, fields(summary_id = summary_id, posts = post_ids.len()))]
pub async fn consume_batch(
    pool: &Pool,
    summary_id: i64,
    post_ids: &[i64],
    posted_message_id: &str,
) -> Result<ConsumeOutcome> {
    if post_ids.is_empty() {
        return Err(anyhow!("cannot consume an empty batch for summary {}", summary_id));
    }

    let mut tx = pool.begin().await?;
    let (posts_updated, summary_updated) =
        match link_batch(&mut *tx, summary_id, post_ids, posted_message_id).await {
            Ok(counts) => counts,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(%rollback, "failed to roll back consume transaction");
                }
                return Err(err);
            }
        };

    if posts_updated != post_ids.len() as u64 || summary_updated != 1 {
        tx.rollback().await?;
        return Ok(ConsumeOutcome::Conflict {
            posts_updated,
            summary_updated,
        });
    }

    tx.commit()
        .await
        .context("failed to commit consume transaction")?;
    Ok(ConsumeOutcome::Committed)
}

/// Re-read what actually landed for a summary after an ambiguous commit.
pub async fn summary_link_state(pool: &Pool, summary_id: i64) -> Result<Option<SummaryLinkState>> {
    let row = sqlx::query(
        "SELECT s.is_posted, (SELECT COUNT(*) FROM posts p WHERE p.summary_id = s.id) AS linked \
         FROM summaries s WHERE s.id = ?",
    )
    .bind(summary_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| -> Result<SummaryLinkState> {
        Ok(SummaryLinkState {
            is_posted: row.try_get("is_posted")?,
            linked_posts: row.try_get("linked")?,
        })
    })
    .transpose()
}

#[instrument(skip_all)]
pub async fn stats(pool: &Pool, min_posts: u32) -> Result<Stats> {
    let row = sqlx::query(
        "SELECT \
            (SELECT COUNT(*) FROM posts) AS total_posts, \
            (SELECT COUNT(*) FROM posts WHERE is_used = 0) AS unused_posts, \
            (SELECT COUNT(*) FROM summaries) AS total_summaries, \
            (SELECT COUNT(*) FROM summaries WHERE is_posted = 1) AS posted_summaries",
    )
    .fetch_one(pool)
    .await?;

    let unused_posts: i64 = row.try_get("unused_posts")?;
    Ok(Stats {
        total_posts: row.try_get("total_posts")?,
        unused_posts,
        total_summaries: row.try_get("total_summaries")?,
        posted_summaries: row.try_get("posted_summaries")?,
        ready_for_summary: unused_posts >= i64::from(min_posts),
    })
}

#[instrument(skip_all)]
pub async fn channel_stats(pool: &Pool) -> Result<Vec<ChannelStats>> {
    let rows = sqlx::query(
        "SELECT c.name, c.username, c.is_active, COUNT(p.id) AS posts_count \
         FROM channels c LEFT JOIN posts p ON p.channel_id = c.id \
         GROUP BY c.id ORDER BY c.name",
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<ChannelStats> {
            Ok(ChannelStats {
                name: row.try_get("name")?,
                username: row.try_get("username")?,
                posts_count: row.try_get("posts_count")?,
                is_active: row.try_get("is_active")?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn recent_summaries(pool: &Pool, limit: u32) -> Result<Vec<SummaryWithPosts>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM summaries ORDER BY datetime(created_at) DESC, id DESC LIMIT ?",
        SUMMARY_COLUMNS
    ))
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let summary = summary_from_row(row)?;
        let post_rows = sqlx::query(
            "SELECT p.id, p.author_id, p.content, p.created_at, c.name AS channel_name \
             FROM posts p JOIN channels c ON c.id = p.channel_id \
             WHERE p.summary_id = ? ORDER BY p.id",
        )
        .bind(summary.id)
        .fetch_all(pool)
        .await?;
        let posts = post_rows
            .iter()
            .map(post_for_summary)
            .collect::<Result<Vec<_>>>()?;
        out.push(SummaryWithPosts { summary, posts });
    }
    Ok(out)
}
