//! Ingestion path: watch-list match, channel upsert, quality gate, deduplicated
//! post insert.
use tracing::{debug, info, instrument};

use crate::db::{self, InsertOutcome, NewPost, Pool};
use crate::model::MediaKind;
use crate::quality::QualityFilter;

/// A channel message as delivered by the channel client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub chat_id: String,
    pub chat_title: String,
    pub chat_username: Option<String>,
    pub message_id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub media: Vec<MediaKind>,
}

/// Case-insensitive substring match of channel display names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchList {
    patterns: Vec<String>,
}

impl WatchList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, display_name: &str) -> bool {
        let name = display_name.to_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NotWatched,
    LowQuality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(i64),
    Duplicate,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone)]
pub struct Ingestor {
    pool: Pool,
    watch: WatchList,
    filter: QualityFilter,
}

impl Ingestor {
    pub fn new(pool: Pool, watch: WatchList, filter: QualityFilter) -> Self {
        Self {
            pool,
            watch,
            filter,
        }
    }

    /// Process one raw event. Safe under redelivery: a message already stored
    /// for the same channel comes back as `Duplicate`.
    #[instrument(skip_all, fields(chat_id = %event.chat_id, message_id = %event.message_id))]
    pub async fn handle_event(&self, event: &RawEvent) -> anyhow::Result<IngestOutcome> {
        if !self.watch.matches(&event.chat_title) {
            return Ok(IngestOutcome::Discarded(DiscardReason::NotWatched));
        }

        let channel_id = db::upsert_channel(
            &self.pool,
            &event.chat_id,
            &event.chat_title,
            event.chat_username.as_deref().filter(|u| !u.is_empty()),
        )
        .await?;

        if !self.filter.accept(&event.text) {
            debug!("message rejected by quality filter");
            return Ok(IngestOutcome::Discarded(DiscardReason::LowQuality));
        }

        let post = NewPost {
            channel_id,
            message_id: event.message_id.clone(),
            content: event.text.clone(),
            author_id: event.author_id.clone(),
            media: event.media.clone(),
        };
        match db::insert_post(&self.pool, &post).await? {
            InsertOutcome::Inserted(id) => {
                let preview: String = event.text.chars().take(50).collect();
                info!(post_id = id, channel = %event.chat_title, %preview, "saved post");
                Ok(IngestOutcome::Stored(id))
            }
            InsertOutcome::Duplicate => {
                info!("duplicate message, skipping");
                Ok(IngestOutcome::Duplicate)
            }
        }
    }

    /// Mark a source inactive, e.g. after the bot lost access to it. The next
    /// watched message from it re-activates the channel.
    pub async fn deactivate(&self, chat_id: &str) -> anyhow::Result<bool> {
        let changed = db::deactivate_channel(&self.pool, chat_id).await?;
        if changed {
            info!(chat_id, "channel deactivated");
        }
        Ok(changed)
    }
}
