//! Database view models and write payloads used by repositories.
//!
//! Keep these structs focused on the data moved through queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{MediaKind, Summary};

/// Insert payload for an accepted channel message.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub channel_id: i64,
    pub message_id: String,
    pub content: String,
    pub author_id: Option<String>,
    pub media: Vec<MediaKind>,
}

/// Result of a post insert against the (channel, message id) unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

/// Unconsumed post joined with its channel name, as fed to the summarizer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PostForSummary {
    pub id: i64,
    pub channel_name: String,
    pub author_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Summary together with the posts it consumed.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryWithPosts {
    pub summary: Summary,
    pub posts: Vec<PostForSummary>,
}

/// Result of the consume-and-mark-posted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Committed,
    /// Some rows were no longer in the expected state; nothing was written.
    Conflict { posts_updated: u64, summary_updated: u64 },
}

/// Observed persistence state of a summary, used to resolve ambiguous commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryLinkState {
    pub is_posted: bool,
    pub linked_posts: i64,
}

/// Posts recorded for a draft summary. `consumed` counts those already linked
/// to some summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftBatch {
    pub post_ids: Vec<i64>,
    pub consumed: usize,
}

impl DraftBatch {
    pub fn is_intact(&self) -> bool {
        !self.post_ids.is_empty() && self.consumed == 0
    }
}
