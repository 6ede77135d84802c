use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media attached to a channel post. Only the kind is recorded, never the payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Document,
    Video,
}

/// Whether the aggregation pipeline currently holds its run-lock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub chat_id: String,
    pub name: String,
    pub username: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub channel_id: i64,
    pub message_id: String,
    pub content: String,
    pub author_id: Option<String>,
    pub media: Vec<MediaKind>,
    pub is_used: bool,
    pub summary_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub target_channel: String,
    pub is_posted: bool,
    pub posted_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters for status reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub total_posts: i64,
    pub unused_posts: i64,
    pub total_summaries: i64,
    pub posted_summaries: i64,
    pub ready_for_summary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelStats {
    pub name: String,
    pub username: Option<String>,
    pub posts_count: i64,
    pub is_active: bool,
}
