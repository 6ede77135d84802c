use std::fmt::Write as _;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, ChatMemberUpdated};
use tracing::{debug, error, info, instrument};

use crate::db::SummaryWithPosts;
use crate::ingest::{IngestOutcome, Ingestor, RawEvent};
use crate::model::{ChannelStats, MediaKind, Stats};
use crate::pipeline::{Pipeline, PipelineError, RunMode, RunOutcome};

const RECENT_LIMIT: u32 = 5;

/// Telegram user ids allowed to drive the pipeline from a private chat.
#[derive(Debug, Clone, Default)]
pub struct Admins(pub Arc<Vec<i64>>);

impl Admins {
    pub fn contains(&self, user_id: i64) -> bool {
        self.0.contains(&user_id)
    }
}

/// Extract the channel and message identity from a channel post.
pub fn raw_event(msg: &Message) -> RawEvent {
    let text = msg.text().or_else(|| msg.caption()).unwrap_or_default();
    let media = if msg.photo().is_some() {
        vec![MediaKind::Photo]
    } else if msg.document().is_some() {
        vec![MediaKind::Document]
    } else if msg.video().is_some() {
        vec![MediaKind::Video]
    } else {
        vec![]
    };

    RawEvent {
        chat_id: msg.chat.id.0.to_string(),
        chat_title: msg.chat.title().unwrap_or_default().to_string(),
        chat_username: msg.chat.username().map(str::to_string),
        message_id: msg.id.0.to_string(),
        text: text.to_string(),
        author_id: msg
            .from()
            .map(|u| u.id.0.to_string())
            .or_else(|| msg.author_signature().map(str::to_string)),
        media,
    }
}

#[instrument(skip_all)]
pub async fn handle_channel_post(msg: Message, ingestor: Arc<Ingestor>) -> ResponseResult<()> {
    let event = raw_event(&msg);
    match ingestor.handle_event(&event).await {
        Ok(IngestOutcome::Discarded(reason)) => debug!(?reason, "channel post discarded"),
        Ok(outcome) => debug!(?outcome, "channel post processed"),
        Err(err) => error!(?err, "failed to ingest channel post"),
    }
    Ok(())
}

/// The bot was removed from (or banned in) a chat: stop treating it as active.
pub async fn handle_membership(upd: ChatMemberUpdated, ingestor: Arc<Ingestor>) -> ResponseResult<()> {
    if !matches!(
        upd.new_chat_member.kind,
        ChatMemberKind::Left | ChatMemberKind::Banned(_)
    ) {
        return Ok(());
    }
    let chat_id = upd.chat.id.0.to_string();
    if let Err(err) = ingestor.deactivate(&chat_id).await {
        error!(?err, %chat_id, "failed to deactivate channel");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Ping,
    Summary,
    Force,
    Stats,
    Recent,
    Resend(i64),
    Help,
}

/// Parse a private-chat command. `None` for non-commands; `Some(Err)` carries
/// the reply for malformed or unknown commands.
pub fn parse_command(text: &str) -> Option<Result<AdminCommand, &'static str>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let head = parts.next().unwrap_or_default();
    // "/summary@my_bot" addresses the bot explicitly in groups
    let name = head.split('@').next().unwrap_or(head);
    let arg = parts.next();

    let cmd = match name {
        "/ping" => Ok(AdminCommand::Ping),
        "/summary" => Ok(AdminCommand::Summary),
        "/force" => Ok(AdminCommand::Force),
        "/stats" => Ok(AdminCommand::Stats),
        "/recent" => Ok(AdminCommand::Recent),
        "/start" | "/help" => Ok(AdminCommand::Help),
        "/resend" => match arg.and_then(|a| a.parse::<i64>().ok()) {
            Some(id) => Ok(AdminCommand::Resend(id)),
            None => Err("Usage: /resend <summary_id>"),
        },
        _ => Err("Unknown command."),
    };
    Some(cmd)
}

pub fn help_text() -> &'static str {
    "/summary - run a summary now\n\
/force - run even below the post threshold\n\
/stats - show counters\n\
/recent - list recent summaries\n\
/resend <id> - publish a retained draft\n\
/ping - health check"
}

pub fn format_run_result(result: &Result<RunOutcome, PipelineError>) -> String {
    match result {
        Ok(RunOutcome::Published(summary)) => format!(
            "Summary #{} posted (message {}).",
            summary.id,
            summary.posted_message_id.as_deref().unwrap_or("?")
        ),
        Ok(RunOutcome::InsufficientContent { found, required }) => format!(
            "Not enough posts for a summary: {} found, {} required.",
            found, required
        ),
        Ok(RunOutcome::Skipped { reason, batch }) => format!(
            "Summary skipped ({:?}); {} posts stay queued.",
            reason, batch
        ),
        Err(err) => match err.step() {
            Some(step) => format!("Run failed at step '{}': {}", step, err),
            None => format!("Run failed: {}", err),
        },
    }
}

pub fn format_stats(stats: &Stats, channels: &[ChannelStats]) -> String {
    let mut out = format!(
        "Total posts: {}\nUnused posts: {}\nTotal summaries: {}\nPosted summaries: {}\nReady for summary: {}\n",
        stats.total_posts,
        stats.unused_posts,
        stats.total_summaries,
        stats.posted_summaries,
        if stats.ready_for_summary { "yes" } else { "no" }
    );
    if !channels.is_empty() {
        out.push_str("\nChannels:\n");
        for ch in channels {
            let _ = writeln!(
                out,
                "- {} (@{}) - {} posts{}",
                ch.name,
                ch.username.as_deref().unwrap_or("-"),
                ch.posts_count,
                if ch.is_active { "" } else { " [inactive]" }
            );
        }
    }
    out.trim_end().to_string()
}

pub fn format_recent(summaries: &[SummaryWithPosts]) -> String {
    if summaries.is_empty() {
        return "No summaries yet.".to_string();
    }
    let mut out = String::new();
    for entry in summaries {
        let s = &entry.summary;
        let _ = writeln!(
            out,
            "#{} [{}] {} - {} posts",
            s.id,
            if s.is_posted { "posted" } else { "draft" },
            s.title,
            entry.posts.len()
        );
    }
    out.trim_end().to_string()
}

#[instrument(skip_all)]
pub async fn handle_admin_message(
    bot: Bot,
    msg: Message,
    pipeline: Pipeline,
    admins: Admins,
) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    if !admins.contains(user.id.0 as i64) {
        return Ok(());
    }
    let Some(cmd) = msg.text().and_then(parse_command) else {
        return Ok(());
    };

    let reply = match cmd {
        Err(usage) => usage.to_string(),
        Ok(AdminCommand::Ping) => "PONG".to_string(),
        Ok(AdminCommand::Help) => help_text().to_string(),
        Ok(AdminCommand::Summary) => {
            info!(user_id = user.id.0, "manual summary trigger");
            format_run_result(&pipeline.run(RunMode::Normal).await)
        }
        Ok(AdminCommand::Force) => {
            info!(user_id = user.id.0, "forced summary trigger");
            format_run_result(&pipeline.run(RunMode::Force).await)
        }
        Ok(AdminCommand::Stats) => {
            match (pipeline.stats().await, pipeline.channel_stats().await) {
                (Ok(stats), Ok(channels)) => format_stats(&stats, &channels),
                (Err(err), _) | (_, Err(err)) => format!("Failed to read stats: {}", err),
            }
        }
        Ok(AdminCommand::Recent) => match pipeline.recent_summaries(RECENT_LIMIT).await {
            Ok(list) => format_recent(&list),
            Err(err) => format!("Failed to read summaries: {}", err),
        },
        Ok(AdminCommand::Resend(id)) => match pipeline.resend_draft(id).await {
            Ok(summary) => format!(
                "Summary #{} re-sent (message {}).",
                summary.id,
                summary.posted_message_id.as_deref().unwrap_or("?")
            ),
            Err(err) => format!("Re-send failed: {}", err),
        },
    };

    if let Err(err) = bot.send_message(msg.chat.id, reply).await {
        error!(?err, "failed to reply to admin command");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Summary;
    use crate::summarizer::SkipReason;
    use chrono::Utc;
    use serde_json::json;

    fn message(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn raw_event_from_text_channel_post() {
        let msg = message(json!({
            "message_id": 42,
            "date": 1700000000,
            "chat": { "id": -1001234, "type": "channel", "title": "MVP 1 News", "username": "mvp1" },
            "text": "Some channel announcement"
        }));
        let ev = raw_event(&msg);
        assert_eq!(ev.chat_id, "-1001234");
        assert_eq!(ev.chat_title, "MVP 1 News");
        assert_eq!(ev.chat_username.as_deref(), Some("mvp1"));
        assert_eq!(ev.message_id, "42");
        assert_eq!(ev.text, "Some channel announcement");
        assert!(ev.media.is_empty());
        assert_eq!(ev.author_id, None);
    }

    #[test]
    fn raw_event_records_photo_tag_and_caption() {
        let msg = message(json!({
            "message_id": 7,
            "date": 1700000000,
            "chat": { "id": -1005, "type": "channel", "title": "MVP 2" },
            "photo": [{ "file_id": "f", "file_unique_id": "u", "width": 10, "height": 10, "file_size": 100 }],
            "caption": "Caption text",
            "author_signature": "Editor"
        }));
        let ev = raw_event(&msg);
        assert_eq!(ev.media, vec![MediaKind::Photo]);
        assert_eq!(ev.text, "Caption text");
        assert_eq!(ev.chat_username, None);
        assert_eq!(ev.author_id.as_deref(), Some("Editor"));
    }

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/summary"), Some(Ok(AdminCommand::Summary)));
        assert_eq!(parse_command(" /force "), Some(Ok(AdminCommand::Force)));
        assert_eq!(parse_command("/stats@digest_bot"), Some(Ok(AdminCommand::Stats)));
        assert_eq!(parse_command("/resend 12"), Some(Ok(AdminCommand::Resend(12))));
        assert!(matches!(parse_command("/resend"), Some(Err(msg)) if msg.contains("Usage")));
        assert!(matches!(parse_command("/resend x"), Some(Err(_))));
        assert_eq!(parse_command("/nope"), Some(Err("Unknown command.")));
        assert_eq!(parse_command("/start"), Some(Ok(AdminCommand::Help)));
    }

    #[test]
    fn admins_membership() {
        let admins = Admins(Arc::new(vec![1, 2]));
        assert!(admins.contains(2));
        assert!(!admins.contains(3));
        assert!(!Admins::default().contains(1));
    }

    #[test]
    fn run_result_messages() {
        let summary = Summary {
            id: 3,
            title: "t".into(),
            content: "c".into(),
            target_channel: "@d".into(),
            is_posted: true,
            posted_message_id: Some("99".into()),
            created_at: Utc::now(),
        };
        assert_eq!(
            format_run_result(&Ok(RunOutcome::Published(summary))),
            "Summary #3 posted (message 99)."
        );
        assert_eq!(
            format_run_result(&Ok(RunOutcome::InsufficientContent { found: 2, required: 5 })),
            "Not enough posts for a summary: 2 found, 5 required."
        );
        assert!(format_run_result(&Ok(RunOutcome::Skipped {
            reason: SkipReason::Vetoed,
            batch: 4
        }))
        .contains("4 posts stay queued"));
        assert_eq!(
            format_run_result(&Err(PipelineError::AlreadyRunning)),
            "Run failed: a summary run is already in progress"
        );
        let failed = format_run_result(&Err(PipelineError::Summarization(
            crate::summarizer::SummarizationError::Timeout(std::time::Duration::from_secs(1)),
        )));
        assert!(failed.starts_with("Run failed at step 'summarize'"));
    }

    #[test]
    fn stats_message_lists_channels() {
        let stats = Stats {
            total_posts: 10,
            unused_posts: 4,
            total_summaries: 2,
            posted_summaries: 1,
            ready_for_summary: false,
        };
        let channels = vec![ChannelStats {
            name: "MVP 1".into(),
            username: None,
            posts_count: 10,
            is_active: false,
        }];
        let text = format_stats(&stats, &channels);
        assert!(text.contains("Unused posts: 4"));
        assert!(text.contains("Ready for summary: no"));
        assert!(text.ends_with("- MVP 1 (@-) - 10 posts [inactive]"));
    }
}
