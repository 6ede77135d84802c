//! Summarization gateway: renders a batch of posts into a prompt, calls the
//! completion backend under a timeout, and turns the reply into either a draft
//! digest or a skip veto.
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config;
use crate::db::PostForSummary;
use crate::openai::{CompletionBackend, Prompt};

pub const TITLE_MARKER: &str = "Title:";
pub const BODY_MARKER: &str = "Summary:";
pub const SKIP_SENTINEL: &str = "SKIP";
const FALLBACK_TITLE: &str = "News Digest";
const UNKNOWN_AUTHOR: &str = "unknown";

const SYSTEM_PROMPT: &str = "You are a senior tech editor with fifteen years of experience. \
You only ever publish content that carries real, concrete value for readers.";

#[derive(Debug, Error)]
pub enum SummarizationError {
    #[error("nothing to summarize")]
    EmptyBatch,
    #[error("completion backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion backend failed: {0:#}")]
    Backend(#[source] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryDraft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The backend answered with the skip sentinel.
    Vetoed,
    /// The reply parsed but was too thin to publish.
    TooShort { title_len: usize, body_len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Draft(SummaryDraft),
    Skip(SkipReason),
}

/// Length floors applied to parsed replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Floors {
    pub min_title_length: usize,
    pub min_body_length: usize,
}

impl From<&config::Quality> for Floors {
    fn from(q: &config::Quality) -> Self {
        Self {
            min_title_length: q.min_title_length,
            min_body_length: q.min_body_length,
        }
    }
}

#[derive(Clone)]
pub struct Summarizer {
    backend: Arc<dyn CompletionBackend>,
    timeout: Duration,
    floors: Floors,
}

impl Summarizer {
    pub fn new(backend: Arc<dyn CompletionBackend>, timeout: Duration, floors: Floors) -> Self {
        Self {
            backend,
            timeout,
            floors,
        }
    }

    #[instrument(skip_all, fields(posts = posts.len()))]
    pub async fn summarize(
        &self,
        posts: &[PostForSummary],
    ) -> Result<SummaryOutcome, SummarizationError> {
        if posts.is_empty() {
            return Err(SummarizationError::EmptyBatch);
        }

        let prompt = render_prompt(posts);
        let reply = tokio::time::timeout(self.timeout, self.backend.complete(&prompt))
            .await
            .map_err(|_| SummarizationError::Timeout(self.timeout))?
            .map_err(SummarizationError::Backend)?;
        debug!(chars = reply.len(), "received completion");

        let outcome = parse_reply(&reply, self.floors);
        if let SummaryOutcome::Skip(reason) = &outcome {
            info!(?reason, "backend output rejected; posts stay unused");
        }
        Ok(outcome)
    }
}

/// Render the batch into the editor prompt. Each post is listed with its
/// channel and author so the backend can attribute facts.
pub fn render_prompt(posts: &[PostForSummary]) -> Prompt {
    let mut listing = String::new();
    for post in posts {
        let _ = write!(
            listing,
            "Channel: {}\nAuthor: {}\nText: {}\n---\n\n",
            post.channel_name,
            post.author_id.as_deref().unwrap_or(UNKNOWN_AUTHOR),
            post.content.trim()
        );
    }

    let user = format!(
        "Analyse the following posts collected from Telegram channels and write one high-quality \
digest that adds value for the reader.\n\
\n\
IMPORTANT: only produce meaningful, useful content. If the posts lack substance or context, \
reply with the single word \"{skip}\".\n\
\n\
Posts:\n\
{listing}\
Requirements:\n\
1. Keep every concrete fact, number, date and named entity (people, companies, products) from the posts.\n\
2. Keep action items, deadlines and links readers need to act on.\n\
3. Merge duplicates, drop small talk and advertising.\n\
4. Explain technical details in plain language.\n\
5. 250-400 words, with a few relevant hashtags at the end.\n\
\n\
If the posts are repetitive or meaningless, reply with \"{skip}\" and nothing else.\n\
\n\
Format:\n\
{title} <a short, specific headline>\n\
{body} <the digest>\n",
        skip = SKIP_SENTINEL,
        listing = listing,
        title = TITLE_MARKER,
        body = BODY_MARKER,
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn strip_decoration(line: &str) -> &str {
    line.trim_start_matches(|c: char| c.is_whitespace() || c == '*' || c == '#')
}

fn marker_value<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    strip_decoration(line)
        .strip_prefix(marker)
        .map(|rest| rest.trim().trim_matches('*').trim())
}

/// Parse a backend reply. The skip sentinel anywhere in the reply (any case)
/// vetoes the batch; otherwise the title comes from the title marker line and
/// the body is everything from the body marker to the end.
pub fn parse_reply(reply: &str, floors: Floors) -> SummaryOutcome {
    if reply.to_uppercase().contains(SKIP_SENTINEL) {
        return SummaryOutcome::Skip(SkipReason::Vetoed);
    }

    let lines: Vec<&str> = reply.lines().collect();
    let title = lines
        .iter()
        .find_map(|line| marker_value(line, TITLE_MARKER))
        .filter(|t| !t.is_empty())
        .unwrap_or(FALLBACK_TITLE)
        .to_string();

    let content = match lines
        .iter()
        .position(|line| marker_value(line, BODY_MARKER).is_some())
    {
        Some(idx) => {
            let first = marker_value(lines[idx], BODY_MARKER).unwrap_or_default();
            let mut body = String::from(first);
            for line in &lines[idx + 1..] {
                body.push('\n');
                body.push_str(line);
            }
            body.trim().to_string()
        }
        None => reply.trim().to_string(),
    };

    let title_len = title.chars().count();
    let body_len = content.chars().count();
    if title_len < floors.min_title_length || body_len < floors.min_body_length {
        return SummaryOutcome::Skip(SkipReason::TooShort {
            title_len,
            body_len,
        });
    }

    SummaryOutcome::Draft(SummaryDraft { title, content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::Utc;

    const FLOORS: Floors = Floors {
        min_title_length: 10,
        min_body_length: 100,
    };

    fn long_body() -> String {
        "The compiler team shipped incremental builds that are twice as fast. ".repeat(3)
    }

    fn post(id: i64, channel: &str, author: Option<&str>, text: &str) -> PostForSummary {
        PostForSummary {
            id,
            channel_name: channel.into(),
            author_id: author.map(str::to_string),
            content: text.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn parses_title_and_multiline_body() {
        let reply = format!(
            "Title: Faster builds land in stable\nSummary: {}\n\nSecond paragraph.\n#rust",
            long_body()
        );
        let SummaryOutcome::Draft(draft) = parse_reply(&reply, FLOORS) else {
            panic!("expected draft");
        };
        assert_eq!(draft.title, "Faster builds land in stable");
        assert!(draft.content.starts_with("The compiler team"));
        assert!(draft.content.ends_with("Second paragraph.\n#rust"));
        assert!(!draft.content.contains(BODY_MARKER));
    }

    #[test]
    fn body_marker_on_its_own_line() {
        let reply = format!("**Title:** Weekly platform news\n**Summary:**\n{}", long_body());
        let SummaryOutcome::Draft(draft) = parse_reply(&reply, FLOORS) else {
            panic!("expected draft");
        };
        assert_eq!(draft.title, "Weekly platform news");
        assert_eq!(draft.content, long_body().trim());
    }

    #[test]
    fn missing_markers_fall_back() {
        let reply = long_body();
        let SummaryOutcome::Draft(draft) = parse_reply(&reply, FLOORS) else {
            panic!("expected draft");
        };
        assert_eq!(draft.title, FALLBACK_TITLE);
        assert_eq!(draft.content, reply.trim());
    }

    #[test]
    fn skip_sentinel_anywhere_vetoes() {
        assert_eq!(
            parse_reply("SKIP", FLOORS),
            SummaryOutcome::Skip(SkipReason::Vetoed)
        );
        assert_eq!(
            parse_reply("I would skip these posts.", FLOORS),
            SummaryOutcome::Skip(SkipReason::Vetoed)
        );
        let reply = format!("Title: Something long enough\nSummary: {} Skip.", long_body());
        assert_eq!(
            parse_reply(&reply, FLOORS),
            SummaryOutcome::Skip(SkipReason::Vetoed)
        );
    }

    #[test]
    fn degenerate_output_is_skipped() {
        let short_title = format!("Title: News\nSummary: {}", long_body());
        assert!(matches!(
            parse_reply(&short_title, FLOORS),
            SummaryOutcome::Skip(SkipReason::TooShort { title_len: 4, .. })
        ));

        let short_body = "Title: A perfectly fine headline\nSummary: Too short.";
        assert!(matches!(
            parse_reply(short_body, FLOORS),
            SummaryOutcome::Skip(SkipReason::TooShort { body_len: 10, .. })
        ));
    }

    #[test]
    fn prompt_lists_every_post_with_attribution() {
        let posts = vec![
            post(1, "MVP 1 News", Some("42"), "First announcement text"),
            post(2, "MVP 2 Dev", None, "  Second post body  "),
        ];
        let prompt = render_prompt(&posts);
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert!(prompt.user.contains("Channel: MVP 1 News\nAuthor: 42\nText: First announcement text"));
        assert!(prompt.user.contains("Channel: MVP 2 Dev\nAuthor: unknown\nText: Second post body\n"));
        assert!(prompt.user.contains("\"SKIP\""));
        assert!(prompt.user.contains(TITLE_MARKER));
        assert!(prompt.user.contains(BODY_MARKER));
    }

    struct FixedBackend(Result<String, String>);

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        async fn complete(&self, _prompt: &Prompt) -> Result<String> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl CompletionBackend for SlowBackend {
        async fn complete(&self, _prompt: &Prompt) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never".into())
        }
    }

    fn summarizer(backend: impl CompletionBackend + 'static) -> Summarizer {
        Summarizer::new(Arc::new(backend), Duration::from_secs(5), FLOORS)
    }

    #[tokio::test]
    async fn summarize_returns_draft() {
        let reply = format!("Title: Faster builds land in stable\nSummary: {}", long_body());
        let s = summarizer(FixedBackend(Ok(reply)));
        let out = s.summarize(&[post(1, "c", None, "x")]).await.unwrap();
        assert!(matches!(out, SummaryOutcome::Draft(_)));
    }

    #[tokio::test]
    async fn summarize_rejects_empty_batch() {
        let s = summarizer(FixedBackend(Ok("unused".into())));
        assert!(matches!(
            s.summarize(&[]).await,
            Err(SummarizationError::EmptyBatch)
        ));
    }

    #[tokio::test]
    async fn summarize_surfaces_backend_errors() {
        let s = summarizer(FixedBackend(Err("connection refused".into())));
        let err = s.summarize(&[post(1, "c", None, "x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Backend(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn summarize_times_out() {
        let s = summarizer(SlowBackend);
        let err = s.summarize(&[post(1, "c", None, "x")]).await.unwrap_err();
        assert!(matches!(err, SummarizationError::Timeout(d) if d == Duration::from_secs(5)));
    }
}
