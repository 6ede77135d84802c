use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use tracing::info;

/// Telegram caps a text message at 4096 UTF-16 code units.
pub const MAX_MESSAGE_UNITS: usize = 4096;
const ATTRIBUTION: &str = "🤖 AI-generated digest";

/// A resolved publication target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Id(i64),
    Username(String),
}

/// Outbound side of the channel client.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn resolve_channel(&self, name: &str) -> Result<ChannelRef>;

    /// Send `text` and return the external message id assigned by the channel.
    async fn send_message(&self, target: &ChannelRef, text: &str) -> Result<String>;
}

/// Parse a configured target (`@handle`, bare handle, or numeric chat id).
pub fn parse_target(name: &str) -> Result<ChannelRef> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty channel name"));
    }
    if let Ok(id) = trimmed.parse::<i64>() {
        return Ok(ChannelRef::Id(id));
    }
    let handle = trimmed.trim_start_matches('@');
    if handle.is_empty() || handle.contains(char::is_whitespace) {
        return Err(anyhow!("invalid channel handle {:?}", name));
    }
    Ok(ChannelRef::Username(format!("@{}", handle)))
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Render a digest for publication, truncating the body to fit one message.
pub fn render_digest(title: &str, body: &str) -> String {
    let head = format!("📰 {}\n\n", title.trim());
    let tail = format!("\n\n{}", ATTRIBUTION);
    let budget = MAX_MESSAGE_UNITS
        .saturating_sub(utf16_len(&head))
        .saturating_sub(utf16_len(&tail));

    let body = body.trim();
    if utf16_len(body) <= budget {
        return format!("{}{}{}", head, body, tail);
    }

    // leave one unit for the ellipsis
    let limit = budget.saturating_sub(1);
    let mut used = 0;
    let mut cut = String::new();
    for c in body.chars() {
        used += c.len_utf16();
        if used > limit {
            break;
        }
        cut.push(c);
    }
    cut.push('…');
    format!("{}{}{}", head, cut, tail)
}

#[derive(Clone)]
pub struct TelegramPublisher {
    bot: Bot,
}

impl TelegramPublisher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Probe the Bot API with the configured token; returns the bot username.
    pub async fn connect(&self) -> Result<String> {
        let me = self
            .bot
            .get_me()
            .await
            .context("failed to reach Telegram Bot API")?;
        let username = me.username().to_string();
        info!(%username, "connected to Telegram");
        Ok(username)
    }
}

fn recipient(target: &ChannelRef) -> Recipient {
    match target {
        ChannelRef::Id(id) => Recipient::Id(ChatId(*id)),
        ChannelRef::Username(handle) => Recipient::ChannelUsername(handle.clone()),
    }
}

#[async_trait]
impl ChannelPublisher for TelegramPublisher {
    async fn resolve_channel(&self, name: &str) -> Result<ChannelRef> {
        let target = parse_target(name)?;
        let chat = self
            .bot
            .get_chat(recipient(&target))
            .await
            .with_context(|| format!("failed to resolve channel {}", name))?;
        Ok(ChannelRef::Id(chat.id.0))
    }

    async fn send_message(&self, target: &ChannelRef, text: &str) -> Result<String> {
        let sent = self
            .bot
            .send_message(recipient(target), text)
            .await
            .context("failed to send message")?;
        Ok(sent.id.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_forms() {
        assert_eq!(parse_target("@digest").unwrap(), ChannelRef::Username("@digest".into()));
        assert_eq!(parse_target("digest").unwrap(), ChannelRef::Username("@digest".into()));
        assert_eq!(
            parse_target("-1001234567890").unwrap(),
            ChannelRef::Id(-1001234567890)
        );
        assert!(parse_target("").is_err());
        assert!(parse_target("@").is_err());
        assert!(parse_target("two words").is_err());
    }

    #[test]
    fn render_digest_layout() {
        let text = render_digest(" Weekly news ", "Body line one.\nBody line two.\n");
        assert_eq!(
            text,
            "📰 Weekly news\n\nBody line one.\nBody line two.\n\n🤖 AI-generated digest"
        );
    }

    #[test]
    fn render_digest_truncates_to_message_limit() {
        let body = "word ".repeat(2000);
        let text = render_digest("Title", &body);
        assert_eq!(utf16_len(&text), MAX_MESSAGE_UNITS);
        assert!(text.ends_with(ATTRIBUTION));
        assert!(text.contains('…'));
    }

    #[test]
    fn render_digest_counts_emoji_as_two_units() {
        // 3000 chars, 4500 UTF-16 units
        let body = "🔥 ".repeat(1500);
        assert!(body.chars().count() < MAX_MESSAGE_UNITS);
        let text = render_digest("Hot takes this week", &body);
        assert!(utf16_len(&text) <= MAX_MESSAGE_UNITS);
        assert!(utf16_len(&text) >= MAX_MESSAGE_UNITS - 1);
        assert!(text.contains('…'));

        let fits = render_digest("Hot takes this week", "🔥🔥🔥 short");
        assert!(!fits.contains('…'));
    }
}
