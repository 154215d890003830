pub mod discord;
pub mod translate;

use async_trait::async_trait;

use crate::ingest::types::Article;

pub use translate::{LibreTranslate, Passthrough, Translator};

/// Discord rejects messages longer than this.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// A destination resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: String,
    pub name: Option<String>,
}

impl ChannelHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Name for logs: `#general` or the raw id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(n) => format!("#{n}"),
            None => self.id.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("{0}")]
    Other(String),
}

/// Chat platform send primitive.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn resolve(&self, channel_id: &str) -> Result<ChannelHandle, SendError>;
    async fn send(&self, channel: &ChannelHandle, text: &str) -> Result<(), SendError>;
    async fn close(&self) {}
}

/// `"{emoji} **{title}**\n{link}"`, capped at the platform limit.
pub fn format_message(article: &Article, title: &str) -> String {
    let msg = format!("{} **{}**\n{}", article.emoji, title, article.link);
    if msg.chars().count() <= MAX_MESSAGE_CHARS {
        return msg;
    }
    // shorten the title, never the link
    let overhead = msg.chars().count() - title.chars().count();
    let keep = MAX_MESSAGE_CHARS.saturating_sub(overhead + 1);
    let short: String = title.chars().take(keep).collect();
    format!("{} **{}…**\n{}", article.emoji, short, article.link)
}
