use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::Recipient;
use tracing::info;

use crate::config::TelegramConfig;
use crate::error::RelayError;
use crate::platform::{Message, Sink};

/// Text shown in the Telegram chat for a relayed message
pub fn format_text(message: &Message) -> String {
    format!("📨 {}:\n{}", message.sender_name(), message.text())
}

/// Numeric ids go out as chat ids, anything else as a channel username
fn parse_recipient(chat_id: &str) -> Recipient {
    match chat_id.trim().parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.trim().to_string()),
    }
}

/// Delivers relayed messages to one fixed Telegram chat
pub struct TelegramSink {
    bot: Bot,
    chat: Recipient,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        let mut bot = Bot::with_client(&config.bot_token, client);
        if let Some(api_url) = &config.api_url {
            let url = reqwest::Url::parse(api_url)
                .with_context(|| format!("Invalid Telegram API URL: {}", api_url))?;
            bot = bot.set_api_url(url);
        }

        info!("Telegram sink targets chat {}", config.chat_id);

        Ok(Self {
            bot,
            chat: parse_recipient(&config.chat_id),
        })
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &Message) -> Result<(), RelayError> {
        self.bot
            .send_message(self.chat.clone(), format_text(message))
            .await
            .map_err(|e| RelayError::sink(self.name(), e))?;
        Ok(())
    }
}
