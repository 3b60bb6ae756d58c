use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MatrixConfig;
use crate::error::RelayError;
use crate::platform::{Message, Sink};

#[derive(Debug, Serialize)]
struct RoomMessage<'a> {
    msgtype: &'static str,
    body: &'a str,
}

/// Body of the `m.text` event for a relayed message
pub fn format_body(message: &Message) -> String {
    format!("{}: {}", message.sender_name(), message.text())
}

/// `PUT /_matrix/client/v3/rooms/{roomId}/send/m.room.message/{txnId}`
fn send_event_url(homeserver: &Url, room_id: &str, txn_id: &str) -> Result<Url> {
    let mut url = homeserver.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("Homeserver URL cannot be a base: {}", homeserver))?
        .pop_if_empty()
        .extend([
            "_matrix",
            "client",
            "v3",
            "rooms",
            room_id,
            "send",
            "m.room.message",
            txn_id,
        ]);
    Ok(url)
}

/// Posts relayed messages into one fixed Matrix room
pub struct MatrixSink {
    client: reqwest::Client,
    homeserver: Url,
    access_token: String,
    room_id: String,
}

impl MatrixSink {
    pub fn new(config: &MatrixConfig, timeout: Duration) -> Result<Self> {
        let homeserver = Url::parse(&config.homeserver)
            .with_context(|| format!("Invalid Matrix homeserver URL: {}", config.homeserver))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Matrix HTTP client")?;

        info!(
            "Matrix sink: {} posting as {} into {}",
            homeserver, config.user_id, config.room_id
        );

        Ok(Self {
            client,
            homeserver,
            access_token: config.access_token.clone(),
            room_id: config.room_id.clone(),
        })
    }

    async fn put_event(&self, body: &str) -> Result<()> {
        // Transaction ids must be unique per access token
        let txn_id = format!("maxbridge-{}", Uuid::new_v4());
        let url = send_event_url(&self.homeserver, &self.room_id, &txn_id)?;

        debug!("Sending Matrix event: {}", url);

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&RoomMessage {
                msgtype: "m.text",
                body,
            })
            .send()
            .await
            .context("Failed to send request to Matrix homeserver")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Matrix API error ({}): {}", status, error_body);
        }

        Ok(())
    }
}

#[async_trait]
impl Sink for MatrixSink {
    fn name(&self) -> &str {
        "matrix"
    }

    async fn send(&self, message: &Message) -> Result<(), RelayError> {
        debug!(
            "Matrix relay of message {} from {} ({}), sent at {:?}",
            message.id(),
            message.sender_name(),
            message.sender_id(),
            message.timestamp()
        );
        self.put_event(&format_body(message))
            .await
            .map_err(|e| RelayError::sink(self.name(), format!("{:#}", e)))
    }
}
