//! Max upstream: the recent-messages HTTP API and the push WebSocket.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::MaxConfig;
use crate::error::RelayError;
use crate::platform::Message;
use crate::relay::poll::RecentMessages;
use crate::relay::stream::{FrameStream, StreamConnector};

const USER_AGENT: &str = "MaxBridge/1.0";

/// Max user ids show up both as numbers and as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSender {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "sender")]
    from: Option<WireSender>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct AuthFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    token: &'a str,
}

/// Decode a poll response body. Items are kept in upstream order; an item
/// without a usable integer `id` is dropped on its own.
fn decode_page(body: &str) -> serde_json::Result<Vec<Message>> {
    let page: MessagePage = serde_json::from_str(body)?;
    Ok(page
        .items
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<WireMessage>(raw) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping unreadable Max item: {}", e);
                None
            }
        })
        .map(|item| {
            let (sender_id, sender_name) = match item.from {
                Some(sender) => (
                    sender.id.map(WireId::into_string).unwrap_or_default(),
                    sender.name.unwrap_or_else(|| "Unknown".to_string()),
                ),
                None => (String::new(), "Unknown".to_string()),
            };
            Message::new(
                item.id,
                item.text.unwrap_or_default(),
                sender_id,
                sender_name,
                item.timestamp,
            )
        })
        .collect())
}

/// Decode one stream frame.
///
/// Returns `Ok(None)` for frames that are not chat messages (auth acks,
/// presence and so on). A `message` frame must carry `id`, `text`,
/// `from.id`, `from.name` and `timestamp`.
pub fn decode_frame(raw: &str) -> Result<Option<Message>, RelayError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| RelayError::MalformedFrame(e.to_string()))?;

    let Some(object) = value.as_object() else {
        return Err(RelayError::MalformedFrame(
            "frame is not a JSON object".to_string(),
        ));
    };
    if object.get("type").and_then(|t| t.as_str()) != Some("message") {
        return Ok(None);
    }

    let wire: WireMessage = serde_json::from_value(value)
        .map_err(|e| RelayError::MalformedFrame(e.to_string()))?;
    let missing = |field: &str| RelayError::MalformedFrame(format!("missing field `{field}`"));

    let text = wire.text.ok_or_else(|| missing("text"))?;
    let sender = wire.from.ok_or_else(|| missing("from"))?;
    let sender_id = sender.id.ok_or_else(|| missing("from.id"))?;
    let sender_name = sender.name.ok_or_else(|| missing("from.name"))?;
    let timestamp = wire.timestamp.ok_or_else(|| missing("timestamp"))?;

    Ok(Some(Message::new(
        wire.id,
        text,
        sender_id.into_string(),
        sender_name,
        Some(timestamp),
    )))
}

/// Client for `GET /v1/messages`.
pub struct MaxClient {
    client: reqwest::Client,
    api_url: String,
    auth_token: String,
    user_id: String,
}

impl MaxClient {
    pub fn new(config: &MaxConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Max HTTP client")?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            auth_token: config.auth_token.clone(),
            user_id: config.user_id.clone(),
        })
    }

    async fn fetch_page(&self, limit: usize) -> Result<Vec<Message>> {
        debug!("Polling Max: {}", self.api_url);

        let response = self
            .client
            .get(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.auth_token))
            .query(&[
                ("limit", limit.to_string()),
                ("user_id", self.user_id.clone()),
            ])
            .send()
            .await
            .context("Failed to send request to Max")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Max API error ({}): {}", status, error_body);
        }

        let body = response
            .text()
            .await
            .context("Failed to read Max response")?;
        decode_page(&body).context("Failed to parse Max response")
    }
}

#[async_trait]
impl RecentMessages for MaxClient {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<Message>, RelayError> {
        self.fetch_page(limit)
            .await
            .map_err(|e| RelayError::SourceUnavailable(format!("{:#}", e)))
    }
}

/// Opens authenticated WebSocket sessions against the Max push endpoint.
pub struct MaxStreamConnector {
    ws_url: String,
    auth_token: String,
    connect_timeout: Duration,
}

impl MaxStreamConnector {
    pub fn new(config: &MaxConfig, connect_timeout: Duration) -> Self {
        Self {
            ws_url: config.ws_url.clone(),
            auth_token: config.auth_token.clone(),
            connect_timeout,
        }
    }

    async fn open(&self) -> Result<MaxFrames> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .with_context(|| format!("Invalid Max stream URL: {}", self.ws_url))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.auth_token))
            .context("Max token is not a valid header value")?;
        request.headers_mut().insert(header::AUTHORIZATION, bearer);

        let (mut socket, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .context("Timed out connecting to Max stream")?
            .context("Failed to connect to Max stream")?;

        let auth = serde_json::to_string(&AuthFrame {
            kind: "auth",
            token: &self.auth_token,
        })?;
        socket
            .send(WsMessage::Text(auth.into()))
            .await
            .context("Failed to send auth frame")?;
        debug!("Sent Max auth frame");

        Ok(MaxFrames { socket })
    }
}

#[async_trait]
impl StreamConnector for MaxStreamConnector {
    async fn connect(&self) -> Result<Box<dyn FrameStream>, RelayError> {
        match self.open().await {
            Ok(frames) => Ok(Box::new(frames)),
            Err(e) => Err(RelayError::StreamTransport(format!("{:#}", e))),
        }
    }
}

/// Text payloads read from an open Max socket.
pub struct MaxFrames {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for MaxFrames {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.socket.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(WsMessage::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()))
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!("Max stream closed by server: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(RelayError::StreamTransport(e.to_string()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config_for(server: &mockito::ServerGuard) -> MaxConfig {
        MaxConfig {
            auth_token: "secret".to_string(),
            user_id: "77".to_string(),
            api_url: format!("{}/v1/messages", server.url()),
            ..MaxConfig::default()
        }
    }

    #[test]
    fn test_decode_frame_message() {
        let msg = decode_frame(
            r#"{"type":"message","id":1,"text":"hi","from":{"id":9,"name":"A"},"timestamp":1000}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.id(), 1);
        assert_eq!(msg.text(), "hi");
        assert_eq!(msg.sender_id(), "9");
        assert_eq!(msg.sender_name(), "A");
        assert_eq!(msg.timestamp(), Some(1000));
    }

    #[test]
    fn test_decode_frame_ignores_other_types() {
        assert_eq!(decode_frame(r#"{"type":"auth_ok"}"#).unwrap(), None);
        assert_eq!(decode_frame(r#"{"id":3}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_frame_rejects_garbage() {
        assert!(matches!(
            decode_frame("{not json"),
            Err(RelayError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_frame("[1,2,3]"),
            Err(RelayError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_frame_requires_fields() {
        let no_sender = r#"{"type":"message","id":1,"text":"hi","timestamp":1000}"#;
        assert_eq!(
            decode_frame(no_sender),
            Err(RelayError::MalformedFrame("missing field `from`".to_string()))
        );

        let no_name = r#"{"type":"message","id":1,"text":"hi","from":{"id":9},"timestamp":1}"#;
        assert_eq!(
            decode_frame(no_name),
            Err(RelayError::MalformedFrame(
                "missing field `from.name`".to_string()
            ))
        );

        let bad_id = r#"{"type":"message","id":"x","text":"hi","from":{"id":9,"name":"A"},"timestamp":1}"#;
        assert!(matches!(
            decode_frame(bad_id),
            Err(RelayError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_page_is_lenient() {
        let body = r#"{"items":[
            {"id":5,"text":"five","from":{"id":"u1","name":"Ann"},"timestamp":10},
            {"id":3,"sender":{"id":2,"name":"Bob"}},
            {"id":4}
        ]}"#;
        let messages = decode_page(body).unwrap();
        let ids: Vec<i64> = messages.iter().map(Message::id).collect();
        assert_eq!(ids, vec![5, 3, 4]);

        assert_eq!(messages[0].sender_id(), "u1");
        assert_eq!(messages[1].sender_name(), "Bob");
        assert_eq!(messages[1].text(), "");
        assert_eq!(messages[2].sender_name(), "Unknown");
        assert_eq!(messages[2].timestamp(), None);

        assert!(decode_page("{}").unwrap().is_empty());
    }

    #[test]
    fn test_decode_page_drops_items_without_integer_id() {
        let body = r#"{"items":[
            {"text":"no id"},
            {"id":"seven","text":"string id"},
            {"id":8,"text":"ok"}
        ]}"#;
        let messages = decode_page(body).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id(), 8);
        assert_eq!(messages[0].text(), "ok");
    }

    #[tokio::test]
    async fn test_fetch_recent_sends_auth_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/messages")
            .match_header("authorization", "Bearer secret")
            .match_header("user-agent", USER_AGENT)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "20".into()),
                Matcher::UrlEncoded("user_id".into(), "77".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items":[{"id":1,"text":"a","from":{"id":1,"name":"A"}}]}"#)
            .create_async()
            .await;

        let client = MaxClient::new(&config_for(&server), Duration::from_secs(5)).unwrap();
        let messages = client.fetch_recent(20).await.unwrap();

        mock.assert_async().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "a");
    }

    #[tokio::test]
    async fn test_fetch_recent_maps_http_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/messages")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("bad token")
            .create_async()
            .await;

        let client = MaxClient::new(&config_for(&server), Duration::from_secs(5)).unwrap();
        let err = client.fetch_recent(20).await.unwrap_err();

        match err {
            RelayError::SourceUnavailable(details) => assert!(details.contains("401")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_recent_rejects_bad_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let client = MaxClient::new(&config_for(&server), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.fetch_recent(20).await,
            Err(RelayError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_connect_failure_is_transport_error() {
        let config = MaxConfig {
            ws_url: "ws://127.0.0.1:1/ws".to_string(),
            ..MaxConfig::default()
        };
        let connector = MaxStreamConnector::new(&config, Duration::from_secs(2));
        assert!(matches!(
            connector.connect().await,
            Err(RelayError::StreamTransport(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_session_against_local_server() {
        use tokio::net::TcpListener;
        use tokio_tungstenite::tungstenite::handshake::server::{
            ErrorResponse, Request, Response,
        };

        const HI_FRAME: &str =
            r#"{"type":"message","id":1,"text":"hi","from":{"id":9,"name":"A"},"timestamp":1000}"#;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut authorization = None;
            let mut ws = tokio_tungstenite::accept_hdr_async(
                tcp,
                |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    authorization = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    Ok(resp)
                },
            )
            .await
            .unwrap();

            let first = ws.next().await.unwrap().unwrap();
            ws.send(WsMessage::Ping(Default::default())).await.unwrap();
            ws.send(WsMessage::Text(HI_FRAME.into())).await.unwrap();
            ws.close(None).await.unwrap();
            (authorization, first.into_text().unwrap().as_str().to_owned())
        });

        let config = MaxConfig {
            auth_token: "tok".to_string(),
            ws_url: format!("ws://{addr}/ws"),
            ..MaxConfig::default()
        };
        let connector = MaxStreamConnector::new(&config, Duration::from_secs(5));
        let mut frames = connector.connect().await.unwrap();

        // The ping is swallowed; the message frame comes through as text
        let frame = frames.next_frame().await.unwrap().unwrap();
        assert_eq!(frame, HI_FRAME);
        assert_eq!(decode_frame(&frame).unwrap().unwrap().text(), "hi");
        assert_eq!(frames.next_frame().await, None);

        let (authorization, first) = server.await.unwrap();
        assert_eq!(authorization.as_deref(), Some("Bearer tok"));
        let auth: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(auth, serde_json::json!({"type": "auth", "token": "tok"}));
    }
}
