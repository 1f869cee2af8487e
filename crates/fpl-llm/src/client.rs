// Claude API streaming client using reqwest-eventsource.
//
// Sends one message to the Anthropic Messages API with `stream: true` and
// forwards the Server-Sent Events as `LlmEvent`s over an mpsc channel.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

// ---------------------------------------------------------------------------
// Events and config
// ---------------------------------------------------------------------------

/// Streaming output of one explanation request.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    Token {
        text: String,
    },
    Complete {
        full_text: String,
        input_tokens: u32,
        output_tokens: u32,
    },
    Error {
        message: String,
    },
}

/// Settings needed to build an [`LlmClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Anything that turns a prompt into streamed text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Stream a completion for `prompt` over `tx`. Failures are reported as
    /// `LlmEvent::Error`; the returned `Result` covers only local faults.
    async fn stream(
        &self,
        system: &str,
        prompt: &str,
        tx: mpsc::Sender<LlmEvent>,
    ) -> anyhow::Result<()>;

    fn is_enabled(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// ClaudeClient
// ---------------------------------------------------------------------------

/// Low-level Claude API streaming client.
pub struct ClaudeClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    url: String,
}

impl ClaudeClient {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            max_tokens,
            url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (a local mock in tests).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Send a message and stream the response as `LlmEvent`s over `tx`.
    ///
    /// Returns when the stream completes, an error occurs, or the receiver
    /// is dropped.
    pub async fn stream_message(
        &self,
        system: &str,
        user_content: &str,
        tx: mpsc::Sender<LlmEvent>,
    ) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            let _ = tx
                .send(LlmEvent::Error {
                    message: "API key not configured".to_string(),
                })
                .await;
            return Ok(());
        }

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "system": system,
            "messages": [{ "role": "user", "content": user_content }]
        });

        let request = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let mut es = match request.eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: format!("Failed to create event source: {e}"),
                    })
                    .await;
                return Ok(());
            }
        };

        let mut full_text = String::new();
        let mut input_tokens: u32 = 0;
        let mut output_tokens: u32 = 0;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => debug!("SSE connection opened"),
                Ok(Event::Message(msg)) => match msg.event.as_str() {
                    "message_start" => {
                        match parse_input_tokens(&msg.data) {
                            Some(n) => input_tokens = n,
                            None => warn!("failed to parse input_tokens from message_start"),
                        }
                    }
                    "content_block_delta" => {
                        if let Some(text) = parse_delta_text(&msg.data) {
                            full_text.push_str(&text);
                            if tx.send(LlmEvent::Token { text }).await.is_err() {
                                es.close();
                                return Ok(());
                            }
                        }
                    }
                    "message_delta" => {
                        if let Some(n) = parse_output_tokens(&msg.data) {
                            output_tokens = n;
                        }
                    }
                    "message_stop" => {
                        debug!(input_tokens, output_tokens, "explanation stream complete");
                        let _ = tx
                            .send(LlmEvent::Complete {
                                full_text,
                                input_tokens,
                                output_tokens,
                            })
                            .await;
                        es.close();
                        return Ok(());
                    }
                    "error" => {
                        let message = parse_error_message(&msg.data)
                            .unwrap_or_else(|| "API reported an error".to_string());
                        let _ = tx.send(LlmEvent::Error { message }).await;
                        es.close();
                        return Ok(());
                    }
                    other => debug!(event_type = other, "ignoring SSE event"),
                },
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: extract_error_message(&err),
                        })
                        .await;
                    es.close();
                    return Ok(());
                }
            }
        }

        // Stream ended without message_stop.
        let event = if full_text.is_empty() {
            LlmEvent::Error {
                message: "Stream ended unexpectedly without any content".to_string(),
            }
        } else {
            LlmEvent::Complete {
                full_text,
                input_tokens,
                output_tokens,
            }
        };
        let _ = tx.send(event).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// Either a configured Claude client or disabled (no API key).
pub enum LlmClient {
    Active(ClaudeClient),
    Disabled,
}

impl LlmClient {
    /// `Active` when a non-empty API key is configured, otherwise `Disabled`.
    pub fn from_config(config: &LlmConfig) -> Self {
        match &config.api_key {
            Some(key) if !key.trim().is_empty() => LlmClient::Active(ClaudeClient::new(
                key.trim().to_string(),
                config.model.clone(),
                config.max_tokens,
            )),
            _ => LlmClient::Disabled,
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn stream(
        &self,
        system: &str,
        prompt: &str,
        tx: mpsc::Sender<LlmEvent>,
    ) -> anyhow::Result<()> {
        match self {
            LlmClient::Active(client) => client.stream_message(system, prompt, tx).await,
            LlmClient::Disabled => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: "LLM not configured".to_string(),
                    })
                    .await;
                Ok(())
            }
        }
    }

    fn is_enabled(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// `{ "type": "message_start", "message": { "usage": { "input_tokens": N } } }`
pub(crate) fn parse_input_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("message")?
        .get("usage")?
        .get("input_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// `{ "type": "content_block_delta", "delta": { "type": "text_delta", "text": "..." } }`
pub(crate) fn parse_delta_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?.get("text")?.as_str().map(|s| s.to_string())
}

/// `{ "type": "message_delta", "usage": { "output_tokens": N } }`
pub(crate) fn parse_output_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("usage")?
        .get("output_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// `{ "type": "error", "error": { "type": "overloaded_error", "message": "..." } }`
pub(crate) fn parse_error_message(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

fn extract_error_message(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("API returned status {status}")
        }
        reqwest_eventsource::Error::Transport(e) => format!("Network error: {e}"),
        other => format!("Stream error: {other}"),
    }
}

/// Drain `rx`, returning the complete text or the first error message.
pub async fn collect_text(mut rx: mpsc::Receiver<LlmEvent>) -> Result<String, String> {
    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            LlmEvent::Token { text: t } => text.push_str(&t),
            LlmEvent::Complete { full_text, .. } => return Ok(full_text),
            LlmEvent::Error { message } => return Err(message),
        }
    }
    if text.is_empty() {
        Err("stream closed without output".to_string())
    } else {
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_start_input_tokens() {
        let data = r#"{
            "type": "message_start",
            "message": { "id": "msg_1", "usage": { "input_tokens": 42, "output_tokens": 0 } }
        }"#;
        assert_eq!(parse_input_tokens(data), Some(42));
        assert_eq!(parse_input_tokens("not json"), None);
    }

    #[test]
    fn parse_content_block_delta() {
        let data = r#"{ "type": "content_block_delta", "index": 0,
                        "delta": { "type": "text_delta", "text": "Captain Salah" } }"#;
        assert_eq!(parse_delta_text(data), Some("Captain Salah".to_string()));
        assert_eq!(parse_delta_text(r#"{ "type": "content_block_delta" }"#), None);
    }

    #[test]
    fn parse_message_delta_output_tokens() {
        let data = r#"{ "type": "message_delta", "delta": { "stop_reason": "end_turn" },
                        "usage": { "output_tokens": 128 } }"#;
        assert_eq!(parse_output_tokens(data), Some(128));
        assert_eq!(parse_output_tokens(r#"{ "delta": {} }"#), None);
    }

    #[test]
    fn parse_error_event() {
        let data = r#"{ "type": "error", "error": { "type": "overloaded_error", "message": "Overloaded" } }"#;
        assert_eq!(parse_error_message(data), Some("Overloaded".to_string()));
    }

    #[test]
    fn from_config_selects_variant() {
        let mut config = LlmConfig::default();
        assert!(matches!(LlmClient::from_config(&config), LlmClient::Disabled));
        config.api_key = Some("   ".to_string());
        assert!(matches!(LlmClient::from_config(&config), LlmClient::Disabled));
        config.api_key = Some("sk-ant-test".to_string());
        let client = LlmClient::from_config(&config);
        assert!(matches!(client, LlmClient::Active(_)));
        assert!(client.is_enabled());
    }

    #[tokio::test]
    async fn disabled_client_sends_error_event() {
        let (tx, rx) = mpsc::channel(8);
        LlmClient::Disabled.stream("system", "user", tx).await.unwrap();
        assert_eq!(collect_text(rx).await, Err("LLM not configured".to_string()));
    }

    #[tokio::test]
    async fn empty_api_key_sends_error_event() {
        let client = ClaudeClient::new(String::new(), "model".into(), 100);
        let (tx, mut rx) = mpsc::channel(8);
        client.stream_message("system", "user", tx).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(LlmEvent::Error {
                message: "API key not configured".to_string()
            })
        );
    }

    #[tokio::test]
    async fn collect_text_without_complete_uses_tokens() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(LlmEvent::Token { text: "a".into() }).await.unwrap();
        tx.send(LlmEvent::Token { text: "b".into() }).await.unwrap();
        drop(tx);
        assert_eq!(collect_text(rx).await, Ok("ab".to_string()));
    }

    /// Serve one canned HTTP response on a local port and return its URL.
    async fn mock_server(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn streams_tokens_from_mock_server() {
        let url = mock_server(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: text/event-stream\r\n",
            "Cache-Control: no-cache\r\n",
            "\r\n",
            "event: message_start\r\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":15}}}\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Strong\"}}\r\n",
            "\r\n",
            "event: content_block_delta\r\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" squad\"}}\r\n",
            "\r\n",
            "event: message_delta\r\n",
            "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":7}}\r\n",
            "\r\n",
            "event: message_stop\r\n",
            "data: {\"type\":\"message_stop\"}\r\n",
            "\r\n",
        ))
        .await;

        let client = ClaudeClient::new("sk-test".into(), "test".into(), 64).with_url(url);
        let (tx, mut rx) = mpsc::channel(32);
        client.stream_message("system", "user", tx).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                LlmEvent::Token { text: "Strong".into() },
                LlmEvent::Token { text: " squad".into() },
                LlmEvent::Complete {
                    full_text: "Strong squad".into(),
                    input_tokens: 15,
                    output_tokens: 7,
                },
            ]
        );
    }

    #[tokio::test]
    async fn error_status_reported_as_event() {
        let url = mock_server(concat!(
            "HTTP/1.1 401 Unauthorized\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 2\r\n",
            "\r\n",
            "{}",
        ))
        .await;

        let client = ClaudeClient::new("sk-bad".into(), "test".into(), 64).with_url(url);
        let (tx, rx) = mpsc::channel(8);
        client.stream_message("system", "user", tx).await.unwrap();
        let err = collect_text(rx).await.unwrap_err();
        assert!(err.contains("401"), "{err}");
    }
}
