//! Telegram adapter over the Bot API long-poll.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::{CourierError, InboundEvent, OutboundMessage, Result, SessionKey};

use crate::adapter::{AdapterEvent, ChannelAdapter};

/// Consecutive long-poll failures before the stream gives up and reports
/// the connection lost.
const MAX_POLL_FAILURES: u32 = 5;

pub struct TelegramAdapter {
    id: String,
    token: String,
    client: reqwest::Client,
    /// Sender of the current connection's event stream, for heartbeat acks.
    events: Mutex<Option<mpsc::Sender<AdapterEvent>>>,
    /// Cancels the current long-poll task.
    poll_cancel: Mutex<Option<CancellationToken>>,
}

impl TelegramAdapter {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        // The server-side long-poll timeout is 30s, so the request timeout
        // needs headroom beyond that.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(45))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            id: id.into(),
            token: token.into(),
            client,
            events: Mutex::new(None),
            poll_cancel: Mutex::new(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }

    fn channel_err(&self, reason: impl Into<String>) -> CourierError {
        CourierError::Channel {
            channel: self.id.clone(),
            reason: reason.into(),
        }
    }

    async fn get_me(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| self.channel_err(format!("getMe failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(self.channel_err(format!("getMe returned HTTP {}", resp.status())));
        }
        Ok(())
    }
}

/// One `getUpdates` message turned into an inbound event.
fn parse_update(channel_id: &str, update: &Value) -> Option<InboundEvent> {
    let message = update.get("message")?;
    let text = message.get("text")?.as_str()?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?.to_string();
    let from = message.get("from")?;
    // Prefer the stable username; fall back to the numeric user id.
    let sender = from
        .get("username")
        .and_then(|u| u.as_str())
        .map(str::to_string)
        .or_else(|| from.get("id").and_then(|i| i.as_i64()).map(|i| i.to_string()))?;

    Some(InboundEvent::new(
        sender,
        channel_id,
        SessionKey::new("telegram", chat_id),
        text,
    ))
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn transport(&self) -> &str {
        "telegram"
    }

    async fn connect(&self) -> Result<mpsc::Receiver<AdapterEvent>> {
        // Authentication doubles as the connect check.
        self.get_me().await?;

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        // Replace any previous connection's poll task.
        if let Some(old) = self.poll_cancel.lock().replace(cancel.clone()) {
            old.cancel();
        }
        *self.events.lock() = Some(tx.clone());

        let client = self.client.clone();
        let base = self.api_url("getUpdates");
        let channel_id = self.id.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let mut failures: u32 = 0;
            info!(channel = %channel_id, "telegram long-poll started");

            loop {
                let url = format!("{base}?offset={offset}&timeout=30");
                let response = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(channel = %channel_id, "telegram long-poll stopped");
                        return;
                    }
                    r = client.get(&url).send() => r,
                };

                let polled: std::result::Result<Value, String> = match response {
                    Ok(resp) if resp.status().is_success() => {
                        resp.json().await.map_err(|e| format!("bad body: {e}"))
                    }
                    Ok(resp) => Err(format!("HTTP {}", resp.status())),
                    Err(e) => Err(e.to_string()),
                };

                let body = match polled {
                    Ok(body) => body,
                    Err(reason) => {
                        failures += 1;
                        warn!(channel = %channel_id, %reason, failures, "long-poll failed");
                        if failures >= MAX_POLL_FAILURES {
                            let _ = tx
                                .send(AdapterEvent::ConnectionLost(format!(
                                    "long-poll failed {failures} times: {reason}"
                                )))
                                .await;
                            return;
                        }
                        tokio::time::sleep(Duration::from_secs(2u64.pow(failures))).await;
                        continue;
                    }
                };

                failures = 0;
                for update in body
                    .get("result")
                    .and_then(|r| r.as_array())
                    .map(Vec::as_slice)
                    .unwrap_or_default()
                {
                    if let Some(id) = update.get("update_id").and_then(|i| i.as_i64()) {
                        offset = offset.max(id + 1);
                    }
                    if let Some(event) = parse_update(&channel_id, update)
                        && tx.send(AdapterEvent::Inbound(event)).await.is_err()
                    {
                        // Supervisor dropped the stream; this connection is over.
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": message.conversation,
                "text": message.content,
            }))
            .send()
            .await
            .map_err(|e| self.channel_err(format!("sendMessage failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(self.channel_err(format!("sendMessage HTTP {status}: {body}")));
        }
        debug!(channel = %self.id, conversation = %message.conversation, "message sent");
        Ok(())
    }

    fn requires_heartbeat(&self) -> bool {
        true
    }

    async fn send_heartbeat(&self) -> Result<()> {
        self.get_me().await?;
        // getMe returned, so the probe is its own ack.
        let tx = self.events.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.try_send(AdapterEvent::HeartbeatAck);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(cancel) = self.poll_cancel.lock().take() {
            cancel.cancel();
        }
        *self.events.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_becomes_an_inbound_event() {
        let update = json!({
            "update_id": 42,
            "message": {
                "text": "hello",
                "chat": {"id": 12345},
                "from": {"id": 777, "username": "alice"}
            }
        });
        let event = parse_update("tg-main", &update).unwrap();
        assert_eq!(event.sender, "alice");
        assert_eq!(event.content, "hello");
        assert_eq!(event.session_key, SessionKey::new("telegram", "12345"));
    }

    #[test]
    fn sender_falls_back_to_the_numeric_id() {
        let update = json!({
            "update_id": 43,
            "message": {
                "text": "hi",
                "chat": {"id": 12345},
                "from": {"id": 777}
            }
        });
        let event = parse_update("tg-main", &update).unwrap();
        assert_eq!(event.sender, "777");
    }

    #[test]
    fn non_text_updates_are_ignored() {
        let update = json!({
            "update_id": 44,
            "message": {
                "photo": [{"file_id": "abc"}],
                "chat": {"id": 12345},
                "from": {"id": 777}
            }
        });
        assert!(parse_update("tg-main", &update).is_none());
    }
}
