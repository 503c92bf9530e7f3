// SPDX-License-Identifier: MIT

//! Telegram Bot API transport.
//!
//! A thin client over long-polling `getUpdates` plus the send/edit
//! primitives the chat layer needs. Updates come back already shaped as
//! [`ChatUpdate`], so the core never sees Bot API JSON.

use async_trait::async_trait;
use relay_chat::{ChatUpdate, Keyboard, MessageTransport, TransportError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;

/// Long-poll timeout for getUpdates.
const POLL_TIMEOUT_SECS: u64 = 25;

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Clone)]
pub struct TelegramTransport {
    http: reqwest::Client,
    base: String,
}

impl TelegramTransport {
    pub fn new(bot_token: &str) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            // Longer than the getUpdates long-poll window.
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 20))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base: format!("https://api.telegram.org/bot{bot_token}"),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}/{method}", self.base);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status();
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Request(format!("{method}: {e}")))?;
        if !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| format!("http {status}"));
            // Edit rejections (message unchanged / deleted) are a
            // distinct category: callers fall back to a fresh send.
            if method == "editMessageText" {
                return Err(TransportError::EditRejected(description));
            }
            return Err(TransportError::Request(format!("{method}: {description}")));
        }
        envelope
            .result
            .ok_or_else(|| TransportError::Request(format!("{method}: empty result")))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<ChatUpdate>, TransportError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }
}

fn keyboard_markup(keyboard: &Keyboard) -> serde_json::Value {
    let rows: Vec<Vec<serde_json::Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| {
                    json!({
                        "text": button.text,
                        "callback_data": button.callback_data,
                    })
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<i64, TransportError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = keyboard_markup(keyboard);
        }
        let sent: SentMessage = self.call("sendMessage", &payload).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TransportError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            payload["reply_markup"] = keyboard_markup(keyboard);
        }
        let _: serde_json::Value = self.call("editMessageText", &payload).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<i64, TransportError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TransportError::Request(format!("read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let url = format!("{}/sendDocument", self.base);
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let envelope: ApiEnvelope<SentMessage> = response
            .json()
            .await
            .map_err(|e| TransportError::Request(format!("sendDocument: {e}")))?;
        if !envelope.ok {
            return Err(TransportError::Request(format!(
                "sendDocument: {}",
                envelope.description.unwrap_or_default()
            )));
        }
        Ok(envelope.result.map(|m| m.message_id).unwrap_or_default())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut payload = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        let _: serde_json::Value = self.call("answerCallbackQuery", &payload).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "telegram_tests.rs"]
mod tests;
