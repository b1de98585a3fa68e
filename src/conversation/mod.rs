//! Bounded conversation history and the completion client.
//!
//! The history is owned exclusively by [`ConversationManager`]: the first
//! message is always the fixed system instruction and is never evicted;
//! trimming keeps it plus the most recent turns, dropping the oldest
//! non-system messages first. A completion request is one round-trip to an
//! OpenAI-style chat endpoint with no automatic retry; failures go back to
//! the caller, which surfaces an error turn.

pub mod prompt;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;

/// Who said a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One conversation turn. The optional image is a base64 data URL attached
/// to this message only; it is never retried or cached.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
    pub image: Option<String>,
}

impl ChatMessage {
    fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            image: None,
        }
    }

    /// Wire shape for the chat endpoint: plain string content for text-only
    /// turns, multi-part text+image_url content for vision turns.
    fn to_wire(&self) -> serde_json::Value {
        match &self.image {
            None => json!({ "role": self.role, "content": self.text }),
            Some(data_url) => json!({
                "role": self.role,
                "content": [
                    { "type": "text", "text": self.text },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }),
        }
    }
}

/// Owns the history and talks to the language-model backend.
pub struct ConversationManager {
    history: Vec<ChatMessage>,
    cfg: LlmConfig,
    client: reqwest::Client,
}

impl ConversationManager {
    pub fn new(cfg: LlmConfig, system_prompt: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(3))
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            history: vec![ChatMessage::new(ChatRole::System, system_prompt)],
            cfg,
            client,
        })
    }

    /// Append one user turn, optionally carrying a screenshot.
    pub fn push_user_turn(&mut self, text: impl Into<String>, image: Option<String>) {
        let mut msg = ChatMessage::new(ChatRole::User, text);
        msg.image = image;
        self.history.push(msg);
    }

    /// Append the assistant's reply so follow-up turns have context.
    pub fn push_assistant_turn(&mut self, text: impl Into<String>) {
        self.history.push(ChatMessage::new(ChatRole::Assistant, text));
    }

    /// Drop the oldest non-system messages until the cap holds. The system
    /// message at index 0 always survives.
    fn trim(&mut self) {
        let cap = self.cfg.history_cap.max(1);
        if self.history.len() <= cap {
            return;
        }
        let keep_tail = cap - 1;
        let tail_start = self.history.len() - keep_tail;
        self.history.drain(1..tail_start);
    }

    /// The model for this request: the vision model when any turn in the
    /// outgoing history carries an image.
    fn pick_model(&self) -> (&str, bool) {
        let has_image = self.history.iter().any(|m| m.image.is_some());
        if has_image {
            (&self.cfg.vision_model, true)
        } else {
            (&self.cfg.model, false)
        }
    }

    fn build_request_body(&self) -> serde_json::Value {
        let (model, has_image) = self.pick_model();
        let messages: Vec<_> = self.history.iter().map(ChatMessage::to_wire).collect();
        json!({
            "model": model,
            "messages": messages,
            "temperature": 0.7,
            "max_tokens": if has_image { 1000 } else { 500 },
        })
    }

    /// One blocking round-trip to the chat endpoint. Trims history first so
    /// the invariant holds on what actually goes over the wire. Not retried;
    /// the caller decides how to surface failures.
    pub async fn request_completion(&mut self) -> anyhow::Result<String> {
        self.trim();
        let body = self.build_request_body();
        debug!(
            turns = self.history.len(),
            model = %body["model"],
            "Requesting completion"
        );

        let key = self
            .cfg
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No language-model API key configured"))?;

        let resp = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Completion API error {}: {}", status, body);
        }

        let json: serde_json::Value = resp.json().await?;
        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Completion response had no message content"))?
            .to_string();
        Ok(text)
    }

    #[cfg(test)]
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}
