//! Pass-through AI chat helper.
//!
//! The completion call is an opaque external capability behind
//! [`ChatCompleter`]; this module assembles the system prompt, forwards the
//! conversation, and translates failures. Nothing is retried.

use async_trait::async_trait;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::err::Error;
use crate::{breaks, proceeds, App, Payload};

#[derive(Debug)]
pub struct ChatError(pub String);

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat completion failed: {}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ChatError>;
}

const PERSONA: &str = "You are the StudentHub assistant. You help students of the \
mentorship programme with questions about their mentors, meetings and placement \
progress. Be concise, friendly and practical. If you do not know something, say so \
instead of guessing.";

/// System prompt for one conversation, with the caller's student context
/// appended verbatim as a JSON block when present.
pub fn build_system_prompt(student_context: Option<&Value>) -> String {
    match student_context {
        Some(context) => format!("{}\n\nStudent context:\n{}", PERSONA, context),
        None => PERSONA.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: Option<String>,
    pub student_context: Option<Value>,
    pub conversation_history: Option<Vec<ChatTurn>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

pub async fn chat(
    Json(body): Json<ChatRequest>,
    Extension(app): Extension<App>,
) -> Payload<ChatReply> {
    let message = match body.message.as_deref().map(str::trim) {
        Some(message) if !message.is_empty() => message.to_string(),
        _ => {
            return breaks(Error::validation("`message` parameter was empty"));
        }
    };
    let completer = match &app.chat {
        Some(completer) => completer.clone(),
        None => {
            return breaks(Error::unavailable("Chat is not configured!"));
        }
    };

    let system_prompt = build_system_prompt(body.student_context.as_ref());
    let mut history = body.conversation_history.unwrap_or_default();
    history.push(ChatTurn {
        role: "user".to_string(),
        content: message,
    });

    let reply = completer.complete(&system_prompt, &history).await?;
    proceeds(ChatReply { reply })
}
