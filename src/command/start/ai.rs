use crate::command::store::database::{
    schema::{NewAiLog, PersonalData},
    DatabaseBackend,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::warn;

mod openai;
mod sse;
pub mod tools;

pub use openai::OpenAiProvider;

#[derive(thiserror::Error, Debug)]
pub enum AiError {
    #[error("missing api key")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("stream receiver closed")]
    StreamClosed,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysis {
    pub extracted_data: PersonalData,
    pub confidence: f64,
    pub processed_successfully: bool,
}

#[async_trait]
pub trait AiProvider: Send + Sync + 'static {
    fn model(&self) -> &str;

    async fn generate_response(&self, messages: &[ChatMessage]) -> Result<String, AiError>;

    /// Send reply text deltas to `tx` as they arrive.
    async fn generate_response_stream(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<String>,
    ) -> Result<(), AiError>;

    /// Extract personal data from a document. Failures are reported through
    /// `processed_successfully`.
    async fn analyze_document(&self, data: &[u8], mime_type: &str) -> DocumentAnalysis;

    /// Return a new `Box<dyn AiProvider>` cloned from `self`.
    fn box_clone(&self) -> Box<dyn AiProvider>;
}

impl Clone for Box<dyn AiProvider> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// A provider call in flight, recorded to `ai_logs` when finished.
pub struct AiCall {
    input: Option<Value>,
    model: String,
    request_type: &'static str,
    session_id: Option<String>,
    started: Instant,
}

impl AiCall {
    pub fn start(
        request_type: &'static str,
        model: &str,
        session_id: Option<String>,
        input: Option<Value>,
    ) -> Self {
        Self {
            input,
            model: model.to_string(),
            request_type,
            session_id,
            started: Instant::now(),
        }
    }

    /// Write the log row. Logging failures never fail the request.
    pub async fn finish(
        self,
        database: &dyn DatabaseBackend,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let duration = i32::try_from(self.started.elapsed().as_millis()).unwrap_or(i32::MAX);

        let log = NewAiLog {
            session_id: self.session_id,
            request_type: self.request_type.to_string(),
            input_data: self.input,
            output_data: output,
            model: Some(self.model),
            tokens: None,
            duration: Some(duration),
            status: if error.is_none() { "success" } else { "error" }.to_string(),
            error_message: error,
        };

        if let Err(err) = database.create_ai_log(log).await {
            warn!("chat |> failed to record ai call: {}", err);
        }
    }
}

/// Decode a model reply as extracted personal data. Markdown code fences
/// around the JSON are ignored.
pub fn parse_extraction(text: &str) -> Option<PersonalData> {
    let text = text.trim();

    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);

    let text = text.trim_end().strip_suffix("```").unwrap_or(text).trim();

    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => Some(PersonalData::from_value(&value)),
        _ => None,
    }
}
