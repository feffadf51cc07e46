//! Gemini `generateContent` REST provider implementation.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use proto::{Attachment, ChatModel, LlmError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::llm::{ChatRequest, FragmentStream, HistoryEntry, ImageRequest, ResponseChannel};

/// Public Gemini REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";

/// System instruction sent with every chat request unless overridden.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful, clever and friendly AI assistant.
Give clear, concise and accurate answers.
Put any code you write in fenced markdown code blocks.
When the user sends an image, describe and analyze it in detail.";

// ── Request types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<Attachment>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline(attachment: Attachment) -> Self {
        Self {
            text: None,
            inline_data: Some(attachment),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

impl GenerateContentResponse {
    /// Parts of the first candidate, if any.
    fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    /// First inline image of the first candidate.
    fn inline_image(&self) -> Option<&Attachment> {
        self.parts().iter().find_map(|p| p.inline_data.as_ref())
    }
}

// ── Provider ───────────────────────────────────────────────────────────────────

/// Gemini REST API response channel.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    system_instruction: String,
}

impl GeminiProvider {
    /// Creates a provider targeting the default Gemini API endpoint.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a provider targeting a custom base URL (useful for proxies/tests).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    /// Overrides the system instruction sent with chat requests.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    fn endpoint(&self, model: ChatModel, method: &str) -> String {
        format!(
            "{}/{API_VERSION}/models/{}:{method}",
            self.base_url,
            model.id()
        )
    }

    async fn post(
        &self,
        url: &str,
        body: &GenerateContentRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let payload =
            serde_json::to_vec(body).map_err(|e| LlmError::Serialization(e.to_string()))?;
        trace!("Gemini request body: {}", String::from_utf8_lossy(&payload));
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let status = response.status();
        debug!(status = %status.as_u16(), "Gemini response received");
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimit);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::Api(e.to_string()))?;
            return Err(parse_api_error(&body, status));
        }
        Ok(response)
    }
}

#[async_trait]
impl ResponseChannel for GeminiProvider {
    async fn stream_chat(&self, req: ChatRequest) -> Result<FragmentStream, LlmError> {
        // The image model cannot chat; vision and text requests go to Flash instead.
        let model = if req.model.is_image_generation() {
            ChatModel::Flash
        } else {
            req.model
        };
        let body = GenerateContentRequest {
            contents: build_contents(&req.history, &req.prompt, req.attachment.clone()),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(self.system_instruction.clone())],
            }),
        };

        let url = format!(
            "{}?alt=sse",
            self.endpoint(model, "streamGenerateContent")
        );
        debug!(
            model = %model,
            contents = %body.contents.len(),
            attachment = req.attachment.is_some(),
            "Sending streaming request to Gemini"
        );

        let response = self.post(&url, &body).await?;
        Ok(fragment_stream(response.bytes_stream()))
    }

    async fn generate_image(&self, req: ImageRequest) -> Result<String, LlmError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(req.prompt)],
            }],
            system_instruction: None,
        };
        let url = self.endpoint(ChatModel::ImageGen, "generateContent");
        debug!(model = %ChatModel::ImageGen, "Sending image request to Gemini");

        let response = self.post(&url, &body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Api(e.to_string()))?;
        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::InvalidResponse(format!(
                "Deserialization error: {e}; body: {}",
                text.chars().take(200).collect::<String>()
            ))
        })?;

        Ok(parsed
            .inline_image()
            .map(Attachment::data_uri)
            .unwrap_or_default())
    }
}

// ── Conversion helpers ─────────────────────────────────────────────────────────

/// Builds request contents: history first, then the live user turn.
///
/// Empty history entries are dropped because the API rejects empty parts.
/// The live turn carries the attachment before the prompt text.
fn build_contents(
    history: &[HistoryEntry],
    prompt: &str,
    attachment: Option<Attachment>,
) -> Vec<Content> {
    let mut contents: Vec<Content> = history
        .iter()
        .filter(|h| !h.text.is_empty())
        .map(|h| Content {
            role: Some(h.role.as_str().to_string()),
            parts: vec![Part::text(h.text.clone())],
        })
        .collect();

    let mut parts = Vec::with_capacity(2);
    if let Some(attachment) = attachment {
        parts.push(Part::inline(attachment));
    }
    if !prompt.is_empty() {
        parts.push(Part::text(prompt));
    }
    contents.push(Content {
        role: Some("user".to_string()),
        parts,
    });
    contents
}

/// Parses an API error from a non-success response body.
///
/// Gemini errors look like `{"error": {"code": 400, "message": "...", "status": "..."}}`.
fn parse_api_error(body: &str, status: reqwest::StatusCode) -> LlmError {
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(msg) = parsed["error"]["message"].as_str()
    {
        let lower = msg.to_lowercase();
        let hint = if lower.contains("api key") || lower.contains("permission") {
            " Check the API_KEY environment variable."
        } else if lower.contains("not found") || lower.contains("not supported") {
            " Try /model to select a different model."
        } else {
            ""
        };
        return LlmError::Api(format!("{msg}{hint}"));
    }
    LlmError::Api(format!(
        "HTTP {status}: {}",
        body.chars().take(500).collect::<String>()
    ))
}

/// Extracts the fragment carried by one SSE `data:` payload.
///
/// Returns `Ok(None)` for events without text (e.g. usage-only chunks).
fn parse_fragment(payload: &str) -> Result<Option<String>, LlmError> {
    let chunk: GenerateContentResponse = serde_json::from_str(payload).map_err(|e| {
        LlmError::InvalidResponse(format!(
            "Deserialization error: {e}; data: {}",
            payload.chars().take(200).collect::<String>()
        ))
    })?;
    if let Some(err) = chunk.error {
        return Err(LlmError::Api(err.message));
    }
    let text = chunk.text();
    Ok((!text.is_empty()).then_some(text))
}

/// Incremental Server-Sent Events decoder.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence, so
/// only complete lines are decoded.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds raw bytes and returns every event payload completed by them.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.feed_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    /// Flushes a trailing event that was not followed by a blank line.
    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.feed_line(line.trim_end_matches('\r'), &mut events);
        }
        self.feed_line("", &mut events);
        events
    }

    fn feed_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            self.data.push(data.trim_start().to_string());
        }
        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
    }
}

struct SseState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    done: bool,
}

impl<S> SseState<S> {
    fn enqueue(&mut self, payloads: Vec<String>) {
        for payload in payloads {
            match parse_fragment(&payload) {
                Ok(Some(text)) => self.pending.push_back(Ok(text)),
                Ok(None) => {}
                Err(e) => self.pending.push_back(Err(e)),
            }
        }
    }
}

/// Turns an SSE byte stream into a fragment stream.
///
/// The stream ends after the first error.
fn fragment_stream<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.done = true;
                }
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.decoder.push(chunk.as_ref());
                    state.enqueue(payloads);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(LlmError::Stream(e.to_string())));
                }
                None => {
                    let payloads = state.decoder.finish();
                    state.enqueue(payloads);
                    state.done = true;
                }
            }
        }
    })
    .boxed()
}
