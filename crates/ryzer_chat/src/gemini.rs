//! HTTP implementation of [`GenerativeBackend`] for the Gemini API.
//!
//! Chat uses `:streamGenerateContent?alt=sse` and is consumed
//! incrementally; image generation and speech synthesis are single
//! `:generateContent` calls. Nothing is retried and no timeout is applied:
//! a stalled stream is ended by the caller's cancellation.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{ChatError, ChatResult};
use crate::llm::{
    ChatChunk, ChatRequest, ChatStream, Citation, Content, GenerativeBackend, InlineData, Part,
};
use crate::sse::{SseEvent, SseLineParser};
use crate::types::Role;

/// Gemini REST client
pub struct GeminiClient {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.config.api_base, model, method)
    }

    async fn post(&self, url: &str, body: &WireRequest) -> ChatResult<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: api_error_message(&body),
            });
        }
        Ok(response)
    }

    async fn generate_inline(
        &self,
        model: &str,
        text: String,
        modality: &'static str,
    ) -> ChatResult<Option<InlineData>> {
        let body = WireRequest {
            contents: vec![WireContent {
                role: Some("user"),
                parts: vec![WirePart::text(text)],
            }],
            system_instruction: None,
            generation_config: Some(WireGenerationConfig {
                response_modalities: Some(vec![modality]),
                ..WireGenerationConfig::default()
            }),
            tools: None,
        };

        let url = self.endpoint(model, "generateContent");
        let response: WireResponse = self
            .post(&url, &body)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::MalformedResponse(e.to_string()))?;

        Ok(response.first_inline_data())
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn stream_chat(&self, request: ChatRequest) -> ChatResult<ChatStream> {
        let url = format!(
            "{}?alt=sse",
            self.endpoint(request.model.api_name(), "streamGenerateContent")
        );
        debug!("Streaming chat from {}", request.model);

        let body = WireRequest::from_chat(&request);
        let response = self.post(&url, &body).await?;
        let stream: ChatStream = Box::pin(chunk_stream(response.bytes_stream()));
        Ok(stream)
    }

    async fn generate_image(&self, prompt: String) -> ChatResult<InlineData> {
        self.generate_inline(&self.config.image_model, prompt, "IMAGE")
            .await?
            .ok_or_else(|| ChatError::EmptyResponse("No image data received.".to_string()))
    }

    async fn synthesize_speech(&self, text: String) -> ChatResult<Vec<u8>> {
        let audio = self
            .generate_inline(&self.config.speech_model, text, "AUDIO")
            .await?
            .ok_or_else(|| ChatError::EmptyResponse("No audio data returned".to_string()))?;

        STANDARD
            .decode(audio.data.as_bytes())
            .map_err(|e| ChatError::AudioDecode(e.to_string()))
    }
}

/// Turn a raw SSE byte stream into ordered chat chunks.
fn chunk_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = ChatResult<ChatChunk>> + Send {
    futures::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            parser: SseLineParser::new(),
            ready: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(item) = state.ready.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        for event in state.parser.push(&bytes) {
                            state.enqueue(event);
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(ChatError::from(e)), state));
                    }
                    None => {
                        state.finished = true;
                        if let Some(event) = state.parser.flush() {
                            state.enqueue(event);
                        }
                    }
                }
            }
        },
    )
}

struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    parser: SseLineParser,
    ready: VecDeque<ChatResult<ChatChunk>>,
    finished: bool,
}

impl StreamState {
    fn enqueue(&mut self, event: SseEvent) {
        if event.is_done() {
            return;
        }
        if let Some(item) = parse_stream_event(&event.data) {
            self.ready.push_back(item);
        }
    }
}

/// Decode one streamed JSON document. Keep-alive documents without
/// candidates or error yield `None`.
fn parse_stream_event(data: &str) -> Option<ChatResult<ChatChunk>> {
    let response: WireResponse = match serde_json::from_str(data) {
        Ok(response) => response,
        Err(e) => return Some(Err(ChatError::MalformedResponse(e.to_string()))),
    };

    if let Some(error) = response.error {
        return Some(Err(ChatError::Api {
            status: error.code.unwrap_or(500),
            body: error.message.unwrap_or_default(),
        }));
    }

    let candidate = response.candidates.into_iter().next()?;
    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| !part.thought.unwrap_or(false))
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let citations = candidate
        .grounding_metadata
        .and_then(|metadata| metadata.grounding_chunks)
        .map(|chunks| {
            chunks
                .into_iter()
                .map(|chunk| {
                    let web = chunk.web.unwrap_or_default();
                    Citation {
                        title: web.title,
                        uri: web.uri,
                    }
                })
                .collect()
        });

    Some(Ok(ChatChunk { text, citations }))
}

/// Pull `error.message` out of an error body, falling back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<WireResponse>(body)
        .ok()
        .and_then(|response| response.error)
        .and_then(|error| error.message)
        .unwrap_or_else(|| body.to_string())
}

// Gemini API wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

impl WireRequest {
    fn from_chat(request: &ChatRequest) -> Self {
        let contents = request
            .history
            .iter()
            .chain(std::iter::once(&request.turn))
            .map(WireContent::from_content)
            .collect();

        let config = &request.config;
        Self {
            contents,
            system_instruction: config.system_instruction.as_ref().map(|text| WireContent {
                role: None,
                parts: vec![WirePart::text(text.clone())],
            }),
            generation_config: Some(WireGenerationConfig {
                temperature: Some(config.temperature),
                thinking_config: config.thinking_budget.map(|budget| WireThinkingConfig {
                    thinking_budget: budget,
                }),
                response_modalities: None,
            }),
            tools: config
                .search_grounding
                .then(|| vec![WireTool { google_search: WireEmpty {} }]),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart>,
}

impl WireContent {
    fn from_content(content: &Content) -> Self {
        Self {
            role: Some(match content.role {
                Role::User => "user",
                Role::Model => "model",
            }),
            parts: content
                .parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => WirePart::text(text.clone()),
                    Part::InlineData(data) => WirePart {
                        text: None,
                        inline_data: Some(data.clone()),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl WirePart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<WireThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    google_search: WireEmpty,
}

#[derive(Debug, Serialize)]
struct WireEmpty {}

#[derive(Debug, Default, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    error: Option<WireError>,
}

impl WireResponse {
    fn first_inline_data(self) -> Option<InlineData> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|part| part.inline_data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireResponseContent>,
    #[serde(default)]
    grounding_metadata: Option<WireGroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireResponseContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroundingMetadata {
    #[serde(default)]
    grounding_chunks: Option<Vec<WireGroundingChunk>>,
}

#[derive(Debug, Deserialize)]
struct WireGroundingChunk {
    #[serde(default)]
    web: Option<WireWeb>,
}

#[derive(Debug, Default, Deserialize)]
struct WireWeb {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}
