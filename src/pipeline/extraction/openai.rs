//! OpenAI-compatible chat-completions client for vision extraction.
//!
//! Speaks the `choices[0].message.content` + `usage` wire shape, so any
//! compatible gateway works. The model name comes from the caller on every
//! request — the resilient client swaps in the fallback model mid-flight.

use serde::{Deserialize, Serialize};

use super::types::{TokenUsage, VisionCall, VisionModelClient, VisionResponse};
use super::ExtractionError;

pub struct OpenAiVisionClient {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl OpenAiVisionClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Config(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Hosted endpoint with a 2-minute timeout.
    pub fn default_remote(api_key: &str) -> Result<Self, ExtractionError> {
        Self::new("https://api.openai.com/v1", api_key, 120)
    }
}

// ── Wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
    detail: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl VisionModelClient for OpenAiVisionClient {
    fn call(&self, request: &VisionCall) -> Result<VisionResponse, ExtractionError> {
        let mut parts = vec![ContentPart::Text {
            text: request.prompt.clone(),
        }];
        for image in &request.images {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/jpeg;base64,{image}"),
                    detail: request.detail.as_str().to_string(),
                },
            });
        }

        let body = ChatCompletionRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(request.system.clone()),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(parts),
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| ExtractionError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let text = response.text().unwrap_or_default();
            return Err(ExtractionError::RateLimited(text));
        }
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| ExtractionError::Http(format!("Response decode failed: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ExtractionError::EmptyResponse)?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(VisionResponse { content, usage })
    }
}

/// Canned-response client for tests and offline runs.
pub struct MockVisionClient {
    response: String,
    usage: TokenUsage,
}

impl MockVisionClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            usage: TokenUsage {
                input_tokens: 200,
                output_tokens: 50,
            },
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}

impl VisionModelClient for MockVisionClient {
    fn call(&self, _request: &VisionCall) -> Result<VisionResponse, ExtractionError> {
        Ok(VisionResponse {
            content: self.response.clone(),
            usage: self.usage,
        })
    }
}
