//! Chat-completions client for the vision model.
//!
//! The worker only needs two calls: describe one image and summarize a list
//! of facts. Both go through [`VisionModel`] so the processor can run against
//! a scripted model in tests.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const DESCRIBE_PROMPT: &str = "You are an experienced radiologist explaining a single image to a non-specialist.

1. Describe main anatomical structures you recognise.
2. State whether the image is normal or abnormal.
3. If abnormal, list the key finding(s) and for each give up to two POSSIBLE conditions (differential diagnosis) in plain English. Use phrases like \"could indicate ...\" or \"may represent ...\", never a definitive diagnosis.
4. For each finding, provide bbox [x,y,width,height] normalized to the image size.
5. Keep the entire reply <=80 words.

Return EXACTLY this JSON schema only:
{ \"caption\": \"...\", \"findings\": [ {\"observation\":\"...\", \"possibleConditions\":[\"...\",\"...\"], \"bbox\":[x,y,w,h]} ] }";

const SUMMARY_PROMPT_HEAD: &str =
    "You are reviewing multiple annotated radiology images.\nHere are the findings for each image:\n";

const SUMMARY_PROMPT_TAIL: &str = "Write a concise layperson-friendly report (<=150 words):
- Summarise overall state (normal or abnormal).
- Group related findings.
- Mention the MOST LIKELY conditions using cautious language (e.g., \"could indicate...\").
- Finish with: \"These observations are informational and not a substitute for professional diagnosis.\"";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model returned no content")]
    EmptyReply,
}

/// The external vision/language model.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Raw JSON reply describing one image.
    async fn describe(&self, image_bytes: &[u8]) -> Result<String, ModelError>;

    /// Free-text report for a rendered list of per-image facts.
    async fn summarize(&self, facts: &str) -> Result<String, ModelError>;
}

// ========== WIRE TYPES ==========
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `data:` URI for inline image upload.
pub fn image_data_uri(image_bytes: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(image_bytes)
    )
}

pub fn summary_prompt(facts: &str) -> String {
    format!("{SUMMARY_PROMPT_HEAD}{facts}\n\n{SUMMARY_PROMPT_TAIL}")
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ModelError::EmptyReply)
    }
}

#[async_trait]
impl VisionModel for OpenAiClient {
    async fn describe(&self, image_bytes: &[u8]) -> Result<String, ModelError> {
        tracing::debug!("🧠 describe: model={}, bytes={}", self.model, image_bytes.len());

        self.complete(ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::ImageUrl {
                        image_url: ImageUrl {
                            url: image_data_uri(image_bytes),
                            detail: "high",
                        },
                    },
                    Content::Text {
                        text: DESCRIBE_PROMPT.to_string(),
                    },
                ],
            }],
            max_tokens: 400,
            temperature: 0.2,
            response_format: Some(ResponseFormat {
                r#type: "json_object",
            }),
        })
        .await
    }

    async fn summarize(&self, facts: &str) -> Result<String, ModelError> {
        tracing::debug!("🧠 summarize: model={}", self.model);

        self.complete(ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: vec![Content::Text {
                    text: summary_prompt(facts),
                }],
            }],
            max_tokens: 250,
            temperature: 0.3,
            response_format: None,
        })
        .await
    }
}
