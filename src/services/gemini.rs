use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Returned in place of an answer when the provider sends no text.
pub const NO_RESULT: &str = "No result from AI";

const DEFAULT_TEXT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// An image sent inline with a multimodal request.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Client for a Gemini-style `generateContent` endpoint.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    api_key: String,
    text_timeout: Duration,
    image_timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Inline { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, GatewayError> {
        let http = Client::builder().build().map_err(GatewayError::Http)?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            text_timeout: DEFAULT_TEXT_TIMEOUT,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, text: Duration, image: Duration) -> Self {
        self.text_timeout = text;
        self.image_timeout = image;
        self
    }

    /// Text-only generation.
    pub async fn generate_text(&self, prompt: &str) -> Result<String, GatewayError> {
        self.send(vec![Part::Text { text: prompt }], self.text_timeout, 0)
            .await
    }

    /// One request carrying the instruction followed by every image.
    pub async fn generate_from_images(
        &self,
        instruction: &str,
        images: &[InlineImage],
    ) -> Result<String, GatewayError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(Part::Text { text: instruction });
        parts.extend(images.iter().map(|image| Part::Inline {
            inline_data: InlineData {
                mime_type: &image.mime_type,
                data: engine.encode(&image.data),
            },
        }));

        self.send(parts, self.image_timeout, images.len()).await
    }

    async fn send(
        &self,
        parts: Vec<Part<'_>>,
        timeout: Duration,
        image_count: usize,
    ) -> Result<String, GatewayError> {
        let body = GenerateRequest {
            contents: [Content { parts }],
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::Http)?;

        let status = response.status();
        metrics::histogram!("gateway_request_seconds").record(start.elapsed().as_secs_f64());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                image_count,
                body = %body,
                "AI provider returned an error"
            );
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(GatewayError::Http)?;
        let parsed: GenerateResponse = serde_json::from_slice(&bytes)?;
        let text = extract_text(parsed);

        tracing::info!(
            latency_ms = start.elapsed().as_millis() as u64,
            image_count,
            response_chars = text.len(),
            "AI provider call complete"
        );

        Ok(text)
    }
}

/// Joins the text parts of the first candidate, or the sentinel when empty.
fn extract_text(response: GenerateResponse) -> String {
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        NO_RESULT.to_string()
    } else {
        text
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed: {status}")]
    Status { status: u16, body: String },

    #[error("Failed to parse AI response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    /// What the upstream said, for surfacing to synchronous callers.
    pub fn upstream_detail(&self) -> String {
        match self {
            GatewayError::Status { body, .. } if !body.is_empty() => body.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> String {
        extract_text(serde_json::from_value(json).unwrap())
    }

    #[test]
    fn test_joins_text_parts_with_newline() {
        let text = parse(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "Rice"}, {"text": "Jute"}]}}]
        }));
        assert_eq!(text, "Rice\nJute");
    }

    #[test]
    fn test_only_first_candidate_used() {
        let text = parse(serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": "first"}]}},
                {"content": {"parts": [{"text": "second"}]}}
            ]
        }));
        assert_eq!(text, "first");
    }

    #[test]
    fn test_parts_without_text_skipped() {
        let text = parse(serde_json::json!({
            "candidates": [{"content": {"parts": [
                {"inline_data": {"mime_type": "image/png", "data": ""}},
                {"text": "Maize"}
            ]}}]
        }));
        assert_eq!(text, "Maize");
    }

    #[test]
    fn test_missing_text_returns_sentinel() {
        assert_eq!(parse(serde_json::json!({})), NO_RESULT);
        assert_eq!(parse(serde_json::json!({"candidates": []})), NO_RESULT);
        assert_eq!(
            parse(serde_json::json!({"candidates": [{"finishReason": "SAFETY"}]})),
            NO_RESULT
        );
        assert_eq!(
            parse(serde_json::json!({"candidates": [{"content": {"parts": [{"text": ""}]}}]})),
            NO_RESULT
        );
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            contents: [Content {
                parts: vec![
                    Part::Text { text: "look" },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "image/png",
                            data: "AAAA".to_string(),
                        },
                    },
                ],
            }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"contents": [{"parts": [
                {"text": "look"},
                {"inline_data": {"mime_type": "image/png", "data": "AAAA"}}
            ]}]})
        );
    }

    #[test]
    fn test_upstream_detail_prefers_body() {
        let err = GatewayError::Status {
            status: 429,
            body: "quota exceeded".to_string(),
        };
        assert_eq!(err.upstream_detail(), "quota exceeded");
        assert_eq!(err.to_string(), "API request failed: 429");
    }
}
