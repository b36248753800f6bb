//! Google Gemini provider over the Generative Language REST API.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use arbor_core::config::{LLM_REQUEST_TIMEOUT_SECS, LLM_STREAM_GAP_SECS};

use crate::adapter::{ChatMessage, ChatResponse, ChatRole, LlmAdapter, Usage};
use crate::error::{AdapterError, Result};
use crate::stream::{parse_sse_data, StreamEvent};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Split system turns into `systemInstruction`, map the rest onto the
    /// user/model content list.
    fn build_body(&self, messages: &[ChatMessage], temperature: f32) -> serde_json::Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        ChatRole::Assistant => "model",
                        _ => "user",
                    },
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": { "temperature": temperature },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }
        body
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(AdapterError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl LlmAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<ChatResponse> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(LLM_REQUEST_TIMEOUT_SECS))
            .json(&self.build_body(messages, temperature))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            AdapterError::Parse(format!("cannot decode generateContent response: {e}"))
        })?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::Parse("response has no candidates".into()))?;

        debug!(model = %self.model, "gemini completion finished");
        Ok(ChatResponse {
            content: candidate.content.joined_text(),
            finish_reason: candidate.finish_reason,
            usage: parsed.usage_metadata.map(|u| Usage {
                input_tokens: u.prompt_token_count.unwrap_or(0),
                output_tokens: u.candidates_token_count.unwrap_or(0),
            }),
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .http
            .post(&url)
            .json(&self.build_body(messages, temperature))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut finish_reason = None;
        let gap = Duration::from_secs(LLM_STREAM_GAP_SECS);

        loop {
            // Bound the gap between chunks; a stalled provider is an error,
            // a finished stream is not.
            let chunk = match tokio::time::timeout(gap, body.next()).await {
                Err(_) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: format!("no chunk within {}s", gap.as_secs()),
                        })
                        .await;
                    return Err(AdapterError::Timeout {
                        ms: gap.as_millis() as u64,
                    });
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let _ = tx
                        .send(StreamEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                    return Err(AdapterError::Stream(e.to_string()));
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let Some(data) = parse_sse_data(line.trim_end()) else {
                    continue;
                };
                match serde_json::from_str::<GenerateContentResponse>(data) {
                    Ok(parsed) => {
                        if let Some(candidate) = parsed.candidates.into_iter().next() {
                            if candidate.finish_reason.is_some() {
                                finish_reason = candidate.finish_reason.clone();
                            }
                            let text = candidate.content.joined_text();
                            if !text.is_empty()
                                && tx.send(StreamEvent::TextDelta { text }).await.is_err()
                            {
                                // Receiver gone — nothing left to stream to.
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping unparseable SSE chunk"),
                }
            }
        }

        let _ = tx.send(StreamEvent::Done { finish_reason }).await;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl CandidateContent {
    fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_splits_system_instruction() {
        let adapter = GeminiAdapter::new("k".into(), "gemini-2.0-flash-001".into());
        let body = adapter.build_body(
            &[
                ChatMessage::system("be helpful"),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
            ],
            0.7,
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be helpful");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn response_text_joins_parts() {
        let parsed: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]},
                "finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":5}}"#,
        )
        .unwrap();
        let candidate = &parsed.candidates[0];
        assert_eq!(candidate.content.joined_text(), "Hello");
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
    }
}
