use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Result;
use crate::json::extract_json;
use crate::prompt;
use crate::stream::StreamEvent;

/// A single turn handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Non-streaming completion result.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Structured summary returned by [`LlmAdapter::summarize`].
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryOutput {
    pub title: String,
    pub summary: String,
}

/// Category of a proposed branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Topics,
    Details,
    Alternatives,
    Questions,
    Examples,
}

impl BranchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchType::Topics => "topics",
            BranchType::Details => "details",
            BranchType::Alternatives => "alternatives",
            BranchType::Questions => "questions",
            BranchType::Examples => "examples",
        }
    }
}

/// One branch proposed by [`LlmAdapter::analyze_branches`]. Priority and
/// depth are optional — callers fill positional defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchSuggestion {
    pub title: String,
    #[serde(rename = "type")]
    pub branch_type: BranchType,
    pub description: String,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub estimated_depth: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct BranchAnalysis {
    #[serde(default)]
    recommended_branches: Vec<BranchSuggestion>,
}

/// Common interface for LLM providers.
///
/// `summarize` and `analyze_branches` are default-implemented on top of
/// `chat`, so a concrete provider only needs the completion calls.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Non-streaming completion.
    async fn chat(&self, messages: &[ChatMessage], temperature: f32) -> Result<ChatResponse>;

    /// Stream a completion through a channel. The sequence is finite and
    /// not restartable.
    ///
    /// Default: falls back to non-streaming `chat`, emitting one
    /// `TextDelta` followed by `Done`.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let response = self.chat(messages, temperature).await?;
        let _ = tx
            .send(StreamEvent::TextDelta {
                text: response.content,
            })
            .await;
        let _ = tx
            .send(StreamEvent::Done {
                finish_reason: response.finish_reason,
            })
            .await;
        Ok(())
    }

    /// Summarise a set of contents into `{title ≤ 20 chars, summary}`.
    async fn summarize(
        &self,
        contents: &[String],
        instructions: Option<&str>,
    ) -> Result<SummaryOutput> {
        let messages = vec![
            ChatMessage::system(prompt::SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(prompt::summary_prompt(contents, instructions)),
        ];
        let response = self.chat(&messages, 0.3).await?;

        let parsed: Option<SummaryOutput> =
            serde_json::from_str(extract_json(&response.content)).ok();
        Ok(match parsed {
            Some(output) if !output.summary.is_empty() => SummaryOutput {
                title: clip_title(&output.title, instructions),
                summary: output.summary,
            },
            // The model ignored the JSON contract — use its whole reply.
            _ => SummaryOutput {
                title: clip_title("", instructions),
                summary: response.content,
            },
        })
    }

    /// Analyse a conversation for promising branches, at most three.
    async fn analyze_branches(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Vec<BranchSuggestion>> {
        let conversation: Vec<String> = messages
            .iter()
            .map(|m| format!("{}: {}", role_label(m.role), m.content))
            .collect();
        let request = vec![
            ChatMessage::system(prompt::BRANCH_SYSTEM_PROMPT),
            ChatMessage::user(prompt::branch_prompt(&conversation.join("\n"))),
        ];
        let response = self.chat(&request, temperature).await?;

        let raw = extract_json(&response.content);
        let mut branches = match serde_json::from_str::<BranchAnalysis>(raw) {
            Ok(analysis) => analysis.recommended_branches,
            Err(_) => match serde_json::from_str::<Vec<BranchSuggestion>>(raw) {
                Ok(list) => list,
                Err(e) => {
                    warn!(provider = self.name(), error = %e, "branch analysis returned unparseable output");
                    Vec::new()
                }
            },
        };

        branches.truncate(prompt::MAX_BRANCHES);
        for branch in &mut branches {
            branch.priority = branch.priority.map(|p| p.clamp(0.0, 1.0));
            branch.estimated_depth = branch.estimated_depth.map(|d| d.clamp(1, 10));
        }
        Ok(branches)
    }
}

fn role_label(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

/// Titles are capped at 20 characters; fall back to the instructions (also
/// clipped) or a generic label when the model supplied none.
fn clip_title(title: &str, instructions: Option<&str>) -> String {
    let title = title.trim();
    if !title.is_empty() {
        return title.chars().take(20).collect();
    }
    match instructions {
        Some(instructions) if !instructions.trim().is_empty() => {
            instructions.trim().chars().take(20).collect()
        }
        _ => "Summary".to_string(),
    }
}
