//! Deterministic offline adapter — active whenever no API key is
//! configured. Keeps the whole pipeline exercisable without credentials.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::adapter::{
    BranchSuggestion, BranchType, ChatMessage, ChatResponse, ChatRole, LlmAdapter, SummaryOutput,
};
use crate::error::Result;
use crate::stream::StreamEvent;

#[derive(Debug, Default)]
pub struct MockAdapter;

impl MockAdapter {
    fn reply_for(messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let echo: String = last_user.chars().take(80).collect();
        format!("[mock] I received your message: \"{echo}\". Configure LLM_API_KEY for real responses.")
    }
}

#[async_trait]
impl LlmAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, messages: &[ChatMessage], _temperature: f32) -> Result<ChatResponse> {
        Ok(ChatResponse {
            content: Self::reply_for(messages),
            finish_reason: Some("stop".into()),
            usage: None,
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        // Word-by-word deltas so stream consumers see realistic chunking.
        let reply = Self::reply_for(messages);
        for word in reply.split_inclusive(' ') {
            if tx
                .send(StreamEvent::TextDelta {
                    text: word.to_string(),
                })
                .await
                .is_err()
            {
                return Ok(());
            }
        }
        let _ = tx
            .send(StreamEvent::Done {
                finish_reason: Some("stop".into()),
            })
            .await;
        Ok(())
    }

    async fn summarize(
        &self,
        contents: &[String],
        instructions: Option<&str>,
    ) -> Result<SummaryOutput> {
        let title = match instructions {
            Some(instructions) if !instructions.trim().is_empty() => {
                instructions.trim().chars().take(20).collect()
            }
            _ => "Summary".to_string(),
        };
        Ok(SummaryOutput {
            title,
            summary: format!("[mock] Combined summary of {} sections.", contents.len()),
        })
    }

    async fn analyze_branches(
        &self,
        _messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<Vec<BranchSuggestion>> {
        Ok(vec![
            BranchSuggestion {
                title: "Explore related topics".into(),
                branch_type: BranchType::Topics,
                description: "Dig into adjacent topics raised by this exchange.".into(),
                priority: None,
                estimated_depth: None,
            },
            BranchSuggestion {
                title: "Concrete examples".into(),
                branch_type: BranchType::Examples,
                description: "Walk through a worked example of the answer.".into(),
                priority: Some(0.6),
                estimated_depth: Some(2),
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_echoes_last_user_message() {
        let adapter = MockAdapter;
        let response = adapter
            .chat(&[ChatMessage::user("ping")], 0.7)
            .await
            .unwrap();
        assert!(response.content.contains("ping"));
    }

    #[tokio::test]
    async fn stream_reassembles_to_the_chat_reply() {
        let adapter = MockAdapter;
        let messages = vec![ChatMessage::user("hello world")];
        let expected = adapter.chat(&messages, 0.7).await.unwrap().content;

        let (tx, mut rx) = mpsc::channel(64);
        adapter.stream(&messages, 0.7, tx).await.unwrap();

        let mut assembled = String::new();
        let mut done = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => assembled.push_str(&text),
                StreamEvent::Done { .. } => done = true,
                StreamEvent::Error { message } => panic!("unexpected error: {message}"),
            }
        }
        assert!(done);
        assert_eq!(assembled, expected);
    }

    #[tokio::test]
    async fn branch_analysis_is_bounded() {
        let adapter = MockAdapter;
        let branches = adapter
            .analyze_branches(&[ChatMessage::user("q"), ChatMessage::assistant("a")], 0.3)
            .await
            .unwrap();
        assert!(!branches.is_empty());
        assert!(branches.len() <= crate::prompt::MAX_BRANCHES);
    }
}
