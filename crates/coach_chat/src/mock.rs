//! Mock generator for testing.
//!
//! Provides a scripted implementation of the `Generator` trait so dispatch,
//! lookup and session flows can be tested without network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{ChatError, ChatResult};
use crate::llm::{Generation, GenerationRequest, Generator};

/// Predefined reply for one generator call.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// When set, the call fails with this message
    pub failure: Option<String>,
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            input_tokens: 100,
            output_tokens: content.split_whitespace().count() as u64,
            content,
            failure: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            failure: Some(message.into()),
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    /// "complete" or "stream"
    pub method: String,
    pub request: GenerationRequest,
}

/// Scripted generator.
///
/// Replies are handed out in order across both entry points; once the script
/// is exhausted every further call fails.
#[derive(Clone)]
pub struct MockGenerator {
    model: String,
    replies: Arc<RwLock<Vec<MockReply>>>,
    reply_index: Arc<AtomicUsize>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Arc::new(RwLock::new(Vec::new())),
            reply_index: Arc::new(AtomicUsize::new(0)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Add a reply for the next call.
    pub fn add_reply(self, reply: MockReply) -> Self {
        self.replies.write().push(reply);
        self
    }

    /// Shorthand for a successful text reply.
    pub fn add_text(self, content: impl Into<String>) -> Self {
        self.add_reply(MockReply::text(content))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Get all captured calls.
    pub fn captured_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Clear captured calls.
    pub fn clear_captured_calls(&self) {
        self.captured_calls.write().clear();
    }

    fn next_reply(&self, method: &str, request: &GenerationRequest) -> ChatResult<MockReply> {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            request: request.clone(),
        });

        let index = self.reply_index.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .read()
            .get(index)
            .cloned()
            .ok_or_else(|| ChatError::Llm(format!("no scripted reply for call {}", index + 1)))?;

        match &reply.failure {
            Some(message) => Err(ChatError::Llm(message.clone())),
            None => Ok(reply),
        }
    }

    fn generation(&self, reply: MockReply) -> Generation {
        Generation {
            content: reply.content,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            model: self.model.clone(),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn complete(&self, request: &GenerationRequest) -> ChatResult<Generation> {
        let reply = self.next_reply("complete", request)?;
        Ok(self.generation(reply))
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
        deltas: mpsc::Sender<String>,
    ) -> ChatResult<Generation> {
        let reply = self.next_reply("stream", request)?;

        for piece in reply.content.split_inclusive(' ') {
            if deltas.send(piece.to_string()).await.is_err() {
                break;
            }
        }

        Ok(self.generation(reply))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".to_string(),
            turns: Vec::new(),
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn test_replies_in_order_and_exhaustion() {
        let mock = MockGenerator::new().add_text("eins").add_reply(MockReply::failure("boom"));

        assert_eq!(mock.complete(&request()).await.unwrap().content, "eins");
        assert!(mock.complete(&request()).await.is_err());
        assert!(mock.complete(&request()).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_stream_sends_pieces() {
        let mock = MockGenerator::new().add_text("Guten Appetit dir");
        let (tx, mut rx) = mpsc::channel(16);

        let generation = mock.stream(&request(), tx).await.unwrap();
        let mut pieces = Vec::new();
        while let Some(piece) = rx.recv().await {
            pieces.push(piece);
        }

        assert_eq!(pieces, vec!["Guten ", "Appetit ", "dir"]);
        assert_eq!(generation.content, "Guten Appetit dir");
        assert_eq!(mock.captured_calls()[0].method, "stream");
    }

    #[tokio::test]
    async fn test_closed_receiver_still_completes() {
        let mock = MockGenerator::new().add_text("a b c");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(mock.stream(&request(), tx).await.unwrap().content, "a b c");
    }
}
