//! Mock backend for testing without a live model.
//!
//! [`MockBackend`] returns pre-configured replies in order, counts calls and
//! records every request it sees, so tests can assert on memoization and
//! message layout.
//!
//! # Example
//!
//! ```
//! use gpt_tag::backend::MockBackend;
//!
//! let mock = MockBackend::with_choices(["a", "b", "c"]);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use reqwest::Client;

use super::{Backend, ChatChunk, ChunkStream, CompletionRequest, CompletionResponse};
use crate::error::{ApiError, Result, TagError};

/// One canned reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Every listed choice is returned; the caller truncates to `n`.
    Choices(Vec<Option<String>>),
    /// The call fails with this service error.
    Error(ApiError),
}

/// A test backend that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
/// Streaming splits each choice into word-sized chunks, interleaving
/// choice indices the way a real provider does.
#[derive(Debug)]
pub struct MockBackend {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl MockBackend {
    /// Create a mock returning the given replies in order.
    pub fn new(replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "MockBackend requires at least one reply");
        Self {
            replies,
            index: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// A mock that always returns one choice with this text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Choices(vec![Some(text.into())])])
    }

    /// A mock that always returns these choices.
    pub fn with_choices<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(vec![MockReply::Choices(
            choices.into_iter().map(|c| Some(c.into())).collect(),
        )])
    }

    /// A mock returning single-choice texts in sequence, one per call.
    pub fn sequence<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            texts
                .into_iter()
                .map(|t| MockReply::Choices(vec![Some(t.into())]))
                .collect(),
        )
    }

    /// A mock whose every call fails with `error`.
    pub fn failing(error: ApiError) -> Self {
        Self::new(vec![MockReply::Error(error)])
    }

    /// Sleep this long before answering, to widen race windows in tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received so far (streaming and non-streaming).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests().pop()
    }

    async fn next_reply(&self, request: &CompletionRequest) -> Result<Vec<Option<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        match &self.replies[idx] {
            MockReply::Choices(choices) => Ok(choices.clone()),
            MockReply::Error(e) => Err(TagError::Api(e.clone())),
        }
    }

    /// Split each choice into whitespace-preserving pieces and interleave
    /// them by position: piece 0 of every choice, then piece 1, and so on.
    fn chunk_choices(choices: &[Option<String>]) -> Vec<ChatChunk> {
        let pieces: Vec<Vec<String>> = choices
            .iter()
            .map(|c| split_words(c.as_deref().unwrap_or("")))
            .collect();
        let longest = pieces.iter().map(Vec::len).max().unwrap_or(0);

        let mut chunks = Vec::new();
        for pos in 0..longest {
            for (index, words) in pieces.iter().enumerate() {
                if let Some(word) = words.get(pos) {
                    chunks.push(ChatChunk::delta(index, word.clone()));
                }
            }
        }
        chunks
    }
}

/// `"a b  c"` -> `["a ", "b  ", "c"]`; concatenation round-trips.
fn split_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_space = false;
    for ch in text.chars() {
        if in_space && !ch.is_whitespace() {
            words.push(std::mem::take(&mut current));
        }
        in_space = ch.is_whitespace();
        current.push(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let choices = self.next_reply(request).await?;
        Ok(CompletionResponse {
            choices,
            model: Some(request.model.clone()),
        })
    }

    async fn complete_streaming(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &CompletionRequest,
    ) -> Result<ChunkStream> {
        let choices = self.next_reply(request).await?;
        let chunks = Self::chunk_choices(&choices);
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
