//! Fan-out of one incremental completion stream to many readers.
//!
//! A [`Fanout`] owns a pump task that drains the upstream [`ChunkStream`] to
//! its end, buffering every item. Each [`CompletionStream`] handed out by
//! [`Fanout::subscribe`] keeps its own cursor into that buffer, so readers
//! progress independently and a late subscriber still sees the first chunk.
//!
//! The pump keeps reading even after every reader is gone: a half-read
//! upstream response would otherwise be cut off by the provider.

use crate::backend::{ChatChunk, ChunkStream};
use crate::error::{Result, TagError};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::Notify;

type Item = std::result::Result<ChatChunk, Arc<TagError>>;

#[derive(Default)]
struct Buffer {
    items: Vec<Item>,
    done: bool,
}

#[derive(Default)]
struct Shared {
    buffer: Mutex<Buffer>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Broadcaster over a single upstream chunk stream.
///
/// Cheap to clone; clones refer to the same buffer.
#[derive(Clone)]
pub struct Fanout {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.shared.lock();
        f.debug_struct("Fanout")
            .field("buffered", &buffer.items.len())
            .field("done", &buffer.done)
            .finish()
    }
}

impl Fanout {
    /// Start pumping `source` on the tokio runtime.
    pub fn spawn(mut source: ChunkStream) -> Self {
        let shared = Arc::new(Shared::default());
        let pump = shared.clone();
        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                pump.lock().items.push(item.map_err(Arc::new));
                pump.notify.notify_waiters();
            }
            pump.lock().done = true;
            pump.notify.notify_waiters();
            tracing::debug!("completion stream drained");
        });
        Self { shared }
    }

    /// A new reader starting at the first chunk.
    pub fn subscribe(&self) -> CompletionStream {
        let shared = self.shared.clone();
        let reader = async_stream::stream! {
            let mut cursor = 0usize;
            loop {
                // Register before inspecting the buffer so a push between the
                // check and the await still wakes us.
                let notified = shared.notify.notified();
                let next = {
                    let buffer = shared.lock();
                    match buffer.items.get(cursor) {
                        Some(item) => Some(Some(item.clone())),
                        None if buffer.done => Some(None),
                        None => None,
                    }
                };
                match next {
                    Some(Some(item)) => {
                        cursor += 1;
                        yield item.map_err(TagError::Shared);
                    }
                    Some(None) => break,
                    None => notified.await,
                }
            }
        };
        CompletionStream::new(reader)
    }

    /// Whether the upstream has ended.
    pub fn is_finished(&self) -> bool {
        self.shared.lock().done
    }
}

/// A reader over a streaming completion.
pub struct CompletionStream {
    inner: BoxStream<'static, Result<ChatChunk>>,
}

impl CompletionStream {
    pub fn new(stream: impl Stream<Item = Result<ChatChunk>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Content deltas of choice 0, skipping empty ones.
    pub fn text(self) -> impl Stream<Item = Result<String>> + Send + 'static {
        self.filter_map(|chunk| async move {
            match chunk {
                Ok(chunk) => chunk
                    .choices
                    .into_iter()
                    .find(|c| c.index == 0)
                    .and_then(|c| c.delta.content)
                    .filter(|s| !s.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(e)),
            }
        })
    }

    /// Read to the end, accumulating text per choice index.
    pub async fn collect_choices(mut self) -> Result<Vec<String>> {
        let mut texts: Vec<String> = Vec::new();
        while let Some(chunk) = self.next().await {
            for choice in chunk?.choices {
                if texts.len() <= choice.index {
                    texts.resize(choice.index + 1, String::new());
                }
                if let Some(content) = choice.delta.content {
                    texts[choice.index].push_str(&content);
                }
            }
        }
        Ok(texts)
    }

    /// Read to the end, keeping only the text of choice 0.
    pub async fn collect_text(self) -> Result<String> {
        Ok(self.collect_choices().await?.into_iter().next().unwrap_or_default())
    }

    /// Read to the end and discard everything, errors included.
    pub async fn drain(mut self) {
        while self.next().await.is_some() {}
    }
}

impl Stream for CompletionStream {
    type Item = Result<ChatChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompletionStream")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn chunks(parts: &[(usize, &str)]) -> ChunkStream {
        let items: Vec<Result<ChatChunk>> = parts
            .iter()
            .map(|(i, s)| Ok(ChatChunk::delta(*i, *s)))
            .collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_two_readers_see_everything() {
        let fanout = Fanout::spawn(chunks(&[(0, "X:1 "), (0, "K:C "), (0, "C8")]));
        let a = fanout.subscribe();
        let b = fanout.subscribe();
        let (a, b) = tokio::join!(a.collect_text(), b.collect_text());
        assert_eq!(a.unwrap(), "X:1 K:C C8");
        assert_eq!(b.unwrap(), "X:1 K:C C8");
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_from_start() {
        let fanout = Fanout::spawn(chunks(&[(0, "a"), (0, "b")]));
        fanout.subscribe().drain().await;
        assert!(fanout.is_finished());
        assert_eq!(fanout.subscribe().collect_text().await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn test_upstream_drained_without_readers() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = pulled.clone();
        let source = stream::iter(0..5).then(move |i| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<ChatChunk, TagError>(ChatChunk::delta(0, i.to_string()))
            }
        });
        let fanout = Fanout::spawn(Box::pin(source));
        drop(fanout.subscribe());
        drop(fanout);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_errors_reach_every_reader() {
        let items: Vec<Result<ChatChunk>> = vec![
            Ok(ChatChunk::delta(0, "a")),
            Err(TagError::Api(ApiError::new(500, "boom"))),
        ];
        let fanout = Fanout::spawn(Box::pin(stream::iter(items)));
        for _ in 0..2 {
            let err = fanout.subscribe().collect_text().await.unwrap_err();
            assert_eq!(err.api_error().unwrap().status, 500);
        }
    }

    #[tokio::test]
    async fn test_collect_choices_by_index() {
        let fanout = Fanout::spawn(chunks(&[(0, "a"), (1, "x"), (0, "b"), (1, "y")]));
        let choices = fanout.subscribe().collect_choices().await.unwrap();
        assert_eq!(choices, vec!["ab".to_string(), "xy".to_string()]);
    }

    #[tokio::test]
    async fn test_text_filters_other_choices() {
        let fanout = Fanout::spawn(chunks(&[(0, "a"), (1, "x"), (0, ""), (0, "b")]));
        let pieces: Vec<String> = fanout.subscribe().text().map(|t| t.unwrap()).collect().await;
        assert_eq!(pieces, vec!["a", "b"]);
    }
}
