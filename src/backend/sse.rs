//! SSE (Server-Sent Events) decoder for OpenAI-compatible chat streams.
//!
//! Handles the `data: ` prefix, `[DONE]` termination, line buffering across
//! TCP chunk boundaries, and empty keep-alive lines.

use super::ChatChunk;

/// Incremental decoder turning raw SSE bytes into [`ChatChunk`]s.
///
/// # Example
///
/// ```
/// use gpt_tag::backend::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let data = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"X:1\"}}]}\n\ndata: [DONE]\n\n";
/// let chunks = decoder.decode(data);
/// assert_eq!(chunks.len(), 1);
/// assert!(decoder.is_done());
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes and return every chunk completed by them.
    ///
    /// `event:` lines, comments and malformed payloads are skipped.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<ChatChunk> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if let Some(chunk) = self.decode_line(&line) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    /// Decode whatever is left in the buffer once the byte stream ends.
    pub fn flush(&mut self) -> Vec<ChatChunk> {
        let remaining = std::mem::take(&mut self.buffer);
        remaining
            .lines()
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    fn decode_line(&mut self, line: &str) -> Option<ChatChunk> {
        let line = line.trim();
        let data = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))?
            .trim();

        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        serde_json::from_str::<ChatChunk>(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(chunk: &ChatChunk) -> Option<&str> {
        chunk.choices[0].delta.content.as_deref()
    }

    #[test]
    fn test_sse_basic_decode() {
        let mut decoder = SseDecoder::new();
        let chunks =
            decoder.decode(b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(content(&chunks[0]), Some("Hello"));
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_sse_done_and_noise_ignored() {
        let mut decoder = SseDecoder::new();
        let chunks = decoder.decode(
            b": keep-alive\n\nevent: message\ndata: {\"choices\":[]}\n\ndata: not-json\n\ndata: [DONE]\n\n",
        );
        assert_eq!(chunks.len(), 1);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_split_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"choices\":[{\"ind").is_empty());
        let chunks = decoder.decode(b"ex\":2,\"delta\":{\"content\":\"|:\"}}]}\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].index, 2);
    }

    #[test]
    fn test_sse_flush_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .decode(b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"C8\"}}]}")
            .is_empty());
        let chunks = decoder.flush();
        assert_eq!(chunks.len(), 1);
        assert_eq!(content(&chunks[0]), Some("C8"));
        assert!(decoder.flush().is_empty());
    }
}
