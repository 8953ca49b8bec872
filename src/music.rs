//! Endless piano music in ABC notation.
//!
//! [`MusicGenerator`] holds the two streaming tags behind the app: one that
//! writes a fresh passage for a style, one that continues a previous passage.
//! [`Sequencer`] chains them into an endless stream, requesting each
//! continuation as soon as the passage before it is known, so the next piece
//! is already on its way while the current one plays.

use crate::backend::ChatMessage;
use crate::error::{Result, TagError};
use crate::gpt;
use crate::gpt_string::GptString;
use crate::parse::{strip_fence, ParseFn};
use crate::tag::Tag;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

/// Model the generators are pinned to.
pub const MUSIC_MODEL: &str = "gpt-4-1106-preview";

/// Instructions for writing a passage from scratch.
pub const ABC_SYSTEM_PROMPT: &str = r#"You are an abc music generator. Given a style of music, respond with ABC music notation. Do not provide any explanation or any other information. For example:
Request:
###
genre: jazz
###

Response:
X:1
T:Jazz Melody in the style of Miles Davis
C:Miles Davis Style
M:4/4
L:1/8
K:Cmaj
|:"Dm7" A4 G2 F2 | "G7" E4 D2 C2 | "Cmaj7" C6 B,2 | "Cmaj7" C8 |
| "Dm7" A4 G2 F2 | "G7" E4 D2 C2 | "Cmaj7" C6 B,2 | "Cmaj7" C8 :|"#;

/// Instructions for continuing a previous passage.
pub const CONTINUATION_SYSTEM_PROMPT: &str = r#"You are an abc music generator. Given this previous set of music, you should respond by continuing the passage also in abc music notation. Do not provide any explanation or any other information. You should aim to progress the music. It should become more fun and exciting but stay within the same style. Do not duplicate the previous passage as this new passage will be played in sequence after the previous passage.

For example:
Request:
###
genre: jazz
previous passage:
Response:
X:1
T:Jazz Melody in the style of Miles Davis
C:Miles Davis Style
M:4/4
L:1/8
K:Cmaj
|:"Dm7" A4 G2 F2 | "G7" E4 D2 C2 | "Cmaj7" C6 B,2 | "Cmaj7" C8 |
| "Dm7" A4 G2 F2 | "G7" E4 D2 C2 | "Cmaj7" C6 B,2 | "Cmaj7" C8 :|
###

Response:
X:1
T:Jazz Melody in the Style of Miles Davis
C:Miles Davis Style
M:4/4
L:1/8
K:Cmaj
| "Em7" G4 A2 B2 | "A7" C4 B2 A2 | "Dm7" F6 E2 | "Dm7" F8 |
| "Em7" G4 F2 E2 | "A7" C4 D2 E2 | "Dm7" F6 E2 | "Dm7" F8 :|"#;

/// The passage and continuation generators.
#[derive(Clone, Debug)]
pub struct MusicGenerator {
    fresh: Tag,
    continuation: Tag,
}

impl MusicGenerator {
    /// Derive both generators from `base`, pinned to [`MUSIC_MODEL`] and
    /// streaming.
    pub fn new(base: &Tag) -> Self {
        let base = base.model(MUSIC_MODEL).stream(true);
        Self {
            fresh: base.add_message(ChatMessage::system(ABC_SYSTEM_PROMPT)),
            continuation: base.add_message(ChatMessage::system(CONTINUATION_SYSTEM_PROMPT)),
        }
    }

    /// A passage in `style`, continuing `previous` when it is given and
    /// non-empty.
    pub fn passage(&self, style: &str, previous: Option<&str>) -> GptString {
        match previous.filter(|p| !p.is_empty()) {
            Some(previous) => gpt!(
                self.continuation,
                "Request:###genre: {}\nPrevious passage:{}###\nResponse:",
                style,
                previous
            ),
            None => gpt!(self.fresh, "Request:###genre: {}###\nResponse:", style),
        }
    }

    /// Non-streaming form of [`passage`](Self::passage): the whole tune,
    /// cut to its ABC body by [`extract_abc`].
    pub fn passage_abc(&self, style: &str, previous: Option<&str>) -> GptString {
        let score = |tag: &Tag| tag.stream(false).parse(extract_abc());
        match previous.filter(|p| !p.is_empty()) {
            Some(previous) => gpt!(
                score(&self.continuation),
                "Request:###genre: {}\nPrevious passage:{}###\nResponse:",
                style,
                previous
            ),
            None => gpt!(score(&self.fresh), "Request:###genre: {}###\nResponse:", style),
        }
    }

    pub fn fresh(&self) -> &Tag {
        &self.fresh
    }

    pub fn continuation(&self) -> &Tag {
        &self.continuation
    }
}

/// Cut model output down to the ABC tune: no code fence, nothing before the
/// `X:` header. Text without a header is only trimmed.
pub fn abc_body(text: &str) -> &str {
    let text = strip_fence(text);
    if text.starts_with("X:") {
        return text;
    }
    match text.find("\nX:") {
        Some(i) => text[i + 1..].trim_end(),
        None => text,
    }
}

/// Parse function form of [`abc_body`]; missing text stays `null`.
pub fn extract_abc() -> ParseFn {
    ParseFn::named("extractAbc", |raw| {
        raw.map(|s| Value::String(abc_body(s).to_string()))
            .unwrap_or(Value::Null)
    })
}

/// One passage of an endless piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Passage {
    /// Position in the sequence, from 0.
    pub index: usize,
    /// ABC notation, starting at the `X:` header.
    pub abc: String,
}

/// Endless passage stream with one request of lookahead.
///
/// ```no_run
/// use futures::StreamExt;
/// use gpt_tag::music::{MusicGenerator, Sequencer};
/// use gpt_tag::ExecCtx;
/// use std::sync::Arc;
///
/// # async fn run() -> gpt_tag::Result<()> {
/// let ctx = Arc::new(ExecCtx::from_env().build());
/// let generator = MusicGenerator::new(&ctx.tag());
/// let mut passages = Box::pin(Sequencer::new(generator, "bossa nova").passages());
/// while let Some(passage) = passages.next().await {
///     println!("{}", passage?.abc);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Sequencer {
    generator: MusicGenerator,
    style: String,
    seed: Option<String>,
    limit: Option<usize>,
}

impl Sequencer {
    pub fn new(generator: MusicGenerator, style: impl Into<String>) -> Self {
        Self {
            generator,
            style: style.into(),
            seed: None,
            limit: None,
        }
    }

    /// Continue from an existing passage instead of starting fresh.
    pub fn with_seed(mut self, previous: impl Into<String>) -> Self {
        self.seed = Some(previous.into());
        self
    }

    /// Stop after `limit` passages. Unlimited by default.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The passages, in order. The stream ends at the limit or at the first
    /// error.
    pub fn passages(self) -> impl Stream<Item = Result<Passage>> + Send + 'static {
        let Sequencer {
            generator,
            style,
            seed,
            limit,
        } = self;
        async_stream::stream! {
            if limit == Some(0) {
                return;
            }
            let mut next = Some(request(&generator, &style, seed));
            let mut index = 0usize;
            while let Some(pending) = next.take() {
                let abc = match pending.await {
                    Ok(Ok(abc)) => abc,
                    Ok(Err(e)) => {
                        yield Err::<Passage, TagError>(e);
                        return;
                    }
                    Err(e) => {
                        yield Err(TagError::Other(format!("passage task failed: {}", e)));
                        return;
                    }
                };
                if limit.map_or(true, |l| index + 1 < l) {
                    next = Some(request(&generator, &style, Some(abc.clone())));
                }
                tracing::debug!(index, prefetching = next.is_some(), "passage ready");
                yield Ok(Passage { index, abc });
                index += 1;
            }
        }
    }
}

fn request(generator: &MusicGenerator, style: &str, previous: Option<String>) -> JoinHandle<Result<String>> {
    let passage = generator.passage(style, previous.as_deref());
    tokio::spawn(async move {
        let raw = passage.stream().await?.collect_text().await?;
        Ok(abc_body(&raw).to_string())
    })
}
