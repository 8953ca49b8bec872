//! # gpt-tag
//!
//! Templated, lazily resolved chat completions, and the endless ABC piano
//! generator built on them.
//!
//! A prompt is written as a template with interpolated values. The result is
//! a [`GptString`]: a stand-in for text the model has not produced yet. You
//! can chain string operations and branches onto it before anything is sent;
//! they are recorded and replayed once the completion arrives. Resolution
//! happens once per instance, however many times it is awaited.
//!
//! ## Core Concepts
//!
//! - **[`ExecCtx`]**: shared execution context (HTTP client, base URL,
//!   backend, debug console, optional event handler).
//! - **[`Tag`]**: immutable request builder. Each configuring call returns a
//!   new tag.
//! - **[`GptString`]**: the deferred, memoized, chainable result.
//! - **[`Fanout`]** / **[`CompletionStream`]**: streaming results, readable
//!   by any number of independent readers.
//! - **[`DebugConsole`]**: side-by-side prompt/result tables on the terminal.
//! - **[`music`]** and **[`endpoint`]**: the passage generator, the endless
//!   sequencer and the completion endpoint handler.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gpt_tag::{gpt, ChatMessage, ExecCtx, ParseFn};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Arc::new(ExecCtx::from_env().debug(true).build());
//!     let gpt = ctx.tag().temperature(0.9);
//!
//!     let style = gpt!(gpt, "Name one jazz subgenre. One or two words.").trim();
//!     let tempo = gpt!(gpt.parse(ParseFn::number()), "A typical tempo in BPM for {}?", &style);
//!     let mood = style.includes("bop", "frantic", "relaxed");
//!
//!     let titles = gpt!(gpt.n(3), "Invent a tune title for a {} piece.", &style)
//!         .trim()
//!         .each(" / ");
//!
//!     println!("{} at {} bpm, {}", style.value().await?, tempo.value().await?, mood.value().await?);
//!     println!("{}", titles.value().await?);
//!
//!     let composer = gpt.add_message(ChatMessage::system("Reply in ABC notation only."));
//!     println!("{:?}", gpt!(composer, "Eight bars of {}", &style).text().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod debug;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod fanout;
pub mod gpt_string;
pub mod music;
pub mod ops;
pub mod parse;
pub mod replay;
pub mod tag;
pub mod template;

pub use backend::{Backend, ChatMessage, MockBackend, OpenAiBackend, Role};
pub use config::{EvaluationFn, TagConfig, DEFAULT_MODEL};
pub use debug::{DebugConsole, DebugEntry, DebugMeta};
pub use endpoint::{handle_completion, CompletionBody, EndpointReply};
pub use error::{ApiError, Result, TagError};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use fanout::{CompletionStream, Fanout};
pub use gpt_string::{GptString, Resolved};
pub use music::{MusicGenerator, Passage, Sequencer};
pub use ops::{ArrayOp, CallArg, ChainOp, Operand};
pub use parse::ParseFn;
pub use tag::Tag;
pub use template::{TagValue, Template};
