//! Example: an endless jazz piece, one ABC passage at a time.
//!
//! Uses the OpenAI API when `OPENAI_API_KEY` is set, canned passages otherwise.
//!
//! Run with: `cargo run --example endless_jazz -- [style] [passages]`

use futures::StreamExt;
use gpt_tag::music::{MusicGenerator, Sequencer};
use gpt_tag::{ExecCtx, MockBackend};
use std::sync::Arc;

const CANNED: [&str; 3] = [
    "X:1\nT:Opening\nM:4/4\nL:1/8\nK:Cmaj\n|:\"Dm7\" A4 G2 F2 | \"G7\" E4 D2 C2 | \"Cmaj7\" C8 :|",
    "X:1\nT:Development\nM:4/4\nL:1/8\nK:Cmaj\n| \"Em7\" G4 A2 B2 | \"A7\" c4 B2 A2 | \"Dm7\" F8 |",
    "X:1\nT:Turnaround\nM:4/4\nL:1/8\nK:Cmaj\n| \"Dm7\" F2 A2 c2 A2 | \"G7\" B2 d2 f2 d2 | \"Cmaj7\" e8 |]",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let style = args.next().unwrap_or_else(|| "jazz".to_string());
    let count: usize = args.next().map(|n| n.parse()).transpose()?.unwrap_or(3);

    let builder = if std::env::var("OPENAI_API_KEY").is_ok() {
        ExecCtx::from_env()
    } else {
        println!("OPENAI_API_KEY not set; using canned passages");
        ExecCtx::builder("http://unused").backend(Arc::new(MockBackend::sequence(CANNED)))
    };
    let ctx = Arc::new(builder.build());

    let generator = MusicGenerator::new(&ctx.tag());
    let mut passages = Box::pin(Sequencer::new(generator, style).with_limit(count).passages());

    while let Some(passage) = passages.next().await {
        let passage = passage?;
        println!("--- passage {} ---\n{}\n", passage.index + 1, passage.abc);
    }

    Ok(())
}
