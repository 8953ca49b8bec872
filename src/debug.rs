//! Console rendering of prompts next to their results.
//!
//! A [`DebugConsole`] is one render session. It numbers the tables it draws,
//! remembers which color each result was drawn in, and keeps a transcript so
//! the whole history can be redrawn when a streaming table updates in place.
//! When a later prompt interpolates text that an earlier request returned,
//! that text is underlined in the earlier result's color, which makes data
//! flow between requests visible.
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┐
//! │ Prompt                   │ Results                  │
//! ├──────────────────────────┼──────────────────────────┤
//! │ Name a jazz standard     │ Autumn Leaves            │
//! │                          ├──────────────────────────┤
//! │                          │ So What                  │
//! ├──────────────────────────┴──────────────────────────┤
//! │                          gpt-3.5-turbo choices=2    │
//! └─────────────────────────────────────────────────────┘
//! ```

use crate::config::TagConfig;
use crate::fanout::CompletionStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

const DEFAULT_WIDTH: usize = 120;
const MIN_WIDTH: usize = 27;

/// Terminal colors used for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl Color {
    /// Rotation used for successive tables.
    pub const PALETTE: [Color; 6] = [
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
    ];

    fn code(self) -> u8 {
        match self {
            Color::Red => 31,
            Color::Green => 32,
            Color::Yellow => 33,
            Color::Blue => 34,
            Color::Magenta => 35,
            Color::Cyan => 36,
            Color::White => 37,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Style {
    color: Color,
    underline: bool,
}

/// Footer metadata for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugMeta {
    pub id: Option<String>,
    pub model: String,
    pub temperature: Option<f64>,
    /// `Some` when a parse function is set; anonymous ones show as `(anonymous)`.
    pub parse_name: Option<String>,
    pub n: Option<u32>,
    pub stream: bool,
}

impl DebugMeta {
    pub fn from_config(config: &TagConfig) -> Self {
        Self {
            id: config.id.clone(),
            model: config.effective_model().to_string(),
            temperature: config.temperature,
            parse_name: config
                .parse
                .as_ref()
                .map(|p| p.name().unwrap_or("(anonymous)").to_string()),
            n: config.n,
            stream: config.stream,
        }
    }

    /// `[id] model temperature=x parseFn=name choices=n streaming`, each
    /// piece present only when set.
    pub fn footer(&self) -> String {
        let mut pieces = Vec::new();
        if let Some(id) = &self.id {
            pieces.push(format!("[{}]", id));
        }
        pieces.push(self.model.clone());
        if let Some(t) = self.temperature {
            pieces.push(format!("temperature={}", t));
        }
        if let Some(name) = &self.parse_name {
            pieces.push(format!("parseFn={}", name));
        }
        if let Some(n) = self.n.filter(|n| *n > 1) {
            pieces.push(format!("choices={}", n));
        }
        if self.stream {
            pieces.push("streaming".to_string());
        }
        pieces.join(" ")
    }
}

/// Everything needed to draw one prompt/result table.
#[derive(Debug, Clone, Default)]
pub struct DebugEntry {
    /// Literal template parts.
    pub parts: Vec<String>,
    /// Resolved interpolated values, in template order.
    pub values: Vec<String>,
    /// Result text per choice.
    pub choices: Vec<Option<String>>,
    pub meta: DebugMeta,
}

#[derive(Default)]
struct Session {
    counter: usize,
    colors: HashMap<String, Color>,
    transcript: Vec<String>,
    latest: Option<String>,
}

/// A render session: counter, color registry and transcript.
///
/// Constructed once and shared through the [`ExecCtx`](crate::ExecCtx).
pub struct DebugConsole {
    session: Mutex<Session>,
    sink: Mutex<Box<dyn Write + Send>>,
    width: usize,
    ansi: bool,
}

impl std::fmt::Debug for DebugConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugConsole")
            .field("width", &self.width)
            .field("ansi", &self.ansi)
            .field("counter", &self.session().counter)
            .finish()
    }
}

impl Default for DebugConsole {
    fn default() -> Self {
        Self::stderr()
    }
}

impl DebugConsole {
    /// Draw to stderr with colors and screen clearing.
    pub fn stderr() -> Self {
        Self::with_writer(std::io::stderr()).with_ansi(true)
    }

    /// Draw plain tables to `writer`, appending instead of redrawing.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            session: Mutex::new(Session::default()),
            sink: Mutex::new(Box::new(writer)),
            width: width_from_env(),
            ansi: false,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width.max(MIN_WIDTH);
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of static tables drawn since the last reset.
    pub fn counter(&self) -> usize {
        self.session().counter
    }

    /// Committed tables, oldest first.
    pub fn transcript(&self) -> Vec<String> {
        self.session().transcript.clone()
    }

    /// The live (still updating) table, if one is showing.
    pub fn latest(&self) -> Option<String> {
        self.session().latest.clone()
    }

    /// Color a result was drawn in, if it was registered.
    pub fn color_of(&self, text: &str) -> Option<Color> {
        self.session().colors.get(text).copied()
    }

    /// Forget the counter, registry and transcript.
    pub fn reset(&self) {
        *self.session() = Session::default();
    }

    /// Draw one finished table and commit it to the transcript.
    pub fn render(&self, entry: &DebugEntry) {
        let screen = {
            let mut session = self.session();
            let color = Color::PALETTE[session.counter % Color::PALETTE.len()];
            let table = self.table(&session, entry, color);
            for choice in entry.choices.iter().flatten() {
                session.colors.insert(choice.clone(), color);
            }
            session.counter += 1;
            if let Some(live) = session.latest.take() {
                session.transcript.push(live);
            }
            session.transcript.push(table.clone());
            self.screen(&session, table)
        };
        self.write(&screen);
    }

    /// Follow a stream, redrawing the live table after every chunk.
    ///
    /// The final table stays live until the next static render commits it.
    pub async fn render_stream(&self, mut entry: DebugEntry, mut stream: CompletionStream) {
        let mut texts: Vec<String> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::debug!(error = %e, "debug stream ended with error");
                    break;
                }
            };
            for choice in chunk.choices {
                if texts.len() <= choice.index {
                    texts.resize(choice.index + 1, String::new());
                }
                if let Some(content) = choice.delta.content {
                    texts[choice.index].push_str(&content);
                }
            }
            entry.choices = texts.iter().cloned().map(Some).collect();
            self.update_latest(&entry);
        }

        let mut session = self.session();
        let color = Color::PALETTE[session.counter % Color::PALETTE.len()];
        for text in texts {
            session.colors.insert(text, color);
        }
    }

    fn update_latest(&self, entry: &DebugEntry) {
        let screen = {
            let mut session = self.session();
            let color = Color::PALETTE[session.counter % Color::PALETTE.len()];
            let table = self.table(&session, entry, color);
            session.latest = Some(table.clone());
            self.screen(&session, table)
        };
        self.write(&screen);
    }

    /// What to write for a new table: the full history when redrawing in
    /// place, otherwise just the table.
    fn screen(&self, session: &Session, table: String) -> String {
        if !self.ansi {
            return table;
        }
        let mut out = String::from("\x1b[2J\x1b[H");
        for committed in &session.transcript {
            out.push_str(committed);
            out.push('\n');
        }
        if let Some(live) = &session.latest {
            if session.transcript.last() != Some(live) {
                out.push_str(live);
                out.push('\n');
            }
        }
        out
    }

    fn write(&self, screen: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        let result = if self.ansi {
            sink.write_all(screen.as_bytes())
        } else {
            writeln!(sink, "{}", screen)
        };
        if let Err(e) = result.and_then(|_| sink.flush()) {
            tracing::debug!(error = %e, "debug console write failed");
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn table(&self, session: &Session, entry: &DebugEntry, color: Color) -> String {
        let inner = self.width - 7;
        let lw = inner / 2;
        let rw = inner - lw;
        let body = self.ansi.then_some(Style { color, underline: false });

        let prompt = self.prompt_cell(session, entry);
        let left_lines = prompt.wrap(lw);

        let mut right_lines: Vec<Option<Vec<(char, Option<Style>)>>> = Vec::new();
        for (i, choice) in entry.choices.iter().enumerate() {
            if i > 0 {
                right_lines.push(None);
            }
            let cell = Cell::plain(choice.as_deref().unwrap_or(""), body);
            right_lines.extend(cell.wrap(rw).into_iter().map(Some));
        }
        let height = left_lines.len().max(right_lines.len()).max(1);

        let bar = |n: usize| "─".repeat(n);
        let mut out = Vec::new();
        out.push(format!("┌{}┬{}┐", bar(lw + 2), bar(rw + 2)));
        let result_label = if entry.choices.len() > 1 { "Results" } else { "Result" };
        out.push(format!(
            "│ {} │ {} │",
            self.paint(&Cell::plain("Prompt", body).chars, lw),
            self.paint(&Cell::plain(result_label, body).chars, rw),
        ));
        out.push(format!("├{}┼{}┤", bar(lw + 2), bar(rw + 2)));
        for row in 0..height {
            let left = self.paint(left_lines.get(row).map(Vec::as_slice).unwrap_or(&[]), lw);
            match right_lines.get(row) {
                Some(None) => out.push(format!("│ {} ├{}┤", left, bar(rw + 2))),
                Some(Some(line)) => out.push(format!("│ {} │ {} │", left, self.paint(line, rw))),
                None => out.push(format!("│ {} │ {} │", left, " ".repeat(rw))),
            }
        }
        out.push(format!("├{}┴{}┤", bar(lw + 2), bar(rw + 2)));
        let footer = entry.meta.footer();
        let full = self.width - 4;
        let footer: String = footer.chars().take(full).collect();
        let pad = full - footer.chars().count();
        let footer = if self.ansi {
            format!("\x1b[{}m{}\x1b[0m", Color::White.code(), footer)
        } else {
            footer
        };
        out.push(format!("│ {}{} │", " ".repeat(pad), footer));
        out.push(format!("└{}┘", bar(self.width - 2)));
        out.join("\n")
    }

    /// Interleave parts and values, underlining values that earlier results
    /// produced in that result's color.
    fn prompt_cell(&self, session: &Session, entry: &DebugEntry) -> Cell {
        let mut cell = Cell::default();
        for (i, part) in entry.parts.iter().enumerate() {
            cell.push(part, None);
            if let Some(value) = entry.values.get(i).filter(|v| !v.is_empty()) {
                let style = self.ansi.then(|| Style {
                    color: session.colors.get(value).copied().unwrap_or(Color::White),
                    underline: true,
                });
                cell.push(value, style);
            }
        }
        for value in entry.values.iter().skip(entry.parts.len()) {
            cell.push(value, None);
        }
        cell
    }

    /// Render a styled line padded to `width` visible columns.
    fn paint(&self, line: &[(char, Option<Style>)], width: usize) -> String {
        let mut out = String::new();
        let mut current: Option<Style> = None;
        for &(ch, style) in line {
            if style != current {
                if current.is_some() {
                    out.push_str("\x1b[0m");
                }
                if let Some(s) = style {
                    out.push_str(&format!("\x1b[{}m", s.color.code()));
                    if s.underline {
                        out.push_str("\x1b[4m");
                    }
                }
                current = style;
            }
            out.push(ch);
        }
        if current.is_some() {
            out.push_str("\x1b[0m");
        }
        out.push_str(&" ".repeat(width.saturating_sub(line.len())));
        out
    }
}

/// Styled text, one style slot per character.
#[derive(Default)]
struct Cell {
    chars: Vec<(char, Option<Style>)>,
}

impl Cell {
    fn plain(text: &str, style: Option<Style>) -> Self {
        let mut cell = Self::default();
        cell.push(text, style);
        cell
    }

    fn push(&mut self, text: &str, style: Option<Style>) {
        self.chars.extend(
            text.chars()
                .map(|c| if c == '\t' { ' ' } else { c })
                .filter(|c| *c == '\n' || !c.is_control())
                .map(|c| (c, style)),
        );
    }

    /// Word-wrap to `width` columns. Explicit newlines always break; words
    /// longer than a line are split.
    fn wrap(&self, width: usize) -> Vec<Vec<(char, Option<Style>)>> {
        let mut lines = Vec::new();
        for paragraph in self.chars.split(|(c, _)| *c == '\n') {
            let mut rest = paragraph;
            while rest.len() > width {
                let split = rest[..=width]
                    .iter()
                    .rposition(|(c, _)| *c == ' ')
                    .filter(|&i| i > 0);
                match split {
                    Some(i) => {
                        lines.push(rest[..i].to_vec());
                        rest = &rest[i + 1..];
                    }
                    None => {
                        lines.push(rest[..width].to_vec());
                        rest = &rest[width..];
                    }
                }
            }
            lines.push(rest.to_vec());
        }
        lines
    }
}

fn width_from_env() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .filter(|w| *w > 0)
        .unwrap_or(DEFAULT_WIDTH)
        .max(MIN_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatChunk, ChunkStream};
    use crate::fanout::Fanout;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn entry(prompt: &str, choices: &[&str]) -> DebugEntry {
        DebugEntry {
            parts: vec![prompt.to_string()],
            values: vec![],
            choices: choices.iter().map(|c| Some(c.to_string())).collect(),
            meta: DebugMeta {
                model: "gpt-4".into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_footer_pieces() {
        let meta = DebugMeta {
            id: Some("intro".into()),
            model: "gpt-4".into(),
            temperature: Some(0.7),
            parse_name: Some("(anonymous)".into()),
            n: Some(3),
            stream: true,
        };
        assert_eq!(
            meta.footer(),
            "[intro] gpt-4 temperature=0.7 parseFn=(anonymous) choices=3 streaming"
        );
        let single = DebugMeta { n: Some(1), ..DebugMeta::default() };
        assert!(!single.footer().contains("choices"));
    }

    #[test]
    fn test_meta_from_config() {
        let config = TagConfig::default()
            .with_parse(crate::parse::ParseFn::json())
            .with_n(2);
        let meta = DebugMeta::from_config(&config);
        assert_eq!(meta.model, crate::config::DEFAULT_MODEL);
        assert_eq!(meta.parse_name.as_deref(), Some("json"));
        assert_eq!(meta.n, Some(2));
    }

    #[test]
    fn test_static_render_rows_have_fixed_width() {
        let out = Capture::default();
        let console = DebugConsole::with_writer(out.clone()).with_width(40);
        console.render(&entry("Name a jazz standard please", &["Autumn Leaves", "So What"]));
        let text = out.text();
        for line in text.lines() {
            assert_eq!(line.chars().count(), 40, "line {:?}", line);
        }
        assert!(text.contains("Results"));
        assert!(text.contains("Autumn Leaves"));
        assert!(text.contains("gpt-4"));
        assert_eq!(console.counter(), 1);
        assert_eq!(console.transcript().len(), 1);
    }

    #[test]
    fn test_colors_rotate_and_register() {
        let console = DebugConsole::with_writer(Capture::default()).with_width(40);
        console.render(&entry("a", &["first"]));
        console.render(&entry("b", &["second"]));
        assert_eq!(console.color_of("first"), Some(Color::Red));
        assert_eq!(console.color_of("second"), Some(Color::Green));
        console.reset();
        assert_eq!(console.counter(), 0);
        assert!(console.color_of("first").is_none());
        assert!(console.transcript().is_empty());
    }

    #[test]
    fn test_reused_result_is_underlined() {
        let out = Capture::default();
        let console = DebugConsole::with_writer(out.clone()).with_width(60).with_ansi(true);
        console.render(&entry("q", &["Blue Bossa"]));
        let mut next = entry("Improvise on ", &[]);
        next.parts.push("".into());
        next.values.push("Blue Bossa".into());
        console.render(&next);
        let text = out.text();
        // red foreground plus underline around the reused value
        assert!(text.contains("\x1b[31m\x1b[4mBlue Bossa\x1b[0m"));
    }

    #[test]
    fn test_wrap_breaks_on_spaces_and_long_words() {
        let cell = Cell::plain("one two three\nabcdefghij", None);
        let lines: Vec<String> = cell
            .wrap(5)
            .into_iter()
            .map(|l| l.into_iter().map(|(c, _)| c).collect())
            .collect();
        assert_eq!(lines, vec!["one", "two", "three", "abcde", "fghij"]);
    }

    #[tokio::test]
    async fn test_stream_render_updates_live_table() {
        let out = Capture::default();
        let console = DebugConsole::with_writer(out.clone()).with_width(40);
        let items: Vec<crate::Result<ChatChunk>> = vec![
            Ok(ChatChunk::delta(0, "X:1 ")),
            Ok(ChatChunk::delta(0, "K:C")),
        ];
        let source: ChunkStream = Box::pin(futures::stream::iter(items));
        let fanout = Fanout::spawn(source);
        console.render_stream(entry("abc", &[]), fanout.subscribe()).await;

        let latest = console.latest().unwrap();
        assert!(latest.contains("X:1 K:C"));
        assert!(console.transcript().is_empty());
        assert_eq!(console.color_of("X:1 K:C"), Some(Color::Red));

        console.render(&entry("next", &["done"]));
        assert_eq!(console.transcript().len(), 2);
        assert!(console.latest().is_none());
    }
}
