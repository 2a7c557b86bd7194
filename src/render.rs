//! Renderers: where accepted messages end up.
//!
//! The pipeline calls [`Renderer::render`] exactly once per accepted record,
//! so renderers never need to deduplicate.

use std::io::{self, Write};

use chrono::{Local, TimeZone};
use colored::{Color, Colorize};
use tracing::warn;

use crate::identity::Theme;
use crate::message::{inspect_data_uri, Payload};
use crate::pipeline::RenderInstruction;

/// Paints messages. `end_batch` runs after every non-empty batch and is the
/// place to flush or scroll.
pub trait Renderer<I> {
    fn render(&mut self, instruction: &RenderInstruction<I>);

    fn end_batch(&mut self) {}

    fn set_theme(&mut self, _theme: Theme) {}

    /// Out-of-band status line (send failures, rename confirmations).
    fn notice(&mut self, _text: &str) {}
}

const OWN_INDENT: &str = "                ";

#[derive(Debug, Clone, Copy)]
struct Palette {
    sender: Color,
    own: Color,
    notice: Color,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Palette {
                sender: Color::Blue,
                own: Color::Green,
                notice: Color::Magenta,
            },
            Theme::Dark => Palette {
                sender: Color::BrightCyan,
                own: Color::BrightGreen,
                notice: Color::BrightYellow,
            },
        }
    }
}

/// Line-oriented renderer for a terminal (or any `Write`).
pub struct TerminalRenderer<W: Write> {
    out: W,
    theme: Theme,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout(theme: Theme) -> Self {
        TerminalRenderer::new(io::stdout(), theme)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, theme: Theme) -> Self {
        TerminalRenderer { out, theme }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_lines(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()) {
            warn!(error = %e, "terminal write failed");
        }
    }
}

impl<I, W: Write> Renderer<I> for TerminalRenderer<W> {
    fn render(&mut self, instruction: &RenderInstruction<I>) {
        let palette = Palette::for_theme(self.theme);
        let record = &instruction.record;
        let time = record
            .timestamp_ms
            .map(format_clock)
            .unwrap_or_else(|| "--:--".to_string());

        let body = match &record.payload {
            Payload::Text { text } => sanitize(text),
            Payload::Image { image } => describe_image(image),
        };

        let mut lines = body.split('\n');
        let first = lines.next().unwrap_or("");
        let mut rendered = if instruction.is_own {
            format!(
                "{OWN_INDENT}{} {}\n",
                first.color(palette.own),
                time.dimmed()
            )
        } else {
            format!(
                "{} {}: {}\n",
                time.dimmed(),
                sanitize(&record.sender).color(palette.sender).bold(),
                first
            )
        };
        for line in lines {
            if instruction.is_own {
                rendered.push_str(&format!("{OWN_INDENT}{}\n", line.color(palette.own)));
            } else {
                rendered.push_str(&format!("      {line}\n"));
            }
        }
        self.write_lines(&rendered);
    }

    fn end_batch(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!(error = %e, "terminal flush failed");
        }
    }

    fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    fn notice(&mut self, text: &str) {
        let palette = Palette::for_theme(self.theme);
        let line = format!("-- {}\n", sanitize(text).color(palette.notice).italic());
        self.write_lines(&line);
        <Self as Renderer<I>>::end_batch(self);
    }
}

/// Keeps everything it is given. Handy for tests and for embedding.
#[derive(Debug)]
pub struct CollectingRenderer<I> {
    pub instructions: Vec<RenderInstruction<I>>,
    pub batches: usize,
    pub notices: Vec<String>,
    pub theme: Theme,
}

impl<I> Default for CollectingRenderer<I> {
    fn default() -> Self {
        CollectingRenderer {
            instructions: Vec::new(),
            batches: 0,
            notices: Vec::new(),
            theme: Theme::default(),
        }
    }
}

impl<I> CollectingRenderer<I> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<I: Clone> Renderer<I> for CollectingRenderer<I> {
    fn render(&mut self, instruction: &RenderInstruction<I>) {
        self.instructions.push(instruction.clone());
    }

    fn end_batch(&mut self) {
        self.batches += 1;
    }

    fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    fn notice(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// Local wall-clock `HH:MM` for an epoch-millisecond timestamp.
pub fn format_clock(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

/// Drop control characters except newline and tab, so message text cannot
/// move the cursor or inject escape sequences.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn describe_image(uri: &str) -> String {
    match inspect_data_uri(uri) {
        Some(info) => format!("[image {}, {}]", info.mime, human_size(info.size)),
        None => "[image]".to_string(),
    }
}

fn human_size(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{bytes} B")
    } else if b < KIB * KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / (KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{encode_data_uri, MessageRecord};

    fn render_one(instr: RenderInstruction<u64>) -> String {
        let mut r = TerminalRenderer::new(Vec::new(), Theme::Light);
        r.render(&instr);
        Renderer::<u64>::end_batch(&mut r);
        String::from_utf8(r.into_inner()).unwrap()
    }

    #[test]
    fn test_other_message_shows_sender() {
        let out = render_one(RenderInstruction {
            record: MessageRecord::text(1u64, "bob", "hello").with_timestamp(0),
            is_own: false,
        });
        assert!(out.contains("bob"), "{out}");
        assert!(out.contains("hello"), "{out}");
    }

    #[test]
    fn test_own_message_hides_sender() {
        let out = render_one(RenderInstruction {
            record: MessageRecord::text(1u64, "alice", "hi there").with_timestamp(0),
            is_own: true,
        });
        assert!(!out.contains("alice"), "{out}");
        assert!(out.contains("hi there"), "{out}");
        assert!(out.starts_with(OWN_INDENT));
    }

    #[test]
    fn test_multiline_text_gets_continuation_lines() {
        let out = render_one(RenderInstruction {
            record: MessageRecord::text(1u64, "bob", "one\ntwo\nthree").with_timestamp(0),
            is_own: false,
        });
        assert_eq!(out.lines().count(), 3);
        assert!(out.contains("two"));
    }

    #[test]
    fn test_image_renders_summary() {
        let uri = encode_data_uri(&[0u8; 2048], "image/png");
        let out = render_one(RenderInstruction {
            record: MessageRecord::new(1u64, "bob", Payload::image(uri)).with_timestamp(0),
            is_own: false,
        });
        assert!(out.contains("[image image/png, 2.0 KiB]"), "{out}");
    }

    #[test]
    fn test_broken_image_renders_placeholder() {
        assert_eq!(describe_image("not a uri"), "[image]");
    }

    #[test]
    fn test_sanitize_strips_escape_sequences() {
        assert_eq!(sanitize("a\u{1b}[2Jb\tc\nd\u{7}"), "a[2Jb\tc\nd");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(12), "12 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_format_clock_shape() {
        let s = format_clock(1_718_000_000_000);
        assert_eq!(s.len(), 5);
        assert_eq!(&s[2..3], ":");
    }

    #[test]
    fn test_collecting_renderer_counts_batches() {
        let mut r: CollectingRenderer<u64> = CollectingRenderer::new();
        r.render(&RenderInstruction {
            record: MessageRecord::text(1u64, "bob", "x"),
            is_own: false,
        });
        r.end_batch();
        r.notice("renamed");
        assert_eq!(r.instructions.len(), 1);
        assert_eq!(r.batches, 1);
        assert_eq!(r.notices, vec!["renamed".to_string()]);
    }
}
