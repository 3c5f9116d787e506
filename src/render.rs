//! Output rendering for the chat transcript.
//!
//! The session only ever talks to a [`TranscriptRenderer`].  Two renderers
//! ship with the crate: [`PlainTextRenderer`] writes to a terminal (optionally
//! with ANSI styling) and [`TranscriptBuffer`] keeps a structured log in
//! memory.

use std::io::{self, Stdout, Write};

/// ANSI escape code for bold text (used for headers).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text (used for dividers).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI sequence that clears the screen and homes the cursor.
const ANSI_CLEAR: &str = "\x1b[2J\x1b[H";

/// Banner a renderer that cannot erase prints in place of clearing.
const NEW_CONVERSATION: &str = "New conversation";

/// Width of a divider line, in characters.
const DIVIDER_WIDTH: usize = 40;

/// Receives the structured print events of a chat transcript.
///
/// Rendering is append-only: nothing already printed is revisited, except
/// by [`clear`](Self::clear), which starts over.
pub trait TranscriptRenderer: Send {
    /// Print the label that opens a message.
    fn print_header(&mut self, label: &str);

    /// Print a complete line of text.
    fn print_body(&mut self, text: &str);

    /// Print the separator that closes a message.
    fn print_divider(&mut self);

    /// Print a streamed fragment exactly as received.
    fn print_token(&mut self, text: &str);

    /// Discard everything rendered so far.
    ///
    /// Output that cannot be erased gets a visible "New conversation" banner
    /// instead, so a reset is never silent.
    fn clear(&mut self);
}

////////////////////////////////////////// PlainTextRenderer //////////////////////////////////////////

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    mid_line: bool,
}

impl PlainTextRenderer<Stdout> {
    /// Creates a new PlainTextRenderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl Default for PlainTextRenderer<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer writing to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            mid_line: false,
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    // Terminal write failures are not actionable here; the transcript is
    // also held by the conversation.
    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }

    fn start_line(&mut self) {
        if self.mid_line {
            self.write("\n");
            self.mid_line = false;
        }
    }
}

impl<W: Write + Send> TranscriptRenderer for PlainTextRenderer<W> {
    fn print_header(&mut self, label: &str) {
        self.start_line();
        if self.use_color {
            let line = format!("{ANSI_BOLD}{label}:{ANSI_RESET}\n");
            self.write(&line);
        } else {
            let line = format!("{label}:\n");
            self.write(&line);
        }
        self.flush();
    }

    fn print_body(&mut self, text: &str) {
        self.start_line();
        self.write(text);
        self.write("\n");
        self.flush();
    }

    fn print_divider(&mut self) {
        self.start_line();
        if self.use_color {
            let line = format!("{ANSI_DIM}{}{ANSI_RESET}\n", "─".repeat(DIVIDER_WIDTH));
            self.write(&line);
        } else {
            let line = format!("{}\n", "-".repeat(DIVIDER_WIDTH));
            self.write(&line);
        }
        self.flush();
    }

    fn print_token(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.write(text);
        self.mid_line = !text.ends_with('\n');
        self.flush();
    }

    fn clear(&mut self) {
        if self.use_color {
            self.write(ANSI_CLEAR);
        } else {
            self.start_line();
            let rule = "=".repeat(DIVIDER_WIDTH);
            let banner = format!("\n{rule}\n{NEW_CONVERSATION}\n{rule}\n");
            self.write(&banner);
        }
        self.mid_line = false;
        self.flush();
    }
}

/////////////////////////////////////////// TranscriptBuffer //////////////////////////////////////////

/// One print event recorded by [`TranscriptBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    /// A message header.
    Header(String),
    /// A line of body text.
    Body(String),
    /// A message divider.
    Divider,
    /// A streamed fragment.
    Token(String),
}

/// Renderer that records print events in memory.
#[derive(Debug, Clone, Default)]
pub struct TranscriptBuffer {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded events, oldest first.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// The streamed fragments, in order.
    pub fn tokens(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Token(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Flattens the log into plain text the way an unstyled terminal shows it.
    pub fn text(&self) -> String {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);
        for entry in &self.entries {
            match entry {
                TranscriptEntry::Header(label) => renderer.print_header(label),
                TranscriptEntry::Body(text) => renderer.print_body(text),
                TranscriptEntry::Divider => renderer.print_divider(),
                TranscriptEntry::Token(text) => renderer.print_token(text),
            }
        }
        String::from_utf8_lossy(&renderer.into_inner()).into_owned()
    }
}

impl TranscriptRenderer for TranscriptBuffer {
    fn print_header(&mut self, label: &str) {
        self.entries.push(TranscriptEntry::Header(label.to_string()));
    }

    fn print_body(&mut self, text: &str) {
        self.entries.push(TranscriptEntry::Body(text.to_string()));
    }

    fn print_divider(&mut self) {
        self.entries.push(TranscriptEntry::Divider);
    }

    fn print_token(&mut self, text: &str) {
        self.entries.push(TranscriptEntry::Token(text.to_string()));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}
