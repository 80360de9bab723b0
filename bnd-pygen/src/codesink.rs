//! Ordered text sinks with indentation.

const INDENT: usize = 4;

/// An append-only text stream with an indentation level.
///
/// Generation code never reads back what it wrote; it only appends lines
/// and changes the indentation of the lines that follow.
pub trait CodeSink {
    /// Write one line at the current indentation. Embedded newlines split
    /// the text into several lines, each indented.
    fn writeln(&mut self, line: &str);

    fn indent(&mut self);

    /// Decrease the indentation level. Never goes below zero.
    fn unindent(&mut self);

    /// Write a blank line.
    fn blank(&mut self) {
        self.writeln("");
    }
}

/// Sink that keeps every line in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Vec<String>,
    level: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Replay the buffered lines into another sink, at that sink's current
    /// indentation, and clear this buffer.
    pub fn flush_to(&mut self, sink: &mut dyn CodeSink) {
        for line in self.lines.drain(..) {
            sink.writeln(&line);
        }
    }

    /// Take the buffered text, one `\n`-terminated line per entry.
    pub fn flush(&mut self) -> String {
        let mut out = String::new();
        for line in self.lines.drain(..) {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

impl CodeSink for MemorySink {
    fn writeln(&mut self, line: &str) {
        for l in line.split('\n') {
            if l.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{:width$}{l}", "", width = self.level * INDENT));
            }
        }
    }

    fn indent(&mut self) {
        self.level += 1;
    }

    fn unindent(&mut self) {
        self.level = self.level.saturating_sub(1);
    }
}

/// Sink that discards everything. Used to dry-run generation for errors and
/// method flags without producing output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl CodeSink for NullSink {
    fn writeln(&mut self, _line: &str) {}

    fn indent(&mut self) {}

    fn unindent(&mut self) {}
}
