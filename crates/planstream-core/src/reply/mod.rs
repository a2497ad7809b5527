//! Incremental extraction of proposed files from a streamed model reply.
//!
//! The model labels each proposed file with a path line followed by a fenced
//! code block:
//!
//! ~~~text
//! - src/main.rs:
//! ```rust
//! fn main() {}
//! ```
//! ~~~
//!
//! [`ReplyParser`] consumes the reply token by token, in arrival order and
//! without any alignment to line boundaries, and tracks which file block (if
//! any) each closed line belongs to. Only closed lines are inspected; the
//! line still being built is never interpreted.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

const FENCE: &str = "```";

/// One fenced file block, in reply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBlock {
    pub path: String,
    pub content: String,
    /// Prose preceding the path label, trimmed
    pub description: String,
    pub num_tokens: usize,
}

/// Everything extracted from a finished reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyParseResult {
    /// Detected paths in first-seen order, without duplicates
    pub files: Vec<String>,
    /// Content of every block for a path, concatenated in reply order
    pub file_contents: HashMap<String, String>,
    pub num_tokens_by_file: HashMap<String, usize>,
    pub total_tokens: usize,
    pub blocks: Vec<FileBlock>,
}

impl ReplyParseResult {
    /// A reply with no file blocks is a plain chat answer.
    pub fn is_chat_only(&self) -> bool {
        self.files.is_empty()
    }
}

/// Stateful single-writer parser over a token stream.
#[derive(Debug, Default)]
pub struct ReplyParser {
    current_line: String,
    num_closed_lines: usize,
    /// Path label seen but not yet confirmed by an opening fence
    maybe_file_path: Option<String>,
    /// Index into `description_lines` of the pending label line
    label_line_idx: usize,
    current_block: Option<FileBlock>,
    description_lines: Vec<String>,
    result: ReplyParseResult,
}

impl ReplyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one token. Each call counts as one token; it counts toward
    /// the grand total only when `count_toward_total` is set.
    pub fn add_token(&mut self, token: &str, count_toward_total: bool) {
        if count_toward_total {
            self.result.total_tokens += 1;
        }
        if let Some(block) = self.current_block.as_mut() {
            block.num_tokens += 1;
            *self
                .result
                .num_tokens_by_file
                .entry(block.path.clone())
                .or_default() += 1;
        }

        // Each newline closes the line being built and opens the next one,
        // so a token spanning many lines is handled as a flat work list.
        let mut pieces = token.split('\n');
        if let Some(first) = pieces.next() {
            self.current_line.push_str(first);
        }
        for piece in pieces {
            let closed = std::mem::replace(&mut self.current_line, piece.to_string());
            self.close_line(closed);
        }
    }

    /// Path of the file block currently being streamed, if any.
    pub fn current_file_path(&self) -> Option<&str> {
        self.current_block.as_ref().map(|b| b.path.as_str())
    }

    /// Number of lines closed so far.
    pub fn num_lines(&self) -> usize {
        self.num_closed_lines
    }

    /// Flushes the unterminated final line and returns the extraction.
    ///
    /// A block left open by a truncated reply is kept with the content
    /// received so far.
    pub fn finish(mut self) -> ReplyParseResult {
        self.add_token("\n", false);
        if let Some(block) = self.current_block.take() {
            debug!("Reply ended inside the block for {}", block.path);
            self.result.blocks.push(block);
        }
        self.result
    }

    fn close_line(&mut self, line: String) {
        self.num_closed_lines += 1;

        if let Some(block) = self.current_block.as_mut() {
            if line.starts_with(FENCE) {
                if let Some(block) = self.current_block.take() {
                    debug!("Closed file block for {}", block.path);
                    self.result.blocks.push(block);
                }
            } else {
                block.content.push_str(&line);
                block.content.push('\n');
                let content = self
                    .result
                    .file_contents
                    .entry(block.path.clone())
                    .or_default();
                content.push_str(&line);
                content.push('\n');
            }
            return;
        }

        if let Some(candidate) = self.maybe_file_path.take() {
            if line.starts_with(FENCE) {
                self.open_block(candidate);
                return;
            }
            if line.trim().is_empty() {
                self.maybe_file_path = Some(candidate);
                self.description_lines.push(line);
                return;
            }
            debug!("Discarding path candidate {candidate}");
        }

        if let Some(path) = parse_path_label(&line) {
            self.label_line_idx = self.description_lines.len();
            self.maybe_file_path = Some(path);
        }
        self.description_lines.push(line);
    }

    fn open_block(&mut self, path: String) {
        debug!("Confirmed file path {path}");
        let description = self.description_lines[..self.label_line_idx]
            .join("\n")
            .trim()
            .to_string();
        self.description_lines.clear();
        self.label_line_idx = 0;

        if !self.result.files.contains(&path) {
            self.result.files.push(path.clone());
        }
        self.result.file_contents.entry(path.clone()).or_default();
        self.result.num_tokens_by_file.entry(path.clone()).or_default();

        self.current_block = Some(FileBlock {
            path,
            content: String::new(),
            description,
            num_tokens: 0,
        });
    }
}

/// Recognizes a path label line and strips its decoration.
///
/// Any dash-prefixed line is a candidate, as are `file:` lines, `**bold**`
/// lines and headings ending in `:`. A candidate is rejected only when its
/// stripped text has spaces but neither an extension nor a separator, which
/// is what an ordinary bullet point looks like.
pub fn parse_path_label(line: &str) -> Option<String> {
    let line = line.trim();
    let could_be = line.starts_with('-')
        || line.starts_with("file:")
        || (line.len() >= 4 && line.starts_with("**") && line.ends_with("**"))
        || (line.starts_with('#') && line.ends_with(':'));
    if !could_be {
        return None;
    }

    let path = strip_label(line);
    if path.is_empty() {
        return None;
    }
    let has_ext = path
        .rsplit_once('.')
        .is_some_and(|(_, ext)| !ext.contains(' '));
    let has_sep = path.contains('/');
    let has_spaces = path.contains(' ');
    if !has_ext && !has_sep && has_spaces {
        return None;
    }
    Some(path)
}

fn strip_label(line: &str) -> String {
    let p = line
        .replace("**", "")
        .replace(|c: char| matches!(c, '`' | '\'' | '"'), "");

    let mut p = p.strip_prefix('-').unwrap_or(&p);
    for heading in ["####", "###", "##", "#"] {
        p = p.strip_prefix(heading).unwrap_or(p);
    }
    let mut p = p.trim();
    for prefix in ["file:", "file path:", "filepath:", "File path:", "File Path:"] {
        p = p.strip_prefix(prefix).unwrap_or(p);
    }
    let p = p.strip_suffix(':').unwrap_or(p).trim();

    // `- Update: src/a.rs (new file)` labels the last `: ` field
    let p = p.rsplit(": ").next().unwrap_or(p);
    let p = p.split(" (").next().unwrap_or(p);
    p.to_string()
}
