//! Turning streamed reply text into speakable fragments.

use regex::Regex;
use std::sync::LazyLock;

/// A fragment is ready once the buffer ends in one of these.
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[”）)。？！」.~?!]\s*$").unwrap_or_else(|e| panic!("invalid sentence regex: {e}"))
});

/// Quoted or bracketed spans, which carry the spoken lines in roleplay replies.
static DIALOGUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"“[^”]*”|‘[^’]*’|"[^"]*"|'[^']*'|「[^」]*」|『[^』]*』|［[^］]*］|\([^)]*\)|（[^）]*）"#)
        .unwrap_or_else(|e| panic!("invalid dialogue regex: {e}"))
});

/// Returns the inner text of every quoted or bracketed span, in order.
pub fn extract_dialogue(text: &str) -> Vec<String> {
    DIALOGUE
        .find_iter(text)
        .map(|m| {
            let span = m.as_str();
            let mut chars = span.chars();
            chars.next();
            chars.next_back();
            chars.as_str().trim().to_string()
        })
        .filter(|inner| !inner.is_empty())
        .collect()
}

/// Accumulates streamed text and yields one fragment per finished sentence.
#[derive(Debug, Default, Clone)]
pub struct SentenceBuffer {
    buffer: String,
    dialogue_only: bool,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only yield quoted/bracketed spans; narration is dropped.
    pub fn dialogue_only() -> Self {
        Self {
            buffer: String::new(),
            dialogue_only: true,
        }
    }

    /// Appends `chunk` and returns any fragments it completed.
    ///
    /// In dialogue-only mode a finished sentence without any quoted span
    /// stays buffered, so a quote split across sentences is not lost.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        if !SENTENCE_END.is_match(&self.buffer) {
            return Vec::new();
        }

        if self.dialogue_only {
            let lines = extract_dialogue(&self.buffer);
            if !lines.is_empty() {
                self.buffer.clear();
            }
            lines
        } else {
            self.take_all()
        }
    }

    /// Flushes whatever is left at the end of the stream.
    pub fn finish(&mut self) -> Vec<String> {
        if self.dialogue_only {
            let lines = extract_dialogue(&self.buffer);
            self.buffer.clear();
            lines
        } else {
            self.take_all()
        }
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn take_all(&mut self) -> Vec<String> {
        let text = std::mem::take(&mut self.buffer);
        let text = text.trim();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        }
    }
}

/// Splits a complete text into fragments the way a streamed reply would be.
pub fn split_sentences(text: &str, dialogue_only: bool) -> Vec<String> {
    let mut buffer = if dialogue_only {
        SentenceBuffer::dialogue_only()
    } else {
        SentenceBuffer::new()
    };

    let mut fragments = Vec::new();
    for (i, c) in text.char_indices() {
        fragments.extend(buffer.push(&text[i..i + c.len_utf8()]));
    }
    fragments.extend(buffer.finish());
    fragments
}
