//! Accumulation buffer for CLI output with tail-only pattern search.
//!
//! Configuration dumps can run to megabytes, but credential prompts and
//! device prompts only ever appear at the very end of the output, so
//! pattern checks look at the last `search_depth` bytes instead of
//! rescanning the whole accumulation on every chunk.

use regex::bytes::Regex;

/// Buffer for accumulating output and searching its tail for patterns.
#[derive(Debug)]
pub struct PatternBuffer {
    /// The accumulated output buffer, ANSI sequences removed.
    buffer: Vec<u8>,

    /// How many bytes from the end to search for patterns.
    search_depth: usize,
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
        }
    }

    /// Extend the buffer with new data, stripping ANSI escape codes.
    pub fn extend(&mut self, data: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(data);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// Search only the tail of the buffer for the pattern.
    ///
    /// Offsets in the returned match are relative to the start of the
    /// search region, not the full buffer.
    pub fn search_tail(&self, pattern: &Regex) -> Option<regex::bytes::Match<'_>> {
        pattern.find(self.tail())
    }

    /// Check if the tail contains a pattern match.
    pub fn tail_contains(&self, pattern: &Regex) -> bool {
        self.search_tail(pattern).is_some()
    }

    /// The last `search_depth` bytes.
    pub fn tail(&self) -> &[u8] {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        &self.buffer[start..]
    }

    /// The last non-empty line, usually the device prompt.
    pub fn last_line(&self) -> String {
        last_line(&self.buffer)
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Last line of `data` that is not blank after trimming CR/LF and spaces.
pub fn last_line(data: &[u8]) -> String {
    let Some(last) = data.iter().rposition(|b| !b.is_ascii_whitespace()) else {
        return String::new();
    };
    let end = last + 1;
    let start = memchr::memrchr2(b'\n', b'\r', &data[..end]).map_or(0, |p| p + 1);
    String::from_utf8_lossy(&data[start..end]).trim().to_string()
}
