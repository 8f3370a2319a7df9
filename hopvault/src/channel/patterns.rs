//! Pattern matching utilities for credential prompts and hop identity.

use regex::bytes::Regex;

/// Something a channel tail can be checked against.
pub trait PromptMatcher: Send + Sync {
    /// Returns byte offset where match ends, or None if no match.
    fn find_match(&self, data: &[u8]) -> Option<usize>;

    /// Check if the data matches the pattern.
    fn is_match(&self, data: &[u8]) -> bool {
        self.find_match(data).is_some()
    }
}

impl PromptMatcher for Regex {
    fn find_match(&self, data: &[u8]) -> Option<usize> {
        self.find(data).map(|m| m.end())
    }
}

/// Compile a prompt pattern string into a regex.
///
/// Anchors to end of input if no anchor is given, so a prompt that
/// appears mid-output (e.g. in a banner) does not count.
pub fn compile_prompt_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = if pattern.ends_with('$') {
        pattern.to_string()
    } else {
        format!("{}\\s*$", pattern)
    };

    Regex::new(&pattern)
}

/// Render an identity template by substituting the escaped hostname for
/// every `{hostname}` placeholder.
pub fn render_identity_pattern(template: &str, hostname: &str) -> Result<Regex, regex::Error> {
    Regex::new(&template.replace("{hostname}", &regex::escape(hostname)))
}
