//! Response type for command execution results.

use std::time::Duration;

/// Response from a command execution.
#[derive(Debug, Clone)]
pub struct Response {
    /// The command that was executed (masked for secrets).
    pub command: String,

    /// The command output with the echoed command and trailing prompt removed.
    pub result: String,

    /// Everything received, ANSI sequences removed.
    pub raw_result: String,

    /// The last non-empty line received, normally the device prompt.
    pub prompt: String,

    /// Time taken to execute the command, retries included.
    pub elapsed: Duration,

    /// Attempts used (1, or 2 after a timeout retry).
    pub attempts: u32,
}

impl Response {
    /// Build a response from the raw accumulation of one command.
    pub fn from_raw(command: impl Into<String>, raw: &[u8], elapsed: Duration) -> Self {
        let command = command.into();
        let raw_result = String::from_utf8_lossy(raw).into_owned();
        let prompt = crate::channel::last_line(raw);
        let result = normalize_output(&raw_result, &command, &prompt);
        Self {
            command,
            result,
            raw_result,
            prompt,
            elapsed,
            attempts: 1,
        }
    }

    /// Get the result lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.result.lines()
    }

    /// Check if the result contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.result.contains(pattern)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.result)
    }
}

/// Strip the echoed command line and the trailing prompt line.
///
/// Line endings are normalized to `\n` and blank lines around the body are
/// dropped. This is the text the archive fingerprints.
pub fn normalize_output(raw: &str, command: &str, prompt: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = text.lines().collect();

    // Echo is the first non-blank line when it ends with the command
    if let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) {
        let command = command.trim();
        if !command.is_empty() && lines[first].trim_end().ends_with(command) {
            lines.drain(..=first);
        } else {
            lines.drain(..first);
        }
    }

    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if !prompt.is_empty() && lines.last().is_some_and(|l| l.trim() == prompt) {
        lines.pop();
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_echo_and_prompt() {
        let raw = "show running-config\r\nBuilding configuration...\r\n\r\nhostname PE\r\n!\r\nend\r\n\r\nPE#";
        let response = Response::from_raw("show running-config", raw.as_bytes(), Duration::ZERO);
        assert_eq!(response.prompt, "PE#");
        assert_eq!(
            response.result,
            "Building configuration...\n\nhostname PE\n!\nend"
        );
    }

    #[test]
    fn test_normalize_echo_after_prompt() {
        // Some devices echo the command after the previous prompt
        let raw = "PE#terminal length 0\r\nPE#";
        let response = Response::from_raw("terminal length 0", raw.as_bytes(), Duration::ZERO);
        assert_eq!(response.result, "");
        assert_eq!(response.prompt, "PE#");
    }

    #[test]
    fn test_normalize_without_echo() {
        let result = normalize_output("\r\nEOR1>", "", "EOR1>");
        assert_eq!(result, "");

        let result = normalize_output("line one\nline two\nEOR1#", "show x", "EOR1#");
        assert_eq!(result, "line one\nline two");
    }

    #[test]
    fn test_normalization_hides_only_line_endings_and_edges() {
        let crlf = normalize_output("\r\nhostname PE\r\n!\r\n\r\nPE#", "", "PE#");
        let lf = normalize_output("hostname PE\n!\nPE#", "", "PE#");
        assert_eq!(crlf, lf);

        // Whitespace inside the body is kept
        let spaced = normalize_output("hostname PE \n!\nPE#", "", "PE#");
        assert_ne!(spaced, lf);
    }
}
