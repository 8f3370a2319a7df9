//! Privilege level definition.

use regex::bytes::Regex;

use crate::channel::compile_prompt_pattern;

/// A privilege level reached by escalation from the login level.
///
/// Network CLIs land an SSH login in an unprivileged mode; dumping the
/// running configuration needs the privileged one, entered with a command
/// that prompts for the secondary secret.
#[derive(Debug, Clone)]
pub struct PrivilegeLevel {
    /// Name of this privilege level (e.g. "privilege_exec").
    pub name: String,

    /// Regex pattern matching the prompt line of this level.
    pub pattern: Regex,

    /// Command that escalates to this level.
    pub escalate_command: String,

    /// Pattern for the credential prompt shown by the escalate command.
    pub escalate_prompt: Regex,

    /// Strings that must NOT be in the prompt for this level to match.
    /// Used for disambiguation (e.g., "#" matches both priv and config modes).
    pub not_contains: Vec<String>,
}

impl PrivilegeLevel {
    /// Create a privilege level with its escalation command and prompt.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        escalate_command: impl Into<String>,
        escalate_prompt: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            escalate_command: escalate_command.into(),
            escalate_prompt: compile_prompt_pattern(escalate_prompt)?,
            not_contains: vec![],
        })
    }

    /// Add a not_contains pattern.
    pub fn with_not_contains(mut self, pattern: impl Into<String>) -> Self {
        self.not_contains.push(pattern.into());
        self
    }

    /// Check if this privilege level matches a prompt.
    pub fn matches(&self, prompt: &str) -> bool {
        if self.not_contains.iter().any(|nc| prompt.contains(nc)) {
            return false;
        }
        self.pattern.is_match(prompt.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_respects_not_contains() {
        let level = PrivilegeLevel::new("privilege_exec", r"(?m)^[\w.\-]{1,63}#\s?$", "enable", r"(?i)password:")
            .unwrap()
            .with_not_contains("(config");
        assert!(level.matches("PE#"));
        assert!(!level.matches("PE>"));
        assert!(!level.matches("PE(config)#"));
        assert!(level.escalate_prompt.is_match(b"Password: "));
    }
}
