//! CLI dialect definition for hop traversal and configuration capture.

use regex::bytes::Regex;

use super::privilege_level::PrivilegeLevel;
use crate::channel::{compile_prompt_pattern, render_identity_pattern};

/// Everything the hop chain needs to know about one CLI family.
///
/// A chain shares one dialect across its hops: the inner login is issued
/// from the outer device's CLI, so it is that CLI's ssh client syntax.
#[derive(Debug, Clone)]
pub struct PlatformDefinition {
    /// Platform name (e.g., "cisco_ios", "juniper_junos").
    pub name: String,

    /// Inner-login command with `{username}`, `{address}` and `{port}`
    /// placeholders.
    pub login_template: String,

    /// Pattern for the password prompt of an inner login.
    pub login_prompt: Regex,

    /// Lightweight command whose response identifies the current hop.
    /// Empty sends a bare line, which just redraws the prompt.
    pub identity_command: String,

    /// Pattern template with a `{hostname}` placeholder that must match the
    /// identity response when the channel is at that host.
    pub identity_template: String,

    /// Privileged level and how to escalate to it, if the CLI has one.
    pub privileged: Option<PrivilegeLevel>,

    /// Command that disables output paging.
    pub pagination_command: Option<String>,

    /// Command that dumps the full running configuration.
    pub dump_command: String,

    /// Command that leaves the current hop.
    pub exit_command: String,

    /// Patterns that indicate command failure.
    pub failed_when_contains: Vec<String>,
}

impl PlatformDefinition {
    /// Create a definition with Cisco-like defaults.
    pub fn new(name: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            login_template: "ssh -l {username} {address}".to_string(),
            login_prompt: compile_prompt_pattern(r"(?i)password:")?,
            identity_command: String::new(),
            identity_template: r"(?m)^{hostname}[>#]\s*$".to_string(),
            privileged: None,
            pagination_command: None,
            dump_command: "show running-config".to_string(),
            exit_command: "exit".to_string(),
            failed_when_contains: vec![],
        })
    }

    pub fn with_login_template(mut self, template: impl Into<String>) -> Self {
        self.login_template = template.into();
        self
    }

    pub fn with_login_prompt(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.login_prompt = compile_prompt_pattern(pattern)?;
        Ok(self)
    }

    pub fn with_identity(
        mut self,
        command: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.identity_command = command.into();
        self.identity_template = template.into();
        self
    }

    pub fn with_privileged(mut self, level: PrivilegeLevel) -> Self {
        self.privileged = Some(level);
        self
    }

    pub fn with_pagination_command(mut self, command: impl Into<String>) -> Self {
        self.pagination_command = Some(command.into());
        self
    }

    pub fn with_dump_command(mut self, command: impl Into<String>) -> Self {
        self.dump_command = command.into();
        self
    }

    pub fn with_exit_command(mut self, command: impl Into<String>) -> Self {
        self.exit_command = command.into();
        self
    }

    /// Add a failure pattern.
    pub fn with_failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failed_when_contains.push(pattern.into());
        self
    }

    /// Inner-login command line for a target.
    pub fn login_command(&self, username: &str, address: &str, port: u16) -> String {
        self.login_template
            .replace("{username}", username)
            .replace("{address}", address)
            .replace("{port}", &port.to_string())
    }

    /// Compiled identity pattern for `hostname`.
    pub fn identity_pattern(&self, hostname: &str) -> Result<Regex, regex::Error> {
        render_identity_pattern(&self.identity_template, hostname)
    }

    /// Return the first failure pattern found in `output`.
    pub fn detect_failure(&self, output: &str) -> Option<&str> {
        self.failed_when_contains
            .iter()
            .find(|p| output.contains(p.as_str()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_command_template() {
        let platform = PlatformDefinition::new("test")
            .unwrap()
            .with_login_template("ssh {username}@{address} -p {port}");
        assert_eq!(
            platform.login_command("admin", "10.0.0.2", 2222),
            "ssh admin@10.0.0.2 -p 2222"
        );
    }

    #[test]
    fn test_default_identity_pattern() {
        let platform = PlatformDefinition::new("test").unwrap();
        let pattern = platform.identity_pattern("EOR1").unwrap();
        assert!(pattern.is_match(b"\r\nEOR1>"));
        assert!(pattern.is_match(b"\r\nEOR1#"));
        assert!(!pattern.is_match(b"\r\nPE#"));
        assert!(!pattern.is_match(b"\r\nEOR10#"));
    }

    #[test]
    fn test_detect_failure() {
        let platform = PlatformDefinition::new("test")
            .unwrap()
            .with_failure_pattern("% Invalid input");
        assert_eq!(
            platform.detect_failure("show run\n% Invalid input detected at '^' marker."),
            Some("% Invalid input")
        );
        assert_eq!(platform.detect_failure("hostname PE"), None);
    }
}
