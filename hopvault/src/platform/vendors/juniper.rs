//! Juniper JUNOS platform definition.
//!
//! JUNOS has no separate privileged level for reading configuration, and
//! its operational prompt carries the login user:
//!
//! ```text
//! admin@edge1>
//! ```

use crate::platform::PlatformDefinition;

/// Platform name for Juniper JUNOS.
pub const PLATFORM_NAME: &str = "juniper_junos";

/// Create the Juniper JUNOS platform definition.
pub fn platform() -> Result<PlatformDefinition, regex::Error> {
    Ok(PlatformDefinition::new(PLATFORM_NAME)?
        .with_login_template("ssh {username}@{address}")
        .with_login_prompt(r"(?i)password:")?
        .with_identity("", r"(?m)^[\w\-.]+@{hostname}[>#]\s*$")
        .with_pagination_command("set cli screen-length 0")
        .with_dump_command("show configuration")
        .with_exit_command("exit")
        .with_failure_pattern("is ambiguous")
        .with_failure_pattern("No valid completions")
        .with_failure_pattern("unknown command")
        .with_failure_pattern("syntax error"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_juniper_identity() {
        let platform = platform().unwrap();
        assert!(platform.privileged.is_none());
        let pattern = platform.identity_pattern("edge1").unwrap();
        assert!(pattern.is_match(b"\r\nadmin@edge1> "));
        assert!(!pattern.is_match(b"\r\nadmin@edge2> "));
        assert_eq!(platform.login_command("admin", "10.9.0.1", 22), "ssh admin@10.9.0.1");
    }
}
