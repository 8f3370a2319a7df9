//! Arista EOS platform definition.
//!
//! Prompt patterns are adapted from [scrapli](https://github.com/carlmontanari/scrapli).

use crate::platform::{PlatformDefinition, PrivilegeLevel};

/// Platform name for Arista EOS.
pub const PLATFORM_NAME: &str = "arista_eos";

/// Create the Arista EOS platform definition.
pub fn platform() -> Result<PlatformDefinition, regex::Error> {
    let privilege_exec = PrivilegeLevel::new(
        "privilege_exec",
        r"(?mi)^[\w.\-@()/: ]{1,63}#\s?$",
        "enable",
        r"(?i)password:",
    )?
    .with_not_contains("(config");

    Ok(PlatformDefinition::new(PLATFORM_NAME)?
        .with_login_template("ssh -l {username} {address}")
        .with_identity("", r"(?mi)^{hostname}[>#]\s*$")
        .with_privileged(privilege_exec)
        .with_pagination_command("terminal length 0")
        .with_dump_command("show running-config")
        .with_exit_command("exit")
        .with_failure_pattern("% Ambiguous command")
        .with_failure_pattern("% Error")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Invalid input")
        .with_failure_pattern("% Unavailable command"))
}
