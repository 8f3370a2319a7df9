//! Cisco IOS / IOS-XE platform definition.
//!
//! # Prompt Examples
//!
//! ```text
//! PE>                 # user exec, where an ssh login lands
//! PE#                 # privileged exec, after `enable`
//! PE(config)#         # configuration mode (never entered here)
//! ```

use crate::platform::{PlatformDefinition, PrivilegeLevel};

/// Platform name for Cisco IOS.
pub const PLATFORM_NAME: &str = "cisco_ios";

/// Create the Cisco IOS platform definition.
pub fn platform() -> Result<PlatformDefinition, regex::Error> {
    let privilege_exec = PrivilegeLevel::new(
        "privilege_exec",
        r"(?m)^[\w.\-@()/: ]{1,63}#\s?$",
        "enable",
        r"(?i)password:",
    )?
    .with_not_contains("(config");

    Ok(PlatformDefinition::new(PLATFORM_NAME)?
        .with_login_template("ssh -l {username} {address}")
        .with_login_prompt(r"(?i)password:")?
        .with_identity("", r"(?m)^{hostname}[>#]\s*$")
        .with_privileged(privilege_exec)
        .with_pagination_command("terminal length 0")
        .with_dump_command("show running-config")
        .with_exit_command("exit")
        .with_failure_pattern("% Invalid input")
        .with_failure_pattern("% Incomplete command")
        .with_failure_pattern("% Ambiguous command")
        .with_failure_pattern("% Unknown command")
        .with_failure_pattern("% Authorization failed"))
}
