//! Platform definitions for multi-vendor support.
//!
//! A platform describes a CLI family: how its ssh client is invoked for an
//! inner login, how a hop proves its identity, how privilege is raised,
//! and which commands disable paging and dump the configuration.

mod definition;
mod privilege_level;
mod registry;
pub mod vendors;

pub use definition::PlatformDefinition;
pub use privilege_level::PrivilegeLevel;
pub use registry::PlatformRegistry;
