//! Built-in CLI dialects.

pub mod arista;
pub mod cisco_ios;
pub mod juniper;
