//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Process execution behind the `CommandRunner` seam
//! - `shell` - Shell escaping and quoting
//! - `template` - String template rendering
//! - `validation` - Input validation helpers

pub mod command;
pub mod shell;
pub mod template;
pub mod validation;
