// Public modules
pub mod cleanup;
pub mod config;
pub mod credential;
pub mod deploy;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod release;
pub mod ssh;
pub mod tools;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
