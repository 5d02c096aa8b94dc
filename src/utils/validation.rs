//! Input validation primitives.
//!
//! Invocation parameters (image names, container names, registry users) come
//! straight from whoever triggered the run. They are checked here before any
//! of them is substituted into a command.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

static CONTAINER_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap());

// repository path, optional registry port, optional tag
static IMAGE_REF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+([._-][a-z0-9]+)*(:[0-9]+)?(/[a-z0-9]+([._-][a-z0-9]+)*)*(:[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?$").unwrap()
});

/// Docker container names: `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
pub fn container_name(value: &str, field: &str) -> Result<String> {
    let value = require_non_empty(value, field, "Container name cannot be empty")?;
    if !CONTAINER_NAME_PATTERN.is_match(value) {
        return Err(Error::validation_invalid_argument(
            field,
            format!("'{}' is not a valid container name", value),
            Some(value.to_string()),
            None,
        ));
    }
    Ok(value.to_string())
}

/// Image references: lowercase repository path with optional registry port and tag.
pub fn image_reference(value: &str, field: &str) -> Result<String> {
    let value = require_non_empty(value, field, "Image name cannot be empty")?;
    if !IMAGE_REF_PATTERN.is_match(value) {
        return Err(Error::validation_invalid_argument(
            field,
            format!("'{}' is not a valid image reference", value),
            Some(value.to_string()),
            None,
        )
        .with_hint("Image names must be lowercase, e.g. 'acme/shop' or 'registry:5000/shop:1.2'"));
    }
    Ok(value.to_string())
}

/// Registry usernames share the container-name alphabet.
pub fn registry_user(value: &str, field: &str) -> Result<String> {
    container_name(value, field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_non_empty_trims_whitespace() {
        assert_eq!(require_non_empty("  shop ", "f", "m").unwrap(), "shop");
        assert!(require_non_empty("   ", "f", "m").is_err());
    }

    #[test]
    fn container_names() {
        assert!(container_name("shop-web_1.blue", "container").is_ok());
        assert!(container_name("-leading", "container").is_err());
        assert!(container_name("a;rm -rf /", "container").is_err());
    }

    #[test]
    fn image_references() {
        assert!(image_reference("shop", "image").is_ok());
        assert!(image_reference("acme/shop:1.4.2", "image").is_ok());
        assert!(image_reference("registry.local:5000/acme/shop:latest", "image").is_ok());
        assert!(image_reference("Acme/Shop", "image").is_err());
        assert!(image_reference("shop $(id)", "image").is_err());
    }
}
