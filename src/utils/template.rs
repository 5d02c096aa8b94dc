//! String template rendering utilities.

use std::collections::HashMap;

pub struct TemplateVars;

impl TemplateVars {
    pub const PROJECT: &'static str = "project";
    pub const IMAGE: &'static str = "image";
    pub const TAG: &'static str = "tag";
    pub const REGISTRY_USER: &'static str = "registry_user";
    pub const CONTAINER: &'static str = "container";
    pub const JOB: &'static str = "job";
    pub const RUN_NUMBER: &'static str = "run_number";
    pub const REPORT: &'static str = "report";
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

/// Render each element of an argv independently.
///
/// A substituted value can never split into extra arguments because the
/// element boundaries are fixed before substitution.
pub fn render_argv(argv: &[String], variables: &HashMap<String, String>) -> Vec<String> {
    argv.iter().map(|arg| render_map(arg, variables)).collect()
}
