//! Built-in values used when dockhand.json leaves a field out.

// =============================================================================
// Release parameters
// =============================================================================

pub const DEFAULT_CLEANUP_TYPES: &str = "container,image,volume,all";

pub fn default_tag() -> String {
    "latest".to_string()
}

pub fn default_image_template() -> String {
    "{{registry_user}}/{{project}}:{{tag}}".to_string()
}

pub fn default_port_mapping() -> String {
    "8080:8080".to_string()
}

pub fn default_cleanup_types() -> String {
    DEFAULT_CLEANUP_TYPES.to_string()
}

pub fn default_job_name() -> String {
    "dockhand".to_string()
}

pub fn default_run_number() -> u64 {
    1
}

pub fn default_workspace() -> String {
    ".".to_string()
}

// =============================================================================
// Remote host
// =============================================================================

pub fn default_ssh_port() -> u16 {
    22
}

pub fn default_connect_timeout_secs() -> u64 {
    10
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_ssh_key_env() -> String {
    "DOCKHAND_SSH_KEY".to_string()
}

pub fn default_registry_password_env() -> String {
    "DOCKHAND_REGISTRY_PASSWORD".to_string()
}

// =============================================================================
// Collaborator commands
// =============================================================================

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

pub fn default_build_command() -> Vec<String> {
    argv(&["mvn", "clean", "package", "-DskipTests"])
}

pub fn default_static_analysis_command() -> Vec<String> {
    argv(&["sonar-scanner", "-Dsonar.projectKey={{project}}", "-Dsonar.sources=."])
}

pub fn default_image_build_command() -> Vec<String> {
    argv(&["docker", "build", "-t", "{{image}}", "."])
}

pub fn default_image_scan_command() -> Vec<String> {
    argv(&[
        "trivy",
        "image",
        "--format",
        "template",
        "--template",
        "@contrib/html.tpl",
        "-o",
        "{{report}}",
        "{{image}}",
    ])
}

pub fn default_scan_report() -> String {
    "trivy-image-report.html".to_string()
}

pub fn default_registry_login_command() -> Vec<String> {
    argv(&["docker", "login", "-u", "{{registry_user}}", "--password-stdin"])
}

pub fn default_image_push_command() -> Vec<String> {
    argv(&["docker", "push", "{{image}}"])
}

// =============================================================================
// Notification
// =============================================================================

pub const SUCCESS_COLOR: &str = "#2e7d32";
pub const ATTENTION_COLOR: &str = "#c62828";

pub fn default_success_color() -> String {
    SUCCESS_COLOR.to_string()
}

pub fn default_attention_color() -> String {
    ATTENTION_COLOR.to_string()
}

pub fn default_sender() -> String {
    "dockhand@localhost".to_string()
}

pub fn default_mime_type() -> String {
    "text/html".to_string()
}

pub fn default_attachment_pattern() -> Option<String> {
    Some(default_scan_report())
}

pub fn default_sendmail_program() -> String {
    "sendmail".to_string()
}

pub fn default_relay_timeout_secs() -> u64 {
    15
}
