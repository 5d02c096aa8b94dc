//! Run configuration.
//!
//! One `PipelineConfig` is built at the start of a run (dockhand.json, then
//! CLI overrides) and passed by reference to every component. Nothing reads
//! ambient state after that point except secrets, which are resolved through
//! [`SecretRef`] at the moment they are needed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Error, Result};
use crate::paths;
use crate::utils::template::{self, TemplateVars};
use crate::utils::validation;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Identifying metadata for the run (used in notifications).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "defaults::default_job_name")]
    pub name: String,
    #[serde(default = "defaults::default_run_number")]
    pub run_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
    #[serde(default = "defaults::default_workspace")]
    pub workspace: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: defaults::default_job_name(),
            run_number: defaults::default_run_number(),
            console_url: None,
            workspace: defaults::default_workspace(),
        }
    }
}

/// User-supplied release parameters. Untrusted until validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub registry_user: String,
    #[serde(default)]
    pub container: String,
    #[serde(default = "defaults::default_tag")]
    pub tag: String,
    #[serde(default = "defaults::default_image_template")]
    pub image: String,
    #[serde(default = "defaults::default_port_mapping")]
    pub port_mapping: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            registry_user: String::new(),
            container: String::new(),
            tag: defaults::default_tag(),
            image: defaults::default_image_template(),
            port_mapping: defaults::default_port_mapping(),
        }
    }
}

/// Where a secret comes from. The value itself never lives in config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SecretRef {
    /// Path to a file; for SSH keys the file is used in place.
    File { path: String },
    /// Environment variable holding the secret text.
    Env { var: String },
    /// System keychain entry under the `dockhand` service.
    Keychain { account: String },
}

impl SecretRef {
    pub fn describe(&self) -> String {
        match self {
            SecretRef::File { path } => format!("file:{}", path),
            SecretRef::Env { var } => format!("env:{}", var),
            SecretRef::Keychain { account } => format!("keychain:{}", account),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "defaults::default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub principal: String,
    #[serde(default = "default_ssh_key")]
    pub key: SecretRef,
    #[serde(default = "defaults::default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "defaults::default_max_attempts")]
    pub max_attempts: u32,
}

fn default_ssh_key() -> SecretRef {
    SecretRef::Env {
        var: defaults::default_ssh_key_env(),
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: defaults::default_ssh_port(),
            principal: String::new(),
            key: default_ssh_key(),
            connect_timeout_secs: defaults::default_connect_timeout_secs(),
            max_attempts: defaults::default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_password")]
    pub password: SecretRef,
}

fn default_registry_password() -> SecretRef {
    SecretRef::Env {
        var: defaults::default_registry_password_env(),
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            password: default_registry_password(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Comma-separated cleanup tokens.
    #[serde(default = "defaults::default_cleanup_types")]
    pub types: String,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            types: defaults::default_cleanup_types(),
        }
    }
}

/// Argv templates for the external collaborators. `{{var}}` placeholders are
/// rendered per element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "defaults::default_build_command")]
    pub build: Vec<String>,
    #[serde(default = "defaults::default_static_analysis_command")]
    pub static_analysis: Vec<String>,
    #[serde(default = "defaults::default_image_build_command")]
    pub image_build: Vec<String>,
    #[serde(default = "defaults::default_image_scan_command")]
    pub image_scan: Vec<String>,
    #[serde(default = "defaults::default_scan_report")]
    pub scan_report: String,
    #[serde(default = "defaults::default_registry_login_command")]
    pub registry_login: Vec<String>,
    #[serde(default = "defaults::default_image_push_command")]
    pub image_push: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            build: defaults::default_build_command(),
            static_analysis: defaults::default_static_analysis_command(),
            image_build: defaults::default_image_build_command(),
            image_scan: defaults::default_image_scan_command(),
            scan_report: defaults::default_scan_report(),
            registry_login: defaults::default_registry_login_command(),
            image_push: defaults::default_image_push_command(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Stage names left out of the run entirely.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Sendmail {
        #[serde(default = "defaults::default_sendmail_program")]
        program: String,
    },
    HttpRelay {
        url: String,
        #[serde(default = "defaults::default_relay_timeout_secs")]
        timeout_secs: u64,
    },
    Disabled,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Sendmail {
            program: defaults::default_sendmail_program(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "defaults::default_sender")]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default = "defaults::default_mime_type")]
    pub mime_type: String,
    #[serde(default = "defaults::default_attachment_pattern")]
    pub attachment_pattern: Option<String>,
    #[serde(default = "defaults::default_success_color")]
    pub success_color: String,
    #[serde(default = "defaults::default_attention_color")]
    pub attention_color: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            to: Vec::new(),
            from: defaults::default_sender(),
            reply_to: None,
            mime_type: defaults::default_mime_type(),
            attachment_pattern: defaults::default_attachment_pattern(),
            success_color: defaults::default_success_color(),
            attention_color: defaults::default_attention_color(),
        }
    }
}

/// Values supplied on the command line; `Some` wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cleanup_types: Option<String>,
    pub project: Option<String>,
    pub registry_user: Option<String>,
    pub container: Option<String>,
    pub tag: Option<String>,
    pub host: Option<String>,
    pub job_name: Option<String>,
    pub run_number: Option<u64>,
    pub console_url: Option<String>,
    pub workspace: Option<String>,
}

/// Release parameters after validation, plus the rendered image reference.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReleaseParams {
    pub project: String,
    pub registry_user: String,
    pub container: String,
    pub tag: String,
    pub image: String,
    pub port_mapping: String,
}

impl ReleaseParams {
    pub fn variables(&self, scan_report: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert(TemplateVars::PROJECT.to_string(), self.project.clone());
        vars.insert(TemplateVars::REGISTRY_USER.to_string(), self.registry_user.clone());
        vars.insert(TemplateVars::CONTAINER.to_string(), self.container.clone());
        vars.insert(TemplateVars::TAG.to_string(), self.tag.clone());
        vars.insert(TemplateVars::IMAGE.to_string(), self.image.clone());
        vars.insert(TemplateVars::REPORT.to_string(), scan_report.to_string());
        vars
    }
}

/// A config plus the file it came from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PipelineConfig,
    pub source: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn from_json_str(content: &str, origin: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(types) = &overrides.cleanup_types {
            self.cleanup.types = types.clone();
        }
        if let Some(project) = &overrides.project {
            self.release.project = project.clone();
        }
        if let Some(user) = &overrides.registry_user {
            self.release.registry_user = user.clone();
        }
        if let Some(container) = &overrides.container {
            self.release.container = container.clone();
        }
        if let Some(tag) = &overrides.tag {
            self.release.tag = tag.clone();
        }
        if let Some(host) = &overrides.host {
            self.remote.host = host.clone();
        }
        if let Some(name) = &overrides.job_name {
            self.job.name = name.clone();
        }
        if let Some(number) = overrides.run_number {
            self.job.run_number = number;
        }
        if let Some(url) = &overrides.console_url {
            self.job.console_url = Some(url.clone());
        }
        if let Some(workspace) = &overrides.workspace {
            self.job.workspace = workspace.clone();
        }
    }

    /// Validate the untrusted release parameters and render the image reference.
    pub fn release_params(&self) -> Result<ReleaseParams> {
        let project = validation::image_reference(&self.release.project, "project")?;
        let registry_user = validation::registry_user(&self.release.registry_user, "registry_user")?;
        let container = validation::container_name(&self.release.container, "container")?;
        let tag = validation::container_name(&self.release.tag, "tag")?;

        let image = template::render(
            &self.release.image,
            &[
                (TemplateVars::REGISTRY_USER, &registry_user.to_lowercase()),
                (TemplateVars::PROJECT, &project),
                (TemplateVars::TAG, &tag),
            ],
        );
        let image = validation::image_reference(&image, "image")?;

        let port_mapping = self.release.port_mapping.trim();
        if port_mapping.is_empty()
            || !port_mapping
                .chars()
                .all(|c| c.is_ascii_digit() || c == ':' || c == '.')
        {
            return Err(Error::config_invalid_value(
                "release.port_mapping",
                Some(self.release.port_mapping.clone()),
                "expected host:container, e.g. 8080:8080",
            ));
        }

        Ok(ReleaseParams {
            project,
            registry_user,
            container,
            tag,
            image,
            port_mapping: port_mapping.to_string(),
        })
    }

    /// The remote host must be configured before any remote stage can run.
    pub fn require_remote(&self) -> Result<&RemoteConfig> {
        if self.remote.host.trim().is_empty() {
            return Err(Error::config_missing_key("remote.host", None)
                .with_hint("Set remote.host in dockhand.json or pass --host"));
        }
        if self.remote.principal.trim().is_empty() {
            return Err(Error::config_missing_key("remote.principal", None));
        }
        Ok(&self.remote)
    }

    pub fn workspace(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.job.workspace).to_string())
    }
}

/// Load config from the resolved file, falling back to built-in defaults when
/// no file exists.
pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<LoadedConfig> {
    let source = paths::resolve_config(explicit, cwd)?;

    let config = match &source {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
            })?;
            PipelineConfig::from_json_str(&content, &path.display().to_string())?
        }
        None => PipelineConfig::default(),
    };

    Ok(LoadedConfig { config, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.apply(&Overrides {
            project: Some("shop".to_string()),
            registry_user: Some("acme".to_string()),
            container: Some("shop-web".to_string()),
            ..Overrides::default()
        });
        config
    }

    #[test]
    fn empty_json_yields_defaults() {
        let config = PipelineConfig::from_json_str("{}", "inline").unwrap();
        assert_eq!(config.cleanup.types, "container,image,volume,all");
        assert_eq!(config.remote.port, 22);
        assert_eq!(config.tools.scan_report, "trivy-image-report.html");
        assert_eq!(config.notify.transport, TransportConfig::default());
    }

    #[test]
    fn tagged_enums_parse() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "remote": { "host": "10.0.0.5", "principal": "deploy",
                            "key": { "source": "file", "path": "~/.ssh/deploy" } },
                "notify": { "transport": { "type": "http_relay", "url": "http://relay/send" } }
            }"#,
            "inline",
        )
        .unwrap();

        assert_eq!(
            config.remote.key,
            SecretRef::File {
                path: "~/.ssh/deploy".to_string()
            }
        );
        assert!(matches!(
            config.notify.transport,
            TransportConfig::HttpRelay { timeout_secs: 15, .. }
        ));
    }

    #[test]
    fn invalid_json_reports_origin() {
        let err = PipelineConfig::from_json_str("{", "dockhand.json").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_json");
        assert_eq!(err.details["path"], "dockhand.json");
    }

    #[test]
    fn overrides_win() {
        let mut config = configured();
        config.apply(&Overrides {
            cleanup_types: Some("volume".to_string()),
            run_number: Some(42),
            ..Overrides::default()
        });
        assert_eq!(config.cleanup.types, "volume");
        assert_eq!(config.job.run_number, 42);
        assert_eq!(config.release.project, "shop");
    }

    #[test]
    fn release_params_render_image() {
        let params = configured().release_params().unwrap();
        assert_eq!(params.image, "acme/shop:latest");

        let vars = params.variables("report.html");
        assert_eq!(vars["image"], "acme/shop:latest");
        assert_eq!(vars["report"], "report.html");
    }

    #[test]
    fn release_params_reject_injection() {
        let mut config = configured();
        config.release.container = "web; rm -rf /".to_string();
        assert!(config.release_params().is_err());

        let mut config = configured();
        config.release.project = "$(curl evil)".to_string();
        assert!(config.release_params().is_err());
    }

    #[test]
    fn remote_requires_host() {
        let config = configured();
        let err = config.require_remote().unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(None, dir.path()).unwrap();
        // a global config may exist on the machine running the tests
        if loaded.source.is_none() {
            assert_eq!(loaded.config.job.name, "dockhand");
        }
    }
}
