//! Run status notification.
//!
//! The message is a pure function of job name, run number, status string and
//! console URL (plus static mail settings). Sending is best-effort: a failed
//! send is logged and reported, never fed back into the run status.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::config::{NotifyConfig, TransportConfig};
use crate::error::{Error, Result};
use crate::pipeline::PipelineRun;
use crate::utils::command::{CommandRunner, CommandSpec};

/// Case-insensitive comparison against the literal "SUCCESS".
pub fn is_success_status(status: &str) -> bool {
    status.eq_ignore_ascii_case("SUCCESS")
}

/// Success color for "SUCCESS" in any case, attention color for anything else.
pub fn status_color<'a>(status: &str, config: &'a NotifyConfig) -> &'a str {
    if is_success_status(status) {
        &config.success_color
    } else {
        &config.attention_color
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub subject: String,
    pub html_body: String,
    pub to: Vec<String>,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_pattern: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<PathBuf>,
}

/// Inputs that identify a run in the message.
#[derive(Debug, Clone)]
pub struct MessageFacts<'a> {
    pub job_name: &'a str,
    pub run_number: u64,
    pub status: &'a str,
    pub console_url: Option<&'a str>,
    pub failed_stage: Option<&'a str>,
}

pub struct NotificationComposer<'a> {
    config: &'a NotifyConfig,
    workspace: &'a Path,
}

impl<'a> NotificationComposer<'a> {
    pub fn new(config: &'a NotifyConfig, workspace: &'a Path) -> Self {
        Self { config, workspace }
    }

    pub fn compose(&self, run: &PipelineRun, console_url: Option<&str>) -> NotificationMessage {
        let mut message = self.compose_facts(&MessageFacts {
            job_name: &run.job_name,
            run_number: run.run_number,
            status: run.status.as_str(),
            console_url,
            failed_stage: run.failed_stage(),
        });
        message.attachments = self.resolve_attachments();
        message
    }

    /// Deterministic part of the message; no filesystem access.
    pub fn compose_facts(&self, facts: &MessageFacts<'_>) -> NotificationMessage {
        let status = facts.status.trim().to_uppercase();
        let status = if status.is_empty() {
            "UNKNOWN".to_string()
        } else {
            status
        };

        NotificationMessage {
            subject: header_safe(&format!(
                "{} - Build #{} - {}",
                facts.job_name, facts.run_number, status
            )),
            html_body: self.render_body(facts, &status),
            to: self.config.to.clone(),
            from: self.config.from.clone(),
            reply_to: self.config.reply_to.clone(),
            mime_type: self.config.mime_type.clone(),
            attachment_pattern: self.config.attachment_pattern.clone(),
            attachments: Vec::new(),
        }
    }

    fn render_body(&self, facts: &MessageFacts<'_>, status: &str) -> String {
        let color = status_color(status, self.config);
        let mut body = String::new();

        let _ = writeln!(body, "<html>");
        let _ = writeln!(body, "<body style=\"font-family: Arial, sans-serif;\">");
        let _ = writeln!(
            body,
            "<div style=\"background-color: {}; color: #ffffff; padding: 12px; font-size: 18px; font-weight: bold;\">Build {}</div>",
            escape_html(color),
            escape_html(status)
        );
        let _ = writeln!(body, "<p><strong>Job:</strong> {}</p>", escape_html(facts.job_name));
        let _ = writeln!(body, "<p><strong>Build number:</strong> {}</p>", facts.run_number);
        let _ = writeln!(body, "<p><strong>Status:</strong> {}</p>", escape_html(status));
        if let Some(stage) = facts.failed_stage {
            let _ = writeln!(body, "<p><strong>Failed stage:</strong> {}</p>", escape_html(stage));
        }
        if let Some(url) = facts.console_url {
            let url = escape_html(url);
            let _ = writeln!(body, "<p>Run details: <a href=\"{}\">{}</a></p>", url, url);
        }
        if let Some(pattern) = &self.config.attachment_pattern {
            let _ = writeln!(body, "<p>Attached: {}</p>", escape_html(pattern));
        }
        let _ = writeln!(body, "</body>");
        let _ = write!(body, "</html>");
        body
    }

    fn resolve_attachments(&self) -> Vec<PathBuf> {
        let Some(pattern) = &self.config.attachment_pattern else {
            return Vec::new();
        };
        let full = self.workspace.join(pattern);
        match glob::glob(&full.to_string_lossy()) {
            Ok(paths) => paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect(),
            Err(e) => {
                log_status!("notify", "Ignoring attachment pattern '{}': {}", pattern, e);
                Vec::new()
            }
        }
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

// ============================================================================
// Transports
// ============================================================================

pub trait Mailer: Send + Sync {
    fn transport(&self) -> &'static str;
    fn send(&self, message: &NotificationMessage) -> Result<()>;
}

/// Pipes an RFC 5322 message into `sendmail -t`.
pub struct SendmailMailer {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl SendmailMailer {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }
}

impl Mailer for SendmailMailer {
    fn transport(&self) -> &'static str {
        "sendmail"
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        let boundary = format!("dockhand-{}", uuid::Uuid::new_v4().simple());
        let raw = render_mime(message, &boundary)?;
        let spec = CommandSpec::new(&self.program).args(["-t", "-oi"]).stdin(raw);

        let output = self.runner.run(&spec);
        if output.success {
            Ok(())
        } else {
            Err(Error::notify_send_failed(self.transport(), output.error_text()))
        }
    }
}

/// Builds the full MIME document sendmail expects on stdin.
pub fn render_mime(message: &NotificationMessage, boundary: &str) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "From: {}", header_safe(&message.from));
    let _ = writeln!(out, "To: {}", header_safe(&message.to.join(", ")));
    if let Some(reply_to) = &message.reply_to {
        let _ = writeln!(out, "Reply-To: {}", header_safe(reply_to));
    }
    let _ = writeln!(out, "Subject: {}", message.subject);
    let _ = writeln!(out, "MIME-Version: 1.0");

    if message.attachments.is_empty() {
        let _ = writeln!(out, "Content-Type: {}; charset=utf-8", message.mime_type);
        let _ = writeln!(out);
        out.push_str(&message.html_body);
        out.push('\n');
        return Ok(out);
    }

    let _ = writeln!(out, "Content-Type: multipart/mixed; boundary=\"{}\"", boundary);
    let _ = writeln!(out);
    let _ = writeln!(out, "--{}", boundary);
    let _ = writeln!(out, "Content-Type: {}; charset=utf-8", message.mime_type);
    let _ = writeln!(out);
    out.push_str(&message.html_body);
    out.push('\n');

    for path in &message.attachments {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read attachment {}", path.display())))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());

        let _ = writeln!(out, "--{}", boundary);
        let _ = writeln!(out, "Content-Type: application/octet-stream; name=\"{}\"", name);
        let _ = writeln!(out, "Content-Transfer-Encoding: base64");
        let _ = writeln!(out, "Content-Disposition: attachment; filename=\"{}\"", name);
        let _ = writeln!(out);
        let encoded = BASE64.encode(&bytes);
        for chunk in encoded.as_bytes().chunks(76) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
    }
    let _ = writeln!(out, "--{}--", boundary);
    Ok(out)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayAttachment {
    filename: String,
    content_base64: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayPayload<'a> {
    #[serde(flatten)]
    message: &'a NotificationMessage,
    files: Vec<RelayAttachment>,
}

/// POSTs the message as JSON to an HTTP mail relay.
pub struct HttpRelayMailer {
    url: String,
    timeout: Duration,
}

impl HttpRelayMailer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl Mailer for HttpRelayMailer {
    fn transport(&self) -> &'static str {
        "http_relay"
    }

    fn send(&self, message: &NotificationMessage) -> Result<()> {
        let mut files = Vec::new();
        for path in &message.attachments {
            let bytes = std::fs::read(path).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read attachment {}", path.display())))
            })?;
            files.push(RelayAttachment {
                filename: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                content_base64: BASE64.encode(&bytes),
            });
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::notify_send_failed(self.transport(), e.to_string()))?;

        client
            .post(&self.url)
            .json(&RelayPayload { message, files })
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::notify_send_failed(self.transport(), e.to_string()))?;

        Ok(())
    }
}

/// Transport used when notifications are switched off.
pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn transport(&self) -> &'static str {
        "disabled"
    }

    fn send(&self, _message: &NotificationMessage) -> Result<()> {
        Ok(())
    }
}

pub fn mailer_from_config(config: &NotifyConfig, runner: Arc<dyn CommandRunner>) -> Box<dyn Mailer> {
    match &config.transport {
        TransportConfig::Sendmail { program } => Box::new(SendmailMailer::new(program.clone(), runner)),
        TransportConfig::HttpRelay { url, timeout_secs } => {
            Box::new(HttpRelayMailer::new(url.clone(), Duration::from_secs(*timeout_secs)))
        }
        TransportConfig::Disabled => Box::new(DisabledMailer),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOutcome {
    pub sent: bool,
    pub transport: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
}

/// Send without letting any failure escape.
pub fn send(mailer: &dyn Mailer, message: &NotificationMessage) -> NotificationOutcome {
    let mut outcome = NotificationOutcome {
        sent: false,
        transport: mailer.transport().to_string(),
        subject: message.subject.clone(),
        note: None,
        error: None,
    };

    if mailer.transport() == "disabled" {
        outcome.note = Some("notifications disabled".to_string());
        return outcome;
    }
    if message.to.is_empty() {
        log_status!("notify", "No recipients configured; not sending '{}'", message.subject);
        outcome.note = Some("no recipients configured".to_string());
        return outcome;
    }

    match mailer.send(message) {
        Ok(()) => {
            log_status!("notify", "Sent '{}' via {}", message.subject, outcome.transport);
            outcome.sent = true;
        }
        Err(err) => {
            eprintln!("[notify] Notification failed ({}): {}", outcome.transport, err);
            outcome.error = Some(err);
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StageContext, StageList, StageReport, StageRunner};
    use crate::utils::command::fake::ScriptedRunner;
    use crate::utils::command::CommandOutput;

    fn config() -> NotifyConfig {
        NotifyConfig {
            to: vec!["team@example.com".to_string()],
            reply_to: Some("noreply@example.com".to_string()),
            ..NotifyConfig::default()
        }
    }

    fn facts(status: &str) -> MessageFacts<'_> {
        MessageFacts {
            job_name: "shop-release",
            run_number: 42,
            status,
            console_url: Some("https://ci.example.com/job/shop-release/42/console"),
            failed_stage: None,
        }
    }

    #[test]
    fn success_in_any_case_selects_success_color() {
        let config = config();
        for status in ["SUCCESS", "success", "Success", "sUcCeSs"] {
            assert_eq!(status_color(status, &config), config.success_color);
        }
    }

    #[test]
    fn everything_else_selects_attention_color() {
        let config = config();
        for status in ["FAILURE", "UNKNOWN", "", "ABORTED", "SUCCESS ", "successful"] {
            assert_eq!(status_color(status, &config), config.attention_color);
        }
        assert_ne!(config.success_color, config.attention_color);
    }

    #[test]
    fn compose_is_deterministic() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let composer = NotificationComposer::new(&config, dir.path());

        let a = composer.compose_facts(&facts("failure"));
        let b = composer.compose_facts(&facts("failure"));

        assert_eq!(a, b);
        assert_eq!(a.subject, "shop-release - Build #42 - FAILURE");
        assert!(a.html_body.contains(&config.attention_color));
        assert!(a.html_body.contains("https://ci.example.com/job/shop-release/42/console"));
        assert_eq!(a.mime_type, "text/html");
        assert_eq!(a.attachment_pattern.as_deref(), Some("trivy-image-report.html"));
        assert_eq!(a.reply_to.as_deref(), Some("noreply@example.com"));
    }

    #[test]
    fn empty_status_reads_unknown() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts(""));
        assert!(message.subject.ends_with("UNKNOWN"));
        assert!(message.html_body.contains(&config.attention_color));
    }

    #[test]
    fn padded_status_gets_the_color_of_its_label() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts(" success "));

        assert!(message.subject.ends_with("- SUCCESS"));
        assert!(message.html_body.contains(&config.success_color));
        assert!(!message.html_body.contains(&config.attention_color));
    }

    #[test]
    fn body_escapes_untrusted_text() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let mut f = facts("SUCCESS");
        f.job_name = "<script>x</script>\r\nBcc: evil@example.com";

        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&f);

        assert!(!message.html_body.contains("<script>"));
        assert!(!message.subject.contains('\n'));
    }

    #[test]
    fn compose_from_failed_run_names_stage_and_attaches_report() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trivy-image-report.html"), "<html/>").unwrap();

        let stages = StageList::new().stage("Build Application", |_: &StageContext<'_>| -> Result<StageReport> {
            Err(Error::internal_unexpected("compile error"))
        });
        let run = StageRunner::new().run(PipelineRun::new("shop-release", 9, stages));

        let message = NotificationComposer::new(&config, dir.path()).compose(&run, None);

        assert!(message.subject.ends_with("FAILURE"));
        assert!(message.html_body.contains("Failed stage:</strong> Build Application"));
        assert_eq!(message.attachments, vec![dir.path().join("trivy-image-report.html")]);
    }

    #[test]
    fn sendmail_receives_mime_on_stdin() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts("SUCCESS"));
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = send(&SendmailMailer::new("sendmail", runner.clone()), &message);

        assert!(outcome.sent);
        let call = &runner.calls()[0];
        assert_eq!(call.argv(), vec!["sendmail", "-t", "-oi"]);
        let stdin = String::from_utf8(call.stdin.clone().unwrap()).unwrap();
        assert!(stdin.contains("To: team@example.com"));
        assert!(stdin.contains("Reply-To: noreply@example.com"));
        assert!(stdin.contains("Content-Type: text/html; charset=utf-8"));
    }

    #[test]
    fn mime_with_attachment_is_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("trivy-image-report.html");
        std::fs::write(&report, "<html>report</html>").unwrap();
        let config = config();
        let mut message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts("SUCCESS"));
        message.attachments = vec![report];

        let raw = render_mime(&message, "b0undary").unwrap();

        assert!(raw.contains("multipart/mixed; boundary=\"b0undary\""));
        assert!(raw.contains("filename=\"trivy-image-report.html\""));
        assert!(raw.contains(&BASE64.encode("<html>report</html>")));
        assert!(raw.trim_end().ends_with("--b0undary--"));
    }

    #[test]
    fn send_failure_is_reported_not_raised() {
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts("FAILURE"));
        let runner = Arc::new(ScriptedRunner::replying(vec![CommandOutput::failed(
            75,
            "sendmail: cannot connect to relay",
        )]));

        let outcome = send(&SendmailMailer::new("sendmail", runner), &message);

        assert!(!outcome.sent);
        assert_eq!(outcome.error.unwrap().code.as_str(), "notify.send_failed");
    }

    #[test]
    fn no_recipients_skips_transport() {
        let config = NotifyConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts("SUCCESS"));
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = send(&SendmailMailer::new("sendmail", runner.clone()), &message);

        assert!(!outcome.sent);
        assert!(runner.calls().is_empty());
        assert_eq!(outcome.note.as_deref(), Some("no recipients configured"));
    }

    #[test]
    fn unreachable_relay_is_send_failure() {
        let mailer = HttpRelayMailer::new("http://127.0.0.1:9/send", Duration::from_millis(200));
        let config = config();
        let dir = tempfile::tempdir().unwrap();
        let message = NotificationComposer::new(&config, dir.path()).compose_facts(&facts("SUCCESS"));

        let err = mailer.send(&message).unwrap_err();
        assert_eq!(err.code.as_str(), "notify.send_failed");
    }
}
