//! CLI tests for warnings that must reach stderr even when it is not a terminal

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("dockhand.json");
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

#[test]
fn skipped_cleanup_token_is_reported_on_piped_stderr() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"{ "remote": { "host": "docker-host", "principal": "deploy" } }"#,
    );

    Command::cargo_bin("dockhand")
        .unwrap()
        .current_dir(dir.path())
        .args(["clean", "--config", &config, "--types", "bogus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"skipped\""))
        .stderr(predicate::str::contains("invalid cleanup type: 'bogus'. Skipping."));
}

#[test]
fn failed_notification_is_reported_on_piped_stderr() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        r#"{
            "notify": {
                "to": ["release@example.com"],
                "transport": { "type": "sendmail", "program": "dockhand-no-such-sendmail" }
            }
        }"#,
    );

    Command::cargo_bin("dockhand")
        .unwrap()
        .current_dir(dir.path())
        .args(["notify", "send", "--config", &config, "--status", "SUCCESS"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[notify] Notification failed (sendmail)"));
}
