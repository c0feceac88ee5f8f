use assert_cmd::Command;
use predicates::prelude::*;

fn courier(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("courier").unwrap();
    cmd.current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env("HOME", dir.path())
        .env_remove("BOT_TOKEN")
        .env_remove("TG_MAX_BYTES")
        .env_remove("COURIER_DOWNLOADS");
    cmd
}

#[test]
fn platforms_lists_known_sites() {
    let dir = tempfile::tempdir().unwrap();
    courier(&dir)
        .arg("platforms")
        .assert()
        .success()
        .stdout(predicate::str::contains("YouTube (youtube.com, youtu.be)"))
        .stdout(predicate::str::contains("Facebook"));
}

#[test]
fn run_without_token_fails_before_polling() {
    let dir = tempfile::tempdir().unwrap();
    courier(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("bot token is not set"));
}

#[test]
fn config_reads_environment() {
    let dir = tempfile::tempdir().unwrap();
    courier(&dir)
        .env("TG_MAX_BYTES", "12345")
        .args(["config", "--yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_upload_bytes: 12345"));
}
