use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

const SESSIONS: &str = r#"
shapes:
  session: 2
actors:
  - name: directory
    observe: ['session($, _)']
  - name: alice
steps:
  - assert: { actor: alice, value: 'session("a@x", "pw")' }
  - send: 'ping(1)'
  - stop: alice
"#;

#[test]
fn run_prints_observed_events() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("sessions.yml"), SESSIONS)?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["run", "sessions.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[0] directory asserted session(\"a@x\", \"pw\") -> \"a@x\"",
        ))
        .stdout(predicate::str::contains(
            "[2] directory retracted session(\"a@x\", \"pw\") -> \"a@x\"",
        ))
        .stdout(predicate::str::contains("1 live actors"));
    Ok(())
}

#[test]
fn run_json_reports_events_and_stats() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("sessions.yml"), SESSIONS)?;

    #[allow(deprecated)]
    let assert = Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["run", "sessions.yml", "--format", "json"])
        .assert()
        .success();

    let output = String::from_utf8(assert.get_output().stdout.clone())?;
    let report: Value = serde_json::from_str(&output)?;
    let events = report["events"].as_array().expect("events array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["kind"], "asserted");
    assert_eq!(events[0]["step"], 0);
    assert_eq!(events[1]["kind"], "retracted");
    assert_eq!(report["stats"]["live_actors"], 1);
    Ok(())
}

#[test]
fn config_file_selects_output_format() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("sessions.yml"), SESSIONS)?;
    fs::write(dir.path().join("agora.yml"), "output: json\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["run", "sessions.yml"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"));
    Ok(())
}

#[test]
fn max_rounds_flag_overrides_config() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("quiet.yml"),
        "actors:\n  - name: a\n    messages: ['tick']\nsteps:\n  - send: tick\n",
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["run", "quiet.yml", "--max-rounds", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[0] a message tick"));
    Ok(())
}

#[test]
fn zero_max_rounds_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("sessions.yml"), SESSIONS)?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["run", "sessions.yml", "--max-rounds", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_rounds must be positive"));
    Ok(())
}

#[test]
fn check_accepts_valid_script() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("sessions.yml"), SESSIONS)?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["check", "sessions.yml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 actors, 3 steps"));
    Ok(())
}

#[test]
fn check_rejects_arity_violation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("bad.yml"),
        "shapes:\n  session: 2\nactors:\n  - name: a\n    assert: ['session(1)']\n",
    )?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["check", "bad.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("checking bad.yml"));
    Ok(())
}

#[test]
fn broken_config_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    fs::write(dir.path().join("sessions.yml"), SESSIONS)?;
    fs::write(dir.path().join("agora.yml"), "network: [not, a, map]\n")?;

    #[allow(deprecated)]
    Command::cargo_bin("agora")?
        .current_dir(dir.path())
        .args(["check", "sessions.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("loading agora.yml"));
    Ok(())
}
