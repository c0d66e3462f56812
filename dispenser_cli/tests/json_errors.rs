use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn last_json_line(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().last().expect("stdout has output");
    serde_json::from_str(line).expect("error output is JSON")
}

#[rstest]
#[case(&["dispense", "--dispenser", "9"], "InvalidParameter", 2)]
#[case(&["self-check"], "BusError", 5)]
fn errors_are_structured_in_json_mode(
    #[case] args: &[&str],
    #[case] reason: &str,
    #[case] code: i32,
) {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "").unwrap();

    let mut cmd = Command::cargo_bin("dispenser").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("DISPENSER_SIM_RELAY_SILENT")
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(args);
    if reason == "BusError" {
        cmd.env("DISPENSER_SIM_BUS_ABSENT", "1");
    } else {
        cmd.env_remove("DISPENSER_SIM_BUS_ABSENT");
    }

    let out = cmd.output().unwrap();
    assert_eq!(out.status.code(), Some(code));

    let v = last_json_line(&out.stdout);
    assert_eq!(v["reason"], reason);
    assert_eq!(v["exit_code"], code);
    assert!(v["message"].as_str().unwrap().starts_with("What happened:"));
}

#[test]
fn silent_relay_recovery_reports_channel_unavailable() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[channel]\nkind = \"relay\"\n").unwrap();

    let out = Command::cargo_bin("dispenser")
        .unwrap()
        .env_remove("RUST_LOG")
        .env("DISPENSER_SIM_RELAY_SILENT", "1")
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["recover-bus"])
        .output()
        .unwrap();

    assert_eq!(out.status.code(), Some(4));
    let v = last_json_line(&out.stdout);
    assert_eq!(v["reason"], "ChannelUnavailable");
}

#[test]
fn schedules_listing_is_json() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(
        &cfg,
        r#"
[[schedules]]
id = "evening"
dispenser = 2
hour = 20
minute = 15
medication = "Statin"
patient = "Carol"
size = "large"
"#,
    )
    .unwrap();

    let out = Command::cargo_bin("dispenser")
        .unwrap()
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .args(["schedules", "--at", "wed 20:15"])
        .output()
        .unwrap();
    assert!(out.status.success());

    let v = last_json_line(&out.stdout);
    assert_eq!(v["active"], 1);
    assert_eq!(v["schedules"][0]["id"], "evening");
    assert_eq!(v["schedules"][0]["time"], "20:15");
    assert_eq!(v["schedules"][0]["size"], "large");
    assert_eq!(v["due"], true);
    assert_eq!(v["next"], serde_json::Value::Null);
}
