use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const CONFIG: &str = r#"
[pins.right]
pulse = 34
in1 = 32
in2 = 33

[pins.left]
pulse = 35
in1 = 25
in2 = 26

[encoder]
ppr = 8
alpha_period = 0.35

[pid]
kp = 0.35
ki = 2.5
ts = 0.01

[motor]
deadband = 0.02
min_output = 0.08

[drive]
auto_coordinated_align_on_boot = false
"#;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("halldrive.toml");
    fs::write(&path, CONFIG).expect("write config");
    path
}

fn cmd(dir: &std::path::Path) -> Command {
    let cfg = write_config(dir);
    let mut c = Command::cargo_bin("halldrive").expect("binary");
    c.arg("--config")
        .arg(cfg)
        .arg("--state-dir")
        .arg(dir.join("state"))
        .arg("--log-level")
        .arg("warn");
    c
}

#[test]
fn self_check_passes_in_simulation() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(dir.path())
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains("self-check: ok"));
}

#[test]
fn drive_reports_wheel_speeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(dir.path())
        .args(["drive", "--v", "0.3", "--secs", "2.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("drove v=0.3"));
}

#[test]
fn calibrate_then_show_lut_has_structure() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(dir.path())
        .args(["calibrate", "--side", "right", "--laps", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("calibration done"));

    // The LUT persisted to the state dir; a fresh process reloads it.
    cmd(dir.path())
        .args(["show-lut", "--side", "right"])
        .assert()
        .success()
        .stdout(predicate::str::contains("right fwd: use=true"));
}

#[test]
fn align_without_calibration_is_a_clean_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    cmd(dir.path())
        .args(["align", "--side", "right", "--laps", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("calibrate"));
}

#[test]
fn invalid_config_is_rejected_before_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    fs::write(&path, format!("{CONFIG}\n[calibrator]\nmax_laps = 99\n")).expect("write");
    let mut c = Command::cargo_bin("halldrive").expect("binary");
    c.arg("--config")
        .arg(path)
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}
