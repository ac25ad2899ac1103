use halldrive_config::load_toml;
use rstest::rstest;

const MINIMAL: &str = r#"
[pins.right]
pulse = 34
in1 = 32
in2 = 33

[pins.left]
pulse = 35
in1 = 25
in2 = 26
"#;

#[test]
fn minimal_config_parses_with_defaults() {
    let cfg = load_toml(MINIMAL).expect("parse TOML");
    cfg.validate().expect("defaults must be valid");
    assert_eq!(cfg.encoder.ppr, 8);
    assert_eq!(cfg.motor.freq_hz, 20_000);
    assert_eq!(cfg.calibrator.max_laps, 12);
    assert!(cfg.wheel.auto_align_on_boot);
}

#[test]
fn full_config_round_trips() {
    let toml = format!(
        "{MINIMAL}
[encoder]
ppr = 12
count_rising = true
invert = false
glitch_cycles = 100
min_gap_us = 500
alpha_period = 0.4
timeout_stop_ms = 1500

[motor]
freq_hz = 25000
resolution_bits = 10
deadband = 0.03
min_output = 0.10
slew_rate_per_sec = 2.0
neutral_mode = \"brake\"
drive_mode = \"locked_anti_phase\"
invert = true

[pid]
kp = 0.5
ki = 1.0
kd = 0.01
ts = 0.01
mode = \"parallel_pidf\"

[wheel]
assist_u = 0.45
dir_eps_u = 0.04
dir_hold_ms = 250
auto_align_on_boot = false
align_laps_boot = 2

[drive]
wheel_radius = 0.04
track_width = 0.18
omega_wheel_max = 90.0

[calibrator]
max_laps = 8
use_lut_by_default = false
"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.encoder.ppr, 12);
    assert_eq!(cfg.motor.resolution_bits, 10);
    assert_eq!(cfg.motor.neutral_mode, halldrive_config::NeutralMode::Brake);
    assert_eq!(cfg.pid.mode, halldrive_config::PidMode::ParallelPidf);
    assert!(!cfg.calibrator.use_lut_by_default);
}

#[test]
fn rejects_zero_ppr() {
    let toml = format!("{MINIMAL}\n[encoder]\nppr = 0\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject ppr=0");
    assert!(format!("{err}").contains("ppr"));
}

#[rstest]
#[case("[pid]\nts = 0.0\n", "pid.ts")]
#[case("[motor]\nresolution_bits = 0\n", "resolution_bits")]
#[case("[motor]\ndeadband = 0.6\n", "deadband")]
#[case("[calibrator]\nmax_laps = 20\n", "max_laps")]
#[case("[wheel]\nassist_u = 1.5\n", "assist_u")]
#[case("[drive]\nwheel_radius = 0.0\n", "wheel_radius")]
#[case("[logging]\nrotation = \"weekly\"\n", "rotation")]
fn rejects_out_of_range_values(#[case] section: &str, #[case] needle: &str) {
    let toml = format!("{MINIMAL}\n{section}");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "error {err} does not mention {needle}"
    );
}

#[test]
fn boot_align_laps_must_fit_max_laps() {
    let toml = format!("{MINIMAL}\n[calibrator]\nmax_laps = 2\n[wheel]\nalign_laps_boot = 5\n");
    let cfg = load_toml(&toml).expect("parse TOML");
    assert!(cfg.validate().is_err());
}

#[test]
fn missing_pins_fail_to_parse() {
    assert!(load_toml("[encoder]\nppr = 8\n").is_err());
}
