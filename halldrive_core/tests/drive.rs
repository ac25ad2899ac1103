use halldrive_core::mocks::{ManualClock, NoopPwm};
use halldrive_core::{
    CalibratorCfg, DifferentialDrive, DriveCfg, EncoderCfg, MotorCfg, PidCfg, StartError, Wheel,
    WheelCfg,
};
use halldrive_hardware::MemStore;

fn test_wheel(clock: &ManualClock, store: MemStore) -> Wheel {
    Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(store)
        .with_clock(Box::new(clock.clone()))
        .with_encoder(EncoderCfg {
            ppr: 4,
            ..EncoderCfg::default()
        })
        .with_motor(MotorCfg {
            deadband: 0.0,
            min_output: 0.0,
            ..MotorCfg::default()
        })
        .with_pid(PidCfg {
            kp: 0.5,
            ki: 1.0,
            ts: 0.01,
            ..PidCfg::default()
        })
        .with_calibrator(CalibratorCfg::default())
        .with_wheel(WheelCfg {
            auto_align_on_boot: false,
            ..WheelCfg::default()
        })
        .build()
        .expect("build wheel")
}

fn test_drive(cfg: DriveCfg) -> (DifferentialDrive, ManualClock) {
    let clock = ManualClock::new();
    let right = test_wheel(&clock, MemStore::new());
    let left = test_wheel(&clock, MemStore::new());
    (DifferentialDrive::new(cfg, right, left), clock)
}

/// Store contents with a structured forward LUT, as left by a previous
/// calibration.
fn seeded_store() -> MemStore {
    let mut store = MemStore::new();
    let mut bytes = Vec::new();
    for v in [1.25f32, 0.625, 1.25, 1.25] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    store.seed("lut_fwd", bytes);
    store.seed("use_fwd", vec![1]);
    store
}

#[test]
fn kinematics_map_twist_to_wheel_omegas() {
    let (mut drive, _clock) = test_drive(DriveCfg {
        wheel_radius: 0.05,
        track_width: 0.2,
        v_acc_max: 0.0, // no ramps: commands land immediately
        w_acc_max: 0.0,
        omega_wheel_max: 0.0,
        auto_coordinated_align_on_boot: false,
        ..DriveCfg::default()
    });
    drive.begin().expect("begin");

    drive.set_twist(0.5, 2.0);
    drive.update(0.01).expect("update");
    // wR = (v + (L/2)w)/r = (0.5 + 0.1*2)/0.05 = 14; wL = (0.5-0.2)/0.05 = 6
    assert!((drive.omega_r() - 14.0).abs() < 1e-4);
    assert!((drive.omega_l() - 6.0).abs() < 1e-4);
}

#[test]
fn rescale_preserves_twist_ratio_and_caps_wheel_speed() {
    // v=1.0, w=1.0, r=0.05, L=0.2 -> raw (22, 18); k = 20/22.
    let (mut drive, _clock) = test_drive(DriveCfg {
        wheel_radius: 0.05,
        track_width: 0.2,
        v_max: 2.0,
        w_max: 6.0,
        v_acc_max: 0.0,
        w_acc_max: 0.0,
        omega_wheel_max: 20.0,
        rescale_twist_to_wheel_limit: true,
        auto_coordinated_align_on_boot: false,
        ..DriveCfg::default()
    });
    drive.begin().expect("begin");

    drive.set_twist(1.0, 1.0);
    drive.update(0.01).expect("update");

    assert!((drive.omega_r() - 20.0).abs() < 1e-3, "wR = {}", drive.omega_r());
    assert!(drive.omega_r().abs().max(drive.omega_l().abs()) <= 20.0 + 1e-3);
    // Shape preserved: v/w ratio still exactly 1.
    let ratio = drive.v_cmd() / drive.w_cmd();
    assert!((ratio - 1.0).abs() < 1e-5, "ratio {ratio}");
    // k = 20/22 applied to both channels.
    assert!((drive.v_cmd() - 20.0 / 22.0).abs() < 1e-4);
}

#[test]
fn ramps_limit_twist_slew() {
    let (mut drive, _clock) = test_drive(DriveCfg {
        v_acc_max: 1.0,
        w_acc_max: 2.0,
        omega_wheel_max: 0.0,
        auto_coordinated_align_on_boot: false,
        ..DriveCfg::default()
    });
    drive.begin().expect("begin");

    drive.set_twist(0.5, 2.0);
    drive.update(0.1).expect("update");
    // One tick of 100 ms: dv <= 0.1, dw <= 0.2.
    assert!((drive.v_cmd() - 0.1).abs() < 1e-5);
    assert!((drive.w_cmd() - 0.2).abs() < 1e-5);
    drive.update(0.1).expect("update");
    assert!((drive.v_cmd() - 0.2).abs() < 1e-5);
}

#[test]
fn twist_clamps_to_limits() {
    let (mut drive, _clock) = test_drive(DriveCfg {
        v_max: 0.8,
        w_max: 6.0,
        auto_coordinated_align_on_boot: false,
        ..DriveCfg::default()
    });
    drive.begin().expect("begin");
    drive.set_twist(5.0, -50.0);
    assert!((drive.v_ref() - 0.8).abs() < 1e-6);
    assert!((drive.w_ref() + 6.0).abs() < 1e-6);
}

#[test]
fn coordinated_alignment_needs_a_pattern() {
    let (mut drive, _clock) = test_drive(DriveCfg {
        auto_coordinated_align_on_boot: false,
        ..DriveCfg::default()
    });
    drive.begin().expect("begin");
    assert_eq!(
        drive.start_coordinated_alignment(2, 2.0),
        Err(StartError::PatternNotReady)
    );
    assert!(!drive.is_coordinated_routine_running());
}

#[test]
fn coordinated_alignment_spins_right_side_forward_then_left() {
    let clock = ManualClock::new();
    let right = test_wheel(&clock, seeded_store());
    let left = test_wheel(&clock, seeded_store());
    let mut drive = DifferentialDrive::new(
        DriveCfg {
            wheel_radius: 0.05,
            track_width: 0.2,
            v_acc_max: 0.0,
            w_acc_max: 0.0,
            omega_wheel_max: 0.0,
            auto_coordinated_align_on_boot: false,
            align_assist_w: 2.0,
            ..DriveCfg::default()
        },
        right,
        left,
    );
    drive.begin().expect("begin");

    drive.start_coordinated_alignment(1, 2.0).expect("start");
    assert!(drive.is_coordinated_routine_running());
    assert!(drive.wheel_r().is_aligning());

    // External twists are ignored while coordinating.
    drive.set_twist(0.5, 0.0);
    assert_eq!(drive.v_ref(), 0.0);

    drive.update(0.01).expect("update");
    // Spin in place: +w puts the right wheel forward, the left backward.
    assert!(drive.omega_r() > 0.0);
    assert!(drive.omega_l() < 0.0);

    // Complete the right side's lap: pattern (0.8, 1.6, 0.8, 0.8), fed
    // in phase so the learned offset is 0.
    let isr_r = drive.wheel_r().pulse_isr();
    let periods = [80_000u64, 160_000, 80_000, 80_000];
    let mut t = 0u64;
    isr_r.on_pulse(t);
    drive.update(0.01).expect("update");
    for _ in 0..8 {
        let k = drive.wheel_r().sector_idx() as usize;
        t += periods[k];
        isr_r.on_pulse(t);
        drive.update(0.01).expect("update");
        if !drive.wheel_r().is_aligning() {
            break;
        }
    }
    assert!(!drive.wheel_r().is_aligning(), "right alignment did not finish");

    // The coordinator moved on to the left side.
    assert!(drive.is_coordinated_routine_running());
    assert!(drive.wheel_l().is_aligning());
    drive.update(0.01).expect("update");
    assert!(drive.omega_l() > 0.0, "left side must now spin forward");

    // Finish the left side too; the coordinator returns to idle with all
    // references zeroed.
    let isr_l = drive.wheel_l().pulse_isr();
    let mut t = 0u64;
    isr_l.on_pulse(t);
    drive.update(0.01).expect("update");
    for _ in 0..8 {
        let k = drive.wheel_l().sector_idx() as usize;
        t += periods[k];
        isr_l.on_pulse(t);
        drive.update(0.01).expect("update");
        if !drive.wheel_l().is_aligning() {
            break;
        }
    }
    assert!(!drive.is_coordinated_routine_running());
    assert_eq!(drive.v_ref(), 0.0);
    assert_eq!(drive.w_ref(), 0.0);
}

#[test]
fn abort_returns_to_idle_and_zeroes_references() {
    let clock = ManualClock::new();
    let right = test_wheel(&clock, seeded_store());
    let left = test_wheel(&clock, MemStore::new());
    let mut drive = DifferentialDrive::new(
        DriveCfg {
            auto_coordinated_align_on_boot: false,
            ..DriveCfg::default()
        },
        right,
        left,
    );
    drive.begin().expect("begin");

    drive.start_coordinated_calibration(2, 2.0).expect("start");
    assert!(drive.is_coordinated_routine_running());
    drive.update(0.01).expect("update");

    drive.abort_coordinated_routine();
    assert!(!drive.is_coordinated_routine_running());
    assert_eq!(drive.v_ref(), 0.0);
    assert_eq!(drive.w_ref(), 0.0);
    // External twists are accepted again.
    drive.set_twist(0.1, 0.0);
    assert!((drive.v_ref() - 0.1).abs() < 1e-6);
}

#[test]
fn boot_coordinated_alignment_kicks_off_when_patterns_usable() {
    let clock = ManualClock::new();
    let right = test_wheel(&clock, seeded_store());
    let left = test_wheel(&clock, seeded_store());
    let mut drive = DifferentialDrive::new(
        DriveCfg {
            auto_coordinated_align_on_boot: true,
            align_laps_boot: 2,
            ..DriveCfg::default()
        },
        right,
        left,
    );
    drive.begin().expect("begin");
    assert!(drive.is_coordinated_routine_running());
    assert!(drive.wheel_r().is_aligning());
}
