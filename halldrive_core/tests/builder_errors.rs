use halldrive_core::mocks::NoopPwm;
use halldrive_core::{
    BuildError, CalibratorCfg, EncoderCfg, MotorCfg, PidCfg, Wheel, WheelCfg,
};
use halldrive_hardware::MemStore;
use rstest::rstest;

fn assert_invalid(result: halldrive_core::error::Result<Wheel>, needle: &str) {
    let err = result.expect_err("build must fail");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => {
            assert!(msg.contains(needle), "got {msg:?}, want {needle:?}")
        }
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn missing_pieces_are_reported() {
    let err = Wheel::builder().try_build().expect_err("no pwm");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingPwm)
    ));

    let err = Wheel::builder()
        .with_pwm(NoopPwm)
        .try_build()
        .expect_err("no store");
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingStore)
    ));
}

#[test]
fn zero_ppr_is_rejected() {
    let result = Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .with_encoder(EncoderCfg {
            ppr: 0,
            ..EncoderCfg::default()
        })
        .build();
    assert_invalid(result, "ppr");
}

#[rstest]
#[case(-0.1)]
#[case(1.5)]
fn alpha_out_of_range_is_rejected(#[case] alpha: f32) {
    let result = Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .with_encoder(EncoderCfg {
            alpha_period: alpha,
            ..EncoderCfg::default()
        })
        .build();
    assert_invalid(result, "alpha_period");
}

#[test]
fn non_positive_ts_is_rejected() {
    let result = Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .with_pid(PidCfg {
            ts: 0.0,
            ..PidCfg::default()
        })
        .build();
    assert_invalid(result, "ts");
}

#[rstest]
#[case(0)]
#[case(17)]
fn resolution_bits_out_of_range_is_rejected(#[case] bits: u8) {
    let result = Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .with_motor(MotorCfg {
            resolution_bits: bits,
            ..MotorCfg::default()
        })
        .build();
    assert_invalid(result, "resolution_bits");
}

#[rstest]
#[case(0)]
#[case(13)]
fn max_laps_out_of_range_is_rejected(#[case] laps: u8) {
    let result = Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .with_calibrator(CalibratorCfg {
            max_laps: laps,
            ..CalibratorCfg::default()
        })
        .build();
    assert_invalid(result, "max_laps");
}

#[test]
fn boot_align_laps_must_fit_max_laps() {
    let result = Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .with_calibrator(CalibratorCfg {
            max_laps: 3,
            ..CalibratorCfg::default()
        })
        .with_wheel(WheelCfg {
            auto_align_on_boot: true,
            align_laps_boot: 5,
            ..WheelCfg::default()
        })
        .build();
    assert_invalid(result, "align_laps_boot");
}

#[test]
fn defaults_build_cleanly() {
    Wheel::builder()
        .with_pwm(NoopPwm)
        .with_store(MemStore::new())
        .build()
        .expect("default configuration must build");
}
