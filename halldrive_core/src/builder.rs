//! Type-state builder for `Wheel`.
//!
//! The PWM pair and the key-value store are mandatory; `build()` only
//! exists once both are provided. Everything else defaults and can be set
//! in any order. All numeric validation happens in `try_build`, which is
//! also available in any type-state for callers that prefer a runtime
//! error over the type-state guarantee.

use crate::calibrator::{CalibratorCfg, SectorCalibrator};
use crate::error::{BuildError, Result};
use crate::estimator::{EncoderCfg, VelocityEstimator};
use crate::motor::{MotorCfg, MotorPwm};
use crate::pid::{PidCfg, PidVel};
use crate::wheel::{Wheel, WheelCfg};
use halldrive_traits::clock::{Clock, MonotonicClock};
use halldrive_traits::{KvStore, PwmPair};
use std::marker::PhantomData;
use std::sync::Arc;

// Type-state markers
pub struct Missing;
pub struct Set;

pub struct WheelBuilder<P, S> {
    pwm: Option<Box<dyn PwmPair>>,
    store: Option<Box<dyn KvStore>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    encoder: Option<EncoderCfg>,
    motor: Option<MotorCfg>,
    pid: Option<PidCfg>,
    cal: Option<CalibratorCfg>,
    wheel: Option<WheelCfg>,
    _p: PhantomData<P>,
    _s: PhantomData<S>,
}

impl Default for WheelBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            pwm: None,
            store: None,
            clock: None,
            encoder: None,
            motor: None,
            pid: None,
            cal: None,
            wheel: None,
            _p: PhantomData,
            _s: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<P, S> WheelBuilder<P, S> {
    pub fn with_encoder(mut self, encoder: EncoderCfg) -> Self {
        self.encoder = Some(encoder);
        self
    }
    pub fn with_motor(mut self, motor: MotorCfg) -> Self {
        self.motor = Some(motor);
        self
    }
    pub fn with_pid(mut self, pid: PidCfg) -> Self {
        self.pid = Some(pid);
        self
    }
    pub fn with_calibrator(mut self, cal: CalibratorCfg) -> Self {
        self.cal = Some(cal);
        self
    }
    pub fn with_wheel(mut self, wheel: WheelCfg) -> Self {
        self.wheel = Some(wheel);
        self
    }
    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fallible build available in any type-state; returns detailed
    /// `BuildError`s for missing pieces and bad configuration.
    pub fn try_build(self) -> Result<Wheel> {
        let WheelBuilder {
            pwm,
            store,
            clock,
            encoder,
            motor,
            pid,
            cal,
            wheel,
            _p: _,
            _s: _,
        } = self;

        let pwm = pwm.ok_or_else(|| eyre::Report::new(BuildError::MissingPwm))?;
        let store = store.ok_or_else(|| eyre::Report::new(BuildError::MissingStore))?;

        let encoder = encoder.unwrap_or_default();
        let motor = motor.unwrap_or_default();
        let pid = pid.unwrap_or_default();
        let mut cal = cal.unwrap_or_default();
        let wheel = wheel.unwrap_or_default();

        if encoder.ppr == 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "ppr must be >= 1",
            )));
        }
        if !(0.0..=1.0).contains(&encoder.alpha_period) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "alpha_period must be within [0, 1]",
            )));
        }
        if pid.ts <= 0.0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "pid ts must be > 0",
            )));
        }
        if pid.u_min > pid.u_max {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "pid u_min must not exceed u_max",
            )));
        }
        if !(1u8..=16).contains(&motor.resolution_bits) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "resolution_bits must be within 1..=16",
            )));
        }
        if !(0.0..0.5).contains(&motor.deadband) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "deadband must be within [0, 0.5)",
            )));
        }
        if !(0.0..=0.95).contains(&motor.min_output) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "min_output must be within [0, 0.95]",
            )));
        }
        if cal.max_laps == 0 || cal.max_laps > 12 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "max_laps must be within 1..=12",
            )));
        }
        if !(0.0..=1.0).contains(&wheel.assist_u) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "assist_u must be within [0, 1]",
            )));
        }
        if wheel.auto_align_on_boot
            && (wheel.align_laps_boot == 0 || wheel.align_laps_boot > cal.max_laps)
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "align_laps_boot must be within 1..=max_laps",
            )));
        }

        // One PPR to rule the calibrator's arenas too.
        cal.ppr = encoder.ppr;

        let clock: Arc<dyn Clock + Send + Sync> = match clock {
            Some(b) => Arc::from(b),
            None => Arc::new(MonotonicClock::new()),
        };

        let est = VelocityEstimator::new(encoder, clock.clone());
        let cal = SectorCalibrator::new(cal, store);
        let motor = MotorPwm::new(motor, pwm);
        let pid = PidVel::new(pid);

        Ok(Wheel::from_parts(wheel, motor, est, cal, pid, clock))
    }
}

// Setters that advance type-state when providing mandatory components.
impl<S> WheelBuilder<Missing, S> {
    pub fn with_pwm(self, pwm: impl PwmPair + 'static) -> WheelBuilder<Set, S> {
        let WheelBuilder {
            pwm: _,
            store,
            clock,
            encoder,
            motor,
            pid,
            cal,
            wheel,
            _p: _,
            _s: _,
        } = self;
        WheelBuilder {
            pwm: Some(Box::new(pwm)),
            store,
            clock,
            encoder,
            motor,
            pid,
            cal,
            wheel,
            _p: PhantomData,
            _s: PhantomData,
        }
    }
}

impl<P> WheelBuilder<P, Missing> {
    pub fn with_store(self, store: impl KvStore + 'static) -> WheelBuilder<P, Set> {
        let WheelBuilder {
            pwm,
            store: _,
            clock,
            encoder,
            motor,
            pid,
            cal,
            wheel,
            _p: _,
            _s: _,
        } = self;
        WheelBuilder {
            pwm,
            store: Some(Box::new(store)),
            clock,
            encoder,
            motor,
            pid,
            cal,
            wheel,
            _p: PhantomData,
            _s: PhantomData,
        }
    }
}

impl WheelBuilder<Set, Set> {
    /// Validate and build the wheel. Only available once the PWM pair and
    /// the store are set.
    pub fn build(self) -> Result<Wheel> {
        self.try_build()
    }
}
