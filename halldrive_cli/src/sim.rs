//! Simulated rig: two wheel plants closing the loop around the real
//! control stack, with file-backed persistence so calibration survives
//! between invocations.

use eyre::WrapErr;
use halldrive_config::Config;
use halldrive_core::{
    CalibratorCfg, DifferentialDrive, Discretization, DriveCfg, DriveMode, EncoderCfg, MotorCfg,
    NeutralMode, PidCfg, PulseIsr, Wheel, WheelCfg,
};
use halldrive_hardware::{FsStore, SimClock, SimPwmPair, SimPwmProbe, WheelPlant, WheelPlantCfg};
use std::path::Path;
use tracing::info;

/// Control rate of the simulated loop.
pub const TICK_HZ: u32 = 100;
pub const TICK_S: f32 = 0.01;

pub struct SimSide {
    pub plant: WheelPlant,
    pub probe: SimPwmProbe,
    pub isr: PulseIsr,
}

pub struct SimRig {
    pub drive: DifferentialDrive,
    pub clock: SimClock,
    pub right: SimSide,
    pub left: SimSide,
}

fn encoder_cfg(cfg: &Config) -> EncoderCfg {
    EncoderCfg {
        ppr: cfg.encoder.ppr,
        count_rising: cfg.encoder.count_rising,
        invert: cfg.encoder.invert,
        glitch_cycles: cfg.encoder.glitch_cycles,
        min_gap_us: cfg.encoder.min_gap_us,
        alpha_period: cfg.encoder.alpha_period,
        timeout_stop_ms: cfg.encoder.timeout_stop_ms,
    }
}

fn motor_cfg(cfg: &Config) -> MotorCfg {
    MotorCfg {
        freq_hz: cfg.motor.freq_hz,
        resolution_bits: cfg.motor.resolution_bits,
        invert: cfg.motor.invert,
        deadband: cfg.motor.deadband,
        min_output: cfg.motor.min_output,
        slew_rate_per_sec: cfg.motor.slew_rate_per_sec,
        neutral_mode: match cfg.motor.neutral_mode {
            halldrive_config::NeutralMode::Coast => NeutralMode::Coast,
            halldrive_config::NeutralMode::Brake => NeutralMode::Brake,
        },
        drive_mode: match cfg.motor.drive_mode {
            halldrive_config::DriveMode::SignMagnitude => DriveMode::SignMagnitude,
            halldrive_config::DriveMode::LockedAntiPhase => DriveMode::LockedAntiPhase,
        },
    }
}

fn pid_cfg(cfg: &Config) -> PidCfg {
    PidCfg {
        kp: cfg.pid.kp,
        ki: cfg.pid.ki,
        kd: cfg.pid.kd,
        tf: cfg.pid.tf,
        ts: cfg.pid.ts,
        u_min: cfg.pid.u_min,
        u_max: cfg.pid.u_max,
        clamp_output: cfg.pid.clamp,
        mode: match cfg.pid.mode {
            halldrive_config::PidMode::Incremental => Discretization::Incremental,
            halldrive_config::PidMode::ParallelPidf => Discretization::ParallelPidf,
        },
        anti_windup: cfg.pid.anti_windup,
    }
}

fn wheel_cfg(cfg: &Config) -> WheelCfg {
    WheelCfg {
        assist_enabled: cfg.wheel.assist_enabled,
        assist_u: cfg.wheel.assist_u,
        dir_eps_u: cfg.wheel.dir_eps_u,
        dir_hold_ms: cfg.wheel.dir_hold_ms,
        auto_align_on_boot: cfg.wheel.auto_align_on_boot,
        align_laps_boot: cfg.wheel.align_laps_boot,
    }
}

fn drive_cfg(cfg: &Config) -> DriveCfg {
    DriveCfg {
        wheel_radius: cfg.drive.wheel_radius,
        track_width: cfg.drive.track_width,
        v_max: cfg.drive.v_max,
        w_max: cfg.drive.w_max,
        clamp_twist: cfg.drive.clamp_twist,
        v_acc_max: cfg.drive.v_acc_max,
        w_acc_max: cfg.drive.w_acc_max,
        omega_wheel_max: cfg.drive.omega_wheel_max,
        rescale_twist_to_wheel_limit: cfg.drive.rescale_twist_to_wheel_limit,
        auto_coordinated_align_on_boot: cfg.drive.auto_coordinated_align_on_boot,
        align_laps_boot: cfg.drive.align_laps_boot,
        align_assist_w: cfg.drive.align_assist_w,
        calib_assist_w: cfg.drive.calib_assist_w,
    }
}

/// The simulated wheel carries a deliberately uneven magnet ring so there
/// is real structure for the calibrator to learn.
fn plant_cfg(cfg: &Config, seed_skew: f32) -> WheelPlantCfg {
    let ppr = cfg.encoder.ppr.max(1);
    let mut widths = vec![1.0f32; ppr as usize];
    widths[0] = 1.0 + seed_skew;
    if ppr > 2 {
        widths[(ppr / 2) as usize] = 1.0 - seed_skew * 0.5;
    }
    WheelPlantCfg {
        ppr,
        max_duty: (1u32 << cfg.motor.resolution_bits.clamp(1, 16)) - 1,
        omega_max: cfg.drive.omega_wheel_max.max(10.0) * 0.5,
        tau_s: 0.12,
        sector_widths: widths,
    }
}

fn build_wheel(
    cfg: &Config,
    clock: &SimClock,
    state_dir: &Path,
    namespace: &str,
) -> eyre::Result<(Wheel, SimPwmProbe)> {
    let pwm = SimPwmPair::new();
    let probe = pwm.probe();
    let store = FsStore::open(state_dir.join(namespace))
        .wrap_err_with(|| format!("open store {namespace}"))?;
    let wheel = Wheel::builder()
        .with_pwm(pwm)
        .with_store(store)
        .with_clock(Box::new(clock.clone()))
        .with_encoder(encoder_cfg(cfg))
        .with_motor(motor_cfg(cfg))
        .with_pid(pid_cfg(cfg))
        .with_calibrator(CalibratorCfg {
            namespace: namespace.to_string(),
            ppr: cfg.encoder.ppr,
            max_laps: cfg.calibrator.max_laps,
            use_lut_by_default: cfg.calibrator.use_lut_by_default,
        })
        .with_wheel(wheel_cfg(cfg))
        .try_build()?;
    Ok((wheel, probe))
}

impl SimRig {
    pub fn build(cfg: &Config, state_dir: &Path) -> eyre::Result<Self> {
        let clock = SimClock::new();
        let (right, probe_r) = build_wheel(cfg, &clock, state_dir, "encR")?;
        let (left, probe_l) = build_wheel(cfg, &clock, state_dir, "encL")?;
        let isr_r = right.pulse_isr();
        let isr_l = left.pulse_isr();
        let drive = DifferentialDrive::new(drive_cfg(cfg), right, left);

        Ok(Self {
            drive,
            clock,
            right: SimSide {
                plant: WheelPlant::new(plant_cfg(cfg, 0.35)),
                probe: probe_r,
                isr: isr_r,
            },
            left: SimSide {
                plant: WheelPlant::new(plant_cfg(cfg, 0.25)),
                probe: probe_l,
                isr: isr_l,
            },
        })
    }

    /// Run the control loop for `secs` of simulated time.
    pub fn run_for(&mut self, secs: f32) -> eyre::Result<()> {
        let ticks = (secs * TICK_HZ as f32).ceil() as u64;
        self.run_ticks(ticks, |_| false)
    }

    /// Advance both plants by one tick of physics, delivering pulses.
    pub fn step_plants(&mut self) {
        let isr_r = self.right.isr.clone();
        self.right.plant.step(
            self.right.probe.duty_in1(),
            self.right.probe.duty_in2(),
            TICK_S,
            |t_us| {
                isr_r.on_pulse(t_us);
            },
        );
        let isr_l = self.left.isr.clone();
        self.left.plant.step(
            self.left.probe.duty_in1(),
            self.left.probe.duty_in2(),
            TICK_S,
            |t_us| {
                isr_l.on_pulse(t_us);
            },
        );
    }

    /// Advance the virtual clock by one tick.
    pub fn tick_clock(&self) {
        self.clock.advance(std::time::Duration::from_millis(10));
    }

    /// Run until `done` returns true or `max_ticks` elapse. One tick is
    /// 10 ms of virtual time: plants step first, then the control stack.
    pub fn run_ticks(
        &mut self,
        max_ticks: u64,
        mut done: impl FnMut(&DifferentialDrive) -> bool,
    ) -> eyre::Result<()> {
        for _ in 0..max_ticks {
            self.step_plants();
            self.drive.update(TICK_S)?;
            self.tick_clock();
            if done(&self.drive) {
                break;
            }
        }
        Ok(())
    }

    pub fn report(&self) {
        info!(
            omega_r = self.drive.wheel_r().omega(),
            omega_l = self.drive.wheel_l().omega(),
            u_r = self.drive.wheel_r().command_applied(),
            u_l = self.drive.wheel_l().command_applied(),
            "rig state"
        );
    }
}
