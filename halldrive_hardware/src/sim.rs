//! Simulation backends: an inspectable PWM pair and a wheel plant that
//! turns applied duty into Hall pulses with per-magnet spacing error.

use halldrive_traits::{Clock, PwmPair};
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Virtual-time clock for simulation runs: `sleep` advances time instead
/// of blocking, so a simulated minute costs nothing.
#[derive(Debug, Clone)]
pub struct SimClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Simulated PWM sink; the written duties are observable through a probe so
/// a plant (or a test) can close the loop after the pair has been boxed into
/// the motor stage.
#[derive(Debug, Default)]
pub struct SimPwmPair {
    duty1: Arc<AtomicU32>,
    duty2: Arc<AtomicU32>,
}

/// Read-side handle onto a `SimPwmPair`.
#[derive(Debug, Clone)]
pub struct SimPwmProbe {
    duty1: Arc<AtomicU32>,
    duty2: Arc<AtomicU32>,
}

impl SimPwmPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> SimPwmProbe {
        SimPwmProbe {
            duty1: self.duty1.clone(),
            duty2: self.duty2.clone(),
        }
    }
}

impl SimPwmProbe {
    pub fn duty_in1(&self) -> u32 {
        self.duty1.load(Ordering::Relaxed)
    }
    pub fn duty_in2(&self) -> u32 {
        self.duty2.load(Ordering::Relaxed)
    }
}

impl PwmPair for SimPwmPair {
    fn write_in1(&mut self, duty: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.duty1.store(duty, Ordering::Relaxed);
        Ok(())
    }

    fn write_in2(&mut self, duty: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.duty2.store(duty, Ordering::Relaxed);
        Ok(())
    }
}

/// Wheel plant configuration.
#[derive(Debug, Clone)]
pub struct WheelPlantCfg {
    /// Magnets on the wheel.
    pub ppr: u16,
    /// Duty full-scale of the driving PWM (2^bits - 1).
    pub max_duty: u32,
    /// Wheel speed at |u| = 1, rad/s.
    pub omega_max: f32,
    /// First-order time constant of the motor+wheel, seconds.
    pub tau_s: f32,
    /// Relative angular width of each magnet sector. Normalized internally;
    /// an empty vector means perfectly even spacing.
    pub sector_widths: Vec<f32>,
}

impl Default for WheelPlantCfg {
    fn default() -> Self {
        Self {
            ppr: 8,
            max_duty: 255,
            omega_max: 25.0,
            tau_s: 0.15,
            sector_widths: Vec::new(),
        }
    }
}

/// First-order motor model plus a pulse generator. A pulse fires every time
/// the wheel crosses a magnet boundary, in either direction of travel, with
/// a microsecond timestamp interpolated inside the step.
#[derive(Debug)]
pub struct WheelPlant {
    cfg: WheelPlantCfg,
    widths: Vec<f32>, // normalized sector widths, sum = 1 revolution
    omega: f32,       // rad/s, signed
    sector: usize,    // sector the position currently sits in
    frac: f32,        // position inside the sector, [0, widths[sector])
    t_us: u64,
}

impl WheelPlant {
    pub fn new(cfg: WheelPlantCfg) -> Self {
        let n = cfg.ppr.max(1) as usize;
        let mut widths = if cfg.sector_widths.len() == n {
            cfg.sector_widths.clone()
        } else {
            vec![1.0; n]
        };
        let sum: f32 = widths.iter().copied().filter(|w| *w > 0.0).sum();
        let fallback = 1.0 / n as f32;
        for w in &mut widths {
            *w = if *w > 0.0 && sum > 0.0 { *w / sum } else { fallback };
        }
        Self {
            cfg,
            widths,
            omega: 0.0,
            sector: 0,
            frac: 0.0,
            t_us: 0,
        }
    }

    pub fn omega(&self) -> f32 {
        self.omega
    }

    pub fn now_us(&self) -> u64 {
        self.t_us
    }

    /// Advance the plant by `dt_s` under the given duty pair, emitting one
    /// callback per sector boundary crossed. Sign-magnitude convention:
    /// IN1 drives forward, IN2 reverse.
    pub fn step<F: FnMut(u64)>(&mut self, duty_in1: u32, duty_in2: u32, dt_s: f32, mut on_pulse: F) {
        let max = self.cfg.max_duty.max(1) as f32;
        let u = ((duty_in1 as f32 - duty_in2 as f32) / max).clamp(-1.0, 1.0);
        let target = u * self.cfg.omega_max;

        // First-order lag toward the commanded speed.
        let alpha = if self.cfg.tau_s > 0.0 {
            (dt_s / self.cfg.tau_s).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.omega += alpha * (target - self.omega);

        let d_rev = self.omega * dt_s / std::f32::consts::TAU;
        let t0 = self.t_us;
        let dt_us = (dt_s * 1e6) as u64;
        self.t_us = t0 + dt_us;
        if d_rev == 0.0 {
            return;
        }

        let n = self.widths.len();
        let total = d_rev.abs();
        let mut travelled = 0.0f32;
        let mut remaining = total;
        let forward = d_rev > 0.0;
        loop {
            let room = if forward {
                self.widths[self.sector] - self.frac
            } else {
                self.frac
            };
            if remaining < room {
                self.frac += if forward { remaining } else { -remaining };
                break;
            }
            travelled += room;
            remaining -= room;
            let t_pulse = t0 + ((travelled / total).clamp(0.0, 1.0) * dt_us as f32) as u64;
            on_pulse(t_pulse);
            if forward {
                self.sector = (self.sector + 1) % n;
                self.frac = 0.0;
            } else {
                self.sector = (self.sector + n - 1) % n;
                self.frac = self.widths[self.sector];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_plant_emits_ppr_pulses_per_revolution() {
        let mut plant = WheelPlant::new(WheelPlantCfg {
            ppr: 6,
            max_duty: 255,
            omega_max: std::f32::consts::TAU, // 1 rev/s at full duty
            tau_s: 0.0,                       // no lag
            sector_widths: Vec::new(),
        });
        let mut pulses = 0u32;
        // 1 second at full forward duty = 1 revolution = 6 boundary crossings.
        for _ in 0..1000 {
            plant.step(255, 0, 0.001, |_t| pulses += 1);
        }
        assert!((5..=7).contains(&pulses), "got {pulses} pulses");
    }

    #[test]
    fn uneven_widths_stretch_the_matching_periods() {
        // Sector 0 twice as wide as the rest: its inter-pulse gap is longer.
        let mut plant = WheelPlant::new(WheelPlantCfg {
            ppr: 4,
            max_duty: 255,
            omega_max: std::f32::consts::TAU,
            tau_s: 0.0,
            sector_widths: vec![2.0, 1.0, 1.0, 1.0],
        });
        let mut stamps = Vec::new();
        for _ in 0..3000 {
            plant.step(255, 0, 0.001, |t| stamps.push(t));
        }
        assert!(stamps.len() >= 8);
        let periods: Vec<u64> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        let longest = *periods.iter().max().unwrap();
        let shortest = *periods.iter().min().unwrap();
        assert!(longest > shortest + shortest / 2, "{periods:?}");
    }

    #[test]
    fn reverse_duty_turns_negative() {
        let mut plant = WheelPlant::new(WheelPlantCfg::default());
        plant.step(0, 255, 0.1, |_| {});
        assert!(plant.omega() < 0.0);
    }
}
