//! halldrive_hardware: hardware and simulation backends behind `halldrive_traits`.
//!
//! Features:
//! - `hardware`: enable Raspberry Pi GPIO-backed implementations (software
//!   PWM output pins, async-interrupt pulse watch).
//! - (default) no `hardware` feature: simulation types only.
//!
//! Note: The `rppal` dependency is optional and only enabled when the
//!       `hardware` feature is active, so CI on x86 builds without GPIO libs.

pub mod error;
pub mod sim;
pub mod store;

pub use sim::{SimClock, SimPwmPair, SimPwmProbe, WheelPlant, WheelPlantCfg};
pub use store::{FsStore, MemStore};

#[cfg(feature = "hardware")]
pub mod hardware {
    use anyhow::{Context, Result};
    use halldrive_traits::PwmPair;
    use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};
    use std::error::Error;
    use std::time::Instant;
    use tracing::info;

    use crate::error::HwError;

    /// H-bridge IN1/IN2 driven with rppal software PWM.
    pub struct HardwarePwmPair {
        in1: OutputPin,
        in2: OutputPin,
        freq_hz: f64,
        max_duty: u32,
    }

    impl HardwarePwmPair {
        /// Claim the two GPIO pins and start both channels at 0% duty.
        pub fn try_new(pin_in1: u8, pin_in2: u8, freq_hz: u32, resolution_bits: u8) -> Result<Self> {
            let gpio = Gpio::new().context("open GPIO")?;
            let mut in1 = gpio.get(pin_in1).context("get IN1 pin")?.into_output_low();
            let mut in2 = gpio.get(pin_in2).context("get IN2 pin")?.into_output_low();
            let freq_hz = f64::from(freq_hz.max(1));
            in1.set_pwm_frequency(freq_hz, 0.0).context("start IN1 pwm")?;
            in2.set_pwm_frequency(freq_hz, 0.0).context("start IN2 pwm")?;
            let max_duty = (1u32 << resolution_bits.clamp(1, 16)) - 1;
            info!(pin_in1, pin_in2, freq_hz, max_duty, "pwm pair up");
            Ok(Self {
                in1,
                in2,
                freq_hz,
                max_duty,
            })
        }

        fn write(
            pin: &mut OutputPin,
            freq_hz: f64,
            max_duty: u32,
            duty: u32,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let cycle = f64::from(duty.min(max_duty)) / f64::from(max_duty.max(1));
            pin.set_pwm_frequency(freq_hz, cycle)
                .map_err(|e| Box::new(HwError::Pwm(e.to_string())) as _)
        }
    }

    impl PwmPair for HardwarePwmPair {
        fn write_in1(&mut self, duty: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
            Self::write(&mut self.in1, self.freq_hz, self.max_duty, duty)
        }

        fn write_in2(&mut self, duty: u32) -> Result<(), Box<dyn Error + Send + Sync>> {
            Self::write(&mut self.in2, self.freq_hz, self.max_duty, duty)
        }
    }

    /// Keeps the watched input pin (and its interrupt registration) alive.
    pub struct PulseWatch {
        _pin: InputPin,
    }

    /// Watch a Hall sensor pin and invoke `on_pulse(now_us)` from the GPIO
    /// interrupt thread on the selected edge. The timestamp is microseconds
    /// since this call; feed it straight into a `PulseIsr`.
    pub fn spawn_pulse_watch<F>(pin: u8, count_rising: bool, mut on_pulse: F) -> Result<PulseWatch>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let gpio = Gpio::new().context("open GPIO")?;
        let mut input = gpio.get(pin).context("get pulse pin")?.into_input_pullup();
        let trigger = if count_rising {
            Trigger::RisingEdge
        } else {
            Trigger::FallingEdge
        };
        let epoch = Instant::now();
        input
            .set_async_interrupt(trigger, move |_level: Level| {
                on_pulse(epoch.elapsed().as_micros() as u64);
            })
            .context("register pulse interrupt")?;
        info!(pin, count_rising, "pulse watch up");
        Ok(PulseWatch { _pin: input })
    }
}

#[cfg(feature = "hardware")]
pub use hardware::{spawn_pulse_watch, HardwarePwmPair, PulseWatch};
