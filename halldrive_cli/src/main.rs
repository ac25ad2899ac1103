mod cli;
mod sim;

use clap::Parser;
use cli::{Cli, Commands, Side, FILE_GUARD};
use eyre::WrapErr;
use halldrive_config::Config;
use halldrive_core::{StartError, TrajectoryCfg, TrajectoryRunner};
use sim::SimRig;
use std::fs;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build a file sink writer with optional rotation, storing the
/// non-blocking guard in a OnceLock so it outlives main's locals.
fn file_layer(
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = file?;
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file_appender = match rotation.unwrap_or("never").to_ascii_lowercase().as_str() {
        "daily" => tracing_appender::rolling::daily(".", path),
        "hourly" => tracing_appender::rolling::hourly(".", path),
        _ => tracing_appender::rolling::never(".", path),
    };
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);
    Some(nb_writer)
}

/// Initialize tracing once for the whole app. RUST_LOG wins over the CLI
/// level when set.
fn init_tracing(json: bool, level: &str, file: Option<&str>, rotation: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let console = fmt::layer().json().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    } else {
        let console = fmt::layer().compact().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    }
}

fn humanize(err: &eyre::Report) -> String {
    use halldrive_core::BuildError;

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingPwm | BuildError::MissingStore => format!(
                "What happened: The control stack was assembled without a mandatory backend ({be}).\nHow to fix: This is a wiring bug in the shell; please report it."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }
    if let Some(se) = err.downcast_ref::<StartError>() {
        return match se {
            StartError::InvalidLaps => "What happened: The lap count is 0 or exceeds calibrator.max_laps.\nHow to fix: Pass --laps within 1..=max_laps.".to_string(),
            StartError::PatternNotReady => "What happened: No learned pattern for that wheel/direction yet.\nHow to fix: Run `halldrive calibrate` first; alignment needs a structured LUT.".to_string(),
            StartError::Busy => "What happened: A calibration or alignment is already running.\nHow to fix: Wait for it to finish or abort it, then retry.".to_string(),
        };
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!("Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {err}")
}

fn main() -> eyre::Result<()> {
    if let Err(e) = real_main() {
        eprintln!("{}", humanize(&e));
        std::process::exit(2);
    }
    Ok(())
}

fn real_main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let cfg_text = fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {:?}", cli.config))?;
    let cfg: Config =
        toml::from_str(&cfg_text).wrap_err_with(|| format!("parse config {:?}", cli.config))?;
    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    let mut rig = SimRig::build(&cfg, &cli.state_dir)?;
    rig.drive.begin()?;
    // Let any boot routine (coordinated alignment) run its course first.
    rig.run_ticks(30_000, |d| !d.is_coordinated_routine_running())?;

    match cli.cmd {
        Commands::Drive { v, w, secs } => {
            rig.drive.set_twist(v, w);
            rig.run_for(secs)?;
            rig.report();
            println!(
                "drove v={v} m/s w={w} rad/s for {secs}s: omega_r={:.2} omega_l={:.2} rad/s",
                rig.drive.wheel_r().omega(),
                rig.drive.wheel_l().omega()
            );
        }
        Commands::Spin { w, secs } => {
            rig.drive.set_twist(0.0, w);
            rig.run_for(secs)?;
            rig.report();
            println!(
                "spun w={w} rad/s for {secs}s: omega_r={:.2} omega_l={:.2} rad/s",
                rig.drive.wheel_r().omega(),
                rig.drive.wheel_l().omega()
            );
        }
        Commands::Goto { x, y } => {
            let mut runner = TrajectoryRunner::new(TrajectoryCfg {
                v_max_default: cfg.drive.v_max.min(0.5),
                w_max_default: cfg.drive.w_max.min(3.0),
                ..TrajectoryCfg::default()
            });
            runner.plan_from_point_in_robot_frame(x, y, 0.0, 0.0);
            let mut ticks = 0u64;
            while !runner.is_finished() && ticks < 60_000 {
                // The runner owns the twist and steps the drive itself.
                rig.step_plants();
                runner.update(&mut rig.drive, sim::TICK_S)?;
                rig.tick_clock();
                ticks += 1;
            }
            println!(
                "goto ({x}, {y}) finished={} after {:.2}s",
                runner.is_finished(),
                ticks as f32 * sim::TICK_S
            );
        }
        Commands::Calibrate { side, laps } => {
            match side {
                Side::Both => {
                    rig.drive
                        .start_coordinated_calibration(laps, cfg.drive.calib_assist_w)
                        .map_err(eyre::Report::new)?;
                    rig.run_ticks(120_000, |d| !d.is_coordinated_routine_running())?;
                }
                Side::Right => {
                    rig.drive
                        .start_calibration_r(laps)
                        .map_err(eyre::Report::new)?;
                    rig.run_ticks(120_000, |d| !d.wheel_r().is_calibrating())?;
                }
                Side::Left => {
                    rig.drive
                        .start_calibration_l(laps)
                        .map_err(eyre::Report::new)?;
                    rig.run_ticks(120_000, |d| !d.wheel_l().is_calibrating())?;
                }
            }
            println!("calibration done ({laps} laps, {side:?})");
            print_luts(&rig);
        }
        Commands::Align { side, laps } => {
            match side {
                Side::Both => {
                    rig.drive
                        .start_coordinated_alignment(laps, cfg.drive.align_assist_w)
                        .map_err(eyre::Report::new)?;
                    rig.run_ticks(120_000, |d| !d.is_coordinated_routine_running())?;
                }
                Side::Right => {
                    rig.drive
                        .start_alignment_r(laps)
                        .map_err(eyre::Report::new)?;
                    rig.run_ticks(120_000, |d| !d.wheel_r().is_aligning())?;
                }
                Side::Left => {
                    rig.drive
                        .start_alignment_l(laps)
                        .map_err(eyre::Report::new)?;
                    rig.run_ticks(120_000, |d| !d.wheel_l().is_aligning())?;
                }
            }
            println!(
                "alignment done ({laps} laps, {side:?}): off_r={} off_l={}",
                rig.drive.wheel_r().calibrator().offset(1),
                rig.drive.wheel_l().calibrator().offset(1)
            );
        }
        Commands::ShowLut { side } => match side {
            Side::Right => print_wheel_lut("right", rig.drive.wheel_r()),
            Side::Left => print_wheel_lut("left", rig.drive.wheel_l()),
            Side::Both => print_luts(&rig),
        },
        Commands::SelfCheck => {
            rig.drive.set_twist(0.2, 0.0);
            rig.run_for(1.0)?;
            let moving = rig.drive.wheel_r().omega() > 0.0 && rig.drive.wheel_l().omega() > 0.0;
            println!(
                "self-check: {} (omega_r={:.2}, omega_l={:.2})",
                if moving { "ok" } else { "FAILED" },
                rig.drive.wheel_r().omega(),
                rig.drive.wheel_l().omega()
            );
            if !moving {
                return Err(eyre::eyre!("simulated wheels did not move"));
            }
        }
    }

    Ok(())
}

fn print_luts(rig: &SimRig) {
    print_wheel_lut("right", rig.drive.wheel_r());
    print_wheel_lut("left", rig.drive.wheel_l());
}

fn print_wheel_lut(name: &str, wheel: &halldrive_core::Wheel) {
    let cal = wheel.calibrator();
    for (dir, label) in [(1i8, "fwd"), (-1i8, "rev")] {
        let lut = cal.lut(dir);
        let entries: Vec<String> = lut.iter().map(|s| format!("{s:.4}")).collect();
        println!(
            "{name} {label}: use={} off={} s=[{}]",
            cal.use_lut(dir),
            cal.offset(dir),
            entries.join(", ")
        );
    }
}
