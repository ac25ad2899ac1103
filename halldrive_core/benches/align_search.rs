use criterion::{criterion_group, criterion_main, Criterion};
use halldrive_core::calibrator::{CalibratorCfg, SectorCalibrator};
use halldrive_hardware::MemStore;

/// Worst-case alignment finish: max sectors, max laps, full circular shift
/// search plus voting.
fn bench_alignment_finish(c: &mut Criterion) {
    let ppr: u16 = 20;
    let laps: u8 = 12;

    // Build a structured LUT first so alignment can run.
    let mut setup = || {
        let mut cal = SectorCalibrator::new(
            CalibratorCfg {
                ppr,
                max_laps: laps,
                ..CalibratorCfg::default()
            },
            Box::new(MemStore::new()),
        );
        cal.start_calibration(3, 1).expect("start calibration");
        for _ in 0..3 {
            for k in 0..ppr {
                let dt = 10_000.0 + 3_000.0 * f32::from(k % 4);
                cal.feed_period(k, dt);
            }
        }
        assert!(cal.finish_calibration_if_ready());

        cal.start_alignment(laps, 1).expect("start alignment");
        for lap in 0..laps {
            for k in 0..ppr {
                let shifted = (k + 7) % ppr;
                let dt = 10_000.0 + 3_000.0 * f32::from(shifted % 4) + f32::from(lap);
                cal.feed_period(k, dt);
            }
        }
        cal
    };

    c.bench_function("alignment_finish_ppr20_laps12", |b| {
        b.iter_batched(
            &mut setup,
            |mut cal| cal.finish_alignment_if_ready(),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_alignment_finish);
criterion_main!(benches);
