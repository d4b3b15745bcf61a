//! Feeds a synthetic fingertip pulse through the engine and prints the
//! aggregate snapshot once a second.
//!
//! Run with `RUST_LOG=debug` to watch presence transitions and dispatch
//! shedding.

use std::f32::consts::PI;

use vitalens_core::{Sample, VitalsEngine};

const SAMPLE_RATE: f32 = 30.0;
const US_PER_SAMPLE: i64 = 33_333;
const SESSION_SECONDS: u64 = 20;

fn main() {
    env_logger::init();

    let mut engine = VitalsEngine::new();
    let mut beats = 0usize;

    for tick in 0..SESSION_SECONDS * SAMPLE_RATE as u64 {
        let t = tick as f32 / SAMPLE_RATE;
        // 72 bpm fundamental with a soft dicrotic harmonic and slow drift
        let pulse = 0.05 * (2.0 * PI * 1.2 * t).sin() + 0.012 * (2.0 * PI * 2.4 * t).sin();
        let drift = 0.01 * (2.0 * PI * 0.05 * t).sin();
        let sample = Sample {
            timestamp_us: (tick as i64) * US_PER_SAMPLE,
            raw: 0.5 + drift + pulse,
        };

        let out = engine.ingest(sample);
        if out.beat.is_some() {
            beats += 1;
        }

        if tick % SAMPLE_RATE as u64 == SAMPLE_RATE as u64 - 1 {
            let s = engine.snapshot();
            println!(
                "t={:>2}s finger={} quality={:>5.1} hr={} avg={} spo2={} bp={} rhythm={} conf={:.2}",
                (tick + 1) / SAMPLE_RATE as u64,
                s.finger_detected,
                s.quality,
                s.render_heart_rate(),
                s.average_bpm
                    .map(|v| format!("{:.0}", v))
                    .unwrap_or_else(|| "--".into()),
                s.render_spo2(),
                s.pressure,
                s.render_arrhythmia(),
                s.overall_confidence,
            );
        }
    }

    println!("\n{} beats over {} s", beats, SESSION_SECONDS);
    match serde_json::to_string_pretty(engine.snapshot()) {
        Ok(json) => println!("final snapshot:\n{}", json),
        Err(err) => eprintln!("snapshot serialization failed: {}", err),
    }
}
