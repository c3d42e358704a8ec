//! Demo: synthesize a premixed two-source, two-microphone fixture.
//!
//! Usage: cargo run --example make_fixture -- [output_dir]
//!
//! Writes `src{i}_mic{j}.wav`: two amplitude-modulated noise sources passed
//! through a fixed instantaneous mixing matrix, one second each at 16 kHz,
//! 16-bit PCM. The modulation gives each source the nonstationarity the
//! separator keys on.

use auxiva_core::core::audio::float_to_pcm;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;

const SAMPLE_RATE: u32 = 16_000;
const MIXING: [[f32; 2]; 2] = [[1.0, 0.6], [0.5, 1.0]];

fn source(rng: &mut StdRng, mod_freq: f32, n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let env = (std::f32::consts::TAU * mod_freq * t).sin().abs();
            rng.gen_range(-1.0f32..1.0) * env * 0.3
        })
        .collect()
}

fn write_pcm16(path: &Path, samples: &[f32]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for s in float_to_pcm::<i16>(samples) {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "./data".into());
    std::fs::create_dir_all(&out_dir)?;

    let n = SAMPLE_RATE as usize;
    let mut rng = StdRng::seed_from_u64(42);
    let sources = [source(&mut rng, 2.0, n), source(&mut rng, 3.1, n)];

    for (i, src) in sources.iter().enumerate() {
        for j in 0..2 {
            let gain = MIXING[j][i];
            let contribution: Vec<f32> = src.iter().map(|&v| v * gain).collect();
            let path = Path::new(&out_dir).join(format!("src{}_mic{}.wav", i, j));
            write_pcm16(&path, &contribution)?;
            eprintln!("wrote {}", path.display());
        }
    }
    Ok(())
}
