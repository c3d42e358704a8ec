//! Demo: separate a directory of premixed recordings.
//!
//! Usage: cargo run --example separate_dir -- input_dir [output_dir]
//!
//! The input directory must hold one mono integer-PCM WAV per
//! (source, microphone) pair, named `src{i}_mic{j}.wav`. Use the
//! `make_fixture` demo to synthesize one.

use auxiva_core::{SeparateOptions, SeparationProgress};
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let input = args.next().unwrap_or_else(|| "./data".into());
    let out_dir = args.next().unwrap_or_else(|| "./out".into());

    auxiva_core::set_progress_callback(|p| match p {
        SeparationProgress::Stage(s) => {
            eprintln!("> {}", s);
        }
        SeparationProgress::Evaluated { iteration, si_sdr } => {
            eprintln!("iter {:>3}: SI-SDR {:+.2} dB", iteration, si_sdr);
        }
        SeparationProgress::Finished => {
            eprintln!("Separation finished.");
        }
    });

    // An optional opts.json next to the recordings overrides the defaults.
    let opts_path = Path::new(&input).join("opts.json");
    let mut opts: SeparateOptions = if opts_path.exists() {
        serde_json::from_str(&std::fs::read_to_string(&opts_path)?)?
    } else {
        SeparateOptions::default()
    };
    opts.output_dir = out_dir;

    let res = auxiva_core::separate_to_dir(&input, opts)?;

    eprintln!("\nScore trace (mean SI-SDR per checkpoint):");
    for (i, v) in res.scores.si_sdr.iter().enumerate() {
        eprintln!("  [{}] {:+.2} dB", i, v);
    }
    eprintln!("\nDone:");
    for p in &res.source_paths {
        eprintln!("{}", p);
    }
    Ok(())
}
