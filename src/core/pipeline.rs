//! The separation pipeline: load premixed recordings, mix them down, run the
//! separator with periodic scoring, and hand back the recovered sources.

use crate::{
    core::{
        audio::{read_pcm_wav, write_wav_f32},
        dsp::Stft,
        engine::{projection_back, AuxIva, DemixUpdate, SourceModel},
    },
    error::{BssError, Result},
    eval::bss::evaluate,
    io::progress::{emit_progress, SeparationProgress},
    types::{AudioData, ScoreTrace, SeparateOptions, SeparationResult},
};

use anyhow::anyhow;
use ndarray::{s, Array2, Array3, Axis};
use std::{fs, path::Path};

/// Load the `src{i}_mic{j}.wav` grid under `dir` into a
/// `(sources, microphones, samples)` array of normalized samples.
///
/// All files must be mono and agree on sample rate and length; an
/// inconsistent grid is a typed error rather than a later shape panic.
pub fn load_premix(dir: impl AsRef<Path>, n_src: usize, n_mic: usize) -> Result<(u32, Array3<f32>)> {
    let dir = dir.as_ref();
    let mut sample_rate = 0u32;
    let mut n_samples = 0usize;
    let mut data: Vec<f32> = Vec::new();

    for i in 0..n_src {
        for j in 0..n_mic {
            let path = dir.join(format!("src{}_mic{}.wav", i, j));
            let audio = read_pcm_wav(&path)?;
            if audio.channels != 1 {
                return Err(BssError::Inconsistent(format!(
                    "{}: expected mono, got {} channels",
                    path.display(),
                    audio.channels
                )));
            }
            if sample_rate == 0 {
                sample_rate = audio.sample_rate;
                n_samples = audio.samples.len();
            } else {
                if audio.sample_rate != sample_rate {
                    return Err(BssError::Inconsistent(format!(
                        "{}: sample rate {} differs from {}",
                        path.display(),
                        audio.sample_rate,
                        sample_rate
                    )));
                }
                if audio.samples.len() != n_samples {
                    return Err(BssError::Inconsistent(format!(
                        "{}: {} samples, expected {}",
                        path.display(),
                        audio.samples.len(),
                        n_samples
                    )));
                }
            }
            data.extend_from_slice(&audio.samples);
        }
    }

    if sample_rate == 0 {
        return Err(BssError::InvalidSampleRate(sample_rate));
    }
    let premix = Array3::from_shape_vec((n_src, n_mic, n_samples), data)?;
    Ok((sample_rate, premix))
}

/// Observed mixture: elementwise sum of the per-source contributions,
/// `(microphones, samples)`.
pub fn mix_down(premix: &Array3<f32>) -> Array2<f32> {
    premix.sum_axis(Axis(0))
}

/// Clean per-source signal at one microphone, `(sources, samples)`. Used for
/// scoring only, never fed to the separator.
pub fn reference_channel(premix: &Array3<f32>, ref_mic: usize) -> Result<Array2<f32>> {
    if ref_mic >= premix.shape()[1] {
        return Err(anyhow!(
            "reference microphone {} out of range ({} microphones)",
            ref_mic,
            premix.shape()[1]
        )
        .into());
    }
    Ok(premix.index_axis(Axis(1), ref_mic).to_owned())
}

/// Recovered sources held in memory, with the score trace collected at the
/// evaluation checkpoints.
#[derive(Clone, Debug)]
pub struct SeparatedSources {
    sources: Array2<f32>,
    pub sample_rate: u32,
    pub scores: ScoreTrace,
}

impl SeparatedSources {
    pub fn n_sources(&self) -> usize {
        self.sources.shape()[0]
    }

    pub fn num_samples(&self) -> usize {
        self.sources.shape()[1]
    }

    /// One recovered source's samples.
    pub fn get(&self, source: usize) -> Vec<f32> {
        self.sources.row(source).to_vec()
    }

    pub fn to_audio(&self, source: usize) -> AudioData {
        AudioData {
            samples: self.get(source),
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    /// Write one source as `est_{source}.wav` under `dir`.
    pub fn save(&self, source: usize, dir: impl AsRef<Path>) -> Result<String> {
        let path = dir.as_ref().join(format!("est_{}.wav", source));
        write_wav_f32(&path, &self.to_audio(source))?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Write every source under `dir`, returning the paths in source order.
    pub fn save_all(&self, dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let dir = dir.as_ref();
        let mut paths = Vec::with_capacity(self.n_sources());
        for s in 0..self.n_sources() {
            paths.push(self.save(s, dir)?);
        }
        Ok(paths)
    }
}

pub struct Separator;

impl Separator {
    /// Run the full pipeline on a directory of premixed recordings and return
    /// the recovered sources in memory.
    ///
    /// The mixture is scored once before any iteration, then every
    /// `eval_every` iterations: projection back, inverse transform,
    /// truncation to the common length, and the three quality metrics.
    pub fn separate(input_dir: impl AsRef<Path>, opts: &SeparateOptions) -> Result<SeparatedSources> {
        if opts.n_sources < 2 {
            return Err(anyhow!("need at least 2 sources, got {}", opts.n_sources).into());
        }
        if !(opts.n_fft > 0 && opts.hop > 0 && opts.hop <= opts.n_fft) {
            return Err(anyhow!(
                "bad transform size: n_fft {} hop {}",
                opts.n_fft,
                opts.hop
            )
            .into());
        }
        if opts.eval_every == 0 {
            return Err(anyhow!("eval_every must be positive").into());
        }

        emit_progress(SeparationProgress::Stage("load_premix"));
        let (sample_rate, premix) = load_premix(&input_dir, opts.n_sources, opts.n_sources)?;
        let mix = mix_down(&premix);
        let reference = reference_channel(&premix, opts.ref_mic)?;

        emit_progress(SeparationProgress::Stage("analysis"));
        let stft = Stft::new(opts.n_fft, opts.hop);
        let mix_tf = stft.analysis(&mix);
        if mix_tf.shape()[0] == 0 {
            return Err(anyhow!(
                "input too short for one analysis frame ({} samples, n_fft {})",
                mix.shape()[1],
                opts.n_fft
            )
            .into());
        }

        emit_progress(SeparationProgress::Stage("separate"));
        let mut separator = AuxIva::new(mix_tf, DemixUpdate::Ip1, SourceModel::Gauss)?;

        // The first n_fft - hop samples are only partially covered by the
        // analysis frames, so the synthesis comes back attenuated there. That
        // edge is dropped from every estimate, and must be dropped from the
        // reference and the baseline mixture too: estimate sample 0 lines up
        // with input sample `edge`.
        let edge = opts.n_fft - opts.hop;
        let reference = reference.slice(s![.., edge..]).to_owned();
        let mix_trimmed = mix.slice(s![.., edge..]).to_owned();

        let mut trace = ScoreTrace::default();

        // Baseline: score the raw mixture against the references.
        let (scores, mut latest) = evaluate(&reference, &mix_trimmed);
        trace.si_sdr.push(scores.mean_sdr());
        trace.si_sir.push(scores.mean_sir());
        trace.si_sar.push(scores.mean_sar());
        emit_progress(SeparationProgress::Evaluated {
            iteration: 0,
            si_sdr: scores.mean_sdr(),
        });

        for it in 0..opts.n_iter {
            separator.step();

            if it % opts.eval_every == 0 {
                let z = projection_back(separator.estimated(), opts.ref_mic, separator.demix_filter())?;
                let synthesized = stft.synthesis(&z);
                let est = synthesized.slice(s![.., edge..]).to_owned();

                let (scores, reordered) = evaluate(&reference, &est);
                trace.si_sdr.push(scores.mean_sdr());
                trace.si_sir.push(scores.mean_sir());
                trace.si_sar.push(scores.mean_sar());
                emit_progress(SeparationProgress::Evaluated {
                    iteration: it + 1,
                    si_sdr: scores.mean_sdr(),
                });
                latest = reordered;
            }
        }

        emit_progress(SeparationProgress::Finished);

        Ok(SeparatedSources {
            sources: latest,
            sample_rate,
            scores: trace,
        })
    }
}

/// Separate and write every recovered source to `opts.output_dir` as
/// `est_{s}.wav` at the input sample rate.
pub fn separate_to_dir(input_dir: impl AsRef<Path>, opts: SeparateOptions) -> Result<SeparationResult> {
    let separated = Separator::separate(input_dir, &opts)?;

    fs::create_dir_all(&opts.output_dir)?;
    emit_progress(SeparationProgress::Stage("write_sources"));
    let source_paths = separated.save_all(&opts.output_dir)?;

    Ok(SeparationResult {
        source_paths,
        scores: separated.scores,
    })
}
