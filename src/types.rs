use serde::{Deserialize, Serialize};

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeparateOptions {
    pub output_dir: String,
    /// Number of sources to recover. The input grid is square: one recording
    /// per (source, microphone) pair with as many microphones as sources.
    pub n_sources: usize,
    /// Microphone used for the evaluation reference and projection back.
    pub ref_mic: usize,
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_hop")]
    pub hop: usize,
    #[serde(default = "default_n_iter")]
    pub n_iter: usize,
    /// Score the current estimate every this many iterations.
    #[serde(default = "default_eval_every")]
    pub eval_every: usize,
}

fn default_n_fft() -> usize {
    4096
}

fn default_hop() -> usize {
    1024
}

fn default_n_iter() -> usize {
    50
}

fn default_eval_every() -> usize {
    10
}

impl Default for SeparateOptions {
    fn default() -> Self {
        Self {
            output_dir: ".".into(),
            n_sources: 2,
            ref_mic: 1,
            n_fft: default_n_fft(),
            hop: default_hop(),
            n_iter: default_n_iter(),
            eval_every: default_eval_every(),
        }
    }
}

/// Separation quality per evaluation checkpoint, mean across sources.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScoreTrace {
    pub si_sdr: Vec<f64>,
    pub si_sir: Vec<f64>,
    pub si_sar: Vec<f64>,
}

#[derive(Clone, Debug)]
pub struct SeparationResult {
    pub source_paths: Vec<String>,
    pub scores: ScoreTrace,
}
