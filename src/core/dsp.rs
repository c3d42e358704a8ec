//! Short-time Fourier analysis and synthesis.
//!
//! Analysis uses a Hamming window; synthesis uses the matching biorthogonal
//! window so that windowed overlap-add reconstructs the input exactly wherever
//! every overlapping frame is present.

use ndarray::{Array2, Array3};
use num_complex::Complex;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::TAU;
use std::sync::Arc;

pub fn hamming(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (TAU * i as f32 / (n - 1) as f32).cos())
        .collect()
}

/// Synthesis window matching `analysis` for perfect overlap-add at hop `hop`:
/// within each residue class modulo the hop, sum(a[j] * s[j]) == 1.
pub fn synthesis_window(analysis: &[f32], hop: usize) -> Vec<f32> {
    let n = analysis.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut denom = 0.0f32;
        let mut j = i % hop;
        while j < n {
            denom += analysis[j] * analysis[j];
            j += hop;
        }
        out.push(if denom > 0.0 { analysis[i] / denom } else { 0.0 });
    }
    out
}

pub struct Stft {
    n_fft: usize,
    hop: usize,
    win_a: Vec<f32>,
    win_s: Vec<f32>,
    fwd: Arc<dyn Fft<f32>>,
    inv: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        assert!(
            n_fft > 1 && hop > 0 && hop <= n_fft,
            "bad transform size: n_fft {n_fft} hop {hop}"
        );
        let mut planner = FftPlanner::new();
        let fwd = planner.plan_fft_forward(n_fft);
        let inv = planner.plan_fft_inverse(n_fft);
        let win_a = hamming(n_fft);
        let win_s = synthesis_window(&win_a, hop);
        Self {
            n_fft,
            hop,
            win_a,
            win_s,
            fwd,
            inv,
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn n_frames(&self, n_samples: usize) -> usize {
        if n_samples >= self.n_fft {
            (n_samples - self.n_fft) / self.hop + 1
        } else {
            0
        }
    }

    /// Transform `(channels, samples)` into `(frames, bins, channels)` with
    /// `bins = n_fft / 2 + 1`; the negative-frequency half is redundant for
    /// real input and is not stored.
    pub fn analysis(&self, x: &Array2<f32>) -> Array3<Complex<f32>> {
        let channels = x.shape()[0];
        let samples = x.shape()[1];
        let bins = self.n_bins();
        let frames = self.n_frames(samples);

        let mut out = Array3::zeros((frames, bins, channels));
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        for ch in 0..channels {
            for t in 0..frames {
                let start = t * self.hop;
                for i in 0..self.n_fft {
                    buf[i] = Complex::new(x[(ch, start + i)] * self.win_a[i], 0.0);
                }
                self.fwd.process(&mut buf);
                for f in 0..bins {
                    out[(t, f, ch)] = buf[f];
                }
            }
        }
        out
    }

    /// Inverse transform `(frames, bins, channels)` back to
    /// `(channels, n_fft + (frames - 1) * hop)` by windowed overlap-add.
    /// Channels are synthesized in parallel.
    pub fn synthesis(&self, z: &Array3<Complex<f32>>) -> Array2<f32> {
        let frames = z.shape()[0];
        let bins = z.shape()[1];
        let channels = z.shape()[2];
        let samples = if frames == 0 {
            0
        } else {
            self.n_fft + (frames - 1) * self.hop
        };
        let norm = 1.0 / self.n_fft as f32;

        let rows: Vec<Vec<f32>> = (0..channels)
            .into_par_iter()
            .map(|ch| {
                let mut out = vec![0.0f32; samples];
                let mut buf = vec![Complex::new(0.0f32, 0.0); self.n_fft];
                for t in 0..frames {
                    for f in 0..bins {
                        buf[f] = z[(t, f, ch)];
                    }
                    for f in bins..self.n_fft {
                        buf[f] = z[(t, self.n_fft - f, ch)].conj();
                    }
                    self.inv.process(&mut buf);
                    let start = t * self.hop;
                    for i in 0..self.n_fft {
                        out[start + i] += buf[i].re * norm * self.win_s[i];
                    }
                }
                out
            })
            .collect();

        let mut y = Array2::zeros((channels, samples));
        for (ch, row) in rows.into_iter().enumerate() {
            for (i, &v) in row.iter().enumerate() {
                y[(ch, i)] = v;
            }
        }
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn windows_are_biorthogonal() {
        let n_fft = 256;
        let hop = 64;
        let win_a = hamming(n_fft);
        let win_s = synthesis_window(&win_a, hop);
        for residue in 0..hop {
            let mut acc = 0.0f32;
            let mut j = residue;
            while j < n_fft {
                acc += win_a[j] * win_s[j];
                j += hop;
            }
            assert!((acc - 1.0).abs() < 1e-5, "residue {residue}: {acc}");
        }
    }

    #[test]
    fn round_trip_reconstructs_interior() {
        let n_fft = 256;
        let hop = 64;
        let stft = Stft::new(n_fft, hop);

        let mut rng = rand::thread_rng();
        let n = 2048;
        let x = Array2::from_shape_fn((2, n), |_| rng.gen_range(-1.0f32..1.0));

        let z = stft.analysis(&x);
        let frames = z.shape()[0];
        let y = stft.synthesis(&z);

        // Samples covered by a full set of overlapping frames.
        let lo = n_fft - hop;
        let hi = frames * hop;
        for ch in 0..2 {
            for i in lo..hi {
                assert!(
                    (x[(ch, i)] - y[(ch, i)]).abs() < 1e-3,
                    "ch {ch} sample {i}: {} vs {}",
                    x[(ch, i)],
                    y[(ch, i)]
                );
            }
        }
    }

    #[test]
    fn short_input_yields_no_frames() {
        let stft = Stft::new(256, 64);
        let x = Array2::zeros((1, 100));
        let z = stft.analysis(&x);
        assert_eq!(z.shape()[0], 0);
    }

    #[test]
    fn degenerate_window_is_unity() {
        assert_eq!(hamming(1), vec![1.0]);
        assert!(hamming(0).is_empty());
    }

    #[test]
    #[should_panic(expected = "bad transform size")]
    fn rejects_hop_larger_than_frame() {
        let _ = Stft::new(256, 512);
    }

    #[test]
    #[should_panic(expected = "bad transform size")]
    fn rejects_zero_hop() {
        let _ = Stft::new(256, 0);
    }
}
