//! Auxiliary-function independent vector analysis.
//!
//! The separator owns the time-frequency observations and a per-frequency
//! demixing matrix, updated one row at a time (IP1) under a time-varying
//! Gaussian source model. Scale ambiguity is resolved afterwards by
//! [`projection_back`].

use crate::error::Result;

use anyhow::anyhow;
use ndarray::{Array2, Array3};
use num_complex::Complex;

const EPS: f32 = 1e-10;

/// Demixing filter update rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DemixUpdate {
    /// Iterative projection, one demixing row per source per step.
    Ip1,
}

/// Source prior used to weight the covariance estimates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceModel {
    /// Time-varying Gaussian: per-frame variance averaged over frequency.
    Gauss,
}

pub struct AuxIva {
    /// Observations, `(frames, bins, channels)`.
    obs: Array3<Complex<f32>>,
    /// Demixing filters, `(bins, sources, channels)`, identity at start.
    demix: Array3<Complex<f32>>,
    /// Current source estimate, `(frames, bins, sources)`.
    estimated: Array3<Complex<f32>>,
    update: DemixUpdate,
    model: SourceModel,
    n_src: usize,
}

impl AuxIva {
    /// Square determined case: as many sources as observation channels.
    pub fn new(
        obs: Array3<Complex<f32>>,
        update: DemixUpdate,
        model: SourceModel,
    ) -> Result<Self> {
        let frames = obs.shape()[0];
        let bins = obs.shape()[1];
        let channels = obs.shape()[2];
        if frames == 0 || bins == 0 {
            return Err(anyhow!("empty time-frequency input").into());
        }
        if channels < 2 {
            return Err(anyhow!("need at least 2 channels, got {}", channels).into());
        }

        let mut demix = Array3::zeros((bins, channels, channels));
        for f in 0..bins {
            for c in 0..channels {
                demix[(f, c, c)] = Complex::new(1.0, 0.0);
            }
        }

        // W is identity, so the initial estimate is the observation itself.
        let estimated = obs.clone();

        Ok(Self {
            obs,
            demix,
            estimated,
            update,
            model,
            n_src: channels,
        })
    }

    pub fn n_sources(&self) -> usize {
        self.n_src
    }

    /// Current source estimate, `(frames, bins, sources)`.
    pub fn estimated(&self) -> &Array3<Complex<f32>> {
        &self.estimated
    }

    /// Current demixing filters, `(bins, sources, channels)`.
    pub fn demix_filter(&self) -> &Array3<Complex<f32>> {
        &self.demix
    }

    /// One separation iteration: update every demixing row, then re-demix.
    pub fn step(&mut self) {
        match self.update {
            DemixUpdate::Ip1 => self.step_ip1(),
        }
        self.redemix();
    }

    /// Negative log-likelihood of the current estimate (up to a constant).
    pub fn loss(&self) -> f64 {
        let frames = self.obs.shape()[0];
        let bins = self.obs.shape()[1];
        let r = self.frame_variances();

        let mut nll = 0.0f64;
        for t in 0..frames {
            for k in 0..self.n_src {
                nll += bins as f64 * (r[(t, k)] as f64).ln();
            }
        }
        for f in 0..bins {
            nll -= 2.0 * frames as f64 * self.log_abs_det(f) as f64;
        }
        nll
    }

    /// Per-frame source variances under the current model,
    /// `r[t, k] = mean_f |y[t, f, k]|^2`, floored away from zero.
    fn frame_variances(&self) -> Array2<f32> {
        let frames = self.obs.shape()[0];
        let bins = self.obs.shape()[1];
        match self.model {
            SourceModel::Gauss => {
                let mut r = Array2::zeros((frames, self.n_src));
                for t in 0..frames {
                    for k in 0..self.n_src {
                        let mut acc = 0.0f32;
                        for f in 0..bins {
                            acc += self.estimated[(t, f, k)].norm_sqr();
                        }
                        r[(t, k)] = (acc / bins as f32).max(EPS);
                    }
                }
                r
            }
        }
    }

    fn step_ip1(&mut self) {
        let frames = self.obs.shape()[0];
        let bins = self.obs.shape()[1];
        let n = self.n_src;
        let r = self.frame_variances();

        let mut v = vec![Complex::new(0.0f32, 0.0); n * n];
        let mut m = vec![Complex::new(0.0f32, 0.0); n * n];
        let mut w = vec![Complex::new(0.0f32, 0.0); n];

        for k in 0..n {
            for f in 0..bins {
                // Weighted covariance V = mean_t x x^H / r[t, k].
                v.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
                for t in 0..frames {
                    let weight = 1.0 / r[(t, k)];
                    for a in 0..n {
                        let xa = self.obs[(t, f, a)];
                        for b in 0..n {
                            v[a * n + b] += xa * self.obs[(t, f, b)].conj() * weight;
                        }
                    }
                }
                let inv_t = 1.0 / frames as f32;
                v.iter_mut().for_each(|c| *c *= inv_t);

                // w = (W V)^{-1} e_k
                for a in 0..n {
                    for b in 0..n {
                        let mut acc = Complex::new(0.0f32, 0.0);
                        for c in 0..n {
                            acc += self.demix[(f, a, c)] * v[c * n + b];
                        }
                        m[a * n + b] = acc;
                    }
                }
                w.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
                w[k] = Complex::new(1.0, 0.0);
                if solve_in_place(&mut m, &mut w, n).is_err() {
                    // Singular system for this bin; leave the row unchanged.
                    continue;
                }

                // Normalize by sqrt(w^H V w) and store the row as w^H.
                let mut quad = Complex::new(0.0f32, 0.0);
                for a in 0..n {
                    for b in 0..n {
                        quad += w[a].conj() * v[a * n + b] * w[b];
                    }
                }
                let norm = quad.re.max(EPS).sqrt();
                for c in 0..n {
                    self.demix[(f, k, c)] = (w[c] / norm).conj();
                }
            }
        }
    }

    fn redemix(&mut self) {
        let frames = self.obs.shape()[0];
        let bins = self.obs.shape()[1];
        let n = self.n_src;
        for t in 0..frames {
            for f in 0..bins {
                for k in 0..n {
                    let mut acc = Complex::new(0.0f32, 0.0);
                    for c in 0..n {
                        acc += self.demix[(f, k, c)] * self.obs[(t, f, c)];
                    }
                    self.estimated[(t, f, k)] = acc;
                }
            }
        }
    }

    fn log_abs_det(&self, f: usize) -> f32 {
        let n = self.n_src;
        let mut a: Vec<Complex<f32>> = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                a.push(self.demix[(f, i, j)]);
            }
        }
        let mut log_det = 0.0f32;
        for col in 0..n {
            let mut pivot = col;
            let mut best = a[col * n + col].norm_sqr();
            for row in (col + 1)..n {
                let cand = a[row * n + col].norm_sqr();
                if cand > best {
                    best = cand;
                    pivot = row;
                }
            }
            if best <= EPS * EPS {
                return f32::MIN / 2.0;
            }
            if pivot != col {
                for j in 0..n {
                    a.swap(col * n + j, pivot * n + j);
                }
            }
            let p = a[col * n + col];
            log_det += p.norm().ln();
            for row in (col + 1)..n {
                let factor = a[row * n + col] / p;
                for j in col..n {
                    let sub = factor * a[col * n + j];
                    a[row * n + j] -= sub;
                }
            }
        }
        log_det
    }
}

/// Resolve the per-source scale ambiguity: rescale each estimated source by
/// the matching entry of the inverted demixing matrix at the reference
/// microphone, so the estimates sum back to the observed reference channel.
pub fn projection_back(
    est: &Array3<Complex<f32>>,
    ref_mic: usize,
    demix: &Array3<Complex<f32>>,
) -> Result<Array3<Complex<f32>>> {
    let frames = est.shape()[0];
    let bins = est.shape()[1];
    let n = est.shape()[2];
    if demix.shape() != &[bins, n, n] {
        return Err(anyhow!(
            "demixing filter shape {:?} does not match estimate ({} bins, {} sources)",
            demix.shape(),
            bins,
            n
        )
        .into());
    }
    if ref_mic >= n {
        return Err(anyhow!("reference microphone {} out of range", ref_mic).into());
    }

    // scale[f, k] = (W_f^{-1})[ref_mic, k]
    let mut scale = Array2::zeros((bins, n));
    let mut a = vec![Complex::new(0.0f32, 0.0); n * n];
    let mut rhs = vec![Complex::new(0.0f32, 0.0); n];
    for f in 0..bins {
        for k in 0..n {
            for i in 0..n {
                for j in 0..n {
                    a[i * n + j] = demix[(f, i, j)];
                }
            }
            rhs.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
            rhs[k] = Complex::new(1.0, 0.0);
            solve_in_place(&mut a, &mut rhs, n)
                .map_err(|_| anyhow!("singular demixing matrix at bin {}", f))?;
            scale[(f, k)] = rhs[ref_mic];
        }
    }

    let mut out = est.clone();
    for t in 0..frames {
        for f in 0..bins {
            for k in 0..n {
                out[(t, f, k)] *= scale[(f, k)];
            }
        }
    }
    Ok(out)
}

/// Gaussian elimination with partial pivoting on a row-major `n x n` system.
/// Overwrites `a`; `b` holds the solution on success.
fn solve_in_place(
    a: &mut [Complex<f32>],
    b: &mut [Complex<f32>],
    n: usize,
) -> std::result::Result<(), ()> {
    for col in 0..n {
        let mut pivot = col;
        let mut best = a[col * n + col].norm_sqr();
        for row in (col + 1)..n {
            let cand = a[row * n + col].norm_sqr();
            if cand > best {
                best = cand;
                pivot = row;
            }
        }
        if best <= EPS * EPS {
            return Err(());
        }
        if pivot != col {
            for j in 0..n {
                a.swap(col * n + j, pivot * n + j);
            }
            b.swap(col, pivot);
        }
        let p = a[col * n + col];
        for row in (col + 1)..n {
            let factor = a[row * n + col] / p;
            for j in col..n {
                let sub = factor * a[col * n + j];
                a[row * n + j] -= sub;
            }
            let sub = factor * b[col];
            b[row] -= sub;
        }
    }
    for col in (0..n).rev() {
        let mut acc = b[col];
        for j in (col + 1)..n {
            acc -= a[col * n + j] * b[j];
        }
        b[col] = acc / a[col * n + col];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::Rng;

    fn random_complex(rng: &mut impl Rng) -> Complex<f32> {
        Complex::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    }

    #[test]
    fn solver_inverts_known_system() {
        // [[2, 1], [1, 3]] x = [5, 10] -> x = [1, 3]
        let mut a = vec![
            Complex::new(2.0, 0.0),
            Complex::new(1.0, 0.0),
            Complex::new(1.0, 0.0),
            Complex::new(3.0, 0.0),
        ];
        let mut b = vec![Complex::new(5.0, 0.0), Complex::new(10.0, 0.0)];
        solve_in_place(&mut a, &mut b, 2).unwrap();
        assert!((b[0] - Complex::new(1.0, 0.0)).norm() < 1e-5);
        assert!((b[1] - Complex::new(3.0, 0.0)).norm() < 1e-5);
    }

    #[test]
    fn identity_init_estimate_is_observation() {
        let mut rng = rand::thread_rng();
        let obs = Array3::from_shape_fn((4, 5, 2), |_| random_complex(&mut rng));
        let iva = AuxIva::new(obs.clone(), DemixUpdate::Ip1, SourceModel::Gauss).unwrap();
        for (a, b) in iva.estimated().iter().zip(obs.iter()) {
            assert!((a - b).norm() < 1e-7);
        }
    }

    #[test]
    fn projected_sources_sum_to_reference_channel() {
        let mut rng = rand::thread_rng();
        let (frames, bins, n) = (6, 9, 2);
        let obs = Array3::from_shape_fn((frames, bins, n), |_| random_complex(&mut rng));

        // A well-conditioned demixing matrix per bin: identity plus a small
        // random perturbation.
        let mut demix = Array3::zeros((bins, n, n));
        for f in 0..bins {
            for i in 0..n {
                for j in 0..n {
                    let mut v = random_complex(&mut rng) * 0.3;
                    if i == j {
                        v += Complex::new(1.0, 0.0);
                    }
                    demix[(f, i, j)] = v;
                }
            }
        }

        let mut est = Array3::zeros((frames, bins, n));
        for t in 0..frames {
            for f in 0..bins {
                for k in 0..n {
                    let mut acc = Complex::new(0.0f32, 0.0);
                    for c in 0..n {
                        acc += demix[(f, k, c)] * obs[(t, f, c)];
                    }
                    est[(t, f, k)] = acc;
                }
            }
        }

        let ref_mic = 1;
        let z = projection_back(&est, ref_mic, &demix).unwrap();
        for t in 0..frames {
            for f in 0..bins {
                let mut sum = Complex::new(0.0f32, 0.0);
                for k in 0..n {
                    sum += z[(t, f, k)];
                }
                assert!(
                    (sum - obs[(t, f, ref_mic)]).norm() < 1e-4,
                    "frame {t} bin {f}: {sum} vs {}",
                    obs[(t, f, ref_mic)]
                );
            }
        }
    }

    #[test]
    fn loss_decreases_over_iterations() {
        let mut rng = rand::thread_rng();
        let (frames, bins, n) = (40, 17, 2);

        // Nonstationary independent sources with disjoint activity patterns,
        // mixed by a fixed matrix per bin.
        let mixing = [
            [Complex::new(1.0f32, 0.0), Complex::new(0.6, 0.1)],
            [Complex::new(0.5, -0.2), Complex::new(1.0, 0.0)],
        ];
        let mut obs = Array3::zeros((frames, bins, n));
        for t in 0..frames {
            let env = [
                (t as f32 * 0.7).sin().abs() + 0.1,
                (t as f32 * 0.23 + 1.0).cos().abs() + 0.1,
            ];
            for f in 0..bins {
                let s = [
                    random_complex(&mut rng) * env[0],
                    random_complex(&mut rng) * env[1],
                ];
                for c in 0..n {
                    obs[(t, f, c)] = mixing[c][0] * s[0] + mixing[c][1] * s[1];
                }
            }
        }

        let mut iva = AuxIva::new(obs, DemixUpdate::Ip1, SourceModel::Gauss).unwrap();
        let initial = iva.loss();
        for _ in 0..5 {
            iva.step();
        }
        assert!(
            iva.loss() < initial,
            "loss did not decrease: {} -> {}",
            initial,
            iva.loss()
        );
    }
}
