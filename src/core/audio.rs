//! WAV reading/writing and PCM sample conversion.

use crate::{
    error::{BssError, Result},
    types::AudioData,
};

use std::path::Path;

/// Integer PCM sample types that can be rescaled to floating point.
pub trait PcmSample: Copy {
    const BITS: u32;
    const MIN: i64;
    fn to_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;
}

macro_rules! impl_pcm_sample {
    ($t:ty, $bits:expr) => {
        impl PcmSample for $t {
            const BITS: u32 = $bits;
            const MIN: i64 = <$t>::MIN as i64;
            fn to_i64(self) -> i64 {
                self as i64
            }
            fn from_i64(v: i64) -> Self {
                v as $t
            }
        }
    };
}

impl_pcm_sample!(u8, 8);
impl_pcm_sample!(i8, 8);
impl_pcm_sample!(i16, 16);
impl_pcm_sample!(i32, 32);

/// Convert PCM samples to floating point in [-1, 1).
///
/// The offset and scale come from the bit width of the source type, so
/// unsigned and signed PCM both map linearly onto the same range.
pub fn pcm_to_float<S: PcmSample>(pcm: &[S]) -> Vec<f32> {
    let abs_max = 1i64 << (S::BITS - 1);
    let offset = S::MIN + abs_max;
    let scale = abs_max as f32;
    pcm.iter()
        .map(|&s| (s.to_i64() - offset) as f32 / scale)
        .collect()
}

/// Reverse of [`pcm_to_float`], with clamping to the integer range.
pub fn float_to_pcm<S: PcmSample>(x: &[f32]) -> Vec<S> {
    let abs_max = 1i64 << (S::BITS - 1);
    let offset = S::MIN + abs_max;
    let max = S::MIN + 2 * abs_max - 1;
    x.iter()
        .map(|&v| {
            let scaled = (v as f64 * abs_max as f64).round() as i64 + offset;
            S::from_i64(scaled.clamp(S::MIN, max))
        })
        .collect()
}

/// Rescale signed integer samples of an arbitrary bit depth (e.g. 24-bit WAV
/// payloads read as `i32`).
fn scale_ints(pcm: &[i32], bits: u16) -> Vec<f32> {
    let abs_max = (1i64 << (bits - 1)) as f32;
    pcm.iter().map(|&s| s as f32 / abs_max).collect()
}

/// Read an integer-PCM WAV file into normalized floating point samples.
///
/// Float-format WAVs are rejected: the premixed recordings this crate consumes
/// are integer PCM, and the conversion contract is only defined for integers.
pub fn read_pcm_wav(path: impl AsRef<Path>) -> Result<AudioData> {
    let path = path.as_ref();
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate == 0 {
        return Err(BssError::InvalidSampleRate(spec.sample_rate));
    }
    if spec.sample_format != hound::SampleFormat::Int {
        return Err(BssError::UnsupportedFormat(format!(
            "{}: expected integer PCM samples",
            path.display()
        )));
    }
    if !(8..=32).contains(&spec.bits_per_sample) {
        return Err(BssError::UnsupportedFormat(format!(
            "{}: {} bits per sample",
            path.display(),
            spec.bits_per_sample
        )));
    }

    let samples = if spec.bits_per_sample == 16 {
        let pcm = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        pcm_to_float(&pcm)
    } else {
        let pcm = reader
            .samples::<i32>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        scale_ints(&pcm, spec.bits_per_sample)
    };

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Write audio as a 32-bit float WAV, no re-quantization.
pub fn write_wav_f32(path: impl AsRef<Path>, audio: &AudioData) -> Result<()> {
    if audio.sample_rate == 0 {
        return Err(BssError::InvalidSampleRate(audio.sample_rate));
    }
    let spec = hound::WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in &audio.samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::Rng;

    #[test]
    fn i16_range_and_linearity() {
        let out = pcm_to_float::<i16>(&[i16::MIN, -16384, 0, 16384, i16::MAX]);
        assert_abs_diff_eq!(out[0], -1.0);
        assert_abs_diff_eq!(out[1], -0.5);
        assert_abs_diff_eq!(out[2], 0.0);
        assert_abs_diff_eq!(out[3], 0.5);
        assert!(out[4] < 1.0);
        for &v in &out {
            assert!((-1.0..1.0).contains(&v));
        }
    }

    #[test]
    fn u8_is_offset_binary() {
        let out = pcm_to_float::<u8>(&[0, 128, 255]);
        assert_abs_diff_eq!(out[0], -1.0);
        assert_abs_diff_eq!(out[1], 0.0);
        assert_abs_diff_eq!(out[2], 127.0 / 128.0);
    }

    #[test]
    fn round_trip_preserves_samples() {
        let mut rng = rand::thread_rng();
        let pcm: Vec<i16> = (0..2048).map(|_| rng.gen()).collect();
        let back = float_to_pcm::<i16>(&pcm_to_float(&pcm));
        assert_eq!(pcm, back);
    }

    #[test]
    fn reads_back_written_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        let pcm: Vec<i16> = (0..800)
            .map(|i| {
                let x = (i as f32 * 0.1).sin() * 0.5;
                (x * 32768.0) as i16
            })
            .collect();
        for &s in &pcm {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_pcm_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.channels, 1);
        let expect = pcm_to_float(&pcm);
        for (a, b) in audio.samples.iter().zip(expect.iter()) {
            assert_abs_diff_eq!(*a, *b);
        }
    }

    #[test]
    fn rejects_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");

        let audio = AudioData {
            samples: vec![0.0, 0.25, -0.25],
            sample_rate: 8000,
            channels: 1,
        };
        write_wav_f32(&path, &audio).unwrap();

        match read_pcm_wav(&path) {
            Err(BssError::UnsupportedFormat(_)) => {}
            other => panic!("expected UnsupportedFormat, got {:?}", other),
        }
    }
}
