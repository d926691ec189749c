// crates/sync-engine/src/correlate.rs
//
// FFT-based normalized cross-correlation. `delay` implements compute_delay;
// `windowed_offset` implements _windowed_offset + _subsample_peak, used only
// by the drift estimator in placement.rs.

use std::sync::Arc;

use rustfft::num_complex::{Complex32, ComplexFloat};
use rustfft::{Fft, FftPlanner};

const NORMALIZE_FLOOR: f32 = 1e-10;
const PARABOLIC_DENOM_FLOOR: f32 = 1e-30;

/// Integer-sample delay of `target` relative to `reference`, plus a
/// peak-to-mean confidence score. `max_offset_s` clips the search window
/// symmetrically around zero delay.
pub fn delay(reference: &[f32], target: &[f32], sr: u32, max_offset_s: Option<f64>) -> (i64, f64) {
    let corr = cross_correlate(reference, target);
    let center = target.len() as i64 - 1;

    let (lo, hi) = match max_offset_s {
        Some(max_s) => {
            let max_samples = (max_s * sr as f64) as i64;
            let lo = (center - max_samples).max(0);
            let hi = (center + max_samples + 1).min(corr.len() as i64);
            (lo, hi)
        }
        None => (0, corr.len() as i64),
    };

    let mut peak_idx = lo;
    let mut peak_abs = f32::MIN;
    for i in lo..hi {
        let mag = corr[i as usize].abs();
        if mag > peak_abs {
            peak_abs = mag;
            peak_idx = i;
        }
    }

    let delay_samples = peak_idx - center;
    let mean_abs: f32 = corr.iter().map(|c| c.abs()).sum::<f32>() / corr.len() as f32;
    let confidence = peak_abs as f64 / (mean_abs as f64 + 1e-10);

    (delay_samples, confidence)
}

/// Sub-sample offset between two equal-length windows via FFT
/// cross-correlation plus parabolic peak refinement.
pub fn windowed_offset(ref_segment: &[f32], clip_segment: &[f32]) -> f64 {
    let corr = cross_correlate(ref_segment, clip_segment);
    let abs_corr: Vec<f32> = corr.iter().map(|c| c.abs()).collect();

    let mut peak_idx = 0usize;
    let mut peak_val = f32::MIN;
    for (i, &v) in abs_corr.iter().enumerate() {
        if v > peak_val {
            peak_val = v;
            peak_idx = i;
        }
    }

    let refined = subsample_peak(&abs_corr, peak_idx);
    refined - (clip_segment.len() as f64 - 1.0)
}

/// Parabolic interpolation around `peak_idx` using its two neighbors.
/// Falls back to the integer position at array edges or a near-zero
/// denominator.
fn subsample_peak(correlation: &[f32], peak_idx: usize) -> f64 {
    let n = correlation.len();
    if peak_idx == 0 || peak_idx >= n - 1 {
        return peak_idx as f64;
    }
    let alpha = correlation[peak_idx - 1];
    let beta = correlation[peak_idx];
    let gamma = correlation[peak_idx + 1];
    let denom = alpha - 2.0 * beta + gamma;
    if denom.abs() < PARABOLIC_DENOM_FLOOR {
        return peak_idx as f64;
    }
    let adjustment = 0.5 * (alpha - gamma) / denom;
    peak_idx as f64 + adjustment as f64
}

/// Full linear cross-correlation of `reference` against `target`, both
/// peak-normalized first. Equivalent to `fftconvolve(ref, reverse(tgt))`.
/// Output length is `len(ref) + len(tgt) - 1`; index `len(tgt) - 1`
/// corresponds to zero delay.
fn cross_correlate(reference: &[f32], target: &[f32]) -> Vec<Complex32> {
    let ref_norm = peak_normalize(reference);
    let tgt_norm = peak_normalize(target);

    let out_len = ref_norm.len() + tgt_norm.len() - 1;
    let fft_len = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f32>::new();
    let fft_fwd: Arc<dyn Fft<f32>> = planner.plan_fft_forward(fft_len);
    let fft_inv: Arc<dyn Fft<f32>> = planner.plan_fft_inverse(fft_len);

    let mut a: Vec<Complex32> = ref_norm
        .iter()
        .map(|&v| Complex32::new(v, 0.0))
        .chain(std::iter::repeat(Complex32::new(0.0, 0.0)))
        .take(fft_len)
        .collect();

    // Reverse target (correlation, not convolution) and pad.
    let mut b: Vec<Complex32> = tgt_norm
        .iter()
        .rev()
        .map(|&v| Complex32::new(v, 0.0))
        .chain(std::iter::repeat(Complex32::new(0.0, 0.0)))
        .take(fft_len)
        .collect();

    fft_fwd.process(&mut a);
    fft_fwd.process(&mut b);

    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x *= *y;
    }

    fft_inv.process(&mut a);

    let scale = 1.0 / fft_len as f32;
    a.truncate(out_len);
    for c in a.iter_mut() {
        *c *= scale;
    }
    a
}

fn peak_normalize(data: &[f32]) -> Vec<f32> {
    let peak = data.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
    if peak > NORMALIZE_FLOOR {
        data.iter().map(|&v| v / peak).collect()
    } else {
        data.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_at(len: usize, pos: usize) -> Vec<f32> {
        let mut v = vec![0.0; len];
        v[pos] = 1.0;
        v
    }

    #[test]
    fn delay_recovers_known_integer_shift() {
        let reference = impulse_at(200, 100);
        let target = impulse_at(50, 20);
        let (d, confidence) = delay(&reference, &target, 8000, None);
        assert_eq!(d, 100 - 20);
        assert!(confidence > 1.0);
    }

    #[test]
    fn delay_respects_max_offset_window() {
        let reference = impulse_at(400, 300);
        let target = impulse_at(50, 0);
        // True delay is 300 samples (37.5ms at 8kHz); a 10ms window
        // excludes the true peak, so the search stays inside +-80 samples.
        let (d, _confidence) = delay(&reference, &target, 8000, Some(0.010));
        assert!(d.abs() <= 80);
    }

    #[test]
    fn silence_yields_zero_confidence_like_behavior() {
        let reference = vec![0.0f32; 100];
        let target = vec![0.0f32; 20];
        let (_d, confidence) = delay(&reference, &target, 8000, None);
        assert!(confidence.abs() < 1e6);
    }

    #[test]
    fn subsample_peak_falls_back_at_edge() {
        let corr = vec![0.1, 0.9, 0.2];
        assert_eq!(subsample_peak(&corr, 0), 0.0);
        assert_eq!(subsample_peak(&corr, 2), 2.0);
    }

    #[test]
    fn windowed_offset_recovers_subsample_shift_direction() {
        let reference = impulse_at(64, 32);
        let clip = impulse_at(64, 30);
        let offset = windowed_offset(&reference, &clip);
        // target is 2 samples earlier than reference's impulse position.
        assert!(offset < 0.0);
    }
}
