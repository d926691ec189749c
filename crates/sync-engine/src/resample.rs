// crates/sync-engine/src/resample.rs
//
// Two distinct resamplers, kept distinct deliberately:
//   - `resample_poly`: rational polyphase filtering for sample-rate
//     conversion (8 kHz analysis downmix, export-rate upmix). The up/down
//     ratio derivation and 256-factor shrink loop are retained verbatim
//     from the reference implementation.
//   - `resample_to_length`: FFT-domain resample to an exact target sample
//     count, used only for clock-drift correction, matching
//     scipy.signal.resample's behavior there.

use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Cap polyphase up/down factors at 256 by repeated halving, matching the
/// reference implementation's shrink loop exactly.
fn capped_ratio(orig_sr: u32, target_sr: u32) -> (u32, u32) {
    let g = gcd(orig_sr, target_sr).max(1);
    let mut up = target_sr / g;
    let mut down = orig_sr / g;
    const MAX_FACTOR: u32 = 256;
    while up > MAX_FACTOR || down > MAX_FACTOR {
        up = (up + 1) / 2;
        down = (down + 1) / 2;
        if up == 0 {
            up = 1;
        }
        if down == 0 {
            down = 1;
        }
    }
    (up, down)
}

/// Windowed-sinc lowpass FIR, cutoff expressed as a fraction of the
/// upsampled Nyquist rate. `half_len` taps on each side of the center tap.
fn design_lowpass(cutoff: f64, half_len: usize) -> Vec<f64> {
    let len = 2 * half_len + 1;
    let mut taps = vec![0.0; len];
    for (i, tap) in taps.iter_mut().enumerate() {
        let n = i as isize - half_len as isize;
        let sinc = if n == 0 {
            2.0 * cutoff
        } else {
            (2.0 * std::f64::consts::PI * cutoff * n as f64).sin() / (std::f64::consts::PI * n as f64)
        };
        // Hann window.
        let w = 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (len - 1) as f64).cos();
        *tap = sinc * w;
    }
    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }
    taps
}

/// Rational polyphase resample: upsample by `up` (zero-stuffing), lowpass
/// filter at `min(1/up, 1/down)`, downsample by `down`.
pub fn resample_poly(data: &[f64], up: u32, down: u32) -> Vec<f64> {
    if up == down {
        return data.to_vec();
    }
    let up = up as usize;
    let down = down as usize;
    let cutoff = 0.5 / (up.max(down) as f64);
    let half_len = (10 * up.max(down)).clamp(16, 2048);
    let filter = design_lowpass(cutoff, half_len);

    // Upsampled-then-filtered length, before downsampling.
    let upsampled_len = data.len() * up;
    let out_len = (upsampled_len + down - 1) / down;
    let mut output = Vec::with_capacity(out_len);

    let center = half_len as isize;
    for out_idx in 0..out_len {
        let center_up = (out_idx * down) as isize;
        let mut acc = 0.0;
        for (tap_idx, &tap) in filter.iter().enumerate() {
            let up_pos = center_up + tap_idx as isize - center;
            if up_pos < 0 {
                continue;
            }
            let up_pos = up_pos as usize;
            if up_pos % up != 0 {
                continue;
            }
            let data_idx = up_pos / up;
            if data_idx >= data.len() {
                continue;
            }
            acc += tap * data[data_idx] * up as f64;
        }
        output.push(acc);
    }
    output
}

/// Resample a clip's original sample rate to `target_sr`, capping the
/// polyphase ratio per the verbatim shrink rule.
pub fn resample_to_rate(data: &[f64], orig_sr: u32, target_sr: u32) -> Vec<f64> {
    if orig_sr == target_sr {
        return data.to_vec();
    }
    let (up, down) = capped_ratio(orig_sr, target_sr);
    resample_poly(data, up, down)
}

fn deinterleave(data: &[f64], channels: usize) -> Vec<Vec<f64>> {
    let frames = data.len() / channels;
    let mut out: Vec<Vec<f64>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for frame in 0..frames {
        for (ch, bucket) in out.iter_mut().enumerate() {
            bucket.push(data[frame * channels + ch]);
        }
    }
    out
}

fn interleave(channels: &[Vec<f64>]) -> Vec<f64> {
    let frames = channels.first().map(|c| c.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len());
    for frame in 0..frames {
        for bucket in channels {
            out.push(bucket[frame]);
        }
    }
    out
}

/// Per-channel variant of `resample_to_rate`: deinterleaves, resamples each
/// channel independently, and re-interleaves, so channel identity survives
/// a sample-rate conversion.
pub fn resample_channels_to_rate(interleaved: &[f64], channels: u16, orig_sr: u32, target_sr: u32) -> Vec<f64> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return resample_to_rate(interleaved, orig_sr, target_sr);
    }
    let per_channel = deinterleave(interleaved, channels);
    let resampled: Vec<Vec<f64>> = per_channel
        .iter()
        .map(|c| resample_to_rate(c, orig_sr, target_sr))
        .collect();
    interleave(&resampled)
}

/// Per-channel variant of `resample_to_length`, used by drift correction on
/// multi-channel full-resolution buffers.
pub fn resample_channels_to_length(interleaved: &[f64], channels: u16, target_frames: usize) -> Vec<f64> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return resample_to_length(interleaved, target_frames);
    }
    let per_channel = deinterleave(interleaved, channels);
    let resampled: Vec<Vec<f64>> = per_channel
        .iter()
        .map(|c| resample_to_length(c, target_frames))
        .collect();
    interleave(&resampled)
}

/// FFT-domain resample to an exact output length, used only for clock-drift
/// correction (not sample-rate conversion). Equivalent in effect to
/// scipy.signal.resample: truncate or zero-pad the spectrum symmetrically
/// around Nyquist, then inverse-transform and rescale.
pub fn resample_to_length(data: &[f64], target_len: usize) -> Vec<f64> {
    let n = data.len();
    if n == 0 || target_len == 0 {
        return vec![0.0; target_len];
    }
    if n == target_len {
        return data.to_vec();
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf: Vec<Complex64> = data.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    fft.process(&mut buf);

    let m = target_len;
    let mut spectrum = vec![Complex64::new(0.0, 0.0); m];
    let copy_len = n.min(m);
    let half = copy_len / 2;

    // Positive frequencies (including DC) and, for even copy_len, Nyquist.
    for i in 0..=half {
        if i < n && i < m {
            spectrum[i] = buf[i];
        }
    }
    // Negative frequencies, mapped to the tail of both arrays.
    for i in 1..(copy_len - half) {
        let src = n - i;
        let dst = m - i;
        spectrum[dst] = buf[src];
    }

    let ifft = planner.plan_fft_inverse(m);
    ifft.process(&mut spectrum);

    // rustfft's inverse transform is unnormalized (scales by n, the forward
    // transform's length); dividing by n recovers the true amplitude.
    let norm = 1.0 / n as f64;
    spectrum.iter().map(|c| c.re * norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_ratio_never_exceeds_256() {
        let (up, down) = capped_ratio(1, 100_000);
        assert!(up <= 256 && down <= 256);
    }

    #[test]
    fn capped_ratio_trivial_case() {
        assert_eq!(capped_ratio(44100, 44100), (1, 1));
    }

    #[test]
    fn resample_to_rate_same_rate_is_identity() {
        let data = vec![0.1, 0.2, -0.3, 0.4];
        assert_eq!(resample_to_rate(&data, 48000, 48000), data);
    }

    #[test]
    fn resample_to_length_preserves_dc_component() {
        let data = vec![1.0; 64];
        let out = resample_to_length(&data, 100);
        let mean: f64 = out.iter().sum::<f64>() / out.len() as f64;
        assert!((mean - 1.0).abs() < 0.05);
    }

    #[test]
    fn resample_to_length_same_length_is_identity() {
        let data = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_to_length(&data, 3), data);
    }

    #[test]
    fn deinterleave_then_interleave_round_trips() {
        let stereo = vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let channels = deinterleave(&stereo, 2);
        assert_eq!(channels, vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]]);
        assert_eq!(interleave(&channels), stereo);
    }

    #[test]
    fn resample_channels_to_rate_keeps_channels_independent() {
        let left = vec![1.0; 64];
        let right = vec![-1.0; 64];
        let interleaved = interleave(&[left, right]);
        let out = resample_channels_to_rate(&interleaved, 2, 32000, 16000);
        let back = deinterleave(&out, 2);
        assert!(back[0].iter().all(|&v| v > 0.5));
        assert!(back[1].iter().all(|&v| v < -0.5));
    }

    #[test]
    fn resample_channels_to_length_preserves_frame_count_per_channel() {
        let interleaved = interleave(&[vec![1.0; 50], vec![2.0; 50]]);
        let out = resample_channels_to_length(&interleaved, 2, 30);
        assert_eq!(out.len(), 60);
    }
}
