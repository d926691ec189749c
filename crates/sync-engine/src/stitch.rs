// crates/sync-engine/src/stitch.rs
//
// C6: per-track full-resolution stitching. Re-reads each clip's original
// media one at a time, applies drift correction, shapes channels, and
// mixes into the track's dense output buffer. Mirrors the per-clip
// re-decode and cancellation-checked loop shape of
// velocut-media/src/encode.rs, minus the H.264/AAC muxing that module
// exists for.

use sync_core::error::EngineResult;
use sync_core::model::{AnalysisResult, Clip, Config, Track};
use sync_core::progress::{CancelHandle, ProgressEvent};

use crate::cache::{ArtifactKind, SessionCache};
use crate::decode;
use crate::decoder_proc;
use crate::resample;

const MIX_SILENCE_FLOOR: f64 = 1e-10;

/// Per-track dense output, length = `round(result.total_timeline_s * export_rate)`.
pub struct StitchedTrack {
    pub track_name: String,
    pub channels: u16,
    pub samples: Vec<f64>,
}

/// Stitch every non-empty track into full-resolution output at
/// `export_rate`, checking `cancel` between clips.
pub fn stitch_all(
    tracks: &[Track],
    result: &AnalysisResult,
    config: &Config,
    export_rate: u32,
    cache: &SessionCache,
    cancel: &CancelHandle,
    mut progress: impl FnMut(ProgressEvent),
) -> EngineResult<Vec<StitchedTrack>> {
    let total_clips: u64 = tracks.iter().map(|t| t.clips.len() as u64).sum();
    let total_samples = (result.total_timeline_s * export_rate as f64).round() as usize;

    let mut outputs = Vec::with_capacity(tracks.len());
    let mut step = 0u64;

    for track in tracks {
        let channels = track.clips.iter().map(|c| c.original_channels).max().unwrap_or(1);
        let mut buffer = vec![0.0f64; total_samples * channels as usize];

        for clip in &track.clips {
            step += 1;
            progress(ProgressEvent::new(step, total_clips, format!("Stitching '{}'...", clip.name)));
            if cancel.is_cancelled() {
                return Err(sync_core::error::EngineError::Cancelled);
            }

            let full_res = read_full_resolution(clip, export_rate, cache, cancel)?;
            let corrected = apply_drift_correction(clip, full_res, clip.original_channels, config);
            let shaped = shape_channels(&corrected, clip.original_channels, channels);

            mix_into(&mut buffer, &shaped, channels, clip.timeline_offset_at_sr(export_rate), total_samples);
        }

        outputs.push(StitchedTrack {
            track_name: track.name.clone(),
            channels,
            samples: buffer,
        });
    }

    Ok(outputs)
}

/// Re-read a clip's original media at `export_rate`, preserving its native
/// channel layout as an interleaved buffer. Video reads come back already
/// decoded at `clip.original_channels` (ffmpeg is told the target channel
/// count directly); native reads preserve whatever the file itself carries
/// and are resampled channel-by-channel. `shape_channels` below then maps
/// this original-channel buffer onto the track's output channel count.
fn read_full_resolution(
    clip: &Clip,
    export_rate: u32,
    cache: &SessionCache,
    cancel: &CancelHandle,
) -> EngineResult<Vec<f64>> {
    if clip.is_video {
        let key = cache.content_key(&clip.file_path)?;
        let wav_path = cache.reserve(&key, "fullres.wav", ArtifactKind::FullResolution)?;
        decoder_proc::decode_full_resolution_wav(
            &clip.file_path,
            &wav_path,
            export_rate,
            clip.original_channels,
            cancel,
        )?;
        let decoded = decode::decode_native_audio_channels(&wav_path)?;
        cache.release(&wav_path);
        Ok(decoded.interleaved)
    } else {
        let decoded = decode::decode_native_audio_channels(&clip.file_path)?;
        Ok(resample::resample_channels_to_rate(
            &decoded.interleaved,
            decoded.channels,
            decoded.sample_rate,
            export_rate,
        ))
    }
}

/// Resample to `round(original_frame_count / (1 + drift_ppm * 1e-6))`
/// frames, channel-by-channel, when drift correction is enabled and the
/// clip's measured drift clears both the confidence and magnitude
/// thresholds. Positive ppm (clip ran fast) means the corrected output is
/// compressed.
fn apply_drift_correction(clip: &Clip, samples: Vec<f64>, channels: u16, config: &Config) -> Vec<f64> {
    let should_correct = config.drift_correction
        && clip.drift_ppm.abs() >= config.drift_threshold_ppm
        && clip.drift_r2 > 0.5;
    if !should_correct {
        return samples;
    }
    let ch = channels.max(1) as usize;
    let total_frames = samples.len() / ch;
    let corrected_frames = (total_frames as f64 / (1.0 + clip.drift_ppm * 1e-6)).round() as usize;
    resample::resample_channels_to_length(&samples, channels, corrected_frames)
}

/// Shape interleaved audio with `source_channels` channels to
/// `target_channels`: replicate mono to every output channel, mean-mix
/// down to mono, or for an arbitrary channel-count mismatch copy the
/// overlapping channels and zero-pad/drop the rest.
fn shape_channels(source: &[f64], source_channels: u16, target_channels: u16) -> Vec<f64> {
    let source_channels = source_channels.max(1) as usize;
    let target_channels = target_channels.max(1) as usize;
    if source_channels == target_channels {
        return source.to_vec();
    }
    let frames = source.len() / source_channels;

    if source_channels == 1 {
        let mut out = Vec::with_capacity(frames * target_channels);
        for &s in source {
            for _ in 0..target_channels {
                out.push(s);
            }
        }
        return out;
    }

    if target_channels == 1 {
        let mut out = Vec::with_capacity(frames);
        for frame in source.chunks(source_channels) {
            out.push(frame.iter().sum::<f64>() / source_channels as f64);
        }
        return out;
    }

    let mut out = vec![0.0; frames * target_channels];
    let copy_channels = source_channels.min(target_channels);
    for frame in 0..frames {
        let src_base = frame * source_channels;
        let dst_base = frame * target_channels;
        out[dst_base..dst_base + copy_channels].copy_from_slice(&source[src_base..src_base + copy_channels]);
    }
    out
}

/// Mix an interleaved, channel-shaped clip buffer into `buffer` starting at
/// `start_sample`, averaging with existing non-silent content and copying
/// over silence. The non-silent test is per-frame across all channels.
fn mix_into(buffer: &mut [f64], clip: &[f64], channels: u16, start_sample: i64, total_samples: usize) {
    let channels = channels.max(1) as usize;
    if start_sample < 0 {
        return;
    }
    let start_frame = start_sample as usize;
    if start_frame >= total_samples {
        return;
    }
    let clip_frames = clip.len() / channels;
    let usable_frames = clip_frames.min(total_samples - start_frame);

    for frame in 0..usable_frames {
        let buf_base = (start_frame + frame) * channels;
        let clip_base = frame * channels;
        let frame_is_silent = (0..channels).all(|ch| buffer[buf_base + ch].abs() < MIX_SILENCE_FLOOR);
        for ch in 0..channels {
            let new_val = clip[clip_base + ch];
            buffer[buf_base + ch] = if frame_is_silent {
                new_val
            } else {
                (buffer[buf_base + ch] + new_val) / 2.0
            };
        }
    }
}

/// Clip every sample to `[-1.0, 1.0]`, the one place amplitude clamping
/// happens in the pipeline.
pub fn clamp_output(samples: &mut [f64]) {
    for s in samples.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn mix_into_copies_over_silence() {
        let mut buffer = vec![0.0; 10];
        let clip = vec![0.5, 0.5, 0.5];
        mix_into(&mut buffer, &clip, 1, 2, 10);
        assert_eq!(&buffer[2..5], &[0.5, 0.5, 0.5]);
        assert_eq!(buffer[0], 0.0);
    }

    #[test]
    fn mix_into_averages_existing_nonsilent_content() {
        let mut buffer = vec![0.0; 5];
        buffer[1] = 0.2;
        let clip = vec![0.4];
        mix_into(&mut buffer, &clip, 1, 1, 5);
        assert!((buffer[1] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn mix_into_clips_source_length_to_buffer_bounds() {
        let mut buffer = vec![0.0; 3];
        let clip = vec![1.0, 1.0, 1.0, 1.0];
        mix_into(&mut buffer, &clip, 1, 1, 3);
        assert_eq!(buffer, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn shape_channels_replicates_mono_to_stereo() {
        let mono = vec![0.1, 0.2];
        let stereo = shape_channels(&mono, 1, 2);
        assert_eq!(stereo, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn shape_channels_mean_mixes_stereo_to_mono() {
        let stereo = vec![1.0, 0.0, 0.4, 0.6];
        let mono = shape_channels(&stereo, 2, 1);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn shape_channels_copies_overlap_and_zero_pads_when_growing() {
        let stereo = vec![0.2, 0.4, 0.6, 0.8];
        let quad = shape_channels(&stereo, 2, 4);
        assert_eq!(quad, vec![0.2, 0.4, 0.0, 0.0, 0.6, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn shape_channels_drops_extra_channels_when_shrinking() {
        let quad = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8];
        let stereo = shape_channels(&quad, 4, 2);
        assert_eq!(stereo, vec![0.1, 0.2, 0.5, 0.6]);
    }

    #[test]
    fn apply_drift_correction_resamples_per_channel_frame_count() {
        let mut clip = Clip::new(PathBuf::from("c.wav"), 48000, 2, 1.0);
        clip.drift_ppm = 10.0;
        clip.drift_r2 = 0.9;
        let config = Config::default();
        let samples = vec![0.0; 200_000]; // 100_000 stereo frames
        let corrected = apply_drift_correction(&clip, samples, 2, &config);
        let expected_frames = (100_000f64 / (1.0 + 10.0 * 1e-6)).round() as usize;
        assert_eq!(corrected.len(), expected_frames * 2);
    }

    #[test]
    fn apply_drift_correction_skips_below_r2_threshold() {
        let mut clip = Clip::new(PathBuf::from("c.wav"), 48000, 1, 1.0);
        clip.drift_ppm = 10.0;
        clip.drift_r2 = 0.2;
        let config = Config::default();
        let samples = vec![0.0; 1000];
        let corrected = apply_drift_correction(&clip, samples.clone(), 1, &config);
        assert_eq!(corrected, samples);
    }

    #[test]
    fn clamp_output_bounds_to_unit_range() {
        let mut samples = vec![1.5, -2.0, 0.3];
        clamp_output(&mut samples);
        assert_eq!(samples, vec![1.0, -1.0, 0.3]);
    }
}
