// crates/sync-engine/src/placement.rs
//
// C5: two-pass metadata-aware placement, normalization, and windowed-
// regression drift measurement with same-track inheritance.

use std::collections::HashMap;

use sync_core::error::{EngineError, EngineResult};
use sync_core::model::{AnalysisResult, Config, Track, ANALYSIS_RATE, CONFIDENCE_THRESHOLD};
use sync_core::progress::{CancelHandle, ProgressEvent};

use crate::correlate;
use crate::reference;

const MIN_DRIFT_OVERLAP_S: f64 = 60.0;
const MIN_DRIFT_WINDOWS: usize = 3;
const DRIFT_WINDOW_S: f64 = 30.0;
const DRIFT_STRIDE_S: f64 = 15.0;
const MIX_SILENCE_FLOOR: f32 = 1e-10;

fn check_cancel(cancel: &CancelHandle) -> EngineResult<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run the full placement pipeline over `tracks`, mutating every clip's
/// offset/confidence/drift fields in place and returning the summary
/// result. `progress` receives a `(step, total, message)` event per clip.
pub fn analyze(
    tracks: &mut [Track],
    config: &Config,
    cancel: &CancelHandle,
    mut progress: impl FnMut(ProgressEvent),
) -> EngineResult<AnalysisResult> {
    let total_clips: usize = tracks.iter().map(|t| t.clips.len()).sum();
    if total_clips < 2 {
        return Err(EngineError::NotEnoughData(total_clips));
    }

    for track in tracks.iter_mut() {
        track.sort_clips_by_time();
    }

    let ref_idx = reference::select_reference_index(tracks);
    tracks[ref_idx].is_reference = true;

    let total_steps = (total_clips + 4) as u64;
    let mut step = 0u64;
    progress(ProgressEvent::new(
        step,
        total_steps,
        format!("Building timeline from '{}' metadata...", tracks[ref_idx].name),
    ));
    check_cancel(cancel)?;

    let ref_audio = reference::build_reference_from_metadata(&mut tracks[ref_idx]);

    let mut warnings: Vec<String> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    let mut clip_offsets: HashMap<String, i64> = HashMap::new();

    for clip in &tracks[ref_idx].clips {
        clip_offsets.insert(clip.file_path.to_string_lossy().into_owned(), clip.timeline_offset_samples);
        confidences.push(clip.confidence);
    }

    // Pass 1.
    let mut unplaced_keys: Vec<(usize, usize)> = Vec::new();
    for (ti, track) in tracks.iter_mut().enumerate() {
        if ti == ref_idx {
            continue;
        }
        for (ci, clip) in track.clips.iter_mut().enumerate() {
            step += 1;
            progress(ProgressEvent::new(
                step,
                total_steps,
                format!("Pass 1: correlating '{}'...", clip.name),
            ));
            check_cancel(cancel)?;

            let (delay, conf) =
                correlate::delay(&ref_audio, &clip.samples, ANALYSIS_RATE, config.max_offset_s);
            clip.timeline_offset_samples = delay;
            clip.confidence = conf;
            clip.analyzed = true;

            clip_offsets.insert(clip.file_path.to_string_lossy().into_owned(), delay);
            confidences.push(conf);

            if conf < CONFIDENCE_THRESHOLD {
                unplaced_keys.push((ti, ci));
                warnings.push(format!("Low confidence ({:.1}) for '{}'", conf, clip.name));
            }
        }
    }

    check_cancel(cancel)?;

    // Pass 2: retry unplaced clips against an enhanced timeline.
    if !unplaced_keys.is_empty() {
        progress(ProgressEvent::new(
            step + 1,
            total_steps,
            "Pass 2: building enhanced timeline...".to_string(),
        ));
        check_cancel(cancel)?;

        let placed: Vec<(i64, Vec<f32>)> = tracks
            .iter()
            .enumerate()
            .filter(|(ti, _)| *ti != ref_idx)
            .flat_map(|(_, t)| t.clips.iter())
            .filter(|c| c.confidence >= CONFIDENCE_THRESHOLD)
            .map(|c| (c.timeline_offset_samples, c.samples.clone()))
            .collect();

        let enhanced = stitch_enhanced_timeline(&ref_audio, &placed);

        for &(ti, ci) in &unplaced_keys {
            step += 1;
            let name = tracks[ti].clips[ci].name.clone();
            progress(ProgressEvent::new(
                step,
                total_steps,
                format!("Pass 2: retrying '{}'...", name),
            ));
            check_cancel(cancel)?;

            let clip = &mut tracks[ti].clips[ci];
            let (delay, conf) =
                correlate::delay(&enhanced, &clip.samples, ANALYSIS_RATE, config.max_offset_s);

            if conf > clip.confidence {
                clip.timeline_offset_samples = delay;
                clip.confidence = conf;
                clip_offsets.insert(clip.file_path.to_string_lossy().into_owned(), delay);

                if conf >= CONFIDENCE_THRESHOLD {
                    warnings.retain(|w| !w.contains(&clip.name));
                }
            }
        }
    }

    check_cancel(cancel)?;

    // Metadata fallback for anything still below threshold.
    let ref_origin = tracks[ref_idx].time_origin();
    for &(ti, ci) in &unplaced_keys {
        let clip = &mut tracks[ti].clips[ci];
        if clip.confidence < CONFIDENCE_THRESHOLD {
            if let (Some(creation_time), Some(origin)) = (clip.creation_time, ref_origin) {
                let time_diff = (creation_time - origin) as f64;
                let estimated_offset = (time_diff * ANALYSIS_RATE as f64).round() as i64;
                if estimated_offset >= 0 {
                    clip.timeline_offset_samples = estimated_offset;
                    clip_offsets.insert(
                        clip.file_path.to_string_lossy().into_owned(),
                        estimated_offset,
                    );
                    warnings.push(format!(
                        "'{}' placed via metadata fallback (confidence {:.1})",
                        clip.name, clip.confidence
                    ));
                }
            }
        }
    }

    // Normalize so every offset is non-negative.
    progress(ProgressEvent::new(
        total_steps - 1,
        total_steps,
        "Normalizing timeline...".to_string(),
    ));
    check_cancel(cancel)?;

    let mut min_offset = 0i64;
    let mut max_end = 0i64;
    for track in tracks.iter() {
        for clip in &track.clips {
            min_offset = min_offset.min(clip.timeline_offset_samples);
            max_end = max_end.max(clip.end_samples());
        }
    }
    if min_offset < 0 {
        let shift = -min_offset;
        for track in tracks.iter_mut() {
            for clip in track.clips.iter_mut() {
                clip.timeline_offset_samples += shift;
                clip_offsets.insert(
                    clip.file_path.to_string_lossy().into_owned(),
                    clip.timeline_offset_samples,
                );
            }
        }
        max_end += shift;
    }

    let avg_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    // Drift detection against the (now-stale-offset, but audio-identical)
    // reference timeline built before normalization; offsets inside it are
    // relative to the reference track's own clips, which shift together
    // with everything else, so the audio content itself is unaffected.
    let mut drift_detected = false;
    for (ti, track) in tracks.iter_mut().enumerate() {
        if ti == ref_idx {
            continue;
        }
        for clip in track.clips.iter_mut() {
            if !clip.analyzed || clip.duration_s < MIN_DRIFT_OVERLAP_S {
                continue;
            }
            let (drift_ppm, r_squared) = measure_drift(&ref_audio, clip);
            if r_squared > 0.5 && drift_ppm.abs() > config.drift_threshold_ppm {
                clip.drift_ppm = drift_ppm;
                clip.drift_r2 = r_squared;
                drift_detected = true;
            }
        }
    }

    if drift_detected {
        inherit_drift_for_short_clips(tracks, ref_idx);
    }

    progress(ProgressEvent::new(
        total_steps,
        total_steps,
        "Analysis complete.".to_string(),
    ));

    Ok(AnalysisResult {
        reference_track_index: ref_idx,
        total_timeline_samples: max_end,
        total_timeline_s: max_end as f64 / ANALYSIS_RATE as f64,
        sample_rate: ANALYSIS_RATE,
        clip_offsets,
        avg_confidence,
        drift_detected,
        warnings,
    })
}

/// Overlay high-confidence placed clips onto a copy of the reference
/// timeline, used as Pass 2's correlation target.
fn stitch_enhanced_timeline(ref_audio: &[f32], placed: &[(i64, Vec<f32>)]) -> Vec<f32> {
    if placed.is_empty() {
        return ref_audio.to_vec();
    }
    let max_end = placed
        .iter()
        .map(|(offset, samples)| offset + samples.len() as i64)
        .fold(ref_audio.len() as i64, i64::max) as usize;

    let mut enhanced = vec![0.0f32; max_end];
    enhanced[..ref_audio.len()].copy_from_slice(ref_audio);

    for (offset, samples) in placed {
        if *offset < 0 {
            continue;
        }
        let start = *offset as usize;
        let seg_len = (max_end.saturating_sub(start)).min(samples.len());
        if seg_len == 0 {
            continue;
        }
        for i in 0..seg_len {
            let existing = enhanced[start + i];
            enhanced[start + i] = if existing.abs() < MIX_SILENCE_FLOOR {
                samples[i]
            } else {
                (existing + samples[i]) / 2.0
            };
        }
    }
    enhanced
}

/// Windowed linear-regression drift estimate: 30s windows, 15s stride,
/// minimum 3 usable windows. Returns `(drift_ppm, r_squared)`.
fn measure_drift(ref_timeline: &[f32], clip: &sync_core::model::Clip) -> (f64, f64) {
    let sr = ANALYSIS_RATE;
    let win_samples = (DRIFT_WINDOW_S * sr as f64) as i64;
    let stride_samples = (DRIFT_STRIDE_S * sr as f64) as i64;

    let clip_start = clip.timeline_offset_samples;
    let clip_end = clip_start + clip.length_samples();
    let ref_len = ref_timeline.len() as i64;

    let overlap_start = clip_start.max(0);
    let overlap_end = clip_end.min(ref_len);
    let overlap_len = overlap_end - overlap_start;

    if overlap_len < win_samples * 2 {
        return (0.0, 0.0);
    }

    let mut times: Vec<f64> = Vec::new();
    let mut offsets: Vec<f64> = Vec::new();

    let mut pos = overlap_start;
    while pos + win_samples <= overlap_end {
        let ref_win = &ref_timeline[pos as usize..(pos + win_samples) as usize];

        let clip_local = pos - clip_start;
        if clip_local < 0 || clip_local + win_samples > clip.length_samples() {
            pos += stride_samples;
            continue;
        }
        let clip_win = &clip.samples[clip_local as usize..(clip_local + win_samples) as usize];

        let ref_peak = ref_win.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        let clip_peak = clip_win.iter().fold(0.0f32, |m, &v| m.max(v.abs()));
        if ref_peak < 1e-6 || clip_peak < 1e-6 {
            pos += stride_samples;
            continue;
        }

        let offset = correlate::windowed_offset(ref_win, clip_win);
        let time_s = (pos - overlap_start) as f64 / sr as f64;
        times.push(time_s);
        offsets.push(offset);

        pos += stride_samples;
    }

    if times.len() < MIN_DRIFT_WINDOWS {
        return (0.0, 0.0);
    }

    let (slope, intercept) = least_squares_fit(&times, &offsets);
    let mean_offset = offsets.iter().sum::<f64>() / offsets.len() as f64;
    let ss_res: f64 = times
        .iter()
        .zip(offsets.iter())
        .map(|(&t, &o)| {
            let predicted = slope * t + intercept;
            (o - predicted).powi(2)
        })
        .sum();
    let ss_tot: f64 = offsets.iter().map(|&o| (o - mean_offset).powi(2)).sum();
    let r_squared = (1.0 - ss_res / (ss_tot + 1e-30)).clamp(0.0, 1.0);

    let drift_ppm = (slope / sr as f64) * 1e6;
    (drift_ppm, r_squared)
}

fn least_squares_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (&x, &y) in xs.iter().zip(ys.iter()) {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x).powi(2);
    }
    let slope = if den.abs() > 1e-30 { num / den } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    (slope, intercept)
}

/// Propagate the highest-confidence drift measurement on a track to every
/// unmeasured clip on the same track — same device, same crystal.
fn inherit_drift_for_short_clips(tracks: &mut [Track], ref_idx: usize) {
    for (ti, track) in tracks.iter_mut().enumerate() {
        if ti == ref_idx {
            continue;
        }
        let best = track
            .clips
            .iter()
            .filter(|c| c.drift_ppm.abs() > 1e-6 && c.drift_r2 > 0.5)
            .max_by(|a, b| a.drift_r2.partial_cmp(&b.drift_r2).unwrap())
            .map(|c| (c.drift_ppm, c.drift_r2));

        let Some((best_ppm, best_r2)) = best else {
            continue;
        };

        for clip in track.clips.iter_mut() {
            if clip.drift_ppm.abs() < 1e-6 && clip.drift_r2 == 0.0 {
                clip.drift_ppm = best_ppm;
                clip.drift_r2 = best_r2;
            }
        }
    }
}
