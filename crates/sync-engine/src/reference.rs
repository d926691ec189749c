// crates/sync-engine/src/reference.rs
//
// C4: assembles a dense reference timeline from one device's clips, placed
// sequentially using creation_time gaps. Same-device clips share no
// acoustic content and must never be cross-correlated against each other.

use sync_core::model::{Track, ANALYSIS_RATE};

const DEFAULT_GAP_S: f64 = 0.5;

/// Priority: caller-set `is_reference` flag, then widest metadata coverage
/// span, then greatest total duration.
pub fn select_reference_index(tracks: &[Track]) -> usize {
    if let Some(i) = tracks.iter().position(|t| t.is_reference) {
        return i;
    }

    let mut best_idx = 0;
    let mut best_span = 0.0f64;
    for (i, t) in tracks.iter().enumerate() {
        if let Some(span) = t.coverage_span_s() {
            if span > best_span {
                best_span = span;
                best_idx = i;
            }
        }
    }

    if best_span <= 0.0 {
        let mut best_dur = 0.0f64;
        for (i, t) in tracks.iter().enumerate() {
            let dur = t.total_duration_s();
            if dur > best_dur {
                best_dur = dur;
                best_idx = i;
            }
        }
    }

    best_idx
}

/// Build the reference track's dense audio timeline, writing placement
/// fields (offset, confidence=100, analyzed=true) onto its clips.
/// `track.clips` must already be sorted by time and non-empty.
pub fn build_reference_from_metadata(track: &mut Track) -> Vec<f32> {
    assert!(
        !track.clips.is_empty(),
        "reference track '{}' has no clips",
        track.name
    );

    if track.clips.len() == 1 {
        let clip = &mut track.clips[0];
        clip.timeline_offset_samples = 0;
        clip.confidence = 100.0;
        clip.analyzed = true;
        return clip.samples.clone();
    }

    track.clips[0].timeline_offset_samples = 0;
    track.clips[0].confidence = 100.0;
    track.clips[0].analyzed = true;

    for i in 1..track.clips.len() {
        let (prev_end_time, prev_offset, prev_len) = {
            let prev = &track.clips[i - 1];
            (
                prev.creation_time.map(|t| t as f64 + prev.duration_s),
                prev.timeline_offset_samples,
                prev.length_samples(),
            )
        };
        let curr_time = track.clips[i].creation_time.map(|t| t as f64);

        let gap_s = match (prev_end_time, curr_time) {
            (Some(prev_end), Some(curr_start)) => (curr_start - prev_end).max(0.0),
            _ => DEFAULT_GAP_S,
        };

        let offset = prev_offset + prev_len + (gap_s * ANALYSIS_RATE as f64).round() as i64;
        let clip = &mut track.clips[i];
        clip.timeline_offset_samples = offset;
        clip.confidence = 100.0;
        clip.analyzed = true;
    }

    let total_len = track
        .clips
        .iter()
        .map(|c| c.end_samples())
        .max()
        .unwrap_or(0)
        .max(0) as usize;
    let mut buffer = vec![0.0f32; total_len];
    for clip in &track.clips {
        let start = clip.timeline_offset_samples.max(0) as usize;
        let end = (start + clip.samples.len()).min(buffer.len());
        if start < end {
            buffer[start..end].copy_from_slice(&clip.samples[..end - start]);
        }
    }
    buffer
}
