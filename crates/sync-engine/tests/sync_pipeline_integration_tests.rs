// End-to-end scenarios exercising placement + stitching together, using
// synthetic clips built in memory rather than real media files — probe.rs's
// file/subprocess path is exercised separately by its own unit tests.

use std::path::PathBuf;

use sync_core::model::{Clip, Config, Track, ANALYSIS_RATE};
use sync_core::progress::CancelHandle;
use sync_engine::placement;

fn sine_clip(name: &str, len: usize, freq_hz: f64, creation_time: Option<i64>) -> Clip {
    let mut c = Clip::new(PathBuf::from(name), 48000, 1, len as f64 / ANALYSIS_RATE as f64);
    c.samples = (0..len)
        .map(|i| (2.0 * std::f64::consts::PI * freq_hz * i as f64 / ANALYSIS_RATE as f64).sin() as f32)
        .collect();
    c.creation_time = creation_time;
    c
}

/// Scenario 1: two devices, identical content, device B offset by 250ms.
#[test]
fn two_devices_one_clip_each_recovers_known_offset() {
    let len = ANALYSIS_RATE as usize * 10;
    let shift = (0.25 * ANALYSIS_RATE as f64) as usize;

    let reference_samples = sine_clip("a.wav", len, 440.0, Some(0)).samples;

    let mut track_a = Track::new("device-a");
    let mut clip_a = sine_clip("a.wav", len, 440.0, Some(0));
    clip_a.samples = reference_samples.clone();
    track_a.clips.push(clip_a);

    let mut track_b = Track::new("device-b");
    let mut clip_b = sine_clip("b.wav", len - shift, 440.0, Some(0));
    clip_b.samples = reference_samples[shift..].to_vec();
    track_b.clips.push(clip_b);

    let mut tracks = vec![track_a, track_b];
    let result = placement::analyze(&mut tracks, &Config::default(), &CancelHandle::new(), |_| {}).unwrap();

    assert_eq!(result.reference_track_index, 0);
    let offset = tracks[1].clips[0].timeline_offset_samples;
    assert!((offset - shift as i64).abs() <= 2, "offset {offset} not within 2 samples of {shift}");
    assert!(tracks[1].clips[0].confidence > 3.0);
}

/// Scenario 4: one silent clip against one real clip — low confidence is
/// recorded as a warning, and analysis still completes without metadata to
/// fall back on.
#[test]
fn silent_clip_without_metadata_surfaces_low_confidence_warning() {
    let len = ANALYSIS_RATE as usize * 10;

    let mut track_a = Track::new("device-a");
    track_a.clips.push(sine_clip("a.wav", len, 220.0, None));

    let mut track_b = Track::new("device-b");
    let mut silent = Clip::new(PathBuf::from("b.wav"), 48000, 1, 10.0);
    silent.samples = vec![0.0f32; len];
    track_b.clips.push(silent);

    let mut tracks = vec![track_a, track_b];
    let result = placement::analyze(&mut tracks, &Config::default(), &CancelHandle::new(), |_| {}).unwrap();

    assert!(!result.warnings.is_empty());
    assert!(tracks[1].clips[0].analyzed);
    assert!(tracks[1].clips[0].confidence < 3.0);
}

/// Scenario 6: cancellation raised before analysis starts leaves every clip
/// unanalyzed and returns Cancelled.
#[test]
fn cancellation_before_start_leaves_no_partial_state() {
    let len = ANALYSIS_RATE as usize * 2;
    let mut track_a = Track::new("device-a");
    track_a.clips.push(sine_clip("a.wav", len, 300.0, Some(0)));
    let mut track_b = Track::new("device-b");
    track_b.clips.push(sine_clip("b.wav", len, 300.0, Some(0)));

    let mut tracks = vec![track_a, track_b];
    let cancel = CancelHandle::new();
    cancel.cancel();

    let err = placement::analyze(&mut tracks, &Config::default(), &cancel, |_| {});
    assert!(matches!(err, Err(sync_core::error::EngineError::Cancelled)));
    for track in &tracks {
        for clip in &track.clips {
            assert!(!clip.analyzed);
        }
    }
}

/// Three tracks sharing the same content all place successfully against one
/// reference, and every non-reference clip's offset lands on the expected
/// sample.
#[test]
fn three_tracks_with_shared_content_all_place_against_one_reference() {
    let len = ANALYSIS_RATE as usize * 10;
    let ref_samples = sine_clip("a.wav", len, 660.0, Some(0)).samples;

    let mut track_a = Track::new("device-a");
    let mut clip_a = sine_clip("a.wav", len, 660.0, Some(0));
    clip_a.samples = ref_samples.clone();
    track_a.clips.push(clip_a);

    let mut track_b = Track::new("device-b");
    let mut clip_b = sine_clip("b.wav", len, 660.0, Some(0));
    clip_b.samples = ref_samples.clone();
    track_b.clips.push(clip_b);

    let mut track_c = Track::new("device-c");
    let snippet_len = ANALYSIS_RATE as usize * 3;
    let mut clip_c = sine_clip("c.wav", snippet_len, 660.0, Some(0));
    clip_c.samples = ref_samples[..snippet_len].to_vec();
    track_c.clips.push(clip_c);

    let mut tracks = vec![track_a, track_b, track_c];
    let result = placement::analyze(&mut tracks, &Config::default(), &CancelHandle::new(), |_| {}).unwrap();

    assert_eq!(result.reference_track_index, 0);
    assert!(tracks[1].clips[0].confidence > 3.0);
    assert!(tracks[2].clips[0].confidence > 3.0);
    assert_eq!(tracks[2].clips[0].timeline_offset_samples, 0);
}
