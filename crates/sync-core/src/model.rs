// crates/sync-core/src/model.rs
//
// Core data model: Clip, Track, AnalysisResult, Config.
//
// Audio buffers are NOT part of the persisted shape (see project.rs) — only
// the descriptive/placement fields round-trip to disk. Buffers live only in
// memory for the duration of a session and are re-decoded from the original
// file path on demand.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Sample rate, in Hz, at which all correlation and drift math runs.
pub const ANALYSIS_RATE: u32 = 8000;

/// Minimum peak-to-mean confidence for a clip to be considered "placed".
pub const CONFIDENCE_THRESHOLD: f64 = 3.0;

/// Audio extensions handled directly by the in-process PCM decoder.
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "aiff", "aif", "flac", "mp3", "ogg", "opus"];

/// Container extensions routed through the external decoder.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi", "webm", "mts", "m4v", "mxf"];

/// One source media file belonging to one device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clip {
    pub file_path: PathBuf,
    pub name: String,

    pub original_sr: u32,
    pub original_channels: u16,
    pub duration_s: f64,
    pub is_video: bool,
    pub creation_time: Option<i64>,

    /// Mono float32 buffer at `ANALYSIS_RATE`. Not serialized — re-decoded
    /// on load. `#[serde(skip)]` fields default to empty on deserialize.
    #[serde(skip)]
    pub samples: Vec<f32>,

    #[serde(default)]
    pub timeline_offset_samples: i64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub analyzed: bool,

    #[serde(default)]
    pub drift_ppm: f64,
    #[serde(default)]
    pub drift_r2: f64,
    #[serde(default)]
    pub drift_corrected: bool,
}

impl Clip {
    pub fn new(file_path: PathBuf, original_sr: u32, original_channels: u16, duration_s: f64) -> Self {
        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Clip {
            file_path,
            name,
            original_sr,
            original_channels,
            duration_s,
            is_video: false,
            creation_time: None,
            samples: Vec::new(),
            timeline_offset_samples: 0,
            confidence: 0.0,
            analyzed: false,
            drift_ppm: 0.0,
            drift_r2: 0.0,
            drift_corrected: false,
        }
    }

    pub fn length_samples(&self) -> i64 {
        self.samples.len() as i64
    }

    pub fn end_samples(&self) -> i64 {
        self.timeline_offset_samples + self.length_samples()
    }

    pub fn timeline_offset_s(&self) -> f64 {
        self.timeline_offset_samples as f64 / ANALYSIS_RATE as f64
    }

    pub fn length_at_sr(&self, sr: u32) -> i64 {
        ((self.duration_s * sr as f64).round()) as i64
    }

    pub fn timeline_offset_at_sr(&self, sr: u32) -> i64 {
        ((self.timeline_offset_s() * sr as f64).round()) as i64
    }
}

/// One device's ordered set of clips.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub is_reference: bool,
    pub clips: Vec<Clip>,

    /// Full-resolution synced output, produced by the stitcher. Not
    /// serialized; session-local only.
    #[serde(skip)]
    pub synced_audio: Option<Vec<f32>>,
}

impl Track {
    pub fn new(name: impl Into<String>) -> Self {
        Track {
            name: name.into(),
            is_reference: false,
            clips: Vec::new(),
            synced_audio: None,
        }
    }

    pub fn total_duration_s(&self) -> f64 {
        self.clips.iter().map(|c| c.duration_s).sum()
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn total_samples(&self) -> i64 {
        self.clips.iter().map(|c| c.length_samples()).sum()
    }

    /// Sort clips by creation time, falling back to name. Idempotent.
    pub fn sort_clips_by_time(&mut self) {
        self.clips
            .sort_by(|a, b| {
                let ka = a.creation_time.unwrap_or(0);
                let kb = b.creation_time.unwrap_or(0);
                ka.cmp(&kb).then_with(|| a.name.cmp(&b.name))
            });
    }

    /// Widest metadata coverage span: latest (creation + duration) minus
    /// earliest creation, in seconds. `None` when no clip has a timestamp.
    pub fn coverage_span_s(&self) -> Option<f64> {
        let starts: Vec<i64> = self.clips.iter().filter_map(|c| c.creation_time).collect();
        if starts.is_empty() {
            return None;
        }
        let earliest = *starts.iter().min().unwrap();
        let latest_end = self
            .clips
            .iter()
            .filter_map(|c| c.creation_time.map(|t| t as f64 + c.duration_s))
            .fold(f64::MIN, f64::max);
        Some(latest_end - earliest as f64)
    }

    /// Earliest creation timestamp on this track, used as the reference's
    /// time origin for the metadata-fallback placement rule.
    pub fn time_origin(&self) -> Option<i64> {
        self.clips.iter().filter_map(|c| c.creation_time).min()
    }
}

/// Output of the placement engine (C5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub reference_track_index: usize,
    pub total_timeline_samples: i64,
    pub total_timeline_s: f64,
    pub sample_rate: u32,
    pub clip_offsets: HashMap<String, i64>,
    pub avg_confidence: f64,
    pub drift_detected: bool,
    pub warnings: Vec<String>,
}

/// Supported lossless/lossy export containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Wav,
    Aiff,
    Flac,
    Mp3,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat::Wav
    }
}

impl ExportFormat {
    pub fn is_lossy(&self) -> bool {
        matches!(self, ExportFormat::Mp3)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Aiff => "aiff",
            ExportFormat::Flac => "flac",
            ExportFormat::Mp3 => "mp3",
        }
    }
}

/// PCM sample format requested for lossless export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Pcm16,
    Pcm24,
    Float32,
}

impl Default for BitDepth {
    fn default() -> Self {
        BitDepth::Pcm16
    }
}

/// User-facing parameters consumed by the placement engine and stitcher.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub max_offset_s: Option<f64>,
    #[serde(default)]
    pub export_format: ExportFormat,
    #[serde(default)]
    pub export_bit_depth: BitDepth,
    #[serde(default = "default_bitrate_kbps")]
    pub export_bitrate_kbps: u32,
    /// `None` means auto: the maximum original sample rate across all clips.
    #[serde(default)]
    pub export_sr: Option<u32>,
    #[serde(default)]
    pub crossfade_ms: f64,
    #[serde(default = "default_true")]
    pub drift_correction: bool,
    #[serde(default = "default_drift_threshold_ppm")]
    pub drift_threshold_ppm: f64,
}

fn default_bitrate_kbps() -> u32 {
    192
}

fn default_true() -> bool {
    true
}

fn default_drift_threshold_ppm() -> f64 {
    1.0
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_offset_s: None,
            export_format: ExportFormat::default(),
            export_bit_depth: BitDepth::default(),
            export_bitrate_kbps: default_bitrate_kbps(),
            export_sr: None,
            crossfade_ms: 0.0,
            drift_correction: true,
            drift_threshold_ppm: default_drift_threshold_ppm(),
        }
    }
}

impl Config {
    pub fn with_max_offset_s(mut self, max_offset_s: f64) -> Self {
        self.max_offset_s = Some(max_offset_s);
        self
    }

    pub fn with_export_sr(mut self, sr: u32) -> Self {
        self.export_sr = Some(sr);
        self
    }

    pub fn with_export_format(mut self, format: ExportFormat) -> Self {
        self.export_format = format;
        self
    }

    pub fn without_drift_correction(mut self) -> Self {
        self.drift_correction = false;
        self
    }

    /// Resolve the export sample rate: the configured value, or the max
    /// original rate across every clip on every track.
    pub fn resolved_export_sr(&self, tracks: &[Track]) -> u32 {
        self.export_sr.unwrap_or_else(|| {
            tracks
                .iter()
                .flat_map(|t| t.clips.iter())
                .map(|c| c.original_sr)
                .max()
                .unwrap_or(ANALYSIS_RATE)
        })
    }
}

/// Classify a file by extension into audio, video, or unsupported.
pub fn classify_extension(path: &std::path::Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip_with(creation_time: Option<i64>, name: &str) -> Clip {
        let mut c = Clip::new(PathBuf::from(name), 48000, 2, 1.0);
        c.creation_time = creation_time;
        c
    }

    #[test]
    fn sort_clips_by_time_is_idempotent() {
        let mut track = Track::new("cam-a");
        track.clips.push(clip_with(Some(20), "b.wav"));
        track.clips.push(clip_with(Some(10), "a.wav"));
        track.clips.push(clip_with(None, "c.wav"));
        track.sort_clips_by_time();
        let first_pass: Vec<String> = track.clips.iter().map(|c| c.name.clone()).collect();
        track.sort_clips_by_time();
        let second_pass: Vec<String> = track.clips.iter().map(|c| c.name.clone()).collect();
        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass, vec!["c.wav", "a.wav", "b.wav"]);
    }

    #[test]
    fn timeline_offset_s_matches_samples_within_a_ulp() {
        let mut c = Clip::new(PathBuf::from("x.wav"), 48000, 1, 1.0);
        c.timeline_offset_samples = 12345;
        let expected = 12345.0 / ANALYSIS_RATE as f64;
        assert!((c.timeline_offset_s() - expected).abs() < f64::EPSILON * 10.0);
    }

    #[test]
    fn resolved_export_sr_defaults_to_max_original_rate() {
        let mut t1 = Track::new("a");
        t1.clips.push(Clip::new(PathBuf::from("a.wav"), 44100, 2, 1.0));
        let mut t2 = Track::new("b");
        t2.clips.push(Clip::new(PathBuf::from("b.wav"), 48000, 2, 1.0));
        let cfg = Config::default();
        assert_eq!(cfg.resolved_export_sr(&[t1, t2]), 48000);
    }

    #[test]
    fn classify_extension_routes_audio_and_video() {
        assert_eq!(
            classify_extension(std::path::Path::new("a.wav")),
            Some(MediaKind::Audio)
        );
        assert_eq!(
            classify_extension(std::path::Path::new("a.mov")),
            Some(MediaKind::Video)
        );
        assert_eq!(classify_extension(std::path::Path::new("a.txt")), None);
    }
}
