// crates/sync-engine/src/probe.rs
//
// C1: turns a file path into a populated Clip with its 8 kHz analysis
// buffer. Native audio goes through decode.rs (in-process symphonia);
// video containers go through decoder_proc.rs (external ffmpeg/ffprobe)
// plus decode.rs to read back the resulting WAV.

use std::fs;
use std::path::Path;

use sync_core::error::{EngineError, EngineResult};
use sync_core::model::{classify_extension, Clip, MediaKind, ANALYSIS_RATE};
use sync_core::progress::CancelHandle;

use crate::cache::{ArtifactKind, SessionCache};
use crate::decode;
use crate::decoder_proc;
use crate::resample;

/// Load `path` into a populated Clip with an 8 kHz mono analysis buffer.
/// `cancel` is only consulted on the video path, where it gates the
/// external decode subprocess.
pub fn load_clip(path: &Path, cache: &SessionCache, cancel: &CancelHandle) -> EngineResult<Clip> {
    let kind = classify_extension(path).ok_or_else(|| {
        EngineError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    })?;

    let (mono_samples, original_sr, original_channels, duration_s, is_video) = match kind {
        MediaKind::Audio => {
            let decoded = decode::decode_native_audio(path)?;
            (decoded.mono_samples, decoded.sample_rate, decoded.channels, decoded.duration_s, false)
        }
        MediaKind::Video => {
            let (sr, channels) = decoder_proc::probe_stream(path);
            let key = cache.content_key(path)?;
            let wav_path = cache.reserve(&key, "analysis.wav", ArtifactKind::Analysis)?;
            decoder_proc::decode_analysis_wav(path, &wav_path, cancel)?;
            let decoded = decode::decode_native_audio(&wav_path)?;
            cache.release(&wav_path);
            (decoded.mono_samples, sr, channels, decoded.duration_s, true)
        }
    };

    let analysis_samples: Vec<f32> = resample::resample_to_rate(&mono_samples, original_sr, ANALYSIS_RATE)
        .into_iter()
        .map(|v| v as f32)
        .collect();

    let mut clip = Clip::new(path.to_path_buf(), original_sr, original_channels, duration_s);
    clip.is_video = is_video;
    clip.samples = analysis_samples;
    clip.creation_time = probe_creation_time(path);

    eprintln!(
        "[probe] loaded '{}': sr={original_sr} ch={original_channels} dur={duration_s:.2}s",
        clip.name
    );

    Ok(clip)
}

/// Try, in order: the container's `creation_time` tag (via the external
/// probe) and file modification time.
fn probe_creation_time(path: &Path) -> Option<i64> {
    if let Some(ts) = decoder_proc::probe_creation_time_tag(path) {
        return Some(ts);
    }
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}
