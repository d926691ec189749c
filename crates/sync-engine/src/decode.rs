// crates/sync-engine/src/decode.rs
//
// In-process PCM decode for native audio files (WAV/AIFF/FLAC/MP3/OGG/OPUS)
// via symphonia. Video containers go through decoder_proc.rs instead.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use sync_core::error::{EngineError, EngineResult};

/// Raw decode result before resampling: per-file mono f64 samples at the
/// file's native rate, plus the descriptive fields C1 needs to populate a
/// Clip.
pub struct DecodedAudio {
    pub mono_samples: Vec<f64>,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_s: f64,
}

/// Raw decode result preserving the original channel layout, interleaved,
/// used by the stitcher's full-resolution re-read where channel identity
/// must survive past the analysis stage.
pub struct DecodedChannels {
    pub interleaved: Vec<f64>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decode a native audio file to mono f64 PCM at its original sample rate.
/// Channel mixdown is a simple per-sample average across channels, matching
/// `data.mean(axis=1)` in the reference implementation.
pub fn decode_native_audio(path: &Path) -> EngineResult<DecodedAudio> {
    let (interleaved, sample_rate, channels) = decode_packets(path)?;
    let ch = channels.max(1) as usize;
    let mono_samples: Vec<f64> = interleaved
        .chunks(ch)
        .map(|frame| frame.iter().sum::<f64>() / ch as f64)
        .collect();
    let duration_s = mono_samples.len() as f64 / sample_rate as f64;
    Ok(DecodedAudio {
        mono_samples,
        sample_rate,
        channels,
        duration_s,
    })
}

/// Decode a native audio file to interleaved f64 PCM at its original
/// sample rate and channel count, without any mixdown.
pub fn decode_native_audio_channels(path: &Path) -> EngineResult<DecodedChannels> {
    let (interleaved, sample_rate, channels) = decode_packets(path)?;
    Ok(DecodedChannels {
        interleaved,
        sample_rate,
        channels,
    })
}

fn decode_packets(path: &Path) -> EngineResult<(Vec<f64>, u32, u16)> {
    let file = File::open(path).map_err(EngineError::from)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            EngineError::decode_failure(path.display().to_string(), format!("probe failed: {e}"))
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.sample_rate.is_some())
        .ok_or_else(|| {
            EngineError::decode_failure(path.display().to_string(), "no audio track found")
        })?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
        EngineError::decode_failure(path.display().to_string(), "sample rate unknown")
    })?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| {
            EngineError::decode_failure(path.display().to_string(), format!("no decoder: {e}"))
        })?;

    let mut interleaved: Vec<f64> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(symphonia::core::errors::Error::ResetRequired) => break,
            Err(e) => {
                return Err(EngineError::decode_failure(
                    path.display().to_string(),
                    format!("read error: {e}"),
                ))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => {
                return Err(EngineError::decode_failure(
                    path.display().to_string(),
                    format!("decode error: {e}"),
                ))
            }
        };
        let spec = *decoded.spec();
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        interleaved.extend(buf.samples().iter().map(|s| *s as f64));
    }

    Ok((interleaved, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_surfaces_io_error() {
        let err = decode_native_audio(Path::new("/nonexistent/path/clip.wav"));
        assert!(err.is_err());
    }

    #[test]
    fn missing_file_surfaces_io_error_for_channel_decode() {
        let err = decode_native_audio_channels(Path::new("/nonexistent/path/clip.wav"));
        assert!(err.is_err());
    }
}
