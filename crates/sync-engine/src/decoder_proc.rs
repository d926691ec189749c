// crates/sync-engine/src/decoder_proc.rs
//
// External decoder subprocess contract for video containers: probe the
// first audio stream, decode to analysis-rate WAV, or decode to
// full-resolution WAV with a bit-depth retry. Mirrors the CLI-subprocess
// style of velocut-media/src/audio.rs rather than in-process FFI bindings,
// since the spec frames the decoder as an external process pair.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use sync_core::error::{EngineError, EngineResult};
use sync_core::progress::CancelHandle;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_FALLBACK: (u32, u16) = (48000, 2);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// First audio stream's `(sample_rate, channels)`, probed via `ffprobe`.
/// Falls back to `(48000, 2)` on any probe failure, matching the
/// "never block import on a flaky probe" contract.
pub fn probe_stream(path: &Path) -> (u32, u16) {
    let output = run_with_timeout(
        Command::new("ffprobe").args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=sample_rate,channels",
            "-of",
            "csv=p=0",
            &path.to_string_lossy(),
        ]),
        PROBE_TIMEOUT,
    );

    match output {
        Some(out) if out.status.success() => parse_probe_csv(&out.stdout).unwrap_or_else(|| {
            eprintln!("[decoder] probe CSV unparsable for {}, using fallback", path.display());
            PROBE_FALLBACK
        }),
        _ => {
            eprintln!("[decoder] probe failed for {}, using fallback", path.display());
            PROBE_FALLBACK
        }
    }
}

/// Container `creation_time` tag, read via `ffprobe` with the same 10s
/// timeout as `probe_stream`. `None` on any probe failure or missing tag.
pub fn probe_creation_time_tag(path: &Path) -> Option<i64> {
    let output = run_with_timeout(
        Command::new("ffprobe").args([
            "-v",
            "error",
            "-show_entries",
            "format_tags=creation_time:stream_tags=creation_time",
            "-of",
            "csv=p=0",
            &path.to_string_lossy(),
        ]),
        PROBE_TIMEOUT,
    )?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let raw = text.lines().find(|l| !l.trim().is_empty())?;
    parse_iso8601(raw.trim())
}

/// Parse ISO-8601 timestamps with/without fractional seconds and a trailing
/// `Z`, normalized to UTC epoch seconds.
fn parse_iso8601(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp());
        }
    }
    None
}

fn parse_probe_csv(stdout: &[u8]) -> Option<(u32, u16)> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().next()?;
    let mut parts = line.split(',');
    let sample_rate: u32 = parts.next()?.trim().parse().ok()?;
    let channels: u16 = parts.next()?.trim().parse().ok()?;
    Some((sample_rate, channels))
}

/// Decode `path` to a mono 8 kHz 16-bit PCM WAV at `out_path` for analysis.
/// Polls the child every `POLL_INTERVAL` so `cancel` is observed promptly;
/// a cancellation kills the child and removes any partial output before
/// returning `Cancelled`.
pub fn decode_analysis_wav(path: &Path, out_path: &Path, cancel: &CancelHandle) -> EngineResult<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-y",
        "-i",
        &path.to_string_lossy(),
        "-vn",
        "-ac",
        "1",
        "-ar",
        "8000",
        "-acodec",
        "pcm_s16le",
        &out_path.to_string_lossy(),
    ]);

    match run_cancellable(&mut cmd, cancel)? {
        None => {
            let _ = std::fs::remove_file(out_path);
            Err(EngineError::Cancelled)
        }
        Some(output) if output.status.success() => Ok(()),
        Some(output) => {
            let _ = std::fs::remove_file(out_path);
            Err(EngineError::decode_failure(
                path.display().to_string(),
                String::from_utf8_lossy(&output.stderr).lines().last().unwrap_or("").to_string(),
            ))
        }
    }
}

/// Decode `path` to a full-resolution PCM WAV at `sample_rate`, preferring
/// 24-bit output and retrying at 16-bit when the codec rejects it. `cancel`
/// is checked before each attempt and polled during each attempt's run.
pub fn decode_full_resolution_wav(
    path: &Path,
    out_path: &Path,
    sample_rate: u32,
    channels: u16,
    cancel: &CancelHandle,
) -> EngineResult<()> {
    for codec in ["pcm_s24le", "pcm_s16le"] {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-y",
            "-i",
            &path.to_string_lossy(),
            "-vn",
            "-ac",
            &channels.to_string(),
            "-ar",
            &sample_rate.to_string(),
            "-acodec",
            codec,
            &out_path.to_string_lossy(),
        ]);

        match run_cancellable(&mut cmd, cancel)? {
            None => {
                let _ = std::fs::remove_file(out_path);
                return Err(EngineError::Cancelled);
            }
            Some(output) if output.status.success() => return Ok(()),
            Some(output) => {
                eprintln!(
                    "[decoder] {codec} decode failed for {}, {}",
                    path.display(),
                    if codec == "pcm_s24le" { "retrying at 16-bit" } else { "giving up" }
                );
                let _ = output;
                let _ = std::fs::remove_file(out_path);
            }
        }
    }

    Err(EngineError::decode_failure(
        path.display().to_string(),
        "both pcm_s24le and pcm_s16le decode attempts failed",
    ))
}

fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Option<std::process::Output> {
    let mut child = cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .ok()?;

    let start = std::time::Instant::now();
    loop {
        if let Ok(Some(_)) = child.try_wait() {
            return child.wait_with_output().ok();
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            return None;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Spawn `cmd` and poll it, returning `Ok(None)` if `cancel` fires before
/// the child exits (the child is killed first) or `Ok(Some(output))` once
/// it exits on its own. No timeout here — only the `probe_*` functions
/// above bind themselves to a fixed deadline; decode runs as long as
/// cancellation allows.
fn run_cancellable(cmd: &mut Command, cancel: &CancelHandle) -> EngineResult<Option<std::process::Output>> {
    let mut child = cmd
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|_| EngineError::DecoderUnavailable)?;

    loop {
        if let Ok(Some(_)) = child.try_wait() {
            let output = child
                .wait_with_output()
                .map_err(|_| EngineError::DecoderUnavailable)?;
            return Ok(Some(output));
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
