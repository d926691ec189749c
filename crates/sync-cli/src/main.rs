// crates/sync-cli/src/main.rs
//
// Thin CLI demonstrator: exercises the analyze/sync exit-code contract.
// Each top-level directory passed as an input is treated as one device's
// track; files inside it are that track's clips.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sync_core::model::{Config, Track};
use sync_core::progress::CancelHandle;
use sync_engine::cache::SessionCache;
use sync_engine::{placement, probe, stitch};

#[derive(Parser)]
#[command(name = "audiosync", about = "Multi-device audio synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a set of device directories and print placement offsets.
    Analyze {
        /// One directory per device.
        #[arg(required = true)]
        device_dirs: Vec<PathBuf>,
    },
    /// Analyze, then stitch and write one synced WAV per device.
    Sync {
        #[arg(required = true)]
        device_dirs: Vec<PathBuf>,
        #[arg(short, long, default_value = "./synced")]
        output_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("[audiosync] error: {err}");
            let code = err
                .downcast_ref::<sync_core::error::EngineError>()
                .map(|e| e.exit_code())
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Analyze { device_dirs } => {
            let cancel = CancelHandle::new();
            let mut tracks = load_tracks(&device_dirs, &cancel)?;
            let result = placement::analyze(&mut tracks, &Config::default(), &cancel, |ev| {
                eprintln!("[audiosync] {}/{} {}", ev.current, ev.total, ev.message);
            })?;
            println!(
                "reference track: {} ({:.1}s timeline, avg confidence {:.1})",
                tracks[result.reference_track_index].name, result.total_timeline_s, result.avg_confidence
            );
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
            Ok(())
        }
        Command::Sync {
            device_dirs,
            output_dir,
        } => {
            let cancel = CancelHandle::new();
            let mut tracks = load_tracks(&device_dirs, &cancel)?;
            let config = Config::default();
            let result = placement::analyze(&mut tracks, &config, &cancel, |ev| {
                eprintln!("[audiosync] {}/{} {}", ev.current, ev.total, ev.message);
            })?;

            let export_rate = config.resolved_export_sr(&tracks);
            let cache = SessionCache::open()?;
            let stitched = stitch::stitch_all(&tracks, &result, &config, export_rate, &cache, &cancel, |ev| {
                eprintln!("[audiosync] {}/{} {}", ev.current, ev.total, ev.message);
            })?;

            std::fs::create_dir_all(&output_dir)?;
            for mut track in stitched {
                stitch::clamp_output(&mut track.samples);
                let out_path = output_dir.join(format!("{}.wav", track.track_name));
                write_wav(&out_path, &track.samples, track.channels, export_rate)?;
                println!("wrote {}", out_path.display());
            }
            Ok(())
        }
    }
}

fn load_tracks(device_dirs: &[PathBuf], cancel: &CancelHandle) -> anyhow::Result<Vec<Track>> {
    let cache = SessionCache::open()?;
    let mut tracks = Vec::with_capacity(device_dirs.len());
    for dir in device_dirs {
        if cancel.is_cancelled() {
            return Err(sync_core::error::EngineError::Cancelled.into());
        }
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let mut track = Track::new(name);
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for path in entries {
            match probe::load_clip(&path, &cache, cancel) {
                Ok(clip) => track.clips.push(clip),
                Err(e) => eprintln!("[audiosync] skipping '{}': {e}", path.display()),
            }
        }
        track.sort_clips_by_time();
        tracks.push(track);
    }
    Ok(tracks)
}

fn write_wav(path: &std::path::Path, samples: &[f64], channels: u16, sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s * i16::MAX as f64) as i16)?;
    }
    writer.finalize()?;
    Ok(())
}
