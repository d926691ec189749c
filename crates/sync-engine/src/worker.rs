// crates/sync-engine/src/worker.rs
//
// C7: background-thread wrapper around the analyze/stitch pipeline,
// reporting progress over a bounded crossbeam channel and observing a
// shared cancellation flag, mirroring velocut-media::worker::MediaWorker's
// channel-based shape without its playback/encode-specific machinery.

use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use sync_core::error::EngineResult;
use sync_core::model::{AnalysisResult, Config, Track};
use sync_core::progress::{CancelHandle, ProgressEvent};

use crate::cache::SessionCache;
use crate::placement;
use crate::stitch::{self, StitchedTrack};

/// Outcome of a completed analysis job.
pub enum SyncOutcome {
    Analyzed {
        tracks: Vec<Track>,
        result: AnalysisResult,
    },
    Stitched(Vec<StitchedTrack>),
    Failed(String),
}

/// Owns the background analysis/stitch thread. `rx` delivers progress
/// events; `done_rx` delivers the single terminal outcome.
pub struct SyncWorker {
    pub rx: Receiver<ProgressEvent>,
    pub done_rx: Receiver<SyncOutcome>,
    cancel: CancelHandle,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Spawn analysis in the background. The returned worker's `cancel()`
    /// observes at every per-clip suspension point inside `placement::analyze`.
    pub fn spawn_analyze(mut tracks: Vec<Track>, config: Config) -> Self {
        let (tx, rx) = bounded(512);
        let (done_tx, done_rx) = bounded(1);
        let cancel = CancelHandle::new();
        let worker_cancel = cancel.clone();

        let handle = thread::spawn(move || {
            let progress_tx = tx;
            let result = placement::analyze(&mut tracks, &config, &worker_cancel, |ev| {
                let _ = progress_tx.send(ev);
            });
            let outcome = match result {
                Ok(analysis) => SyncOutcome::Analyzed {
                    tracks,
                    result: analysis,
                },
                Err(e) => SyncOutcome::Failed(e.to_string()),
            };
            let _ = done_tx.send(outcome);
        });

        SyncWorker {
            rx,
            done_rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Spawn stitching in the background against an already-completed
    /// analysis.
    pub fn spawn_stitch(
        tracks: Vec<Track>,
        result: AnalysisResult,
        config: Config,
        export_rate: u32,
        cache: SessionCache,
    ) -> Self {
        let (tx, rx) = bounded(512);
        let (done_tx, done_rx) = bounded(1);
        let cancel = CancelHandle::new();
        let worker_cancel = cancel.clone();

        let handle = thread::spawn(move || {
            let progress_tx = tx;
            let stitched = stitch::stitch_all(
                &tracks,
                &result,
                &config,
                export_rate,
                &cache,
                &worker_cancel,
                |ev| {
                    let _ = progress_tx.send(ev);
                },
            );
            let outcome = match stitched {
                Ok(tracks) => SyncOutcome::Stitched(tracks),
                Err(e) => SyncOutcome::Failed(e.to_string()),
            };
            let _ = done_tx.send(outcome);
        });

        SyncWorker {
            rx,
            done_rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Request cooperative cancellation; the worker thread observes this at
    /// its next suspension point and unwinds with `SyncOutcome::Failed`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the worker thread finishes.
    pub fn join(mut self) -> EngineResult<()> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Result sender alias, exposed for callers that want to assemble their own
/// `(tx, rx)` pair without going through `SyncWorker`.
pub type ProgressSender = Sender<ProgressEvent>;

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::model::Clip;
    use std::path::PathBuf;

    fn silent_clip(len: usize, creation_time: Option<i64>) -> Clip {
        let mut c = Clip::new(PathBuf::from("c.wav"), 8000, 1, len as f64 / sync_core::model::ANALYSIS_RATE as f64);
        c.samples = vec![0.0; len];
        c.creation_time = creation_time;
        c
    }

    #[test]
    fn spawn_analyze_reports_completion_outcome() {
        let mut ref_track = Track::new("ref");
        ref_track.is_reference = true;
        ref_track.clips.push(silent_clip(8000, Some(0)));
        let mut other = Track::new("other");
        other.clips.push(silent_clip(8000, Some(1)));

        let worker = SyncWorker::spawn_analyze(vec![ref_track, other], Config::default());
        let outcome = worker.done_rx.recv().unwrap();
        match outcome {
            SyncOutcome::Analyzed { result, .. } => {
                assert_eq!(result.reference_track_index, 0);
            }
            SyncOutcome::Failed(msg) => panic!("unexpected failure: {msg}"),
            SyncOutcome::Stitched(_) => panic!("unexpected stitch outcome"),
        }
    }

    #[test]
    fn cancel_before_completion_surfaces_as_failed_outcome() {
        let mut ref_track = Track::new("ref");
        ref_track.is_reference = true;
        ref_track.clips.push(silent_clip(8000, Some(0)));
        let mut other = Track::new("other");
        other.clips.push(silent_clip(8000, Some(1)));

        let worker = SyncWorker::spawn_analyze(vec![ref_track, other], Config::default());
        worker.cancel();
        let outcome = worker.done_rx.recv().unwrap();
        // Either the cancellation was observed before the (fast, in-test)
        // pipeline finished, or the pipeline had already completed — both
        // are legitimate races for a cooperative cancellation flag.
        match outcome {
            SyncOutcome::Failed(_) | SyncOutcome::Analyzed { .. } => {}
            SyncOutcome::Stitched(_) => panic!("unexpected stitch outcome"),
        }
    }
}
