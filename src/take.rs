//! End-of-take workflow: stop, fetch, decode, align.

use crate::alignment::{AlignmentEngine, AlignmentResult};
use crate::audio::AudioDecoder;
use crate::device::{DeviceCapabilities, RemoteFile};
use crate::errors::SyncError;
use crate::session::{DeviceSessionController, RecordingJob, SessionState};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Aligned(AlignmentResult),
    /// No reference recording was supplied
    Skipped,
    /// The video was downloaded but could not be aligned
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TakeOutcome {
    pub video_path: PathBuf,
    pub job: Option<RecordingJob>,
    pub sync: SyncStatus,
}

impl TakeOutcome {
    pub fn alignment(&self) -> Option<&AlignmentResult> {
        match &self.sync {
            SyncStatus::Aligned(result) => Some(result),
            _ => None,
        }
    }
}

/// Stop the take (if still recording), download it into `destination` and,
/// when a reference recording is given, align the two.
///
/// Session failures are returned as errors. Decode and alignment trouble is
/// not: the downloaded video is still reported, with [`SyncStatus::Failed`].
pub fn finish_take<D: DeviceCapabilities>(
    controller: &DeviceSessionController<D>,
    destination: &Path,
    reference: Option<&Path>,
    decoder: &dyn AudioDecoder,
    engine: &AlignmentEngine,
) -> Result<TakeOutcome, SyncError> {
    if controller.state() == SessionState::Recording {
        controller.stop_recording()?;
    }
    let video_path = controller.download_pending(destination)?;
    let job = controller.snapshot().job;

    let sync = match reference {
        None => SyncStatus::Skipped,
        Some(reference) => match align_files(reference, &video_path, decoder, engine) {
            Ok(result) => SyncStatus::Aligned(result),
            Err(e) => {
                log::warn!("Could not align {}: {}", video_path.display(), e);
                SyncStatus::Failed {
                    reason: e.to_string(),
                }
            }
        },
    };

    Ok(TakeOutcome {
        video_path,
        job,
        sync,
    })
}

/// Stop the take (if still recording) and drop it without downloading.
///
/// Returns the discarded file, or `None` when the camera never produced one.
pub fn discard_take<D: DeviceCapabilities>(
    controller: &DeviceSessionController<D>,
) -> Result<Option<RemoteFile>, SyncError> {
    if controller.state() == SessionState::Recording {
        match controller.stop_recording() {
            Ok(_) => {}
            Err(SyncError::RecordingNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    controller.discard_pending().map(Some)
}

/// Decode the opening search window of both files and align them.
pub fn align_files(
    reference: &Path,
    candidate: &Path,
    decoder: &dyn AudioDecoder,
    engine: &AlignmentEngine,
) -> Result<AlignmentResult, SyncError> {
    let window = engine.config().search_window_seconds;
    let reference = decoder.decode(reference, Some(window))?;
    let candidate = decoder.decode(candidate, Some(window))?;
    engine.align(&reference, &candidate, window)
}
