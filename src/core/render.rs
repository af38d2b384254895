//! Progressive accumulation loop.
//!
//! ```text
//! Idle -> Syncing -> Dispatching -> Accumulating -> Converged
//!                                                       |
//!         Syncing <---------- reset_accumulation -------+
//! ```

use tracing::{debug, trace, warn};

use super::resources::SceneCapacity;
use super::traits::{ComputeRuntime, FrameSource, KernelLaunch, BYTES_PER_PIXEL};
use super::transfer::{self, TransferReport, TransferScheduler, TransferState};
use crate::device::ExecutionConfig;
use crate::scene::{Camera, HostScene, PostProcessing, SceneInfo};
use crate::util::DataClass;
use crate::{Error, Result};

/// Render loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    /// Between frames, more passes wanted
    #[default]
    Idle,
    Syncing,
    Dispatching,
    /// A pass was queued and not read back yet
    Accumulating,
    /// The iteration budget is spent; frames only read back
    Converged,
}

/// What `render_begin` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No device, no buffers or an all-zero launch tile
    Degraded,
    /// Nothing to refresh; scene info was only read
    Skipped,
    /// One pass queued; `iteration` is the counter after the increment
    Dispatched { iteration: u32 },
}

/// Borrowed view of everything a frame touches.
pub struct FrameInputs<'a, R: ComputeRuntime + ?Sized> {
    pub runtime: &'a mut R,
    pub execution: ExecutionConfig,
    /// Device selected and buffers allocated
    pub ready: bool,
    pub scene: &'a HostScene,
    pub capacity: &'a SceneCapacity,
    pub transfer: &'a mut TransferState,
    pub info: &'a mut SceneInfo,
    pub camera: &'a Camera,
    pub post_processing: &'a PostProcessing,
    pub frame_source: &'a mut dyn FrameSource,
}

/// Clears the pending-dispatch flag on every exit from `render_end`.
struct PendingGuard<'a>(&'a mut bool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        *self.0 = false;
    }
}

/// Frame state machine: sync and dispatch in `begin`, read back in `end`.
#[derive(Debug, Default)]
pub struct RenderLoop {
    state: RenderState,
    pending: bool,
    dispatch_count: u64,
    last_report: TransferReport,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Launches since construction.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Whether a dispatch is waiting for its readback.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Transfers of the last sync pass.
    pub fn last_report(&self) -> &TransferReport {
        &self.last_report
    }

    /// Back to the initial state, as after re-initialisation.
    pub(crate) fn reset(&mut self) {
        self.state = RenderState::Idle;
        self.pending = false;
    }

    /// Start a frame: sync dirty classes and queue one pass if refreshing.
    ///
    /// A failed sync or dispatch leaves `refresh` raised so the next frame
    /// retries.
    #[tracing::instrument(skip(self, frame))]
    pub fn begin<R: ComputeRuntime + ?Sized>(
        &mut self,
        frame: FrameInputs<'_, R>,
        time: f32,
    ) -> Result<FrameOutcome> {
        if !frame.ready || !frame.execution.is_valid() {
            trace!("no usable device, frame skipped");
            return Ok(FrameOutcome::Degraded);
        }
        if !frame.transfer.refresh() {
            // Limits may have moved through scene_info_mut since the last pass
            if !frame.info.needs_more_iterations() {
                self.state = RenderState::Converged;
                return Ok(FrameOutcome::Skipped);
            }
            frame.transfer.set_refresh(true);
        }

        self.state = RenderState::Syncing;
        self.last_report = TransferReport::default();

        if let Some(capture) = frame.frame_source.next_frame() {
            let bytes = capture.video.len() + capture.depth.len() * 2;
            if let Err(e) = frame.runtime.upload_capture(&capture) {
                self.state = RenderState::Idle;
                warn!("capture upload failed: {e}");
                return Err(match e {
                    Error::DeviceLost(_) => e,
                    other => Error::transfer(DataClass::Capture, other.to_string()),
                });
            }
            self.last_report.push(DataClass::Capture, 1, bytes as u64);
        }

        match TransferScheduler::sync(
            &mut *frame.runtime,
            frame.scene,
            frame.info,
            frame.capacity,
            &mut *frame.transfer,
        ) {
            Ok(report) => self.last_report.records.extend(report.records),
            Err(e) => {
                self.state = RenderState::Idle;
                return Err(e);
            }
        }

        self.state = RenderState::Dispatching;
        let launch = KernelLaunch {
            config: frame.execution,
            info: *frame.info,
            counts: transfer::object_counts(frame.scene, frame.capacity),
            post_processing: *frame.post_processing,
            camera: *frame.camera,
            time,
        };
        if let Err(e) = frame.runtime.dispatch_render(&launch) {
            self.state = RenderState::Idle;
            warn!("dispatch failed: {e}");
            return Err(match e {
                Error::DeviceLost(_) | Error::DispatchFailure(_) => e,
                other => Error::DispatchFailure(other.to_string()),
            });
        }

        self.pending = true;
        self.dispatch_count += 1;
        frame.info.path_tracing_iteration += 1;
        frame.transfer.set_refresh(frame.info.needs_more_iterations());
        self.state = RenderState::Accumulating;

        let iteration = frame.info.path_tracing_iteration;
        debug!(
            iteration,
            max = frame.info.max_path_tracing_iterations,
            "pass dispatched"
        );
        Ok(FrameOutcome::Dispatched { iteration })
    }

    /// Finish a frame: wait for the paired pass and copy the image out.
    ///
    /// Returns `false` without touching `image` when the device is not
    /// usable.
    #[tracing::instrument(skip_all)]
    pub fn end<R: ComputeRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        ready: bool,
        execution: ExecutionConfig,
        info: &SceneInfo,
        image: &mut [u8],
        primitive_ids: &mut [i32],
    ) -> Result<bool> {
        let guard = PendingGuard(&mut self.pending);
        if !ready || !execution.is_valid() {
            return Ok(false);
        }

        let needed = info.pixel_count() * BYTES_PER_PIXEL;
        if image.len() < needed {
            return Err(Error::invalid(format!(
                "output holds {} bytes, image needs {needed}",
                image.len()
            )));
        }
        let ids_len = primitive_ids.len().min(info.pixel_count());

        let result = runtime.readback_image(
            &mut image[..needed],
            &mut primitive_ids[..ids_len],
            info,
        );
        drop(guard);
        result.inspect_err(|e| warn!("readback failed: {e}"))?;

        if self.state == RenderState::Accumulating {
            self.state = if info.needs_more_iterations() {
                RenderState::Idle
            } else {
                RenderState::Converged
            };
        }
        Ok(true)
    }

    /// External reset: accumulate from scratch on the next frame.
    pub fn reset_accumulation(&mut self, info: &mut SceneInfo, transfer: &mut TransferState) {
        info.path_tracing_iteration = 0;
        transfer.set_refresh(true);
        if self.state == RenderState::Converged {
            self.state = RenderState::Syncing;
        }
    }
}
