//! Orchestration core: resource lifecycle, transfer scheduling and the
//! progressive render loop, plus the backend traits they drive.

mod context;
mod render;
mod resources;
mod traits;
mod transfer;

pub use context::{RenderContext, SceneEditor, DEFAULT_SEED};
pub use render::{FrameInputs, FrameOutcome, RenderLoop, RenderState};
pub use resources::{BufferSpec, ResourceLifecycle, ResourceState, SceneCapacity};
pub use traits::{
    CaptureFrame, ComputeRuntime, FrameSource, KernelLaunch, LaunchParams, NoFrameSource,
    BYTES_PER_PIXEL, NO_PRIMITIVE,
};
pub use transfer::{object_counts, TransferRecord, TransferReport, TransferScheduler, TransferState};
