//! Batched multi-view Gaussian splat rendering.
//!
//! A [`Scene`] is built once from per-splat arrays, then rendered from any
//! batch of cameras with [`Engine::render`]. Draws run asynchronously on the
//! engine's device queues; [`DeferredResult::materialize`] waits for them and
//! returns a `B* x H x W x 4` RGBA8 array.

pub mod batch;
pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod raster;
pub mod splat;
pub mod tensor;

pub use batch::{broadcast_shapes, CameraBatch, JobList, RenderJob};
pub use camera::{
    look_at_view_matrix, normalize_camera, pinhole_from_fov, pinhole_intrinsics, ViewProjection,
};
pub use config::{EngineConfig, RenderOptions};
pub use engine::{DeferredResult, DeviceInfo, Engine, EngineState, RenderTask, Scene};
pub use error::{BackendError, ErrorKind, RenderError, Result};
pub use raster::{CpuRasterizer, DeviceScene, DrawParams, DrawStats, RasterBackend};
pub use splat::{pack, Activation, PackedSplats, SplatArrays};
pub use tensor::{BatchParam, Placement, SplatTensor};
