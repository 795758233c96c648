mod device;
mod dispatch;
mod result;
mod scene;
mod task;

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::batch::CameraBatch;
use crate::config::{EngineConfig, RenderOptions};
use crate::error::{RenderError, Result};
use crate::raster::{CpuRasterizer, RasterBackend};
use crate::splat::{pack, SplatArrays};

use device::Device;

pub use result::DeferredResult;
pub use scene::Scene;
pub use task::RenderTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
    Terminated,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties of the opened device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub backend: String,
    pub graphics_queue_index: u32,
    pub compute_queue_index: u32,
    pub transfer_queue_index: u32,
    pub render_threads: usize,
    pub transfer_threads: usize,
    pub memory_budget: usize,
}

enum Lifecycle {
    Uninitialized,
    Ready(Arc<Device>),
    Terminated,
}

impl Lifecycle {
    fn state(&self) -> EngineState {
        match self {
            Self::Uninitialized => EngineState::Uninitialized,
            Self::Ready(_) => EngineState::Ready,
            Self::Terminated => EngineState::Terminated,
        }
    }
}

pub(crate) struct EngineShared {
    lifecycle: Mutex<Lifecycle>,
}

impl EngineShared {
    pub(crate) fn state(&self) -> EngineState {
        self.lifecycle.lock().state()
    }
}

/// One device context. Scenes and renders are only valid between `init` and
/// `terminate`.
pub struct Engine {
    config: EngineConfig,
    backend: Arc<dyn RasterBackend>,
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_backend(config, Arc::new(CpuRasterizer::new()))
    }

    pub fn with_backend(config: EngineConfig, backend: Arc<dyn RasterBackend>) -> Self {
        Self {
            config,
            backend,
            shared: Arc::new(EngineShared {
                lifecycle: Mutex::new(Lifecycle::Uninitialized),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Opens the device. Calling it on a ready engine does nothing; a
    /// terminated engine cannot be reopened.
    pub fn init(&self) -> Result<()> {
        let mut lifecycle = self.shared.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Ready(_) => return Ok(()),
            Lifecycle::Terminated => {
                return Err(RenderError::EngineTerminated {
                    state: EngineState::Terminated.as_str(),
                })
            }
            Lifecycle::Uninitialized => {}
        }

        let device = Device::open(&self.config, Arc::clone(&self.backend))?;
        info!(
            device = %device.info.name,
            backend = %device.info.backend,
            render_threads = device.info.render_threads,
            transfer_threads = device.info.transfer_threads,
            memory_budget = device.info.memory_budget,
            "engine initialized"
        );
        *lifecycle = Lifecycle::Ready(Arc::new(device));
        Ok(())
    }

    /// Moves to `Terminated` and blocks until every queue is idle.
    pub fn terminate(&self) {
        let previous = std::mem::replace(&mut *self.shared.lifecycle.lock(), Lifecycle::Terminated);
        if let Lifecycle::Ready(device) = previous {
            let outstanding = device.monitor.outstanding();
            debug!(outstanding, "draining device queues");
            device.monitor.wait_idle();
            info!(device = %device.info.name, "engine terminated");
        }
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        Ok(self.device()?.info.clone())
    }

    /// Blocks until every submitted upload and draw has finished.
    pub fn wait_idle(&self) {
        if let Ok(device) = self.device() {
            device.monitor.wait_idle();
        }
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.device()
            .map(|device| device.monitor.outstanding())
            .unwrap_or(0)
    }

    /// Bytes currently reserved by live scenes and pending outputs.
    pub fn memory_in_use(&self) -> usize {
        self.device().map(|device| device.memory.used()).unwrap_or(0)
    }

    /// Packs the arrays, uploads them on the transfer queue and blocks until
    /// the upload has completed.
    pub fn build_scene(&self, arrays: &SplatArrays<'_>) -> Result<Scene> {
        let device = self.device()?;
        let packed = pack(arrays)?;
        let bytes = packed.byte_size();
        let memory = device.memory.reserve(bytes, "scene upload")?;

        let (tx, rx) = mpsc::channel();
        let backend = Arc::clone(&device.backend);
        device.transfer.spawn(move || {
            let _ = tx.send(backend.upload(&packed));
        });

        let data = rx
            .recv()
            .map_err(|_| RenderError::submission("scene upload", "transfer queue dropped the upload"))?
            .map_err(|e| RenderError::submission("scene upload", e))?;

        let scene = Scene::new(data, memory);
        info!(
            scene = scene.id(),
            splats = scene.len(),
            sh_degree = scene.sh_degree(),
            bytes,
            "scene uploaded"
        );
        Ok(scene)
    }

    /// Validates the whole batch, then submits one draw per view. Returns
    /// without waiting.
    pub fn render(&self, scene: &Scene, cameras: &CameraBatch) -> Result<DeferredResult> {
        let device = self.device()?;
        let memory = device
            .memory
            .reserve(cameras.device_footprint()?, "output allocation")?;
        let jobs = cameras.resolve(scene.sh_degree())?;

        let output_shape = jobs.output_shape();
        let (buffer, slices) = jobs.allocate_output()?;

        let tasks = dispatch::submit(&device, scene, &jobs, slices, memory)?;
        Ok(DeferredResult::new(
            Arc::clone(&self.shared),
            buffer,
            tasks,
            output_shape,
            jobs.batch_shape,
        ))
    }

    /// Single-view render; the result has shape `H x W x 4`.
    pub fn render_one(
        &self,
        scene: &Scene,
        view: [[f32; 4]; 4],
        intrinsics: [[f32; 3]; 3],
        width: u32,
        height: u32,
        options: &RenderOptions,
    ) -> Result<DeferredResult> {
        let cameras = CameraBatch::with_options(view, intrinsics, width, height, options);
        self.render(scene, &cameras)
    }

    fn device(&self) -> Result<Arc<Device>> {
        match &*self.shared.lifecycle.lock() {
            Lifecycle::Ready(device) => Ok(Arc::clone(device)),
            other => Err(RenderError::EngineTerminated {
                state: other.state().as_str(),
            }),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.config.device_name)
            .field("backend", &self.backend.name())
            .field("state", &self.state())
            .finish()
    }
}
