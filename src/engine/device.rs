use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::config::EngineConfig;
use crate::error::{RenderError, Result};
use crate::raster::RasterBackend;

use super::DeviceInfo;

/// Counts work submitted to any queue of the device and lets callers block
/// until all of it has drained.
#[derive(Debug, Default)]
pub(crate) struct TaskMonitor {
    inflight: Mutex<usize>,
    idle: Condvar,
}

impl TaskMonitor {
    fn begin(&self) {
        *self.inflight.lock() += 1;
    }

    fn end(&self) {
        let mut inflight = self.inflight.lock();
        *inflight = inflight.saturating_sub(1);
        if *inflight == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        *self.inflight.lock()
    }

    pub(crate) fn wait_idle(&self) {
        let mut inflight = self.inflight.lock();
        while *inflight > 0 {
            self.idle.wait(&mut inflight);
        }
    }
}

/// A device queue: a named rayon pool whose jobs are tracked by the shared
/// monitor.
pub(crate) struct Queue {
    pool: rayon::ThreadPool,
    monitor: Arc<TaskMonitor>,
}

impl Queue {
    fn new(name: &'static str, threads: usize, monitor: Arc<TaskMonitor>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("splatstream-{name}-{idx}"))
            .panic_handler(move |_| error!(queue = name, "job panicked on device queue"))
            .build()
            .map_err(|e| RenderError::submission("init", format!("failed to build {name} queue: {e}")))?;
        Ok(Self { pool, monitor })
    }

    pub(crate) fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub(crate) fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let monitor = Arc::clone(&self.monitor);
        monitor.begin();

        self.pool.spawn(move || {
            struct JobGuard(Arc<TaskMonitor>);
            impl Drop for JobGuard {
                fn drop(&mut self) {
                    self.0.end();
                }
            }
            let _guard = JobGuard(monitor);
            f();
        });
    }
}

/// Byte accounting against the configured device memory budget.
#[derive(Debug)]
pub(crate) struct MemoryBudget {
    limit: usize,
    used: Mutex<usize>,
}

impl MemoryBudget {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            used: Mutex::new(0),
        }
    }

    pub(crate) fn used(&self) -> usize {
        *self.used.lock()
    }

    pub(crate) fn reserve(self: &Arc<Self>, bytes: usize, stage: &'static str) -> Result<Reservation> {
        let mut used = self.used.lock();
        let available = self.limit.saturating_sub(*used);
        if bytes > available {
            return Err(RenderError::submission(
                stage,
                format!(
                    "out of device memory: requested {bytes} bytes, {available} of {} available",
                    self.limit
                ),
            ));
        }
        *used += bytes;
        Ok(Reservation {
            budget: Arc::clone(self),
            bytes,
        })
    }
}

/// Released when dropped.
#[derive(Debug)]
pub(crate) struct Reservation {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut used = self.budget.used.lock();
        *used = used.saturating_sub(self.bytes);
    }
}

/// Everything that exists only while the engine is ready.
pub(crate) struct Device {
    pub(crate) info: DeviceInfo,
    pub(crate) backend: Arc<dyn RasterBackend>,
    pub(crate) transfer: Queue,
    pub(crate) render: Queue,
    pub(crate) monitor: Arc<TaskMonitor>,
    pub(crate) memory: Arc<MemoryBudget>,
}

impl Device {
    pub(crate) fn open(config: &EngineConfig, backend: Arc<dyn RasterBackend>) -> Result<Self> {
        let monitor = Arc::new(TaskMonitor::default());
        let render = Queue::new("render", config.resolved_render_threads(), Arc::clone(&monitor))?;
        let transfer = Queue::new("transfer", config.transfer_threads.max(1), Arc::clone(&monitor))?;

        let info = DeviceInfo {
            name: config.device_name.clone(),
            backend: backend.name().to_string(),
            graphics_queue_index: 0,
            compute_queue_index: 0,
            transfer_queue_index: 1,
            render_threads: render.threads(),
            transfer_threads: transfer.threads(),
            memory_budget: config.device_memory_budget,
        };
        debug!(?info, "device opened");

        Ok(Self {
            info,
            backend,
            transfer,
            render,
            monitor,
            memory: Arc::new(MemoryBudget::new(config.device_memory_budget)),
        })
    }
}
