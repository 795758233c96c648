use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use tracing::debug;

use crate::batch::PixelBuffer;
use crate::error::{RenderError, Result};
use crate::raster::DrawStats;

use super::task::RenderTask;
use super::{EngineShared, EngineState};

enum Materialization {
    Pending(PixelBuffer),
    Ready(ArrayD<u8>),
    Failed(RenderError),
}

/// The output of one `render` call: a `B* x H x W x 4` RGBA8 buffer that
/// becomes readable once every per-view task has finished.
pub struct DeferredResult {
    engine: Arc<EngineShared>,
    shape: Vec<usize>,
    batch_shape: Vec<usize>,
    tasks: Vec<RenderTask>,
    stats: Vec<DrawStats>,
    state: Materialization,
}

impl DeferredResult {
    pub(crate) fn new(
        engine: Arc<EngineShared>,
        buffer: PixelBuffer,
        tasks: Vec<RenderTask>,
        shape: Vec<usize>,
        batch_shape: Vec<usize>,
    ) -> Self {
        Self {
            engine,
            shape,
            batch_shape,
            tasks,
            stats: Vec::new(),
            state: Materialization::Pending(buffer),
        }
    }

    /// Output shape, batch axes first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn batch_shape(&self) -> &[usize] {
        &self.batch_shape
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Per-view tasks in row-major batch order.
    pub fn tasks(&self) -> &[RenderTask] {
        &self.tasks
    }

    /// Per-view draw statistics; empty until materialized.
    pub fn stats(&self) -> &[DrawStats] {
        &self.stats
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.state, Materialization::Ready(_))
    }

    /// Waits on every task in order and returns the pixels.
    ///
    /// Calling again returns the same buffer without waiting. A failure is
    /// final: every later call reports the same error.
    pub fn materialize(&mut self) -> Result<ArrayViewD<'_, u8>> {
        if let Materialization::Pending(_) = self.state {
            let placeholder = Materialization::Failed(RenderError::submission(
                "materialize",
                "interrupted while synchronizing",
            ));
            self.state = match std::mem::replace(&mut self.state, placeholder) {
                Materialization::Pending(buffer) => match self.synchronize(buffer) {
                    Ok(pixels) => Materialization::Ready(pixels),
                    Err(err) => Materialization::Failed(err),
                },
                settled => settled,
            };
        }

        match &self.state {
            Materialization::Ready(pixels) => Ok(pixels.view()),
            Materialization::Failed(err) => Err(err.clone()),
            Materialization::Pending(_) => Err(RenderError::submission(
                "materialize",
                "result is still pending",
            )),
        }
    }

    pub fn into_array(mut self) -> Result<ArrayD<u8>> {
        self.materialize()?;
        match std::mem::replace(&mut self.state, Materialization::Ready(ArrayD::zeros(IxDyn(&[0])))) {
            Materialization::Ready(pixels) => Ok(pixels),
            Materialization::Failed(err) => Err(err),
            Materialization::Pending(_) => Err(RenderError::submission(
                "materialize",
                "result is still pending",
            )),
        }
    }

    fn synchronize(&mut self, buffer: PixelBuffer) -> Result<ArrayD<u8>> {
        let state = self.engine.state();
        if state != EngineState::Ready {
            return Err(RenderError::EngineTerminated {
                state: state.as_str(),
            });
        }

        let mut stats = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            stats.push(task.wait()?);
        }

        let pixels = buffer.into_vec().map_err(|buffer| {
            RenderError::submission(
                "materialize",
                format!("{} writers still hold the output", buffer.live_writers()),
            )
        })?;
        let array = ArrayD::from_shape_vec(IxDyn(&self.shape), pixels)
            .map_err(|e| RenderError::shape(format!("output reshape failed: {e}")))?;

        debug!(views = self.tasks.len(), shape = ?self.shape, "render result materialized");
        self.stats = stats;
        Ok(array)
    }
}

impl fmt::Debug for DeferredResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            Materialization::Pending(_) => "pending",
            Materialization::Ready(_) => "ready",
            Materialization::Failed(_) => "failed",
        };
        f.debug_struct("DeferredResult")
            .field("shape", &self.shape)
            .field("views", &self.tasks.len())
            .field("state", &state)
            .finish()
    }
}
