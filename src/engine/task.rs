use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{RenderError, Result};
use crate::raster::DrawStats;

#[derive(Debug)]
struct TaskState {
    index: usize,
    result: Mutex<Option<Result<DrawStats>>>,
    done: Condvar,
}

/// Handle to one submitted draw. Cloning shares the same completion.
#[derive(Clone)]
pub struct RenderTask {
    state: Arc<TaskState>,
}

impl RenderTask {
    pub(crate) fn new(index: usize) -> (Self, Completion) {
        let state = Arc::new(TaskState {
            index,
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            Completion { state },
        )
    }

    /// Position of this view in the flattened batch.
    pub fn index(&self) -> usize {
        self.state.index
    }

    pub fn is_done(&self) -> bool {
        self.state.result.lock().is_some()
    }

    /// Blocks until the draw has finished. Subsequent calls return the same
    /// outcome immediately.
    pub fn wait(&self) -> Result<DrawStats> {
        let mut result = self.state.result.lock();
        loop {
            if let Some(outcome) = result.as_ref() {
                return outcome.clone();
            }
            self.state.done.wait(&mut result);
        }
    }
}

impl fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTask")
            .field("index", &self.state.index)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Worker-side half of a task. Dropping it without `finish` (a panicking
/// draw) completes the task as failed so waiters never hang.
pub(crate) struct Completion {
    state: Arc<TaskState>,
}

impl Completion {
    pub(crate) fn finish(&self, outcome: Result<DrawStats>) {
        let mut result = self.state.result.lock();
        if result.is_none() {
            *result = Some(outcome);
            self.state.done.notify_all();
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish(Err(RenderError::submission(
            "draw",
            format!("task {} was abandoned by the device", self.state.index),
        )));
    }
}
