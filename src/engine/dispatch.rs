use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::{JobList, PixelSlice};
use crate::error::{RenderError, Result};
use crate::raster::DrawParams;

use super::device::{Device, Reservation};
use super::scene::Scene;
use super::task::RenderTask;

/// Submits one draw per job on the render queue and returns the task handles
/// in job order without waiting on any of them.
pub(crate) fn submit(
    device: &Device,
    scene: &Scene,
    jobs: &JobList,
    slices: Vec<PixelSlice>,
    output_memory: Reservation,
) -> Result<Vec<RenderTask>> {
    if slices.len() != jobs.len() {
        return Err(RenderError::submission(
            "dispatch",
            format!("{} output slices for {} jobs", slices.len(), jobs.len()),
        ));
    }

    debug!(
        views = jobs.len(),
        batch_shape = ?jobs.batch_shape,
        scene = scene.id(),
        "dispatching render jobs"
    );

    // Shared by every draw of this call, freed when the last one finishes.
    let output_memory = Arc::new(output_memory);
    let mut tasks = Vec::with_capacity(jobs.len());

    for (job, slice) in jobs.jobs.iter().zip(slices) {
        let (task, completion) = RenderTask::new(job.index);
        let params = DrawParams::from_job(job, jobs.width, jobs.height);
        let backend = Arc::clone(&device.backend);
        let scene = scene.clone();
        let output_memory = Arc::clone(&output_memory);
        let index = job.index;

        device.render.spawn(move || {
            // Rebound in this order so the slice is released before the task
            // completes, also on unwind.
            let completion = completion;
            let mut slice = slice;
            let outcome = backend
                .draw(scene.data(), &params, slice.as_mut_slice())
                .map_err(|e| {
                    warn!(view = index, error = %e, "draw failed");
                    RenderError::submission("draw", e)
                });
            drop(slice);
            drop(scene);
            drop(output_memory);
            completion.finish(outcome);
        });

        tasks.push(task);
    }

    Ok(tasks)
}
