mod output;

pub use output::{bytes_per_view, PixelBuffer, PixelSlice, CHANNELS};

use glam::{Mat3, Mat4};
use ndarray::{ArrayD, IxDyn};

use crate::camera::{
    flip_view_convention, mat3_from_rows, mat3_to_rows, mat4_from_rows, mat4_to_rows,
    normalize_intrinsics, projection_from_normalized,
};
use crate::config::RenderOptions;
use crate::error::{RenderError, Result};
use crate::tensor::BatchParam;

/// Flattened per-view parameters plus the resolved job, held while a call is
/// being resolved.
const JOB_STAGING_BYTES: usize =
    std::mem::size_of::<RenderJob>() + 32 * std::mem::size_of::<f32>();

/// Numpy-style broadcast of batch shapes: trailing axes align, size-1 axes
/// stretch, any other disagreement is an error.
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let ndim = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut out = vec![1usize; ndim];

    for (axis_from_end, slot) in out.iter_mut().rev().enumerate() {
        for shape in shapes {
            if axis_from_end >= shape.len() {
                continue;
            }
            let dim = shape[shape.len() - 1 - axis_from_end];
            if dim == 1 {
                continue;
            }
            if *slot == 1 {
                *slot = dim;
            } else if *slot != dim {
                return Err(RenderError::BroadcastError {
                    shapes: shapes.iter().map(|s| s.to_vec()).collect(),
                    detail: format!(
                        "axis -{} has incompatible sizes {} and {}",
                        axis_from_end + 1,
                        *slot,
                        dim
                    ),
                });
            }
        }
    }
    Ok(out)
}

/// One fully resolved view. `view` and `projection` are in the rasterizer's
/// convention.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub index: usize,
    pub view: Mat4,
    pub projection: Mat4,
    pub model: Mat4,
    pub background: [f32; 3],
    pub aa_epsilon: f32,
    pub sh_degree: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobList {
    pub batch_shape: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub jobs: Vec<RenderJob>,
}

impl JobList {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// `B* x H x W x 4`.
    pub fn output_shape(&self) -> Vec<usize> {
        let mut shape = self.batch_shape.clone();
        shape.extend_from_slice(&[self.height as usize, self.width as usize, CHANNELS]);
        shape
    }

    pub fn allocate_output(&self) -> Result<(PixelBuffer, Vec<PixelSlice>)> {
        PixelBuffer::allocate(self.jobs.len(), self.width, self.height)
    }
}

/// Camera parameters for one render call. Every field except width/height
/// may carry arbitrary leading batch axes.
#[derive(Debug, Clone)]
pub struct CameraBatch {
    view_matrices: BatchParam<f32>,
    intrinsics: BatchParam<f32>,
    width: u32,
    height: u32,
    near: BatchParam<f32>,
    far: BatchParam<f32>,
    background: BatchParam<f32>,
    aa_epsilon: BatchParam<f32>,
    sh_degree: BatchParam<i32>,
    model: [[f32; 4]; 4],
}

impl CameraBatch {
    /// `view_matrices`: `(..., 4, 4)` row-major world-to-camera, image
    /// convention. `intrinsics`: `(..., 3, 3)` pinhole matrices in pixels.
    pub fn new(
        view_matrices: impl Into<BatchParam<f32>>,
        intrinsics: impl Into<BatchParam<f32>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self::with_options(view_matrices, intrinsics, width, height, &RenderOptions::default())
    }

    pub fn with_options(
        view_matrices: impl Into<BatchParam<f32>>,
        intrinsics: impl Into<BatchParam<f32>>,
        width: u32,
        height: u32,
        options: &RenderOptions,
    ) -> Self {
        Self {
            view_matrices: view_matrices.into(),
            intrinsics: intrinsics.into(),
            width,
            height,
            near: options.near.into(),
            far: options.far.into(),
            background: options.background.into(),
            aa_epsilon: options.aa_epsilon.into(),
            sh_degree: options.sh_degree.into(),
            model: mat4_to_rows(Mat4::IDENTITY),
        }
    }

    pub fn near(mut self, near: impl Into<BatchParam<f32>>) -> Self {
        self.near = near.into();
        self
    }

    pub fn far(mut self, far: impl Into<BatchParam<f32>>) -> Self {
        self.far = far.into();
        self
    }

    /// `(..., 3)` RGB in `[0, 1]`.
    pub fn background(mut self, background: impl Into<BatchParam<f32>>) -> Self {
        self.background = background.into();
        self
    }

    pub fn aa_epsilon(mut self, eps: impl Into<BatchParam<f32>>) -> Self {
        self.aa_epsilon = eps.into();
        self
    }

    /// `-1` selects the scene's packed degree.
    pub fn sh_degree(mut self, degree: impl Into<BatchParam<i32>>) -> Self {
        self.sh_degree = degree.into();
        self
    }

    /// Object-to-world transform shared by every view of this call.
    pub fn model(mut self, model: [[f32; 4]; 4]) -> Self {
        self.model = model;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resolves the common batch shape without building jobs.
    pub fn batch_shape(&self) -> Result<Vec<usize>> {
        let view_batch = batch_dims("view_matrices", self.view_matrices.as_array(), &[4, 4])?;
        let k_batch = batch_dims("intrinsics", self.intrinsics.as_array(), &[3, 3])?;
        let bg_batch = batch_dims("background", self.background.as_array(), &[3])?;
        broadcast_shapes(&[
            view_batch,
            k_batch,
            self.near.shape(),
            self.far.shape(),
            bg_batch,
            self.aa_epsilon.shape(),
            self.sh_degree.shape(),
        ])
    }

    /// Number of views the batch expands to.
    pub fn view_count(&self) -> Result<usize> {
        let batch_shape = self.batch_shape()?;
        checked_count(&batch_shape)
    }

    /// Bytes one render call of this batch holds on the device: the RGBA8
    /// output plus per-view job staging. Computed from shapes alone.
    pub fn device_footprint(&self) -> Result<usize> {
        self.check_size()?;
        let count = self.view_count()?;
        bytes_per_view(self.width, self.height)?
            .checked_add(JOB_STAGING_BYTES)
            .and_then(|per_view| per_view.checked_mul(count))
            .ok_or_else(|| {
                RenderError::submission(
                    "output allocation",
                    format!(
                        "out of device memory: {count} views of {}x{} overflow the address space",
                        self.width, self.height
                    ),
                )
            })
    }

    fn check_size(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::shape(format!(
                "image size must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Validates, converts and flattens the batch into one job per view in
    /// row-major order of the broadcast batch shape.
    pub fn resolve(&self, max_sh_degree: u8) -> Result<JobList> {
        self.check_size()?;

        let batch_shape = self.batch_shape()?;
        let count = checked_count(&batch_shape)?;

        // Per-view conversion runs on the caller's arrays, before broadcasting.
        let views = map_matrices::<4, 4>(self.view_matrices.as_array(), |m| {
            mat4_to_rows(flip_view_convention(mat4_from_rows(&m)))
        })?;
        let ks = map_matrices::<3, 3>(self.intrinsics.as_array(), |m| {
            mat3_to_rows(normalize_intrinsics(mat3_from_rows(&m), self.width, self.height))
        })?;

        let views = broadcast_flat("view_matrices", &views, &batch_shape, &[4, 4])?;
        let ks = broadcast_flat("intrinsics", &ks, &batch_shape, &[3, 3])?;
        let nears = broadcast_flat("near", self.near.as_array(), &batch_shape, &[])?;
        let fars = broadcast_flat("far", self.far.as_array(), &batch_shape, &[])?;
        let backgrounds = broadcast_flat("background", self.background.as_array(), &batch_shape, &[3])?;
        let epsilons = broadcast_flat("aa_epsilon", self.aa_epsilon.as_array(), &batch_shape, &[])?;
        let degrees = broadcast_flat("sh_degree", self.sh_degree.as_array(), &batch_shape, &[])?;

        let model = mat4_from_rows(&self.model);
        let mut jobs = Vec::with_capacity(count);

        for i in 0..count {
            let sh_degree = resolve_sh_degree(degrees[i], max_sh_degree, i)?;
            check_depth_range(nears[i], fars[i], i)?;

            let view = Mat4::from_cols_slice(&views[i * 16..(i + 1) * 16]).transpose();
            let k_ndc = Mat3::from_cols_slice(&ks[i * 9..(i + 1) * 9]).transpose();

            jobs.push(RenderJob {
                index: i,
                view,
                projection: projection_from_normalized(k_ndc, nears[i], fars[i]),
                model,
                background: [backgrounds[i * 3], backgrounds[i * 3 + 1], backgrounds[i * 3 + 2]],
                aa_epsilon: epsilons[i],
                sh_degree,
            });
        }

        Ok(JobList {
            batch_shape,
            width: self.width,
            height: self.height,
            jobs,
        })
    }
}

fn checked_count(batch_shape: &[usize]) -> Result<usize> {
    batch_shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| RenderError::shape(format!("batch shape {batch_shape:?} overflows")))
}

fn check_depth_range(near: f32, far: f32, job: usize) -> Result<()> {
    if near.is_finite() && far.is_finite() && near > 0.0 && far > near {
        return Ok(());
    }
    Err(RenderError::shape(format!(
        "view {job} needs 0 < near < far, got near={near} far={far}"
    )))
}

fn resolve_sh_degree(requested: i32, max_sh_degree: u8, job: usize) -> Result<u8> {
    match requested {
        -1 => Ok(max_sh_degree),
        d if (0..=max_sh_degree as i32).contains(&d) => Ok(d as u8),
        d => Err(RenderError::shape(format!(
            "view {job} requests SH degree {d}, scene supports -1..={max_sh_degree}"
        ))),
    }
}

fn batch_dims<'a, T>(name: &str, array: &'a ArrayD<T>, trailing: &[usize]) -> Result<&'a [usize]> {
    let shape = array.shape();
    let split = shape.len().checked_sub(trailing.len()).ok_or_else(|| {
        RenderError::shape(format!(
            "{name} must end with axes {trailing:?}, got shape {shape:?}"
        ))
    })?;
    if &shape[split..] != trailing {
        return Err(RenderError::shape(format!(
            "{name} must end with axes {trailing:?}, got shape {shape:?}"
        )));
    }
    Ok(&shape[..split])
}

/// Applies `f` to every trailing `R x C` matrix, keeping the array shape.
fn map_matrices<const R: usize, const C: usize>(
    array: &ArrayD<f32>,
    f: impl Fn([[f32; C]; R]) -> [[f32; C]; R],
) -> Result<ArrayD<f32>> {
    let flat: Vec<f32> = array.iter().copied().collect();
    let mut mapped = Vec::with_capacity(flat.len());
    for chunk in flat.chunks_exact(R * C) {
        let mut m = [[0.0f32; C]; R];
        for (r, row) in m.iter_mut().enumerate() {
            row.copy_from_slice(&chunk[r * C..(r + 1) * C]);
        }
        for row in f(m) {
            mapped.extend_from_slice(&row);
        }
    }
    ArrayD::from_shape_vec(IxDyn(array.shape()), mapped)
        .map_err(|e| RenderError::shape(format!("matrix batch reshape failed: {e}")))
}

/// Broadcasts `array` to `batch ++ trailing` and returns its elements in
/// row-major order.
fn broadcast_flat<T: Copy>(
    name: &str,
    array: &ArrayD<T>,
    batch: &[usize],
    trailing: &[usize],
) -> Result<Vec<T>> {
    let mut full = batch.to_vec();
    full.extend_from_slice(trailing);
    let view = array
        .broadcast(IxDyn(&full))
        .ok_or_else(|| RenderError::BroadcastError {
            shapes: vec![array.shape().to_vec(), full.clone()],
            detail: format!("{name} cannot be broadcast to the common batch shape"),
        })?;
    Ok(view.iter().copied().collect())
}
