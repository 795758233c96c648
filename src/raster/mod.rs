mod blend;
mod project;
mod sh;
mod sort;

use std::time::{Duration, Instant};

use glam::{Mat3, Mat4, Quat, Vec3};
use half::f16;
use tracing::trace;

use crate::batch::{bytes_per_view, RenderJob};
use crate::error::BackendError;
use crate::splat::{coefficients_for_degree, PackedSplats};

pub use sh::{dc_from_color, evaluate_sh};

/// Splat data in the layout the rasterizer consumes: world-space covariance
/// is precomputed once at upload.
#[derive(Debug, Clone)]
pub struct DeviceScene {
    positions: Vec<Vec3>,
    covariances: Vec<[f32; 6]>,
    opacities: Vec<f32>,
    sh: Vec<f16>,
    sh_degree: u8,
}

impl DeviceScene {
    pub fn from_packed(splats: &PackedSplats) -> Self {
        let positions = splats.positions().iter().map(|&p| Vec3::from_array(p)).collect();
        let covariances = splats
            .rotations()
            .iter()
            .zip(splats.scales())
            .map(|(&q, &s)| covariance_3d(q, s))
            .collect();
        Self {
            positions,
            covariances,
            opacities: splats.opacities().to_vec(),
            sh: splats.sh_coefficients().to_vec(),
            sh_degree: splats.sh_degree(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn sh_degree(&self) -> u8 {
        self.sh_degree
    }

    pub fn byte_size(&self) -> usize {
        self.len() * (3 + 6 + 1) * std::mem::size_of::<f32>()
            + self.sh.len() * std::mem::size_of::<f16>()
    }

    fn coefficients_per_channel(&self) -> usize {
        coefficients_for_degree(self.sh_degree)
    }

    fn sh_of(&self, index: usize) -> &[f16] {
        let stride = self.coefficients_per_channel() * 3;
        &self.sh[index * stride..(index + 1) * stride]
    }
}

/// Upper triangle (xx, xy, xz, yy, yz, zz) of `R S S^T R^T`.
pub fn covariance_3d(rotation_wxyz: [f32; 4], scale: [f32; 3]) -> [f32; 6] {
    let [w, x, y, z] = rotation_wxyz;
    let r = Mat3::from_quat(Quat::from_xyzw(x, y, z, w));
    let s = Mat3::from_diagonal(Vec3::from_array(scale).max(Vec3::splat(1e-6)));
    let m = r * s;
    let cov = m * m.transpose();
    [
        cov.x_axis.x,
        cov.y_axis.x,
        cov.z_axis.x,
        cov.y_axis.y,
        cov.z_axis.y,
        cov.z_axis.z,
    ]
}

/// Everything one draw needs besides the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawParams {
    pub view: Mat4,
    pub projection: Mat4,
    pub model: Mat4,
    pub background: [f32; 3],
    pub aa_epsilon: f32,
    pub sh_degree: u8,
    pub width: u32,
    pub height: u32,
}

impl DrawParams {
    pub fn from_job(job: &RenderJob, width: u32, height: u32) -> Self {
        Self {
            view: job.view,
            projection: job.projection,
            model: job.model,
            background: job.background,
            aa_epsilon: job.aa_epsilon,
            sh_degree: job.sh_degree,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawStats {
    pub splats_visible: usize,
    pub project_time: Duration,
    pub raster_time: Duration,
}

/// The device-side half of the engine: scene upload and one draw per view.
pub trait RasterBackend: Send + Sync {
    fn name(&self) -> &str;

    fn upload(&self, splats: &PackedSplats) -> Result<DeviceScene, BackendError>;

    /// Writes `height * width * 4` RGBA8 bytes into `target`.
    fn draw(
        &self,
        scene: &DeviceScene,
        params: &DrawParams,
        target: &mut [u8],
    ) -> Result<DrawStats, BackendError>;
}

/// Reference rasterizer: EWA projection, depth sort and banded front-to-back
/// compositing on the calling rayon pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuRasterizer;

impl CpuRasterizer {
    pub fn new() -> Self {
        Self
    }
}

impl RasterBackend for CpuRasterizer {
    fn name(&self) -> &str {
        "cpu-rasterizer"
    }

    fn upload(&self, splats: &PackedSplats) -> Result<DeviceScene, BackendError> {
        Ok(DeviceScene::from_packed(splats))
    }

    fn draw(
        &self,
        scene: &DeviceScene,
        params: &DrawParams,
        target: &mut [u8],
    ) -> Result<DrawStats, BackendError> {
        let expected =
            bytes_per_view(params.width, params.height).map_err(|e| BackendError::Other(e.to_string()))?;
        if target.len() != expected {
            return Err(BackendError::TargetSize {
                expected,
                actual: target.len(),
            });
        }
        if params.sh_degree > scene.sh_degree() {
            return Err(BackendError::ShDegree {
                requested: params.sh_degree,
                available: scene.coefficients_per_channel(),
            });
        }

        let start = Instant::now();
        let mut projected = project::project_splats(scene, params);
        sort::sort_by_depth(&mut projected);
        let project_time = start.elapsed();

        let start = Instant::now();
        blend::composite(&projected, params, target);
        let raster_time = start.elapsed();

        trace!(
            visible = projected.len(),
            total = scene.len(),
            ?project_time,
            ?raster_time,
            "cpu draw"
        );

        Ok(DrawStats {
            splats_visible: projected.len(),
            project_time,
            raster_time,
        })
    }
}
