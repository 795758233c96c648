use glam::{Mat3, Vec2, Vec3};
use rayon::prelude::*;

use super::sh::evaluate_sh;
use super::{DeviceScene, DrawParams};
use crate::camera::{mat4_to_rows, ndc_to_pixel};

pub(crate) const SIGMA_CUTOFF: f32 = 3.0;
pub(crate) const MIN_SPLAT_RADIUS: f32 = 0.3;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ProjectedSplat {
    pub center: Vec2,
    pub depth: f32,
    pub radius: f32,
    pub inv_cov_a: f32,
    pub inv_cov_b: f32,
    pub inv_cov_c: f32,
    pub opacity: f32,
    pub color: [f32; 3],
}

/// Pixel-space covariance `J W Σ W^T J^T` with `eps` added on the diagonal.
pub(crate) fn project_covariance(
    cov: &[f32; 6],
    linear: Mat3,
    jacobian: [[f32; 3]; 2],
    eps: f32,
) -> (f32, f32, f32) {
    let sigma = Mat3::from_cols(
        Vec3::new(cov[0], cov[1], cov[2]),
        Vec3::new(cov[1], cov[3], cov[4]),
        Vec3::new(cov[2], cov[4], cov[5]),
    );
    let cov_view = linear * sigma * linear.transpose();

    let j0 = Vec3::from_array(jacobian[0]);
    let j1 = Vec3::from_array(jacobian[1]);
    let cj0 = cov_view * j0;
    let cj1 = cov_view * j1;

    (j0.dot(cj0) + eps, j0.dot(cj1), j1.dot(cj1) + eps)
}

pub(crate) fn gaussian_extent(cov_a: f32, cov_b: f32, cov_c: f32) -> f32 {
    let trace = cov_a + cov_c;
    let det = cov_a * cov_c - cov_b * cov_b;
    let disc = (trace * trace - 4.0 * det).max(0.0).sqrt();
    let lambda_max = 0.5 * (trace + disc);
    SIGMA_CUTOFF * lambda_max.max(0.0).sqrt()
}

pub(crate) fn invert_2x2_covariance(cov_a: f32, cov_b: f32, cov_c: f32) -> Option<(f32, f32, f32)> {
    let det = cov_a * cov_c - cov_b * cov_b;
    if det <= 1e-12 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    Some((cov_c * inv_det, -cov_b * inv_det, cov_a * inv_det))
}

pub(crate) fn project_splats(scene: &DeviceScene, params: &DrawParams) -> Vec<ProjectedSplat> {
    let model_view = params.view * params.model;
    let linear = Mat3::from_mat4(model_view);
    let p = mat4_to_rows(params.projection);
    let camera_origin = model_view.inverse().transform_point3(Vec3::ZERO);

    let sw = params.width as f32;
    let sh = params.height as f32;
    let half_w = sw * 0.5;
    let half_h = sh * 0.5;

    (0..scene.len())
        .into_par_iter()
        .filter_map(|i| {
            let position = scene.positions[i];
            let t = model_view.transform_point3(position);
            let clip = params.projection * t.extend(1.0);
            if clip.w <= 0.0 || !clip.is_finite() {
                return None;
            }
            let inv_w = 1.0 / clip.w;
            let ndc = clip.truncate() * inv_w;
            if !(0.0..=1.0).contains(&ndc.z) {
                return None;
            }
            let center = ndc_to_pixel(ndc.truncate(), params.width, params.height);

            // d(ndc_r)/dt_j, scaled to pixels.
            let inv_w2 = inv_w * inv_w;
            let mut jacobian = [[0.0f32; 3]; 2];
            for (r, (row, scale)) in jacobian.iter_mut().zip([half_w, half_h]).enumerate() {
                let c_r = if r == 0 { clip.x } else { clip.y };
                for (j, value) in row.iter_mut().enumerate() {
                    *value = scale * (p[r][j] * clip.w - c_r * p[3][j]) * inv_w2;
                }
            }

            let (cov_a, cov_b, cov_c) = project_covariance(
                &scene.covariances[i],
                linear,
                jacobian,
                params.aa_epsilon,
            );
            if cov_a <= 0.0 || cov_c <= 0.0 {
                return None;
            }

            let radius = gaussian_extent(cov_a, cov_b, cov_c);
            if radius < MIN_SPLAT_RADIUS || !radius.is_finite() {
                return None;
            }
            if center.x + radius < 0.0
                || center.x - radius > sw
                || center.y + radius < 0.0
                || center.y - radius > sh
            {
                return None;
            }

            let (inv_cov_a, inv_cov_b, inv_cov_c) = invert_2x2_covariance(cov_a, cov_b, cov_c)?;

            let direction = (position - camera_origin).normalize_or_zero();
            let color = evaluate_sh(scene.sh_of(i), params.sh_degree, direction);

            Some(ProjectedSplat {
                center,
                depth: -t.z,
                radius,
                inv_cov_a,
                inv_cov_b,
                inv_cov_c,
                opacity: scene.opacities[i],
                color,
            })
        })
        .collect()
}
