use half::f16;
use ndarray::{ArrayViewD, Axis};
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::tensor::{require_host, SplatTensor};

pub const MAX_SH_DEGREE: u8 = 3;
pub const QUAT_NORM_EPSILON: f32 = 1e-8;

pub fn sh_degree_for_coefficients(k: usize) -> Option<u8> {
    match k {
        1 => Some(0),
        4 => Some(1),
        9 => Some(2),
        16 => Some(3),
        _ => None,
    }
}

pub fn coefficients_for_degree(degree: u8) -> usize {
    let d = degree as usize + 1;
    d * d
}

/// How scales and opacities are encoded in the incoming arrays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Activation {
    /// Positive scales and opacities in `[0, 1]`.
    #[default]
    Activated,
    /// Log-scales and opacity logits, as stored by training code.
    Raw,
}

/// Five parallel per-splat arrays: positions `(N,3)`, quaternions `(N,4)`
/// in wxyz order, scales `(N,3)`, opacities `(N,)` and colors `(N,3)` or
/// `(N,K,3)` spherical-harmonics coefficients.
pub struct SplatArrays<'a> {
    pub positions: &'a dyn SplatTensor,
    pub quaternions: &'a dyn SplatTensor,
    pub scales: &'a dyn SplatTensor,
    pub opacities: &'a dyn SplatTensor,
    pub colors: &'a dyn SplatTensor,
    pub activation: Activation,
}

impl<'a> SplatArrays<'a> {
    pub fn new(
        positions: &'a dyn SplatTensor,
        quaternions: &'a dyn SplatTensor,
        scales: &'a dyn SplatTensor,
        opacities: &'a dyn SplatTensor,
        colors: &'a dyn SplatTensor,
    ) -> Self {
        Self {
            positions,
            quaternions,
            scales,
            opacities,
            colors,
            activation: Activation::Activated,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }
}

/// Validated host-side scene data ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedSplats {
    positions: Vec<[f32; 3]>,
    rotations: Vec<[f32; 4]>,
    scales: Vec<[f32; 3]>,
    opacities: Vec<f32>,
    sh: Vec<f16>,
    sh_degree: u8,
}

impl PackedSplats {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn sh_degree(&self) -> u8 {
        self.sh_degree
    }

    pub fn coefficients_per_channel(&self) -> usize {
        coefficients_for_degree(self.sh_degree)
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    /// Unit quaternions, wxyz.
    pub fn rotations(&self) -> &[[f32; 4]] {
        &self.rotations
    }

    pub fn scales(&self) -> &[[f32; 3]] {
        &self.scales
    }

    pub fn opacities(&self) -> &[f32] {
        &self.opacities
    }

    /// `N * K * 3` half-precision coefficients, splat-major then coefficient
    /// then channel.
    pub fn sh_coefficients(&self) -> &[f16] {
        &self.sh
    }

    pub fn byte_size(&self) -> usize {
        let n = self.len();
        n * (3 + 4 + 3 + 1) * std::mem::size_of::<f32>() + self.sh.len() * std::mem::size_of::<f16>()
    }
}

fn check_trailing(
    name: &'static str,
    view: &ArrayViewD<'_, f32>,
    rank: usize,
    trailing: Option<usize>,
) -> Result<()> {
    let shape = view.shape();
    if shape.len() != rank {
        return Err(RenderError::shape(format!(
            "{name} must have rank {rank}, got shape {shape:?}"
        )));
    }
    if let Some(t) = trailing {
        if shape[rank - 1] != t {
            return Err(RenderError::shape(format!(
                "{name} must have trailing dimension {t}, got shape {shape:?}"
            )));
        }
    }
    Ok(())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Validate and normalize raw splat arrays.
pub fn pack(arrays: &SplatArrays<'_>) -> Result<PackedSplats> {
    let positions = require_host("positions", arrays.positions)?;
    let quaternions = require_host("quaternions", arrays.quaternions)?;
    let scales = require_host("scales", arrays.scales)?;
    let opacities = require_host("opacities", arrays.opacities)?;
    let mut colors = require_host("colors", arrays.colors)?;

    // (N, 3) colors are degree-0 coefficients.
    if colors.ndim() == 2 {
        colors = colors.insert_axis(Axis(1));
    }

    check_trailing("positions", &positions, 2, Some(3))?;
    check_trailing("quaternions", &quaternions, 2, Some(4))?;
    check_trailing("scales", &scales, 2, Some(3))?;
    check_trailing("opacities", &opacities, 1, None)?;
    check_trailing("colors", &colors, 3, Some(3))?;

    let lengths = [
        ("positions", positions.shape()[0]),
        ("quaternions", quaternions.shape()[0]),
        ("scales", scales.shape()[0]),
        ("opacities", opacities.shape()[0]),
        ("colors", colors.shape()[0]),
    ];
    let n = lengths[0].1;
    if lengths.iter().any(|&(_, len)| len != n) {
        let listing = lengths
            .iter()
            .map(|(name, len)| format!("{name}={len}"))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(RenderError::shape(format!(
            "per-splat arrays disagree on N: {listing}"
        )));
    }

    let k = colors.shape()[1];
    let sh_degree = sh_degree_for_coefficients(k).ok_or_else(|| {
        RenderError::shape(format!(
            "colors carry {k} coefficients per channel; expected one of 1, 4, 9, 16"
        ))
    })?;

    let mut packed_positions = Vec::with_capacity(n);
    let mut rotations = Vec::with_capacity(n);
    let mut packed_scales = Vec::with_capacity(n);
    let mut packed_opacities = Vec::with_capacity(n);

    for i in 0..n {
        packed_positions.push([positions[[i, 0]], positions[[i, 1]], positions[[i, 2]]]);

        let q = [
            quaternions[[i, 0]],
            quaternions[[i, 1]],
            quaternions[[i, 2]],
            quaternions[[i, 3]],
        ];
        let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
        if !norm.is_finite() || norm < QUAT_NORM_EPSILON {
            return Err(RenderError::DegenerateOrientation { index: i, norm });
        }
        let inv = 1.0 / norm;
        rotations.push([q[0] * inv, q[1] * inv, q[2] * inv, q[3] * inv]);

        let s = [scales[[i, 0]], scales[[i, 1]], scales[[i, 2]]];
        let o = opacities[[i]];
        match arrays.activation {
            Activation::Activated => {
                packed_scales.push(s);
                packed_opacities.push(o);
            }
            Activation::Raw => {
                packed_scales.push([s[0].exp(), s[1].exp(), s[2].exp()]);
                packed_opacities.push(sigmoid(o));
            }
        }
    }

    // Logical iteration order is (splat, coefficient, channel) regardless of
    // the caller's memory layout.
    let sh: Vec<f16> = colors.iter().map(|&c| f16::from_f32(c)).collect();

    debug!(splats = n, sh_degree, "packed splat parameters");

    Ok(PackedSplats {
        positions: packed_positions,
        rotations,
        scales: packed_scales,
        opacities: packed_opacities,
        sh,
        sh_degree,
    })
}
