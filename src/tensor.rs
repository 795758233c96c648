use std::fmt;

use ndarray::{arr0, arr2, Array, Array1, Array3, ArrayBase, ArrayD, ArrayView, ArrayViewD, Data, Dimension};

use crate::error::{RenderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Host,
    Device { ordinal: u32 },
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Device { ordinal } => write!(f, "device:{ordinal}"),
        }
    }
}

/// A per-splat `f32` array handed to the packer.
///
/// Only host-resident tensors expose a view; anything else is rejected with
/// `UnsupportedPlacement` before any data is touched.
pub trait SplatTensor {
    fn placement(&self) -> Placement;
    fn shape(&self) -> &[usize];
    fn host_view(&self) -> Option<ArrayViewD<'_, f32>>;
}

impl<S, D> SplatTensor for ArrayBase<S, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    fn placement(&self) -> Placement {
        Placement::Host
    }

    fn shape(&self) -> &[usize] {
        ArrayBase::shape(self)
    }

    fn host_view(&self) -> Option<ArrayViewD<'_, f32>> {
        Some(self.view().into_dyn())
    }
}

pub(crate) fn require_host<'a>(
    name: &'static str,
    tensor: &'a dyn SplatTensor,
) -> Result<ArrayViewD<'a, f32>> {
    let placement = tensor.placement();
    if placement != Placement::Host {
        return Err(RenderError::UnsupportedPlacement {
            name,
            placement: placement.to_string(),
        });
    }
    tensor
        .host_view()
        .ok_or_else(|| RenderError::UnsupportedPlacement {
            name,
            placement: "host (no readable view)".to_string(),
        })
}

/// A camera parameter given either as a scalar or with leading batch axes.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchParam<T>(ArrayD<T>);

impl<T> BatchParam<T> {
    pub fn scalar(value: T) -> Self {
        Self(arr0(value).into_dyn())
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn as_array(&self) -> &ArrayD<T> {
        &self.0
    }
}

impl BatchParam<f32> {
    pub fn from_mat4s(mats: &[[[f32; 4]; 4]]) -> Self {
        Self(Array3::from_shape_fn((mats.len(), 4, 4), |(i, r, c)| mats[i][r][c]).into_dyn())
    }

    pub fn from_mat3s(mats: &[[[f32; 3]; 3]]) -> Self {
        Self(Array3::from_shape_fn((mats.len(), 3, 3), |(i, r, c)| mats[i][r][c]).into_dyn())
    }
}

impl From<f32> for BatchParam<f32> {
    fn from(value: f32) -> Self {
        Self::scalar(value)
    }
}

impl From<i32> for BatchParam<i32> {
    fn from(value: i32) -> Self {
        Self::scalar(value)
    }
}

impl From<[f32; 3]> for BatchParam<f32> {
    fn from(value: [f32; 3]) -> Self {
        Self(Array1::from(value.to_vec()).into_dyn())
    }
}

impl From<[[f32; 4]; 4]> for BatchParam<f32> {
    fn from(value: [[f32; 4]; 4]) -> Self {
        Self(arr2(&value).into_dyn())
    }
}

impl From<[[f32; 3]; 3]> for BatchParam<f32> {
    fn from(value: [[f32; 3]; 3]) -> Self {
        Self(arr2(&value).into_dyn())
    }
}

impl<T> From<Vec<T>> for BatchParam<T> {
    fn from(value: Vec<T>) -> Self {
        Self(Array1::from(value).into_dyn())
    }
}

impl<T, D: Dimension> From<Array<T, D>> for BatchParam<T> {
    fn from(value: Array<T, D>) -> Self {
        Self(value.into_dyn())
    }
}

impl<'a, T: Clone, D: Dimension> From<ArrayView<'a, T, D>> for BatchParam<T> {
    fn from(value: ArrayView<'a, T, D>) -> Self {
        Self(value.to_owned().into_dyn())
    }
}
