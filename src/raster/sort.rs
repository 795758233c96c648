use rayon::prelude::*;

use super::project::ProjectedSplat;

/// Front to back.
pub(crate) fn sort_by_depth(projected_splats: &mut [ProjectedSplat]) {
    projected_splats.par_sort_by(|a, b| {
        a.depth
            .partial_cmp(&b.depth)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
