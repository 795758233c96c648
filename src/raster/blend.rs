use rayon::prelude::*;

use super::project::ProjectedSplat;
use super::DrawParams;
use crate::batch::CHANNELS;

pub(crate) const MAX_SPLAT_ALPHA: f32 = 0.99;
pub(crate) const MIN_SPLAT_ALPHA: f32 = 1.0 / 255.0;
pub(crate) const MIN_TRANSMITTANCE: f32 = 1e-4;

pub(crate) fn evaluate_2d_gaussian(
    dx: f32,
    dy: f32,
    inv_cov_a: f32,
    inv_cov_b: f32,
    inv_cov_c: f32,
) -> f32 {
    let q = dx * dx * inv_cov_a + 2.0 * dx * dy * inv_cov_b + dy * dy * inv_cov_c;
    if q < 0.0 {
        return 0.0;
    }
    (-0.5 * q).exp()
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Front-to-back compositing of depth-sorted splats over the background.
/// Alpha is the accumulated coverage `1 - T`.
pub(crate) fn composite(projected_splats: &[ProjectedSplat], params: &DrawParams, target: &mut [u8]) {
    let width = params.width as usize;
    let height = params.height as usize;
    if width == 0 || height == 0 {
        return;
    }

    let num_bands = rayon::current_num_threads().max(1);
    let band_height = height.div_ceil(num_bands);
    let actual_bands = height.div_ceil(band_height);

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); actual_bands];
    for (si, splat) in projected_splats.iter().enumerate() {
        let min_y = (splat.center.y - splat.radius).floor().max(0.0) as usize;
        let max_y = (splat.center.y + splat.radius)
            .ceil()
            .min(height.saturating_sub(1) as f32)
            .max(0.0) as usize;
        if min_y > max_y {
            continue;
        }
        let band_start = (min_y / band_height).min(actual_bands - 1);
        let band_end = (max_y / band_height).min(actual_bands - 1);
        for bin in &mut bins[band_start..=band_end] {
            bin.push(si);
        }
    }

    let background = params.background;

    target
        .par_chunks_mut(band_height * width * CHANNELS)
        .zip(bins.par_iter())
        .enumerate()
        .for_each(|(band_idx, (band, bin))| {
            let y_start = band_idx * band_height;
            let band_rows = band.len() / (width * CHANNELS);
            let y_end = y_start + band_rows;

            let mut accum = vec![[0.0f32; 3]; band_rows * width];
            let mut transmittance = vec![1.0f32; band_rows * width];

            for &si in bin {
                let splat = &projected_splats[si];

                let min_x = (splat.center.x - splat.radius).floor().max(0.0) as usize;
                let max_x = (splat.center.x + splat.radius)
                    .ceil()
                    .min((width - 1) as f32)
                    .max(0.0) as usize;
                let min_y = (splat.center.y - splat.radius)
                    .floor()
                    .max(y_start as f32) as usize;
                let max_y = (splat.center.y + splat.radius)
                    .ceil()
                    .min((y_end - 1) as f32) as usize;

                if min_x > max_x || min_y > max_y {
                    continue;
                }

                for y in min_y..=max_y {
                    let row = (y - y_start) * width;
                    for x in min_x..=max_x {
                        let idx = row + x;
                        let t = transmittance[idx];
                        if t < MIN_TRANSMITTANCE {
                            continue;
                        }

                        let dx = x as f32 + 0.5 - splat.center.x;
                        let dy = y as f32 + 0.5 - splat.center.y;
                        let gaussian = evaluate_2d_gaussian(
                            dx,
                            dy,
                            splat.inv_cov_a,
                            splat.inv_cov_b,
                            splat.inv_cov_c,
                        );

                        let alpha = (splat.opacity * gaussian).min(MAX_SPLAT_ALPHA);
                        if alpha < MIN_SPLAT_ALPHA {
                            continue;
                        }

                        let weight = alpha * t;
                        let pixel = &mut accum[idx];
                        pixel[0] += splat.color[0] * weight;
                        pixel[1] += splat.color[1] * weight;
                        pixel[2] += splat.color[2] * weight;
                        transmittance[idx] = t * (1.0 - alpha);
                    }
                }
            }

            for ((out, color), &t) in band
                .chunks_exact_mut(CHANNELS)
                .zip(&accum)
                .zip(&transmittance)
            {
                out[0] = to_byte(color[0] + t * background[0]);
                out[1] = to_byte(color[1] + t * background[1]);
                out[2] = to_byte(color[2] + t * background[2]);
                out[3] = to_byte(1.0 - t);
            }
        });
}
