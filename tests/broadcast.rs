use glam::Vec3;
use ndarray::{Array, Array1, Array4, Dimension, IxDyn};

use splatstream::camera::mat4_to_rows;
use splatstream::{
    broadcast_shapes, look_at_view_matrix, pinhole_intrinsics, CameraBatch, Engine, EngineConfig,
    ErrorKind, SplatArrays,
};

fn identity_views(batch: &[usize]) -> Array<f32, IxDyn> {
    let mut shape = batch.to_vec();
    shape.extend_from_slice(&[4, 4]);
    Array::from_shape_fn(IxDyn(&shape), |idx| {
        let n = idx.ndim();
        if idx[n - 1] == idx[n - 2] {
            1.0
        } else {
            0.0
        }
    })
}

fn intrinsics(batch: &[usize]) -> Array<f32, IxDyn> {
    let k = pinhole_intrinsics(32.0, 32.0, 16.0, 16.0);
    let mut shape = batch.to_vec();
    shape.extend_from_slice(&[3, 3]);
    Array::from_shape_fn(IxDyn(&shape), |idx| {
        let n = idx.ndim();
        k[idx[n - 2]][idx[n - 1]]
    })
}

#[test]
fn test_scalar_near_array_far() {
    let cameras = CameraBatch::new(identity_views(&[5]), intrinsics(&[]), 32, 32)
        .near(0.01)
        .far(Array1::from(vec![1.0_f32, 2.0, 3.0, 4.0, 5.0]));
    let jobs = cameras.resolve(0).expect("compatible");
    assert_eq!(jobs.batch_shape, vec![5]);
    for (job, far) in jobs.jobs.iter().zip([1.0_f32, 2.0, 3.0, 4.0, 5.0]) {
        let p = mat4_to_rows(job.projection);
        approx::assert_abs_diff_eq!(p[2][2], far / (0.01 - far), epsilon = 1e-6);
    }
}

#[test]
fn test_outer_product_of_views_and_intrinsics() {
    let cameras = CameraBatch::new(identity_views(&[3, 1]), intrinsics(&[1, 5]), 32, 32);
    assert_eq!(cameras.batch_shape().expect("compatible"), vec![3, 5]);
    let jobs = cameras.resolve(0).expect("compatible");
    assert_eq!(jobs.len(), 15);
    assert_eq!(jobs.output_shape(), vec![3, 5, 32, 32, 4]);
}

#[test]
fn test_shape_rules() {
    assert_eq!(broadcast_shapes(&[&[8, 1, 6, 1], &[7, 1, 5]]).expect("ok"), vec![8, 7, 6, 5]);
    let err = broadcast_shapes(&[&[2, 3], &[3, 2]]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BroadcastError);
    assert!(err.to_string().contains("[2, 3]"));
}

#[test]
fn test_rendered_batch_keeps_caller_shape() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let engine = Engine::new(EngineConfig::default().render_threads(2));
    engine.init().expect("init");

    let positions = ndarray::arr2(&[[0.0_f32, 0.0, 0.0]]);
    let quats = ndarray::arr2(&[[1.0_f32, 0.0, 0.0, 0.0]]);
    let scales = ndarray::arr2(&[[0.5_f32, 0.5, 0.5]]);
    let opacities = ndarray::arr1(&[0.9_f32]);
    let colors = ndarray::arr2(&[[1.0_f32, 1.0, 1.0]]);
    let scene = engine
        .build_scene(&SplatArrays::new(&positions, &quats, &scales, &opacities, &colors))
        .expect("scene");

    let view = look_at_view_matrix(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO, Vec3::Y)
        .expect("valid camera");
    let views = Array4::from_shape_fn((2, 1, 4, 4), |(_, _, r, c)| view[r][c]);
    let backgrounds = ndarray::Array3::from_shape_fn((1, 3, 3), |(_, j, c)| {
        if j == c {
            1.0_f32
        } else {
            0.0
        }
    });
    let cameras = CameraBatch::new(views, intrinsics(&[]), 32, 32).background(backgrounds);
    let mut result = engine.render(&scene, &cameras).expect("dispatch");
    assert_eq!(result.shape(), &[2, 3, 32, 32, 4]);
    let images = result.materialize().expect("materialize");

    // Background varies along the second batch axis only.
    for i in 0..2 {
        for j in 0..3 {
            let corner: Vec<u8> = images
                .slice(ndarray::s![i, j, 0, 0, ..])
                .iter()
                .copied()
                .collect();
            for c in 0..3 {
                let expected = if c == j { 255 } else { 0 };
                assert_eq!(corner[c], expected, "view ({i},{j}) channel {c}");
            }
            assert_eq!(corner[3], 0);
        }
    }
}
