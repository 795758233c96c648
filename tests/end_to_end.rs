use glam::Vec3;
use ndarray::{s, Array1, Array2, Array3};
use rand::{Rng, SeedableRng};

use splatstream::raster::dc_from_color;
use splatstream::{
    look_at_view_matrix, pinhole_intrinsics, BatchParam, CameraBatch, Engine, EngineConfig,
    ErrorKind, RenderOptions, SplatArrays,
};

const SIZE: u32 = 64;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Cloud {
    positions: Array2<f32>,
    quats: Array2<f32>,
    scales: Array2<f32>,
    opacities: Array1<f32>,
    colors: Array3<f32>,
}

impl Cloud {
    fn from_splats(splats: &[([f32; 3], f32, [f32; 3])]) -> Self {
        let n = splats.len();
        Self {
            positions: Array2::from_shape_fn((n, 3), |(i, c)| splats[i].0[c]),
            quats: Array2::from_shape_fn((n, 4), |(_, c)| if c == 0 { 1.0 } else { 0.0 }),
            scales: Array2::from_shape_fn((n, 3), |(i, _)| splats[i].1),
            opacities: Array1::from_elem(n, 0.99),
            colors: Array3::from_shape_fn((n, 1, 3), |(i, _, c)| dc_from_color(splats[i].2[c])),
        }
    }

    fn arrays(&self) -> SplatArrays<'_> {
        SplatArrays::new(
            &self.positions,
            &self.quats,
            &self.scales,
            &self.opacities,
            &self.colors,
        )
    }
}

fn engine() -> Engine {
    init_tracing();
    let engine = Engine::new(EngineConfig::default().render_threads(2));
    engine.init().expect("engine init");
    engine
}

fn intrinsics() -> [[f32; 3]; 3] {
    pinhole_intrinsics(64.0, 64.0, 32.0, 32.0)
}

#[test]
fn test_single_red_splat_end_to_end() {
    let engine = engine();
    let cloud = Cloud::from_splats(&[([0.0, 0.0, 0.0], 1.0, [1.0, 0.0, 0.0])]);
    let scene = engine.build_scene(&cloud.arrays()).expect("scene");
    assert_eq!(scene.len(), 1);
    assert_eq!(scene.sh_degree(), 0);

    let view = look_at_view_matrix(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
        .expect("valid camera");
    let options = RenderOptions {
        near: 0.1,
        far: 100.0,
        ..RenderOptions::default()
    };
    let mut result = engine
        .render_one(&scene, view, intrinsics(), SIZE, SIZE, &options)
        .expect("dispatch");
    let image = result.materialize().expect("materialize");
    assert_eq!(image.shape(), &[64, 64, 4]);

    let center: Vec<u8> = image.slice(s![32, 32, ..]).iter().copied().collect();
    assert!(center[0] > 240, "center {center:?}");
    assert!(center[1] < 10 && center[2] < 10, "center {center:?}");
    assert!(center[3] > 0);

    for (y, x) in [(0, 0), (0, 63), (63, 0), (63, 63)] {
        let corner: Vec<u8> = image.slice(s![y, x, ..]).iter().copied().collect();
        assert_eq!(corner, vec![0, 0, 0, 0], "corner ({x},{y})");
    }
}

#[test]
fn test_outputs_follow_camera_order() {
    let engine = engine();
    let colors = [
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 0.0],
    ];
    // Four splats far apart on the x axis; each camera sees only its own.
    let splats: Vec<_> = colors
        .iter()
        .enumerate()
        .map(|(i, &c)| ([i as f32 * 100.0, 0.0, 0.0], 0.5, c))
        .collect();
    let cloud = Cloud::from_splats(&splats);
    let scene = engine.build_scene(&cloud.arrays()).expect("scene");

    let views: Vec<[[f32; 4]; 4]> = (0..4)
        .map(|i| {
            let target = Vec3::new(i as f32 * 100.0, 0.0, 0.0);
            look_at_view_matrix(target + Vec3::new(0.0, 0.0, 5.0), target, Vec3::Y)
                .expect("valid camera")
        })
        .collect();
    let cameras = CameraBatch::new(BatchParam::from_mat4s(&views), intrinsics(), SIZE, SIZE)
        .near(0.1)
        .far(50.0);
    let mut result = engine.render(&scene, &cameras).expect("dispatch");
    assert_eq!(result.batch_shape(), &[4]);
    let images = result.materialize().expect("materialize");
    assert_eq!(images.shape(), &[4, 64, 64, 4]);

    for (i, color) in colors.iter().enumerate() {
        let center: Vec<u8> = images.slice(s![i, 32, 32, ..]).iter().copied().collect();
        for c in 0..3 {
            if color[c] > 0.5 {
                assert!(center[c] > 240, "view {i} channel {c}: {center:?}");
            } else {
                assert!(center[c] < 10, "view {i} channel {c}: {center:?}");
            }
        }
    }
    assert!(result.stats().iter().all(|s| s.splats_visible == 1));
}

#[test]
fn test_materialize_twice_is_bit_identical() {
    let engine = engine();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
    let splats: Vec<_> = (0..64)
        .map(|_| {
            (
                [
                    rng.random_range(-1.5_f32..1.5),
                    rng.random_range(-1.5_f32..1.5),
                    rng.random_range(-1.0_f32..1.0),
                ],
                rng.random_range(0.05_f32..0.3),
                [rng.random(), rng.random(), rng.random()],
            )
        })
        .collect();
    let cloud = Cloud::from_splats(&splats);
    let scene = engine.build_scene(&cloud.arrays()).expect("scene");

    let eyes = [Vec3::new(0.0, 0.0, 5.0), Vec3::new(3.0, 1.0, 4.0)];
    let views: Vec<_> = eyes
        .iter()
        .map(|&eye| look_at_view_matrix(eye, Vec3::ZERO, Vec3::Y).expect("valid camera"))
        .collect();
    let cameras = CameraBatch::new(BatchParam::from_mat4s(&views), intrinsics(), SIZE, SIZE)
        .background([0.2_f32, 0.3, 0.4]);
    let mut result = engine.render(&scene, &cameras).expect("dispatch");

    let first = result.materialize().expect("first").to_owned();
    let second = result.materialize().expect("second").to_owned();
    assert_eq!(first, second);
    assert!(result.tasks().iter().all(|t| t.wait().is_ok()));
}

#[test]
fn test_render_outside_ready_state() {
    init_tracing();
    let engine = Engine::new(EngineConfig::default().render_threads(1));
    let cloud = Cloud::from_splats(&[([0.0, 0.0, 0.0], 1.0, [1.0, 0.0, 0.0])]);
    assert_eq!(
        engine.build_scene(&cloud.arrays()).unwrap_err().kind(),
        ErrorKind::EngineTerminated
    );

    engine.init().expect("init");
    let scene = engine.build_scene(&cloud.arrays()).expect("scene");
    engine.terminate();

    let view = look_at_view_matrix(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
        .expect("valid camera");
    let err = engine
        .render_one(&scene, view, intrinsics(), SIZE, SIZE, &RenderOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineTerminated);
}

#[test]
fn test_invalid_splats_fail_scene_build() {
    let engine = engine();
    let mut cloud = Cloud::from_splats(&[
        ([0.0, 0.0, 0.0], 1.0, [1.0, 0.0, 0.0]),
        ([1.0, 0.0, 0.0], 1.0, [0.0, 1.0, 0.0]),
    ]);
    cloud.quats.row_mut(1).fill(0.0);
    assert_eq!(
        engine.build_scene(&cloud.arrays()).unwrap_err().kind(),
        ErrorKind::DegenerateOrientation
    );

    let cloud = Cloud::from_splats(&[([0.0, 0.0, 0.0], 1.0, [1.0, 0.0, 0.0])]);
    let five = Array3::<f32>::zeros((1, 5, 3));
    let arrays = SplatArrays::new(
        &cloud.positions,
        &cloud.quats,
        &cloud.scales,
        &cloud.opacities,
        &five,
    );
    assert_eq!(
        engine.build_scene(&arrays).unwrap_err().kind(),
        ErrorKind::ShapeMismatch
    );
}
