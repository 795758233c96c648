use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

// --- Row-major conversion ---

pub fn mat4_from_rows(rows: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from_cols_array_2d(rows).transpose()
}

pub fn mat4_to_rows(m: Mat4) -> [[f32; 4]; 4] {
    m.transpose().to_cols_array_2d()
}

pub fn mat3_from_rows(rows: &[[f32; 3]; 3]) -> Mat3 {
    Mat3::from_cols_array_2d(rows).transpose()
}

pub fn mat3_to_rows(m: Mat3) -> [[f32; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

// --- Convention conversion ---

/// Image convention (x right, y down, z forward) to y-up, z-backward.
pub fn flip_view_convention(view: Mat4) -> Mat4 {
    Mat4::from_diagonal(Vec4::new(1.0, -1.0, -1.0, 1.0)) * view
}

/// Re-express pixel-space intrinsics in NDC: pixel (0,0) -> (-1,1), (W,H) -> (1,-1).
pub fn normalize_intrinsics(k: Mat3, width: u32, height: u32) -> Mat3 {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    let to_ndc = Mat3::from_cols(
        Vec3::new(2.0 / w, 0.0, 0.0),
        Vec3::new(0.0, -2.0 / h, 0.0),
        Vec3::new(-1.0, 1.0, 1.0),
    );
    to_ndc * k
}

/// Embed NDC intrinsics into the rasterizer's 4x4 perspective projection.
pub fn projection_from_normalized(k_ndc: Mat3, near: f32, far: f32) -> Mat4 {
    // Mat3 is column-major: col(j)[i] is row i, column j.
    let fx = k_ndc.col(0).x;
    let fy = k_ndc.col(1).y;
    let cx = k_ndc.col(2).x;
    let cy = k_ndc.col(2).y;
    let depth_scale = far / (near - far);
    let depth_offset = near * far / (near - far);
    mat4_from_rows(&[
        [fx, 0.0, 0.0, cx],
        [0.0, fy, 0.0, cy],
        [0.0, 0.0, depth_scale, depth_offset],
        [0.0, 0.0, -1.0, 0.0],
    ])
}

/// Viewport mapping used by the rasterizer: NDC x in [-1,1] left to right,
/// NDC y in [-1,1] top to bottom.
pub fn ndc_to_pixel(ndc: Vec2, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (ndc.x + 1.0) * 0.5 * width as f32,
        (ndc.y + 1.0) * 0.5 * height as f32,
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewProjection {
    pub view: Mat4,
    pub projection: Mat4,
    pub width: u32,
    pub height: u32,
}

impl ViewProjection {
    pub fn project_to_pixel(&self, point: Vec3) -> Option<Vec2> {
        let clip = self.projection * self.view * point.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        if !(0.0..=1.0).contains(&ndc.z) {
            return None;
        }
        Some(ndc_to_pixel(ndc.truncate(), self.width, self.height))
    }
}

/// Convert one external camera (row-major world-to-camera matrix and pinhole
/// intrinsics) into the rasterizer's view/projection pair.
pub fn normalize_camera(
    view: &[[f32; 4]; 4],
    intrinsics: &[[f32; 3]; 3],
    width: u32,
    height: u32,
    near: f32,
    far: f32,
) -> ViewProjection {
    let view = flip_view_convention(mat4_from_rows(view));
    let k_ndc = normalize_intrinsics(mat3_from_rows(intrinsics), width, height);
    ViewProjection {
        view,
        projection: projection_from_normalized(k_ndc, near, far),
        width,
        height,
    }
}

// --- Camera construction ---

pub fn pinhole_intrinsics(fx: f32, fy: f32, cx: f32, cy: f32) -> [[f32; 3]; 3] {
    [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]]
}

/// Centered pinhole intrinsics for a vertical field of view in radians.
pub fn pinhole_from_fov(fov_y: f32, width: u32, height: u32) -> [[f32; 3]; 3] {
    let h = height.max(1) as f32;
    let w = width.max(1) as f32;
    let tan_half = (fov_y * 0.5).tan().max(1e-6);
    let fy = h / (2.0 * tan_half);
    pinhole_intrinsics(fy, fy, w * 0.5, h * 0.5)
}

/// World-to-camera matrix in image convention (x right, y down, z forward)
/// for a camera at `eye` looking at `target`. `None` when `up` is parallel to
/// the viewing direction.
pub fn look_at_view_matrix(eye: Vec3, target: Vec3, up: Vec3) -> Option<[[f32; 4]; 4]> {
    let forward = (target - eye).normalize_or_zero();
    if forward.length_squared() < 1e-8 {
        return None;
    }
    let right = forward.cross(up);
    if right.length_squared() < 1e-8 {
        return None;
    }
    let right = right.normalize();
    let down = forward.cross(right);

    Some([
        [right.x, right.y, right.z, -right.dot(eye)],
        [down.x, down.y, down.z, -down.dot(eye)],
        [forward.x, forward.y, forward.z, -forward.dot(eye)],
        [0.0, 0.0, 0.0, 1.0],
    ])
}
