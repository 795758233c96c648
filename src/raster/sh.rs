use glam::Vec3;
use half::f16;

const SH_C0: f32 = 0.282_094_8;
const SH_C1: f32 = 0.488_602_5;
const SH_C2: [f32; 5] = [
    1.092_548_4,
    -1.092_548_4,
    0.315_391_57,
    -1.092_548_4,
    0.546_274_2,
];
const SH_C3: [f32; 7] = [
    -0.590_043_6,
    2.890_611_4,
    -0.457_045_8,
    0.373_176_33,
    -0.457_045_8,
    1.445_305_7,
    -0.590_043_6,
];

/// Evaluates real spherical harmonics up to `degree` along the unit
/// `direction` and returns the RGB color, offset by 0.5 and clamped below at 0.
///
/// `coefficients` is `K * 3`, coefficient-major. Bands above `degree` are
/// ignored even when present.
pub fn evaluate_sh(coefficients: &[f16], degree: u8, direction: Vec3) -> [f32; 3] {
    let k = |i: usize| {
        Vec3::new(
            coefficients[i * 3].to_f32(),
            coefficients[i * 3 + 1].to_f32(),
            coefficients[i * 3 + 2].to_f32(),
        )
    };

    let mut result = SH_C0 * k(0);

    if degree >= 1 {
        let (x, y, z) = (direction.x, direction.y, direction.z);
        result += -SH_C1 * y * k(1) + SH_C1 * z * k(2) - SH_C1 * x * k(3);

        if degree >= 2 {
            let (xx, yy, zz) = (x * x, y * y, z * z);
            let (xy, yz, xz) = (x * y, y * z, x * z);
            result += SH_C2[0] * xy * k(4)
                + SH_C2[1] * yz * k(5)
                + SH_C2[2] * (2.0 * zz - xx - yy) * k(6)
                + SH_C2[3] * xz * k(7)
                + SH_C2[4] * (xx - yy) * k(8);

            if degree >= 3 {
                result += SH_C3[0] * y * (3.0 * xx - yy) * k(9)
                    + SH_C3[1] * xy * z * k(10)
                    + SH_C3[2] * y * (4.0 * zz - xx - yy) * k(11)
                    + SH_C3[3] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy) * k(12)
                    + SH_C3[4] * x * (4.0 * zz - xx - yy) * k(13)
                    + SH_C3[5] * z * (xx - yy) * k(14)
                    + SH_C3[6] * x * (xx - 3.0 * yy) * k(15);
            }
        }
    }

    (result + Vec3::splat(0.5)).max(Vec3::ZERO).to_array()
}

/// Inverse of the degree-0 term: the DC coefficient that yields `color`.
pub fn dc_from_color(color: f32) -> f32 {
    (color - 0.5) / SH_C0
}
