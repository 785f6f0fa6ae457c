use nalgebra::{Matrix3, Quaternion, Vector3};

use super::types::EulerOrder;
use crate::records::Transform;

/// Source units per target metre.
pub const UNITS_PER_METRE: f32 = 70.0;

/// Z-up to Y-up axis swap, `(x, y, z) → (x, z, −y)`.
const AXIS_SWAP: Matrix3<f32> = Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0);

/// Converts a source-space position into target space.
///
/// # Arguments
///
/// * `v` - Position in source units, Z up.
///
/// # Returns
///
/// Position in metres, Y up.
pub fn convert_vector(v: &Vector3<f32>) -> Vector3<f32> {
    AXIS_SWAP * v / UNITS_PER_METRE
}

/// Axis swap without the unit scale, for normals and directions.
pub fn convert_normal(n: &Vector3<f32>) -> Vector3<f32> {
    AXIS_SWAP * n
}

/// Conjugates a rotation by the axis swap (`C·R·Cᵗ`).
pub fn convert_rotation(r: &Matrix3<f32>) -> Matrix3<f32> {
    AXIS_SWAP * r * AXIS_SWAP.transpose()
}

/// Rotates the quaternion's vector part by the axis swap.
pub fn convert_quaternion(q: &Quaternion<f32>) -> Quaternion<f32> {
    let axis = AXIS_SWAP * q.vector();
    Quaternion::new(q.w, axis.x, axis.y, axis.z)
}

/// Converts translation and rotation independently. Scale is unitless and
/// passes through.
pub fn convert_transform(t: &Transform) -> Transform {
    Transform {
        translation: convert_vector(&t.translation),
        rotation: convert_rotation(&t.rotation),
        scale: t.scale,
    }
}

/// Inverse of [`convert_vector`]: `(a, b, c) → (a, −c, b) × 70`.
pub fn invert_vector(v: &Vector3<f32>) -> Vector3<f32> {
    AXIS_SWAP.transpose() * v * UNITS_PER_METRE
}

pub fn invert_normal(n: &Vector3<f32>) -> Vector3<f32> {
    AXIS_SWAP.transpose() * n
}

pub fn invert_rotation(r: &Matrix3<f32>) -> Matrix3<f32> {
    AXIS_SWAP.transpose() * r * AXIS_SWAP
}

/// Maps source X/Y/Z Euler curves onto target axes: target X is source X,
/// target Y is source Z, target Z is negated source Y.
///
/// # Returns
///
/// `(source_axis, sign)` for each target axis.
pub fn euler_axis_mapping() -> [(usize, f32); 3] {
    [(0, 1.0), (2, 1.0), (1, -1.0)]
}

/// Source Euler curves compose as `Rx · Ry · Rz`.
pub const SOURCE_EULER_ORDER: EulerOrder = EulerOrder::Xyz;

/// The axis swap turns `Rx · Ry · Rz` into `Rx · R(−z) · Ry`, so remapped
/// curves compose in X-Z-Y order.
pub const TARGET_EULER_ORDER: EulerOrder = EulerOrder::Xzy;
