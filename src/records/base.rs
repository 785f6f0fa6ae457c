use nalgebra::{Matrix3, Vector3, Vector4};
use serde::Serialize;

use super::RecordRef;
use crate::error::DecodeError;
use crate::stream::NifStream;

// ─── Spatial flag bits ────────────────────────────────────────────────────────

pub const FLAG_HIDDEN: u16 = 0x0001;
pub const FLAG_MESH_COLLISION: u16 = 0x0002;
pub const FLAG_BBOX_COLLISION: u16 = 0x0004;
pub const FLAG_ACTIVE_COLLISION: u16 = 0x0020;

// ─── Named object ─────────────────────────────────────────────────────────────

/// Fields shared by every named record: name plus the heads of the extra-data
/// and controller chains.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NamedObject {
    pub name: String,
    pub extra: RecordRef,
    pub controller: RecordRef,
}

impl NamedObject {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        Ok(Self {
            name: stream.read_string()?,
            extra: stream.read_ref()?,
            controller: stream.read_ref()?,
        })
    }
}

// ─── Transform ────────────────────────────────────────────────────────────────

/// Similarity transform: `p' = translation + scale * rotation * p`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: Matrix3<f32>,
    pub scale: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vector3::new(0.0, 0.0, 0.0),
        rotation: Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0),
        scale: 1.0,
    };

    /// Rotation, translation, scale order used by skin records.
    pub(crate) fn read_rts(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let rotation = stream.read_matrix3()?;
        let translation = stream.read_vector3()?;
        let scale = stream.read_f32()?;
        Ok(Self {
            translation,
            rotation,
            scale,
        })
    }

    pub fn apply_point(&self, point: &Vector3<f32>) -> Vector3<f32> {
        self.translation + self.rotation * point * self.scale
    }

    pub fn apply_direction(&self, direction: &Vector3<f32>) -> Vector3<f32> {
        self.rotation * direction
    }

    /// `self ∘ child`: apply `child` first, then `self`.
    pub fn compose(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.apply_point(&child.translation),
            rotation: self.rotation * child.rotation,
            scale: self.scale * child.scale,
        }
    }

    /// Inverse assuming an orthonormal rotation. A zero scale inverts to
    /// identity scale so the result stays finite.
    pub fn inverse(&self) -> Transform {
        let rotation = self.rotation.transpose();
        let scale = if self.scale.abs() > f32::EPSILON {
            1.0 / self.scale
        } else {
            1.0
        };
        Transform {
            translation: -(rotation * self.translation) * scale,
            rotation,
            scale,
        }
    }
}

// ─── Bounding volumes ─────────────────────────────────────────────────────────

const BV_BASE: u32 = 0xFFFF_FFFF;
const BV_SPHERE: u32 = 0;
const BV_BOX: u32 = 1;
const BV_CAPSULE: u32 = 2;
const BV_LOZENGE: u32 = 3;
const BV_UNION: u32 = 4;
const BV_HALFSPACE: u32 = 5;

/// Optional collision/culling volume attached to a spatial record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BoundingVolume {
    Base,
    Sphere {
        center: Vector3<f32>,
        radius: f32,
    },
    Box {
        center: Vector3<f32>,
        axes: [Vector3<f32>; 3],
        extents: Vector3<f32>,
    },
    Capsule {
        center: Vector3<f32>,
        axis: Vector3<f32>,
        extent: f32,
        radius: f32,
    },
    Lozenge {
        radius: f32,
        extent0: f32,
        extent1: f32,
        center: Vector3<f32>,
        axis0: Vector3<f32>,
        axis1: Vector3<f32>,
    },
    Union(Vec<BoundingVolume>),
    HalfSpace {
        plane: Vector4<f32>,
        origin: Option<Vector3<f32>>,
    },
}

/// Deepest union nesting accepted; anything deeper is treated as corrupt.
pub const MAX_UNION_DEPTH: usize = 16;

impl BoundingVolume {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        Self::read_nested(stream, 0)
    }

    fn read_nested(stream: &mut NifStream, depth: usize) -> Result<Self, DecodeError> {
        let offset = stream.position();
        let kind = stream.read_u32()?;
        let volume = match kind {
            BV_BASE => BoundingVolume::Base,
            BV_SPHERE => BoundingVolume::Sphere {
                center: stream.read_vector3()?,
                radius: stream.read_f32()?,
            },
            BV_BOX => BoundingVolume::Box {
                center: stream.read_vector3()?,
                axes: [
                    stream.read_vector3()?,
                    stream.read_vector3()?,
                    stream.read_vector3()?,
                ],
                extents: stream.read_vector3()?,
            },
            BV_CAPSULE => BoundingVolume::Capsule {
                center: stream.read_vector3()?,
                axis: stream.read_vector3()?,
                extent: stream.read_f32()?,
                radius: stream.read_f32()?,
            },
            BV_LOZENGE => BoundingVolume::Lozenge {
                radius: stream.read_f32()?,
                extent0: stream.read_f32()?,
                extent1: stream.read_f32()?,
                center: stream.read_vector3()?,
                axis0: stream.read_vector3()?,
                axis1: stream.read_vector3()?,
            },
            BV_UNION => {
                if depth >= MAX_UNION_DEPTH {
                    return Err(DecodeError::corrupt(
                        offset,
                        format!("bounding volume unions nested deeper than {MAX_UNION_DEPTH}"),
                    ));
                }
                let count = stream.read_u32()? as usize;
                BoundingVolume::Union(
                    stream.read_array(count, 4, |s| BoundingVolume::read_nested(s, depth + 1))?,
                )
            }
            BV_HALFSPACE => BoundingVolume::HalfSpace {
                plane: stream.read_vector4()?,
                origin: if stream.version().at_least(4, 2, 1, 0) {
                    Some(stream.read_vector3()?)
                } else {
                    None
                },
            },
            other => {
                return Err(DecodeError::corrupt(
                    offset,
                    format!("unknown bounding volume type {other}"),
                ));
            }
        };
        Ok(volume)
    }
}

// ─── Spatial node ─────────────────────────────────────────────────────────────

/// Fields shared by every record placed in the scene hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialNode {
    pub base: NamedObject,
    pub flags: u16,
    pub transform: Transform,
    pub velocity: Vector3<f32>,
    pub properties: Vec<RecordRef>,
    pub bounds: Option<BoundingVolume>,
}

impl SpatialNode {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let base = NamedObject::read(stream)?;
        let flags = stream.read_u16()?;
        let translation = stream.read_vector3()?;
        let rotation = stream.read_matrix3()?;
        let scale = stream.read_f32()?;
        let velocity = stream.read_vector3()?;
        let properties = stream.read_ref_list()?;
        let bounds = if stream.read_bool()? {
            Some(BoundingVolume::read(stream)?)
        } else {
            None
        };

        Ok(Self {
            base,
            flags,
            transform: Transform {
                translation,
                rotation,
                scale,
            },
            velocity,
            properties,
            bounds,
        })
    }

    pub fn name(&self) -> &str {
        &self.base.name
    }

    pub fn is_hidden(&self) -> bool {
        self.flags & FLAG_HIDDEN != 0
    }

    pub fn has_mesh_collision(&self) -> bool {
        self.flags & FLAG_MESH_COLLISION != 0
    }

    pub fn has_bbox_collision(&self) -> bool {
        self.flags & FLAG_BBOX_COLLISION != 0
    }

    pub fn has_active_collision(&self) -> bool {
        self.flags & FLAG_ACTIVE_COLLISION != 0
    }
}
