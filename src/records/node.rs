use nalgebra::{Matrix3, Vector3, Vector4};
use serde::Serialize;

use super::RecordRef;
use super::base::SpatialNode;
use crate::error::DecodeError;
use crate::stream::NifStream;

// ─── Container nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LodRange {
    pub min_distance: f32,
    pub max_distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeVariant {
    Plain,
    Billboard,
    Avoid,
    BsAnimation,
    BsParticle,
    /// Subtree holds collision-only geometry.
    RootCollision,
    Switch {
        initial_index: u32,
    },
    Lod {
        initial_index: u32,
        center: Vector3<f32>,
        ranges: Vec<LodRange>,
    },
    FltAnimation {
        initial_index: u32,
        duration: f32,
    },
    SortAdjust {
        mode: i32,
        sub_sorter: RecordRef,
    },
}

/// Spatial record with children.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub spatial: SpatialNode,
    pub children: Vec<RecordRef>,
    pub effects: Vec<RecordRef>,
    pub variant: NodeVariant,
}

impl Node {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let spatial = SpatialNode::read(stream)?;
        let children = stream.read_ref_list()?;
        let effects = stream.read_ref_list()?;

        let variant = match tag {
            "NiBillboardNode" => NodeVariant::Billboard,
            "AvoidNode" => NodeVariant::Avoid,
            "NiBSAnimationNode" => NodeVariant::BsAnimation,
            "NiBSParticleNode" => NodeVariant::BsParticle,
            "RootCollisionNode" => NodeVariant::RootCollision,
            "NiSwitchNode" => NodeVariant::Switch {
                initial_index: stream.read_u32()?,
            },
            "NiLODNode" => {
                let initial_index = stream.read_u32()?;
                let center = stream.read_vector3()?;
                let count = stream.read_u32()? as usize;
                let ranges = stream.read_array(count, 8, |s| {
                    Ok(LodRange {
                        min_distance: s.read_f32()?,
                        max_distance: s.read_f32()?,
                    })
                })?;
                NodeVariant::Lod {
                    initial_index,
                    center,
                    ranges,
                }
            }
            "NiFltAnimationNode" => NodeVariant::FltAnimation {
                initial_index: stream.read_u32()?,
                duration: stream.read_f32()?,
            },
            "NiSortAdjustNode" => NodeVariant::SortAdjust {
                mode: stream.read_i32()?,
                sub_sorter: stream.read_ref()?,
            },
            _ => NodeVariant::Plain,
        };

        Ok(Self {
            spatial,
            children,
            effects,
            variant,
        })
    }
}

// ─── Geometry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeometryVariant {
    TriShape,
    TriStrips,
    Lines,
    Particles,
    AutoNormalParticles,
    RotatingParticles,
}

impl GeometryVariant {
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "NiTriShape" => GeometryVariant::TriShape,
            "NiTriStrips" => GeometryVariant::TriStrips,
            "NiLines" => GeometryVariant::Lines,
            "NiParticles" => GeometryVariant::Particles,
            "NiAutoNormalParticles" => GeometryVariant::AutoNormalParticles,
            "NiRotatingParticles" => GeometryVariant::RotatingParticles,
            _ => return None,
        })
    }

    pub fn is_particles(self) -> bool {
        matches!(
            self,
            GeometryVariant::Particles
                | GeometryVariant::AutoNormalParticles
                | GeometryVariant::RotatingParticles
        )
    }
}

/// Renderable spatial record that points at its vertex data.
#[derive(Debug, Clone, Serialize)]
pub struct Geometry {
    pub spatial: SpatialNode,
    pub data: RecordRef,
    pub skin: RecordRef,
    pub materials: Vec<String>,
    pub variant: GeometryVariant,
}

impl Geometry {
    pub(crate) fn read(stream: &mut NifStream, variant: GeometryVariant) -> Result<Self, DecodeError> {
        let spatial = SpatialNode::read(stream)?;
        let data = stream.read_ref()?;
        let skin = stream.read_ref()?;

        let mut materials = Vec::new();
        if stream.version().at_least(20, 2, 0, 5) {
            let count = stream.read_u32()? as usize;
            materials = stream.read_array(count, 8, |s| {
                let name = s.read_string()?;
                let _extra = s.read_i32()?;
                Ok(name)
            })?;
            let _active = stream.read_i32()?;
            let _dirty = stream.read_byte_bool()?;
        }

        Ok(Self {
            spatial,
            data,
            skin,
            materials,
            variant,
        })
    }
}

// ─── Camera ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Camera {
    pub spatial: SpatialNode,
    /// left, right, top, bottom
    pub frustum: Vector4<f32>,
    pub near: f32,
    pub far: f32,
    /// left, right, top, bottom
    pub viewport: Vector4<f32>,
    pub lod_adjust: f32,
    pub scene: RecordRef,
}

impl Camera {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let spatial = SpatialNode::read(stream)?;
        let frustum = stream.read_vector4()?;
        let near = stream.read_f32()?;
        let far = stream.read_f32()?;
        let viewport = stream.read_vector4()?;
        let lod_adjust = stream.read_f32()?;
        let scene = stream.read_ref()?;
        let _screen_polygons = stream.read_u32()?;
        if stream.version().at_least(4, 2, 1, 0) {
            let _screen_textures = stream.read_u32()?;
        }

        Ok(Self {
            spatial,
            frustum,
            near,
            far,
            viewport,
            lod_adjust,
            scene,
        })
    }
}

// ─── Dynamic effects ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LightVariant {
    Ambient,
    Directional,
    Point {
        constant: f32,
        linear: f32,
        quadratic: f32,
    },
    Spot {
        constant: f32,
        linear: f32,
        quadratic: f32,
        cutoff: f32,
        exponent: f32,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Light {
    pub spatial: SpatialNode,
    pub affected_nodes: Vec<RecordRef>,
    pub dimmer: f32,
    pub ambient: Vector3<f32>,
    pub diffuse: Vector3<f32>,
    pub specular: Vector3<f32>,
    pub variant: LightVariant,
}

impl Light {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let spatial = SpatialNode::read(stream)?;
        let affected_nodes = stream.read_ref_list()?;
        let dimmer = stream.read_f32()?;
        let ambient = stream.read_color_rgb()?;
        let diffuse = stream.read_color_rgb()?;
        let specular = stream.read_color_rgb()?;

        let variant = match tag {
            "NiAmbientLight" => LightVariant::Ambient,
            "NiDirectionalLight" => LightVariant::Directional,
            _ => {
                let constant = stream.read_f32()?;
                let linear = stream.read_f32()?;
                let quadratic = stream.read_f32()?;
                if tag == "NiSpotLight" {
                    LightVariant::Spot {
                        constant,
                        linear,
                        quadratic,
                        cutoff: stream.read_f32()?,
                        exponent: stream.read_f32()?,
                    }
                } else {
                    LightVariant::Point {
                        constant,
                        linear,
                        quadratic,
                    }
                }
            }
        };

        Ok(Self {
            spatial,
            affected_nodes,
            dimmer,
            ambient,
            diffuse,
            specular,
            variant,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TextureEffect {
    pub spatial: SpatialNode,
    pub affected_nodes: Vec<RecordRef>,
    pub projection: Matrix3<f32>,
    pub projection_translation: Vector3<f32>,
    pub filter: u32,
    pub clamp: u32,
    pub texture_type: u32,
    pub coordinate_generation: u32,
    pub source: RecordRef,
    pub clipping: bool,
    pub clip_plane: Vector4<f32>,
}

impl TextureEffect {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let spatial = SpatialNode::read(stream)?;
        let affected_nodes = stream.read_ref_list()?;
        let projection = stream.read_matrix3()?;
        let projection_translation = stream.read_vector3()?;
        let filter = stream.read_u32()?;
        let clamp = stream.read_u32()?;
        let texture_type = stream.read_u32()?;
        let coordinate_generation = stream.read_u32()?;
        let source = stream.read_ref()?;
        let clipping = stream.read_byte_bool()?;
        let clip_plane = stream.read_vector4()?;
        // PS2 L/K filtering values
        stream.skip(4)?;
        if !stream.version().at_least(4, 1, 0, 13) {
            stream.skip(2)?;
        }

        Ok(Self {
            spatial,
            affected_nodes,
            projection,
            projection_translation,
            filter,
            clamp,
            texture_type,
            coordinate_generation,
            source,
            clipping,
            clip_plane,
        })
    }
}
