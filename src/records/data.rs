use nalgebra::{Quaternion, Vector2, Vector3, Vector4};
use serde::Serialize;

use crate::error::DecodeError;
use crate::stream::NifStream;

/// Vertex-data primitive payload, one variant per geometry-data record kind.
#[derive(Debug, Clone, Serialize)]
pub enum Primitives {
    Triangles {
        triangles: Vec<[u16; 3]>,
        /// Groups of vertices sharing a position (used for normal smoothing).
        match_groups: Vec<Vec<u16>>,
    },
    Strips(Vec<Vec<u16>>),
    Lines {
        /// Bit 0 set: connect vertex `i` to vertex `i + 1` (the last wraps to 0).
        connectivity: Vec<u8>,
    },
    Particles {
        particle_count: u16,
        radius: f32,
        active_count: u16,
        sizes: Vec<f32>,
        rotations: Vec<Quaternion<f32>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GeometryData {
    pub vertices: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub center: Vector3<f32>,
    pub radius: f32,
    pub colors: Vec<Vector4<f32>>,
    pub uv_sets: Vec<Vec<Vector2<f32>>>,
    pub primitives: Primitives,
}

impl GeometryData {
    pub(crate) fn read(stream: &mut NifStream, tag: &str) -> Result<Self, DecodeError> {
        let vertex_count = stream.read_u16()? as usize;

        let vertices = if stream.read_bool()? {
            stream.read_array(vertex_count, 12, NifStream::read_vector3)?
        } else {
            Vec::new()
        };
        let normals = if stream.read_bool()? {
            stream.read_array(vertex_count, 12, NifStream::read_vector3)?
        } else {
            Vec::new()
        };
        let center = stream.read_vector3()?;
        let radius = stream.read_f32()?;
        let colors = if stream.read_bool()? {
            stream.read_array(vertex_count, 16, NifStream::read_color_rgba)?
        } else {
            Vec::new()
        };

        let uv_set_count = (stream.read_u16()? & 0x3f) as usize;
        let has_uvs = if stream.version().is_oldest() {
            stream.read_bool()?
        } else {
            uv_set_count > 0
        };
        let mut uv_sets = Vec::new();
        if has_uvs {
            for _ in 0..uv_set_count {
                uv_sets.push(stream.read_array(vertex_count, 8, NifStream::read_vector2)?);
            }
        }

        let primitives = match tag {
            "NiTriShapeData" => read_triangles(stream)?,
            "NiTriStripsData" => read_strips(stream)?,
            "NiLinesData" => Primitives::Lines {
                connectivity: stream.read_bytes(vertex_count)?,
            },
            _ => read_particles(stream, tag, vertex_count)?,
        };

        Ok(Self {
            vertices,
            normals,
            center,
            radius,
            colors,
            uv_sets,
            primitives,
        })
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

fn read_triangles(stream: &mut NifStream) -> Result<Primitives, DecodeError> {
    let triangle_count = stream.read_u16()? as usize;
    let _point_count = stream.read_u32()?;
    let triangles = stream.read_array(triangle_count, 6, |s| {
        Ok([s.read_u16()?, s.read_u16()?, s.read_u16()?])
    })?;

    let group_count = stream.read_u16()? as usize;
    let match_groups = stream.read_array(group_count, 2, |s| {
        let count = s.read_u16()? as usize;
        s.read_array(count, 2, NifStream::read_u16)
    })?;

    Ok(Primitives::Triangles {
        triangles,
        match_groups,
    })
}

fn read_strips(stream: &mut NifStream) -> Result<Primitives, DecodeError> {
    let _triangle_count = stream.read_u16()?;
    let strip_count = stream.read_u16()? as usize;
    let lengths = stream.read_array(strip_count, 2, NifStream::read_u16)?;
    let mut strips = Vec::with_capacity(strip_count);
    for length in lengths {
        strips.push(stream.read_array(length as usize, 2, NifStream::read_u16)?);
    }
    Ok(Primitives::Strips(strips))
}

fn read_particles(
    stream: &mut NifStream,
    tag: &str,
    vertex_count: usize,
) -> Result<Primitives, DecodeError> {
    let particle_count = if stream.version().is_oldest() {
        stream.read_u16()?
    } else {
        vertex_count as u16
    };
    let radius = stream.read_f32()?;
    let active_count = stream.read_u16()?;
    let sizes = if stream.read_bool()? {
        stream.read_array(vertex_count, 4, NifStream::read_f32)?
    } else {
        Vec::new()
    };
    let rotations = if tag == "NiRotatingParticlesData" && stream.read_bool()? {
        stream.read_array(vertex_count, 16, NifStream::read_quaternion)?
    } else {
        Vec::new()
    };

    Ok(Primitives::Particles {
        particle_count,
        radius,
        active_count,
        sizes,
        rotations,
    })
}
