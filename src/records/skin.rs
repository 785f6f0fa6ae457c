use nalgebra::Vector3;
use serde::Serialize;

use super::RecordRef;
use super::base::Transform;
use crate::error::DecodeError;
use crate::stream::NifStream;

/// Binds a geometry record to its bone nodes.
#[derive(Debug, Clone, Serialize)]
pub struct SkinInstance {
    pub data: RecordRef,
    pub partition: RecordRef,
    pub root: RecordRef,
    pub bones: Vec<RecordRef>,
}

impl SkinInstance {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let data = stream.read_ref()?;
        let partition = if stream.version().at_least(10, 1, 0, 101) {
            stream.read_ref()?
        } else {
            RecordRef::NONE
        };
        Ok(Self {
            data,
            partition,
            root: stream.read_ref()?,
            bones: stream.read_ref_list()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VertexWeight {
    pub vertex: u16,
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoneData {
    /// Mesh space to bone space at bind time.
    pub inverse_bind: Transform,
    pub bound_center: Vector3<f32>,
    pub bound_radius: f32,
    pub weights: Vec<VertexWeight>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkinData {
    pub skin_transform: Transform,
    pub partition: RecordRef,
    /// Cleared when the per-bone weight lists were left out of the file and
    /// only the partition carries influences.
    pub has_weights: bool,
    pub bones: Vec<BoneData>,
}

impl SkinData {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let skin_transform = Transform::read_rts(stream)?;
        let bone_count = stream.read_u32()? as usize;
        let partition = stream.read_ref()?;
        let has_weights = if stream.version().at_least(4, 2, 1, 0) {
            stream.read_byte_bool()?
        } else {
            true
        };

        let bones = stream.read_array(bone_count, 70, |s| {
            let inverse_bind = Transform::read_rts(s)?;
            let bound_center = s.read_vector3()?;
            let bound_radius = s.read_f32()?;
            let count = s.read_u16()? as usize;
            let weights = if has_weights {
                s.read_array(count, 6, |s| {
                    Ok(VertexWeight {
                        vertex: s.read_u16()?,
                        weight: s.read_f32()?,
                    })
                })?
            } else {
                Vec::new()
            };
            Ok(BoneData {
                inverse_bind,
                bound_center,
                bound_radius,
                weights,
            })
        })?;

        Ok(Self {
            skin_transform,
            partition,
            has_weights,
            bones,
        })
    }
}

/// Hardware-skinning subset of a mesh limited to a few bones.
#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub bones: Vec<u16>,
    pub vertex_map: Vec<u16>,
    pub weights_per_vertex: u16,
    /// `vertex_map.len() * weights_per_vertex` entries.
    pub weights: Vec<f32>,
    pub strips: Vec<Vec<u16>>,
    pub triangles: Vec<[u16; 3]>,
    pub bone_indices: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkinPartition {
    pub partitions: Vec<Partition>,
}

impl SkinPartition {
    pub(crate) fn read(stream: &mut NifStream) -> Result<Self, DecodeError> {
        let count = stream.read_u32()? as usize;
        let partitions = stream.read_array(count, 10, read_partition)?;
        Ok(Self { partitions })
    }
}

fn read_partition(stream: &mut NifStream) -> Result<Partition, DecodeError> {
    let vertex_count = stream.read_u16()? as usize;
    let triangle_count = stream.read_u16()? as usize;
    let bone_count = stream.read_u16()? as usize;
    let strip_count = stream.read_u16()? as usize;
    let weights_per_vertex = stream.read_u16()?;
    let per_vertex = weights_per_vertex as usize;

    let bones = stream.read_array(bone_count, 2, NifStream::read_u16)?;
    let vertex_map = stream.read_array(vertex_count, 2, NifStream::read_u16)?;
    let weights = stream.read_array(vertex_count * per_vertex, 4, NifStream::read_f32)?;
    let strip_lengths = stream.read_array(strip_count, 2, NifStream::read_u16)?;

    let mut strips = Vec::with_capacity(strip_count);
    let mut triangles = Vec::new();
    if strip_count > 0 {
        for length in strip_lengths {
            strips.push(stream.read_array(length as usize, 2, NifStream::read_u16)?);
        }
    } else {
        triangles = stream.read_array(triangle_count, 6, |s| {
            Ok([s.read_u16()?, s.read_u16()?, s.read_u16()?])
        })?;
    }

    let bone_indices = if stream.read_byte_bool()? {
        stream.read_bytes(vertex_count * per_vertex)?
    } else {
        Vec::new()
    };

    Ok(Partition {
        bones,
        vertex_map,
        weights_per_vertex,
        weights,
        strips,
        triangles,
        bone_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fixture::RecordWriter;
    use crate::stream::FormatVersion;

    #[test]
    fn given_skin_data_when_reading_then_sparse_weights_are_kept_per_bone() {
        let mut w = RecordWriter::oldest();
        w.identity_rts();
        w.u32(2).reference(-1);
        w.identity_rts().vec3([0.0; 3]).f32(1.0).u16(1).u16(3).f32(0.6);
        w.identity_rts().vec3([0.0; 3]).f32(1.0).u16(0);
        let bytes = w.into_bytes();

        let data = SkinData::read(&mut NifStream::new(&bytes)).expect("skin data");
        assert_eq!(data.bones.len(), 2);
        assert_eq!(data.bones[0].weights, vec![VertexWeight { vertex: 3, weight: 0.6 }]);
        assert!(data.bones[1].weights.is_empty());
    }

    #[test]
    fn given_weights_flag_cleared_when_reading_newer_skin_data_then_lists_are_empty() {
        let version = FormatVersion::from_parts(4, 2, 1, 0);
        let mut w = RecordWriter::with_version(version);
        w.identity_rts();
        w.u32(1).reference(-1).u8(0);
        w.identity_rts().vec3([0.0; 3]).f32(1.0).u16(4);
        let bytes = w.into_bytes();

        let mut stream = NifStream::new(&bytes);
        stream.set_version(version);
        let data = SkinData::read(&mut stream).expect("skin data");
        assert_eq!(stream.remaining(), 0);
        assert!(data.bones[0].weights.is_empty());
    }
}
