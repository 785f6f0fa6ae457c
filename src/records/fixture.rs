//! Byte-exact record stream writer used by the decoder and converter tests.

use crate::stream::FormatVersion;

pub(crate) struct RecordWriter {
    bytes: Vec<u8>,
    version: FormatVersion,
}

impl RecordWriter {
    pub fn oldest() -> Self {
        Self::with_version(FormatVersion::OLDEST)
    }

    pub fn with_version(version: FormatVersion) -> Self {
        Self {
            bytes: Vec::new(),
            version,
        }
    }

    /// Header line, redundant version for the oldest generation, record count.
    pub fn file(version: FormatVersion, record_count: u32) -> Self {
        let mut writer = Self::with_version(version);
        let header = format!("NetImmerse File Format, Version {version}\n");
        writer.raw(header.as_bytes());
        if version.is_oldest() {
            writer.u32(version.0);
        }
        writer.u32(record_count);
        writer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    // ─── Primitives ───────────────────────────────────────────────────────────

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.raw(&[value])
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.raw(&value.to_le_bytes())
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.raw(&value.to_le_bytes())
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.raw(&value.to_le_bytes())
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.raw(&value.to_le_bytes())
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        if self.version.is_oldest() {
            self.i32(i32::from(value))
        } else {
            self.u8(u8::from(value))
        }
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        self.u32(value.len() as u32).raw(value.as_bytes())
    }

    pub fn tag(&mut self, tag: &str) -> &mut Self {
        self.string(tag)
    }

    pub fn reference(&mut self, index: i32) -> &mut Self {
        self.i32(index)
    }

    pub fn refs(&mut self, indices: &[i32]) -> &mut Self {
        self.u32(indices.len() as u32);
        for &index in indices {
            self.i32(index);
        }
        self
    }

    pub fn vec2(&mut self, value: [f32; 2]) -> &mut Self {
        self.f32(value[0]).f32(value[1])
    }

    pub fn vec3(&mut self, value: [f32; 3]) -> &mut Self {
        self.f32(value[0]).f32(value[1]).f32(value[2])
    }

    pub fn vec4(&mut self, value: [f32; 4]) -> &mut Self {
        self.f32(value[0]).f32(value[1]).f32(value[2]).f32(value[3])
    }

    /// Row-major 3x3 matrix.
    pub fn matrix3(&mut self, rows: [[f32; 3]; 3]) -> &mut Self {
        for row in rows {
            self.vec3(row);
        }
        self
    }

    pub fn identity_matrix(&mut self) -> &mut Self {
        self.matrix3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }

    /// Identity transform in rotation, translation, scale order.
    pub fn identity_rts(&mut self) -> &mut Self {
        self.identity_matrix().vec3([0.0; 3]).f32(1.0)
    }

    /// Transform in rotation, translation, scale order.
    pub fn rts(&mut self, rotation: [[f32; 3]; 3], translation: [f32; 3], scale: f32) -> &mut Self {
        self.matrix3(rotation).vec3(translation).f32(scale)
    }

    // ─── Record bodies ────────────────────────────────────────────────────────

    pub fn named(&mut self, name: &str) -> &mut Self {
        self.string(name).reference(-1).reference(-1)
    }

    pub fn named_with(&mut self, name: &str, extra: i32, controller: i32) -> &mut Self {
        self.string(name).reference(extra).reference(controller)
    }

    fn spatial_tail(
        &mut self,
        flags: u16,
        translation: [f32; 3],
        properties: &[i32],
    ) -> &mut Self {
        self.u16(flags)
            .vec3(translation)
            .identity_matrix()
            .f32(1.0)
            .vec3([0.0; 3])
            .refs(properties)
            .bool(false)
    }

    pub fn spatial(&mut self, name: &str, flags: u16, properties: &[i32]) -> &mut Self {
        self.named(name).spatial_tail(flags, [0.0; 3], properties)
    }

    /// Plain node at the origin.
    pub fn node(&mut self, name: &str, flags: u16, children: &[i32], properties: &[i32]) -> &mut Self {
        self.node_at(name, flags, [0.0; 3], children, properties)
    }

    pub fn node_at(
        &mut self,
        name: &str,
        flags: u16,
        translation: [f32; 3],
        children: &[i32],
        properties: &[i32],
    ) -> &mut Self {
        self.named(name)
            .spatial_tail(flags, translation, properties)
            .refs(children)
            .refs(&[])
    }

    /// Node carrying extra-data and controller chain heads.
    pub fn node_with_chains(
        &mut self,
        name: &str,
        extra: i32,
        controller: i32,
        children: &[i32],
    ) -> &mut Self {
        self.named_with(name, extra, controller)
            .spatial_tail(0, [0.0; 3], &[])
            .refs(children)
            .refs(&[])
    }

    pub fn tri_shape(
        &mut self,
        name: &str,
        flags: u16,
        data: i32,
        skin: i32,
        properties: &[i32],
    ) -> &mut Self {
        self.named(name)
            .spatial_tail(flags, [0.0; 3], properties)
            .reference(data)
            .reference(skin)
    }

    fn geometry_data_head(
        &mut self,
        vertices: &[[f32; 3]],
        normals: Option<&[[f32; 3]]>,
        uvs: Option<&[[f32; 2]]>,
    ) -> &mut Self {
        self.u16(vertices.len() as u16).bool(true);
        for &vertex in vertices {
            self.vec3(vertex);
        }
        self.bool(normals.is_some());
        for &normal in normals.unwrap_or_default() {
            self.vec3(normal);
        }
        self.vec3([0.0; 3]).f32(1.0).bool(false);
        match uvs {
            Some(uvs) => {
                self.u16(1);
                if self.version.is_oldest() {
                    self.bool(true);
                }
                for &uv in uvs {
                    self.vec2(uv);
                }
            }
            None => {
                self.u16(0);
                if self.version.is_oldest() {
                    self.bool(false);
                }
            }
        }
        self
    }

    pub fn tri_shape_data(
        &mut self,
        vertices: &[[f32; 3]],
        normals: Option<&[[f32; 3]]>,
        uvs: Option<&[[f32; 2]]>,
        triangles: &[[u16; 3]],
    ) -> &mut Self {
        self.geometry_data_head(vertices, normals, uvs);
        self.u16(triangles.len() as u16).u32(triangles.len() as u32 * 3);
        for triangle in triangles {
            self.u16(triangle[0]).u16(triangle[1]).u16(triangle[2]);
        }
        self.u16(0)
    }

    pub fn tri_strips_data(&mut self, vertices: &[[f32; 3]], strips: &[&[u16]]) -> &mut Self {
        self.geometry_data_head(vertices, None, None);
        let triangles: usize = strips.iter().map(|strip| strip.len().saturating_sub(2)).sum();
        self.u16(triangles as u16).u16(strips.len() as u16);
        for strip in strips {
            self.u16(strip.len() as u16);
        }
        for strip in strips {
            for &index in *strip {
                self.u16(index);
            }
        }
        self
    }

    pub fn material_property(&mut self, name: &str, diffuse: [f32; 3], alpha: f32) -> &mut Self {
        self.named(name)
            .u16(0)
            .vec3([0.2; 3])
            .vec3(diffuse)
            .vec3([0.0; 3])
            .vec3([0.0; 3])
            .f32(10.0)
            .f32(alpha)
    }

    pub fn alpha_property(&mut self, flags: u16, threshold: u8) -> &mut Self {
        self.named("").u16(flags).u8(threshold)
    }

    /// Texturing property with only the base slot populated.
    pub fn texturing_base(&mut self, source: i32) -> &mut Self {
        self.named("").u16(0).u32(2).u32(7);
        self.bool(true).reference(source).u32(3).u32(2).u32(0).u32(0);
        if !self.version.at_least(4, 1, 0, 13) {
            self.u16(0);
        }
        for _ in 1..7 {
            self.bool(false);
        }
        self
    }

    pub fn source_texture_external(&mut self, path: &str) -> &mut Self {
        self.named("")
            .u8(1)
            .string(path)
            .u32(5)
            .u32(2)
            .u32(3)
            .u8(1)
    }

    pub fn text_keys(&mut self, next: i32, keys: &[(f32, &str)]) -> &mut Self {
        self.reference(next).u32(0).u32(keys.len() as u32);
        for &(time, text) in keys {
            self.f32(time).string(text);
        }
        self
    }

    pub fn skin_instance(&mut self, data: i32, root: i32, bones: &[i32]) -> &mut Self {
        self.reference(data).reference(root).refs(bones)
    }

    /// Skin data whose bones all have identity inverse-bind transforms.
    pub fn skin_data(&mut self, bones: &[&[(u16, f32)]]) -> &mut Self {
        self.identity_rts().u32(bones.len() as u32).reference(-1);
        if self.version.at_least(4, 2, 1, 0) {
            self.u8(1);
        }
        for weights in bones {
            self.identity_rts().vec3([0.0; 3]).f32(1.0).u16(weights.len() as u16);
            for &(vertex, weight) in *weights {
                self.u16(vertex).f32(weight);
            }
        }
        self
    }

    /// Newer skin data with the weight lists left out, pointing at a partition.
    pub fn skin_data_unweighted(&mut self, bone_count: usize, partition: i32) -> &mut Self {
        self.identity_rts().u32(bone_count as u32).reference(partition).u8(0);
        for _ in 0..bone_count {
            self.identity_rts().vec3([0.0; 3]).f32(1.0).u16(0);
        }
        self
    }

    /// One triangle-list partition without geometry. `bone_indices` selects
    /// per-weight partition bones; without it weight `j` uses partition bone `j`.
    pub fn skin_partition(
        &mut self,
        bones: &[u16],
        vertex_map: &[u16],
        weights_per_vertex: u16,
        weights: &[f32],
        bone_indices: Option<&[u8]>,
    ) -> &mut Self {
        self.u32(1)
            .u16(vertex_map.len() as u16)
            .u16(0)
            .u16(bones.len() as u16)
            .u16(0)
            .u16(weights_per_vertex);
        for &bone in bones {
            self.u16(bone);
        }
        for &vertex in vertex_map {
            self.u16(vertex);
        }
        for &weight in weights {
            self.f32(weight);
        }
        match bone_indices {
            Some(indices) => self.u8(1).raw(indices),
            None => self.u8(0),
        }
    }

    pub fn keyframe_controller(
        &mut self,
        next: i32,
        target: i32,
        data: i32,
        start: f32,
        stop: f32,
    ) -> &mut Self {
        self.reference(next)
            .u16(8)
            .f32(1.0)
            .f32(0.0)
            .f32(start)
            .f32(stop)
            .reference(target)
            .reference(data)
    }

    /// Linear quaternion, translation and scale keys.
    pub fn keyframe_data(
        &mut self,
        rotations: &[(f32, [f32; 4])],
        translations: &[(f32, [f32; 3])],
        scales: &[(f32, f32)],
    ) -> &mut Self {
        self.u32(rotations.len() as u32);
        if !rotations.is_empty() {
            self.u32(1);
        }
        for &(time, quaternion) in rotations {
            self.f32(time).vec4(quaternion);
        }
        self.u32(translations.len() as u32);
        if !translations.is_empty() {
            self.u32(1);
        }
        for &(time, value) in translations {
            self.f32(time).vec3(value);
        }
        self.u32(scales.len() as u32);
        if !scales.is_empty() {
            self.u32(1);
        }
        for &(time, value) in scales {
            self.f32(time).f32(value);
        }
        self
    }

    /// Trailing root list of the oldest generation.
    pub fn roots(&mut self, roots: &[i32]) -> &mut Self {
        self.refs(roots)
    }
}
