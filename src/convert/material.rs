use std::collections::HashMap;

use super::types::{AlphaMode, Material, TextureRef, TextureSource, VertexColorMode};
use crate::issue::{DANGLING_REFERENCE, ValidationIssue};
use crate::records::{
    ALPHA_BLEND, ALPHA_TEST, DRAW_BOTH, Property, PropertyKind, RecordGraph, RecordRef,
    TextureLocation, TextureSlot,
};

// ─── Property resolution ──────────────────────────────────────────────────────

/// Effective property per kind for one geometry record. The geometry's own
/// list wins; otherwise the nearest ancestor with that kind supplies it.
#[derive(Debug, Clone, Default)]
pub(super) struct PropertySet {
    by_kind: HashMap<&'static str, usize>,
}

impl PropertySet {
    /// # Arguments
    ///
    /// * `lists` - Property lists ordered from the geometry up to the root.
    pub(super) fn resolve(
        graph: &RecordGraph,
        lists: &[&[RecordRef]],
        issues: &mut Vec<ValidationIssue>,
    ) -> Self {
        let mut by_kind = HashMap::new();
        for list in lists {
            for &reference in *list {
                let Some(property) = graph.property(reference) else {
                    issues.push(ValidationIssue::warning(
                        DANGLING_REFERENCE,
                        format!("property reference {} does not name a property", reference.0),
                    ));
                    continue;
                };
                if let Some(index) = reference.index() {
                    by_kind.entry(property.kind_name()).or_insert(index);
                }
            }
        }
        Self { by_kind }
    }

    fn get<'g>(&self, graph: &'g RecordGraph, kind: &str) -> Option<&'g Property> {
        let index = *self.by_kind.get(kind)?;
        graph.property(RecordRef::from_index(index))
    }

    /// Stable key used to share identical materials between meshes.
    pub(super) fn key(&self) -> Vec<(&'static str, usize)> {
        let mut key: Vec<_> = self.by_kind.iter().map(|(k, v)| (*k, *v)).collect();
        key.sort_unstable();
        key
    }

    pub(super) fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}

// ─── Material synthesis ───────────────────────────────────────────────────────

/// Alpha flags to a blend mode. Testing takes precedence over blending.
pub fn alpha_mode(flags: u16, threshold: u8) -> AlphaMode {
    if flags & ALPHA_TEST != 0 {
        AlphaMode::AlphaScissor {
            cutoff: f32::from(threshold) / 255.0,
        }
    } else if flags & ALPHA_BLEND != 0 {
        AlphaMode::Translucent
    } else {
        AlphaMode::Opaque
    }
}

/// Normalize a stored texture path into a logical resource path.
///
/// # Arguments
///
/// * `raw` - Path as stored, typically `Textures\\Foo.dds` or `foo.dds`.
/// * `prefix` - Logical folder, such as `textures/`.
///
/// # Returns
///
/// Lower-case forward-slash path that starts with `prefix`.
pub fn resolve_texture_path(raw: &str, prefix: &str) -> String {
    let normalized = raw.replace('\\', "/").to_lowercase();
    let trimmed = normalized.trim_start_matches('/');
    let prefix = prefix.to_lowercase();
    if prefix.is_empty() || trimmed.starts_with(&prefix) {
        trimmed.to_string()
    } else {
        format!("{prefix}{trimmed}")
    }
}

pub(super) fn build_material(
    graph: &RecordGraph,
    properties: &PropertySet,
    texture_prefix: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Material {
    let mut material = Material::default();

    if let Some(property) = properties.get(graph, "material") {
        if let PropertyKind::Material(values) = &property.kind {
            material.name = property.base.name.clone();
            material.ambient = values.ambient;
            material.diffuse = values.diffuse;
            material.specular = values.specular;
            material.emissive = values.emissive;
            material.glossiness = values.glossiness;
            material.alpha = values.alpha;
        }
    }

    if let Some(property) = properties.get(graph, "alpha") {
        if let PropertyKind::Alpha { threshold } = property.kind {
            material.alpha_mode = alpha_mode(property.flags, threshold);
        }
    }

    if let Some(property) = properties.get(graph, "vertex_color") {
        if let PropertyKind::VertexColor { vertex_mode, .. } = property.kind {
            material.vertex_colors = match vertex_mode {
                0 => VertexColorMode::Ignore,
                1 => VertexColorMode::Emissive,
                _ => VertexColorMode::AmbientDiffuse,
            };
        }
    }

    if let Some(property) = properties.get(graph, "zbuffer") {
        material.depth_test = property.flags & 0x1 != 0;
        material.depth_write = property.flags & 0x2 != 0;
    }

    if let Some(property) = properties.get(graph, "stencil") {
        if let PropertyKind::Stencil(stencil) = &property.kind {
            material.double_sided = stencil.draw_mode == DRAW_BOTH;
        }
    }

    if let Some(property) = properties.get(graph, "wireframe") {
        material.wireframe = property.flags & 0x1 != 0;
    }

    if let Some(property) = properties.get(graph, "specular") {
        material.specular_enabled = property.flags & 0x1 != 0;
    }

    if let Some(property) = properties.get(graph, "texturing") {
        if let PropertyKind::Texturing(texturing) = &property.kind {
            material.texture = TextureSlot::ORDER.iter().find_map(|&slot| {
                let binding = texturing.slot(slot)?;
                let source = match graph.source_texture(binding.source) {
                    Some(texture) => match &texture.location {
                        TextureLocation::External(path) => {
                            TextureSource::File(resolve_texture_path(path, texture_prefix))
                        }
                        TextureLocation::Internal(pixels) => TextureSource::Embedded {
                            pixel_data: pixels.index()?,
                        },
                    },
                    None => {
                        issues.push(ValidationIssue::warning(
                            DANGLING_REFERENCE,
                            format!(
                                "texture slot {slot:?} points at record {} which is not a texture source",
                                binding.source.0
                            ),
                        ));
                        return None;
                    }
                };
                Some(TextureRef {
                    slot,
                    source,
                    uv_set: binding.uv_set,
                    clamp: binding.clamp,
                    filter: binding.filter,
                })
            });
        }
    }

    material
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_alpha_test_and_blend_flags_when_resolving_then_test_wins() {
        let mode = alpha_mode(ALPHA_TEST | ALPHA_BLEND, 128);
        let AlphaMode::AlphaScissor { cutoff } = mode else {
            panic!("expected alpha scissor");
        };
        assert!((cutoff - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn given_blend_flag_only_when_resolving_then_mode_is_translucent() {
        assert_eq!(alpha_mode(ALPHA_BLEND, 0), AlphaMode::Translucent);
        assert_eq!(alpha_mode(0, 200), AlphaMode::Opaque);
    }

    #[test]
    fn given_backslash_path_when_resolving_then_logical_path_is_lowercase_with_prefix() {
        assert_eq!(
            resolve_texture_path("Tx_Wood\\Oak.DDS", "textures/"),
            "textures/tx_wood/oak.dds"
        );
        assert_eq!(
            resolve_texture_path("Textures\\tx_sky.tga", "textures/"),
            "textures/tx_sky.tga"
        );
    }
}
