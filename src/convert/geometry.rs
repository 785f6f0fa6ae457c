use nalgebra::Vector3;

use super::coords::{convert_normal, convert_vector};
use super::types::{Mesh, PrimitiveTopology};
use crate::issue::{GEOMETRY_INCONSISTENCY, ValidationIssue};
use crate::records::{Geometry, GeometryData, Primitives};

// ─── Index expansion ──────────────────────────────────────────────────────────

/// Swap the 2nd and 3rd index to flip a triangle's winding.
pub fn reverse_winding(triangle: [u32; 3]) -> [u32; 3] {
    [triangle[0], triangle[2], triangle[1]]
}

/// Triangle list to target-winding indices. Triangles referencing a vertex
/// outside `vertex_count` are dropped.
///
/// # Returns
///
/// `(indices, dropped_triangle_count)`.
pub fn expand_triangles(triangles: &[[u16; 3]], vertex_count: usize) -> (Vec<u32>, usize) {
    let mut indices = Vec::with_capacity(triangles.len() * 3);
    let mut dropped = 0;
    for triangle in triangles {
        if triangle.iter().any(|&i| i as usize >= vertex_count) {
            dropped += 1;
            continue;
        }
        let wound = reverse_winding(triangle.map(u32::from));
        indices.extend_from_slice(&wound);
    }
    (indices, dropped)
}

/// Strips to a target-winding triangle list.
///
/// Strip triangle `i` alternates orientation with the parity of `i`; the
/// reversal into target winding is folded in. Degenerate triangles (two equal
/// indices) are skipped silently, out-of-range ones are counted as dropped.
///
/// # Returns
///
/// `(indices, dropped_triangle_count)`.
pub fn expand_strips(strips: &[Vec<u16>], vertex_count: usize) -> (Vec<u32>, usize) {
    let mut indices = Vec::new();
    let mut dropped = 0;
    for strip in strips {
        for (i, window) in strip.windows(3).enumerate() {
            let [a, b, c] = [window[0], window[1], window[2]].map(u32::from);
            if a == b || b == c || a == c {
                continue;
            }
            if [a, b, c].iter().any(|&index| index as usize >= vertex_count) {
                dropped += 1;
                continue;
            }
            if i % 2 == 0 {
                indices.extend_from_slice(&[a, c, b]);
            } else {
                indices.extend_from_slice(&[a, b, c]);
            }
        }
    }
    (indices, dropped)
}

/// Per-vertex connectivity flags to a line list. Bit 0 of flag `i` joins
/// vertex `i` to the next vertex, wrapping to the first.
pub fn expand_lines(connectivity: &[u8], vertex_count: usize) -> Vec<u32> {
    let mut indices = Vec::new();
    if vertex_count < 2 {
        return indices;
    }
    for (i, flag) in connectivity.iter().take(vertex_count).enumerate() {
        if flag & 1 != 0 {
            indices.push(i as u32);
            indices.push(((i + 1) % vertex_count) as u32);
        }
    }
    indices
}

// ─── Mesh building ────────────────────────────────────────────────────────────

/// Build a target-space mesh from a triangle, strip or line geometry record.
/// Returns `None` for particle data or when the data has no positions.
pub(super) fn build_mesh(
    record: usize,
    geometry: &Geometry,
    data: &GeometryData,
    node: usize,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Mesh> {
    let name = geometry.spatial.name();
    let vertex_count = data.vertex_count();
    if vertex_count == 0 {
        return None;
    }

    let (topology, indices, dropped) = match &data.primitives {
        Primitives::Triangles { triangles, .. } => {
            let (indices, dropped) = expand_triangles(triangles, vertex_count);
            (PrimitiveTopology::Triangles, indices, dropped)
        }
        Primitives::Strips(strips) => {
            let (indices, dropped) = expand_strips(strips, vertex_count);
            (PrimitiveTopology::Triangles, indices, dropped)
        }
        Primitives::Lines { connectivity } => (
            PrimitiveTopology::Lines,
            expand_lines(connectivity, vertex_count),
            0,
        ),
        Primitives::Particles { .. } => return None,
    };
    if dropped > 0 {
        issues.push(ValidationIssue::warning(
            GEOMETRY_INCONSISTENCY,
            format!("mesh '{name}' (record {record}): dropped {dropped} triangles with out-of-range indices"),
        ));
    }

    let normals = if data.normals.len() == vertex_count {
        data.normals.iter().map(convert_normal).collect()
    } else {
        if !data.normals.is_empty() {
            issues.push(mismatch(name, record, "normals", data.normals.len(), vertex_count));
        }
        Vec::new()
    };
    let colors = if data.colors.len() == vertex_count {
        data.colors.clone()
    } else {
        if !data.colors.is_empty() {
            issues.push(mismatch(name, record, "colours", data.colors.len(), vertex_count));
        }
        Vec::new()
    };
    let mut uv_sets = Vec::with_capacity(data.uv_sets.len());
    for set in &data.uv_sets {
        if set.len() == vertex_count {
            uv_sets.push(set.clone());
        } else {
            issues.push(mismatch(name, record, "UV coordinates", set.len(), vertex_count));
        }
    }

    Some(Mesh {
        name: name.to_string(),
        node,
        record,
        topology,
        positions: data.vertices.iter().map(convert_vector).collect(),
        normals,
        uv_sets,
        colors,
        indices,
        material: None,
        skin: None,
    })
}

fn mismatch(name: &str, record: usize, what: &str, found: usize, expected: usize) -> ValidationIssue {
    ValidationIssue::warning(
        GEOMETRY_INCONSISTENCY,
        format!("mesh '{name}' (record {record}): {found} {what} for {expected} vertices, ignored"),
    )
}

/// Axis-aligned bounds of a point set, `None` when empty.
pub fn bounds(points: &[Vector3<f32>]) -> Option<(Vector3<f32>, Vector3<f32>)> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(min, max), p| {
        (min.inf(p), max.sup(p))
    }))
}
