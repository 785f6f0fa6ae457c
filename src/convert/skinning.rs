use super::types::SkinWeights;
use crate::issue::{DANGLING_REFERENCE, GEOMETRY_INCONSISTENCY, ValidationIssue};
use crate::records::{RecordGraph, RecordRef, SkinData, SkinPartition};

/// Influences below this are treated as absent.
const MIN_WEIGHT: f32 = 1e-7;

// ─── Per-vertex weights ───────────────────────────────────────────────────────

/// Invert the bone-indexed sparse weight lists of a skin instance into four
/// slots per vertex.
///
/// Each vertex keeps its four strongest influences renormalised to 1.0. A
/// vertex with no influence is bound to bone 0 with all-zero weights. Files
/// that leave the per-bone lists out are read from the skin partition.
///
/// # Arguments
///
/// * `graph` - Decoded record graph.
/// * `skin_instance` - Reference to a `NiSkinInstance` record.
/// * `vertex_count` - Vertex count of the skinned geometry.
pub fn skin_weights(
    graph: &RecordGraph,
    skin_instance: RecordRef,
    vertex_count: usize,
) -> SkinWeights {
    let mut issues = Vec::new();
    let mut candidates: Vec<Vec<(u16, f32)>> = vec![Vec::new(); vertex_count];

    let data = graph
        .skin_instance(skin_instance)
        .map(|instance| (instance, graph.skin_data(instance.data)));
    match data {
        Some((instance, Some(data))) => {
            let bone_count = instance.bones.len();
            let listed = data.bones.iter().any(|bone| !bone.weights.is_empty());
            let partition = graph
                .skin_partition(data.partition)
                .or_else(|| graph.skin_partition(instance.partition));
            let dropped = match partition {
                Some(partition) if !listed => {
                    partition_influences(partition, bone_count, &mut candidates)
                }
                _ => bone_influences(data, bone_count, &mut candidates),
            };
            if dropped > 0 {
                issues.push(ValidationIssue::warning(
                    GEOMETRY_INCONSISTENCY,
                    format!(
                        "skin instance {}: dropped {dropped} weights for vertices beyond {vertex_count} or unknown bones",
                        skin_instance.0
                    ),
                ));
            }
            if !listed && partition.is_none() && vertex_count > 0 {
                issues.push(ValidationIssue::warning(
                    GEOMETRY_INCONSISTENCY,
                    format!(
                        "skin instance {} carries no weights{}, vertices are uninfluenced",
                        skin_instance.0,
                        if data.has_weights { "" } else { " and no skin partition" }
                    ),
                ));
            }
        }
        Some((instance, None)) => issues.push(ValidationIssue::warning(
            DANGLING_REFERENCE,
            format!(
                "skin instance {} has no skin data (reference {}), vertices are uninfluenced",
                skin_instance.0, instance.data.0
            ),
        )),
        None => issues.push(ValidationIssue::warning(
            DANGLING_REFERENCE,
            format!("record {} is not a skin instance", skin_instance.0),
        )),
    }

    let (indices, weights): (Vec<_>, Vec<_>) = candidates.iter_mut().map(|c| top_four(c)).unzip();
    SkinWeights {
        indices,
        weights,
        issues,
    }
}

/// Influences from the per-bone weight lists. Returns how many were dropped.
fn bone_influences(
    data: &SkinData,
    bone_count: usize,
    candidates: &mut [Vec<(u16, f32)>],
) -> usize {
    let mut dropped = 0;
    for (bone, bone_data) in data.bones.iter().enumerate().take(bone_count) {
        for weight in &bone_data.weights {
            let Some(slot) = candidates.get_mut(weight.vertex as usize) else {
                dropped += 1;
                continue;
            };
            if weight.weight > MIN_WEIGHT {
                slot.push((bone as u16, weight.weight));
            }
        }
    }
    dropped
}

/// Influences rebuilt from the partitions, for files that store weights only
/// there. Partition bones index the instance bone list; a vertex repeated
/// across partitions keeps its first weight per bone.
fn partition_influences(
    partition: &SkinPartition,
    bone_count: usize,
    candidates: &mut [Vec<(u16, f32)>],
) -> usize {
    let mut dropped = 0;
    for part in &partition.partitions {
        let per_vertex = part.weights_per_vertex as usize;
        for (local, &vertex) in part.vertex_map.iter().enumerate() {
            let Some(slot) = candidates.get_mut(vertex as usize) else {
                dropped += per_vertex;
                continue;
            };
            for lane in 0..per_vertex {
                let entry = local * per_vertex + lane;
                let Some(&weight) = part.weights.get(entry) else {
                    continue;
                };
                if weight <= MIN_WEIGHT {
                    continue;
                }
                let local_bone = if part.bone_indices.is_empty() {
                    Some(lane)
                } else {
                    part.bone_indices.get(entry).map(|&index| index as usize)
                };
                let bone = local_bone
                    .and_then(|index| part.bones.get(index))
                    .map(|&bone| bone as usize)
                    .filter(|&bone| bone < bone_count);
                let Some(bone) = bone else {
                    dropped += 1;
                    continue;
                };
                if slot.iter().all(|&(existing, _)| existing as usize != bone) {
                    slot.push((bone as u16, weight));
                }
            }
        }
    }
    dropped
}

/// Strongest four influences, renormalised. Ties keep bone order.
fn top_four(candidates: &mut Vec<(u16, f32)>) -> ([u16; 4], [f32; 4]) {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(4);

    let weight_sum: f32 = candidates.iter().map(|&(_, w)| w).sum();
    let mut slots = [0u16; 4];
    let mut weights = [0.0f32; 4];
    if weight_sum <= MIN_WEIGHT {
        return (slots, weights);
    }
    for (lane, &(bone, weight)) in candidates.iter().enumerate() {
        slots[lane] = bone;
        weights[lane] = weight / weight_sum;
    }
    (slots, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::count_code;
    use crate::records::decode;
    use crate::records::fixture::RecordWriter;
    use crate::stream::FormatVersion;

    fn skinned_file(bones: &[&[(u16, f32)]], link_data: bool) -> Vec<u8> {
        let bone_refs: Vec<i32> = (0..bones.len() as i32).map(|_| 0).collect();
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 3);
        w.tag("NiNode").node("Bone", 0, &[], &[]);
        w.tag("NiSkinInstance")
            .skin_instance(if link_data { 2 } else { -1 }, 0, &bone_refs);
        w.tag("NiSkinData").skin_data(bones);
        w.roots(&[0]);
        w.into_bytes()
    }

    #[test]
    fn given_two_equal_influences_when_inverting_then_each_gets_half() {
        let none: &[(u16, f32)] = &[];
        let shared: &[(u16, f32)] = &[(0, 0.6)];
        let bones = [none, none, none, shared, none, none, none, shared];
        let decoded = decode(&skinned_file(&bones, true)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 1);

        let mut pairs: Vec<(u16, f32)> = skin.indices[0]
            .iter()
            .copied()
            .zip(skin.weights[0])
            .filter(|&(_, w)| w > 0.0)
            .collect();
        pairs.sort_by_key(|&(bone, _)| bone);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, 3);
        assert_eq!(pairs[1].0, 7);
        assert!((pairs[0].1 - 0.5).abs() < 1e-6);
        assert!((pairs[1].1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn given_six_influences_when_inverting_then_top_four_sum_to_one() {
        let bones: [&[(u16, f32)]; 6] = [
            &[(0, 0.05)],
            &[(0, 0.3)],
            &[(0, 0.1)],
            &[(0, 0.25)],
            &[(0, 0.2)],
            &[(0, 0.1)],
        ];
        let decoded = decode(&skinned_file(&bones, true)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 2);

        assert_eq!(skin.indices[0], [1, 3, 4, 2]);
        let sum: f32 = skin.weights[0].iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(skin.indices[1], [0; 4]);
        assert_eq!(skin.weights[1], [0.0; 4]);
    }

    #[test]
    fn given_any_vertex_when_inverting_then_weights_sum_to_zero_or_one() {
        let bones: [&[(u16, f32)]; 2] = [&[(0, 0.9), (2, 0.1)], &[(0, 0.4), (3, 2.0)]];
        let decoded = decode(&skinned_file(&bones, true)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 4);

        for weights in &skin.weights {
            let sum: f32 = weights.iter().sum();
            assert!(sum.abs() < 1e-6 || (sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn given_out_of_range_vertex_when_inverting_then_weight_is_dropped_and_reported() {
        let bones: [&[(u16, f32)]; 1] = [&[(0, 1.0), (9, 1.0)]];
        let decoded = decode(&skinned_file(&bones, true)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 1);

        assert_eq!(skin.weights[0][0], 1.0);
        assert_eq!(count_code(&skin.issues, GEOMETRY_INCONSISTENCY), 1);
    }

    fn partitioned_file(with_partition: bool) -> Vec<u8> {
        let version = FormatVersion::from_parts(4, 2, 1, 0);
        let count = if with_partition { 4 } else { 3 };
        let mut w = RecordWriter::file(version, count);
        w.tag("NiNode").node("Bone", 0, &[], &[]);
        w.tag("NiSkinInstance").skin_instance(2, 0, &[0, 0, 0]);
        w.tag("NiSkinData")
            .skin_data_unweighted(3, if with_partition { 3 } else { -1 });
        if with_partition {
            // Partition bones 0 and 1 are instance bones 2 and 0.
            w.tag("NiSkinPartition").skin_partition(
                &[2, 0],
                &[1, 0],
                2,
                &[0.75, 0.25, 1.0, 0.0],
                Some(&[0, 1, 1, 0]),
            );
        }
        w.into_bytes()
    }

    #[test]
    fn given_weights_only_in_partition_when_inverting_then_partition_influences_are_used() {
        let decoded = decode(&partitioned_file(true)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 2);

        assert_eq!(skin.indices[1], [2, 0, 0, 0]);
        assert!((skin.weights[1][0] - 0.75).abs() < 1e-6);
        assert!((skin.weights[1][1] - 0.25).abs() < 1e-6);
        assert_eq!(skin.indices[0][0], 0);
        assert_eq!(skin.weights[0], [1.0, 0.0, 0.0, 0.0]);
        assert!(skin.issues.is_empty());
    }

    #[test]
    fn given_no_weights_and_no_partition_when_inverting_then_mesh_static_is_reported() {
        let decoded = decode(&partitioned_file(false)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 2);

        assert_eq!(skin.weights, vec![[0.0; 4]; 2]);
        assert_eq!(count_code(&skin.issues, GEOMETRY_INCONSISTENCY), 1);
    }

    #[test]
    fn given_missing_skin_data_when_inverting_then_all_vertices_are_uninfluenced() {
        let bones: [&[(u16, f32)]; 1] = [&[(0, 1.0)]];
        let decoded = decode(&skinned_file(&bones, false)).expect("decode");
        let skin = skin_weights(&decoded.graph, RecordRef(1), 3);

        assert_eq!(skin.weights, vec![[0.0; 4]; 3]);
        assert_eq!(count_code(&skin.issues, DANGLING_REFERENCE), 1);
    }
}
