use std::collections::HashMap;

use super::coords::convert_transform;
use super::types::{Bone, Skeleton};
use crate::issue::{DANGLING_REFERENCE, GEOMETRY_INCONSISTENCY, ValidationIssue};
use crate::records::{RecordGraph, RecordRef, Transform};

// ─── Rig building ─────────────────────────────────────────────────────────────

/// Build the bone list for one skin instance.
///
/// Bones keep the skin instance's order so that weight slot `i` always means
/// bone `i`. A bone reference that does not resolve to a spatial record
/// becomes a placeholder so later positions stay aligned.
///
/// # Arguments
///
/// * `graph` - Decoded record graph.
/// * `skin_instance` - Reference to a `NiSkinInstance` record.
///
/// # Returns
///
/// The skeleton with its own issue list.
pub fn build_skeleton(graph: &RecordGraph, skin_instance: RecordRef) -> Skeleton {
    let mut issues = Vec::new();
    let instance_index = skin_instance.index().unwrap_or_default();

    let Some(instance) = graph.skin_instance(skin_instance) else {
        issues.push(ValidationIssue::warning(
            DANGLING_REFERENCE,
            format!("record {} is not a skin instance", skin_instance.0),
        ));
        return Skeleton {
            skin_instance: instance_index,
            root: None,
            bones: Vec::new(),
            issues,
        };
    };

    let skin_data = graph.skin_data(instance.data);
    match skin_data {
        None => issues.push(ValidationIssue::warning(
            DANGLING_REFERENCE,
            format!(
                "skin instance {instance_index} has no skin data (reference {}), rest poses default to identity",
                instance.data.0
            ),
        )),
        Some(data) if data.bones.len() != instance.bones.len() => {
            issues.push(ValidationIssue::warning(
                GEOMETRY_INCONSISTENCY,
                format!(
                    "skin instance {instance_index} lists {} bones but its data holds {}",
                    instance.bones.len(),
                    data.bones.len()
                ),
            ));
        }
        Some(_) => {}
    }

    let bone_records: Vec<Option<usize>> = instance
        .bones
        .iter()
        .map(|&bone| graph.spatial(bone).and(bone.index()))
        .collect();
    let mut slot_of: HashMap<usize, usize> = HashMap::new();
    for (slot, record) in bone_records.iter().enumerate() {
        if let Some(record) = record {
            slot_of.entry(*record).or_insert(slot);
        }
    }
    let parent_of = graph.parent_map();

    let mut bones: Vec<Bone> = Vec::with_capacity(instance.bones.len());
    for (slot, (&reference, record)) in instance.bones.iter().zip(&bone_records).enumerate() {
        let rest_pose = skin_data
            .and_then(|data| data.bones.get(slot))
            .map(|bone| convert_transform(&bone.inverse_bind.inverse()))
            .unwrap_or(Transform::IDENTITY);

        let Some(record) = *record else {
            issues.push(ValidationIssue::warning(
                DANGLING_REFERENCE,
                format!(
                    "bone {slot} of skin instance {instance_index} references record {} which is not a node",
                    reference.0
                ),
            ));
            bones.push(Bone {
                name: format!("<missing bone {slot}>"),
                record: None,
                parent: None,
                rest_pose: Transform::IDENTITY,
                local_rest_pose: Transform::IDENTITY,
            });
            continue;
        };

        let name = graph
            .spatial(reference)
            .map(|spatial| spatial.name().to_string())
            .unwrap_or_default();
        let parent = find_parent_bone(record, &parent_of, &slot_of, graph.len());
        bones.push(Bone {
            name,
            record: Some(record),
            parent,
            rest_pose,
            local_rest_pose: rest_pose,
        });
    }

    // Parents may appear after their children in the bone list.
    let rest_poses: Vec<Transform> = bones.iter().map(|bone| bone.rest_pose).collect();
    for bone in &mut bones {
        if let Some(parent) = bone.parent {
            bone.local_rest_pose = rest_poses[parent].inverse().compose(&bone.rest_pose);
        }
    }

    log::debug!(
        "skin instance {instance_index}: {} bones, {} issues",
        bones.len(),
        issues.len()
    );

    Skeleton {
        skin_instance: instance_index,
        root: instance.root.index().filter(|&root| root < graph.len()),
        bones,
        issues,
    }
}

/// Walk the node hierarchy upward until a node that is itself a listed bone
/// is found. The walk is bounded by the record count so looping parent links
/// terminate.
fn find_parent_bone(
    record: usize,
    parent_of: &HashMap<usize, usize>,
    slot_of: &HashMap<usize, usize>,
    limit: usize,
) -> Option<usize> {
    let mut current = parent_of.get(&record).copied();
    for _ in 0..limit {
        let node = current?;
        if let Some(&slot) = slot_of.get(&node) {
            return Some(slot);
        }
        current = parent_of.get(&node).copied();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::coords::{convert_vector, invert_vector};
    use crate::issue::count_code;
    use crate::records::decode;
    use nalgebra::{Matrix3, Rotation3, Vector3};
    use crate::records::fixture::RecordWriter;
    use crate::stream::FormatVersion;

    // 0 root, 1 pelvis, 2 tail (not a bone), 3 tip, 4 skin instance, 5 skin data
    fn rig_file(bones: &[i32]) -> Vec<u8> {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 6);
        w.tag("NiNode").node("Root", 0, &[1], &[]);
        w.tag("NiNode").node("Pelvis", 0, &[2], &[]);
        w.tag("NiNode").node("Tail", 0, &[3], &[]);
        w.tag("NiNode").node("Tip", 0, &[], &[]);
        w.tag("NiSkinInstance").skin_instance(5, 0, bones);
        w.tag("NiSkinData");
        let empty: &[(u16, f32)] = &[];
        let weights: Vec<&[(u16, f32)]> = bones.iter().map(|_| empty).collect();
        w.skin_data(&weights);
        w.roots(&[0]);
        w.into_bytes()
    }

    fn rows(rotation: Rotation3<f32>) -> [[f32; 3]; 3] {
        let m = rotation.into_inner();
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    // Same hierarchy as `rig_file`, bones Pelvis and Tip with posed binds.
    fn posed_rig_file() -> Vec<u8> {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 6);
        w.tag("NiNode").node("Root", 0, &[1], &[]);
        w.tag("NiNode").node("Pelvis", 0, &[2], &[]);
        w.tag("NiNode").node("Tail", 0, &[3], &[]);
        w.tag("NiNode").node("Tip", 0, &[], &[]);
        w.tag("NiSkinInstance").skin_instance(5, 0, &[1, 3]);
        w.tag("NiSkinData").identity_rts().u32(2).reference(-1);
        w.rts(rows(Rotation3::from_euler_angles(0.0, 0.0, 0.4)), [7.0, -14.0, 21.0], 2.0)
            .vec3([0.0; 3])
            .f32(1.0)
            .u16(0);
        w.rts(rows(Rotation3::from_euler_angles(-0.7, 0.2, 0.0)), [0.0, 35.0, 0.0], 0.5)
            .vec3([0.0; 3])
            .f32(1.0)
            .u16(0);
        w.roots(&[0]);
        w.into_bytes()
    }

    #[test]
    fn given_posed_inverse_binds_when_building_then_rest_and_local_poses_follow_the_bind() {
        let decoded = decode(&posed_rig_file()).expect("decode");
        let graph = &decoded.graph;
        let skeleton = build_skeleton(graph, RecordRef(4));
        let data = graph.skin_data(RecordRef(5)).expect("skin data");
        let sample_points = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, -2.0, 0.5),
            Vector3::new(-0.3, 0.8, 2.0),
        ];

        assert!(skeleton.issues.is_empty());
        let (pelvis, tip) = (&skeleton.bones[0], &skeleton.bones[1]);
        assert_eq!(tip.parent, Some(0));
        assert!((pelvis.rest_pose.scale - 0.5).abs() < 1e-6);
        assert!((tip.rest_pose.scale - 2.0).abs() < 1e-6);
        assert!((pelvis.rest_pose.rotation - Matrix3::identity()).norm() > 0.1);

        for (bone, bone_data) in skeleton.bones.iter().zip(&data.bones) {
            let bind = bone_data.inverse_bind.inverse();
            for point in &sample_points {
                let expected = convert_vector(&bind.apply_point(&invert_vector(point)));
                assert!((bone.rest_pose.apply_point(point) - expected).norm() < 1e-4);
            }
        }
        assert_eq!(pelvis.local_rest_pose, pelvis.rest_pose);
        for point in &sample_points {
            let through_parent = pelvis
                .rest_pose
                .apply_point(&tip.local_rest_pose.apply_point(point));
            assert!((through_parent - tip.rest_pose.apply_point(point)).norm() < 1e-4);
        }
    }

    #[test]
    fn given_intermediate_non_bone_when_building_then_parent_skips_to_listed_ancestor() {
        let decoded = decode(&rig_file(&[3, 1])).expect("decode");
        let skeleton = build_skeleton(&decoded.graph, RecordRef(4));

        assert_eq!(skeleton.bones[0].name, "Tip");
        assert_eq!(skeleton.bones[0].parent, Some(1));
        assert_eq!(skeleton.bones[1].parent, None);
        assert_eq!(skeleton.root, Some(0));
        assert!(skeleton.issues.is_empty());
    }

    #[test]
    fn given_dangling_bone_when_building_then_placeholder_keeps_positions_aligned() {
        let decoded = decode(&rig_file(&[1, 42, 3])).expect("decode");
        let skeleton = build_skeleton(&decoded.graph, RecordRef(4));

        assert_eq!(skeleton.bones.len(), 3);
        assert_eq!(skeleton.bones[1].name, "<missing bone 1>");
        assert!(skeleton.bones[1].parent.is_none());
        assert_eq!(skeleton.bones[2].parent, Some(0));
        assert_eq!(count_code(&skeleton.issues, DANGLING_REFERENCE), 1);
    }

    #[test]
    fn given_non_skin_reference_when_building_then_empty_skeleton_is_reported() {
        let decoded = decode(&rig_file(&[1])).expect("decode");
        let skeleton = build_skeleton(&decoded.graph, RecordRef(0));

        assert!(skeleton.bones.is_empty());
        assert_eq!(count_code(&skeleton.issues, DANGLING_REFERENCE), 1);
    }
}
