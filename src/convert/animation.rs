use std::collections::{HashMap, HashSet};

use super::coords::{TARGET_EULER_ORDER, convert_quaternion, convert_vector, euler_axis_mapping};
use super::types::{AnimationClip, AnimationSet, BoneTrack, RotationCurve};
use crate::issue::{UNMATCHED_TEXT_KEY, ValidationIssue};
use crate::records::{
    ControllerKind, ExtraPayload, Key, KeyMap, KeyedData, KeyframeData, RecordGraph, RecordKind,
    RecordRef, RotationKeys, TextKey,
};

/// Clip used when a file carries keyframes but no clip markers.
pub const DEFAULT_CLIP: &str = "default";

/// Keys this close outside a clip boundary still belong to it.
const TIME_EPSILON: f32 = 1e-4;

// ─── Clip markers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct ClipRange {
    name: String,
    start: f32,
    stop: f32,
}

/// Text keys from every text-key record, root extra-data chains first. Each
/// record contributes once.
fn collect_text_keys<'g>(graph: &'g RecordGraph, roots: &[RecordRef]) -> Vec<&'g TextKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();

    let root_heads = roots
        .iter()
        .filter_map(|&root| graph.get(root)?.kind.named().map(|named| named.extra));
    for head in root_heads {
        let mut current = head;
        while let Some(extra) = graph.extra_data(current) {
            if !seen.insert(current) {
                break;
            }
            if let Some(list) = extra.text_keys() {
                keys.extend(list);
            }
            current = extra.next;
        }
    }

    for record in &graph.records {
        if let RecordKind::ExtraData(extra) = &record.kind {
            if let ExtraPayload::TextKeys(list) = &extra.payload {
                if seen.insert(RecordRef::from_index(record.index)) {
                    keys.extend(list);
                }
            }
        }
    }
    keys
}

/// Pair `"<Name>: Start"` and `"<Name>: Stop"` lines into clip ranges.
/// Matching ignores case, and one key may hold several lines.
fn parse_clip_ranges(keys: &[&TextKey], issues: &mut Vec<ValidationIssue>) -> Vec<ClipRange> {
    let mut open: HashMap<String, (String, f32)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut clips = Vec::new();

    for key in keys {
        for line in key.text.lines() {
            let Some((name, action)) = line.rsplit_once(':') else {
                continue;
            };
            let name = name.trim();
            let folded = name.to_lowercase();
            match action.trim().to_lowercase().as_str() {
                "start" => {
                    if !open.contains_key(&folded) {
                        order.push(folded.clone());
                    }
                    open.insert(folded, (name.to_string(), key.time));
                }
                "stop" => match open.remove(&folded) {
                    Some((name, start)) => {
                        order.retain(|pending| pending != &folded);
                        clips.push(ClipRange {
                            name,
                            start,
                            stop: key.time,
                        });
                    }
                    None => issues.push(ValidationIssue::warning(
                        UNMATCHED_TEXT_KEY,
                        format!("clip '{name}' stops at {} without a start", key.time),
                    )),
                },
                _ => {}
            }
        }
    }

    for folded in order {
        if let Some((name, start)) = open.remove(&folded) {
            issues.push(ValidationIssue::warning(
                UNMATCHED_TEXT_KEY,
                format!("clip '{name}' starts at {start} but never stops, dropped"),
            ));
        }
    }
    clips
}

// ─── Tracks ───────────────────────────────────────────────────────────────────

fn map_keys<T, U>(map: &KeyMap<T>, convert: impl Fn(&T) -> U) -> KeyMap<U> {
    KeyMap {
        interpolation: map.interpolation,
        keys: map
            .keys
            .iter()
            .map(|key| Key {
                time: key.time,
                value: convert(&key.value),
                tangents: key
                    .tangents
                    .as_ref()
                    .map(|(tangent_in, tangent_out)| (convert(tangent_in), convert(tangent_out))),
                tcb: key.tcb,
            })
            .collect(),
    }
}

fn convert_rotation_keys(rotations: &RotationKeys) -> RotationCurve {
    match rotations {
        RotationKeys::Quaternion(map) => RotationCurve::Quaternion(map_keys(map, convert_quaternion)),
        RotationKeys::Euler(axes) => {
            let axes = euler_axis_mapping()
                .map(|(source, sign)| map_keys(&axes[source], |angle| angle * sign));
            RotationCurve::Euler {
                order: TARGET_EULER_ORDER,
                axes,
            }
        }
    }
}

fn build_track(target: &str, record: usize, data: &KeyframeData) -> BoneTrack {
    BoneTrack {
        target: target.to_string(),
        record,
        translation: map_keys(&data.translations, convert_vector),
        rotation: convert_rotation_keys(&data.rotations),
        scale: data.scales.clone(),
    }
}

/// Every keyframe controller on a named spatial record, with its time range.
fn collect_tracks(graph: &RecordGraph) -> Vec<(BoneTrack, f32, f32)> {
    let mut tracks = Vec::new();
    for record in &graph.records {
        let Some(spatial) = record.kind.spatial() else {
            continue;
        };
        if spatial.name().is_empty() {
            continue;
        }
        for controller in graph.controller_chain(spatial.base.controller) {
            let ControllerKind::Keyframe { data } = controller.kind else {
                continue;
            };
            let Some(KeyedData::Keyframe(keyframes)) = graph.keyed_data(data) else {
                continue;
            };
            let track = build_track(spatial.name(), record.index, keyframes);
            let (start, stop) = keyframes
                .time_range()
                .unwrap_or((controller.base.start_time, controller.base.stop_time));
            tracks.push((
                track,
                start.min(controller.base.start_time),
                stop.max(controller.base.stop_time),
            ));
        }
    }
    tracks
}

fn slice_keys<T: Clone>(map: &KeyMap<T>, start: f32, stop: f32) -> KeyMap<T> {
    KeyMap {
        interpolation: map.interpolation,
        keys: map
            .keys
            .iter()
            .filter(|key| key.time >= start - TIME_EPSILON && key.time <= stop + TIME_EPSILON)
            .map(|key| Key {
                time: (key.time - start).max(0.0),
                ..key.clone()
            })
            .collect(),
    }
}

/// Keys of `track` within `[start, stop]`, rebased to `start`. `None` when
/// no curve has a key in range.
fn slice_track(track: &BoneTrack, start: f32, stop: f32) -> Option<BoneTrack> {
    let rotation = match &track.rotation {
        RotationCurve::Quaternion(map) => RotationCurve::Quaternion(slice_keys(map, start, stop)),
        RotationCurve::Euler { order, axes } => RotationCurve::Euler {
            order: *order,
            axes: axes.clone().map(|axis| slice_keys(&axis, start, stop)),
        },
    };
    let rotation_empty = match &rotation {
        RotationCurve::Quaternion(map) => map.is_empty(),
        RotationCurve::Euler { axes, .. } => axes.iter().all(KeyMap::is_empty),
    };
    let sliced = BoneTrack {
        target: track.target.clone(),
        record: track.record,
        translation: slice_keys(&track.translation, start, stop),
        rotation,
        scale: slice_keys(&track.scale, start, stop),
    };
    if rotation_empty && sliced.translation.is_empty() && sliced.scale.is_empty() {
        None
    } else {
        Some(sliced)
    }
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Extract named clips and their per-node keyed curves.
///
/// # Arguments
///
/// * `graph` - Decoded record graph.
/// * `roots` - Roots whose extra-data chains are scanned for clip markers
///   before any other text-key record.
///
/// # Returns
///
/// One clip per matched start/stop pair, or a single [`DEFAULT_CLIP`]
/// spanning every controller when the file has no markers. Files without
/// keyframe controllers produce no clips.
pub fn extract_animations(graph: &RecordGraph, roots: &[RecordRef]) -> AnimationSet {
    let mut issues = Vec::new();
    let keys = collect_text_keys(graph, roots);
    let ranges = parse_clip_ranges(&keys, &mut issues);
    let tracks = collect_tracks(graph);

    if tracks.is_empty() {
        return AnimationSet {
            clips: Vec::new(),
            issues,
        };
    }

    let ranges = if ranges.is_empty() {
        let start = tracks.iter().map(|(_, start, _)| *start).fold(f32::INFINITY, f32::min);
        let stop = tracks.iter().map(|(_, _, stop)| *stop).fold(f32::NEG_INFINITY, f32::max);
        vec![ClipRange {
            name: DEFAULT_CLIP.to_string(),
            start,
            stop,
        }]
    } else {
        ranges
    };

    let clips: Vec<AnimationClip> = ranges
        .into_iter()
        .map(|range| AnimationClip {
            tracks: tracks
                .iter()
                .filter_map(|(track, _, _)| slice_track(track, range.start, range.stop))
                .collect(),
            name: range.name,
            start: range.start,
            stop: range.stop,
        })
        .collect();

    log::info!(
        "extracted {} clips over {} animated nodes",
        clips.len(),
        tracks.len()
    );
    AnimationSet { clips, issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::count_code;
    use crate::records::decode;
    use crate::records::fixture::RecordWriter;
    use crate::convert::EulerOrder;
    use crate::convert::coords::{SOURCE_EULER_ORDER, convert_rotation};
    use crate::records::Interpolation;
    use crate::stream::FormatVersion;
    use nalgebra::Vector3;

    // 0 root (extra 1, no controller), 1 text keys, 2 bone (controller 3),
    // 3 keyframe controller, 4 keyframe data
    fn animated_file(text_keys: &[(f32, &str)]) -> Vec<u8> {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 5);
        w.tag("NiNode").node_with_chains("Root", 1, -1, &[2]);
        w.tag("NiTextKeyExtraData").text_keys(-1, text_keys);
        w.tag("NiNode").node_with_chains("Bip01 Head", -1, 3, &[]);
        w.tag("NiKeyframeController").keyframe_controller(-1, 2, 4, 0.0, 3.0);
        w.tag("NiKeyframeData").keyframe_data(
            &[(0.0, [1.0, 0.0, 0.0, 0.0]), (2.0, [0.0, 0.0, 0.0, 1.0])],
            &[(0.0, [0.0, 0.0, 0.0]), (1.0, [70.0, 0.0, 0.0]), (3.0, [0.0, 0.0, 70.0])],
            &[],
        );
        w.roots(&[0]);
        w.into_bytes()
    }

    #[test]
    fn given_start_stop_markers_when_extracting_then_clip_keys_are_rebased() {
        let bytes = animated_file(&[(1.0, "Walk: Start"), (3.0, "walk: stop")]);
        let decoded = decode(&bytes).expect("decode");
        let set = extract_animations(&decoded.graph, &decoded.graph.roots);

        assert_eq!(set.clips.len(), 1);
        let clip = &set.clips[0];
        assert_eq!(clip.name, "Walk");
        assert!((clip.duration() - 2.0).abs() < 1e-6);
        let track = &clip.tracks[0];
        assert_eq!(track.target, "Bip01 Head");
        let times: Vec<f32> = track.translation.keys.iter().map(|key| key.time).collect();
        assert_eq!(times, vec![0.0, 2.0]);
        let last = track.translation.keys[1].value;
        assert!((last - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn given_multi_line_key_when_extracting_then_each_line_is_a_marker() {
        let bytes = animated_file(&[
            (0.0, "Idle: Start\r\nSound: Foot"),
            (1.0, "Idle: Stop\nAttack: Start"),
            (3.0, "Attack: Stop"),
        ]);
        let decoded = decode(&bytes).expect("decode");
        let set = extract_animations(&decoded.graph, &decoded.graph.roots);

        let names: Vec<&str> = set.clips.iter().map(|clip| clip.name.as_str()).collect();
        assert_eq!(names, vec!["Idle", "Attack"]);
        assert!(set.issues.is_empty());
    }

    #[test]
    fn given_start_without_stop_when_extracting_then_clip_is_dropped_and_reported() {
        let bytes = animated_file(&[(0.0, "Idle: Start"), (1.0, "Idle: Stop"), (2.0, "Jump: Start")]);
        let decoded = decode(&bytes).expect("decode");
        let set = extract_animations(&decoded.graph, &decoded.graph.roots);

        assert_eq!(set.clips.len(), 1);
        assert_eq!(count_code(&set.issues, UNMATCHED_TEXT_KEY), 1);
    }

    #[test]
    fn given_no_markers_when_extracting_then_single_default_clip_spans_controller() {
        let decoded = decode(&animated_file(&[])).expect("decode");
        let set = extract_animations(&decoded.graph, &decoded.graph.roots);

        assert_eq!(set.clips.len(), 1);
        assert_eq!(set.clips[0].name, DEFAULT_CLIP);
        assert_eq!(set.clips[0].start, 0.0);
        assert_eq!(set.clips[0].stop, 3.0);
        let RotationCurve::Quaternion(rotation) = &set.clips[0].tracks[0].rotation else {
            panic!("expected quaternion rotation");
        };
        assert_eq!(rotation.keys.len(), 2);
    }

    #[test]
    fn given_euler_curves_when_converting_then_source_y_becomes_negated_target_z() {
        let mut y_curve = KeyMap::default();
        y_curve.keys.push(Key {
            time: 0.0,
            value: 0.5f32,
            tangents: None,
            tcb: None,
        });
        let rotations = RotationKeys::Euler([KeyMap::default(), y_curve, KeyMap::default()]);

        let RotationCurve::Euler {
            axes: [x, y, z], ..
        } = convert_rotation_keys(&rotations)
        else {
            panic!("expected euler rotation");
        };
        assert!(x.is_empty());
        assert!(y.is_empty());
        assert_eq!(z.keys[0].value, -0.5);
    }

    #[test]
    fn given_euler_key_when_converting_then_composed_rotation_matches_converted_matrix() {
        let angles = [0.3f32, -0.5, 0.9];
        let curve = |angle: f32| KeyMap {
            interpolation: Interpolation::Linear,
            keys: vec![Key {
                time: 0.0,
                value: angle,
                tangents: None,
                tcb: None,
            }],
        };
        let rotations = RotationKeys::Euler(angles.map(curve));

        let RotationCurve::Euler { order, axes } = convert_rotation_keys(&rotations) else {
            panic!("expected euler rotation");
        };
        let converted = order.compose(axes.map(|axis| axis.keys[0].value));
        let expected = convert_rotation(&SOURCE_EULER_ORDER.compose(angles));

        assert_eq!(order, EulerOrder::Xzy);
        assert!((converted - expected).norm() < 1e-5);
    }
}
