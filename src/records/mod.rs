mod base;
mod controller;
mod data;
mod extra;
mod keys;
mod node;
mod property;
mod skin;

#[cfg(test)]
pub(crate) mod fixture;

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::DecodeError;
use crate::issue::{DANGLING_REFERENCE, UNKNOWN_EXTRA_DATA, ValidationIssue};
use crate::stream::{FormatVersion, NifStream};

pub use base::{
    BoundingVolume, FLAG_ACTIVE_COLLISION, FLAG_BBOX_COLLISION, FLAG_HIDDEN, FLAG_MESH_COLLISION,
    NamedObject, SpatialNode, Transform,
};
pub use controller::{
    ColliderResponse, Controller, ControllerBase, ControllerKind, ModifierKind, Particle,
    ParticleModifier, ParticleSystemController,
};
pub use data::{GeometryData, Primitives};
pub use extra::{ExtraData, ExtraPayload, TextKey};
pub use keys::{
    FloatKeyMap, Interpolation, Key, KeyMap, KeyedData, KeyframeData, Morph, MorphData,
    QuaternionKeyMap, RotationKeys, TcbParams, Vector3KeyMap, Vector4KeyMap, VisKey,
};
pub use node::{
    Camera, Geometry, GeometryVariant, Light, LightVariant, LodRange, Node, NodeVariant,
    TextureEffect,
};
pub use property::{
    ALPHA_BLEND, ALPHA_TEST, BumpMapping, DRAW_BOTH, MaterialProperty, Mipmap, Palette, PixelData,
    Property, PropertyKind, SourceTexture, StencilProperty, TextureBinding, TextureLocation,
    TextureSlot, TexturingProperty,
};
pub use skin::{BoneData, Partition, SkinData, SkinInstance, SkinPartition, VertexWeight};

// ─── References ───────────────────────────────────────────────────────────────

/// Signed index into the record array; negative means "no reference".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecordRef(pub i32);

impl RecordRef {
    pub const NONE: RecordRef = RecordRef(-1);

    /// Array position, or `None` for a negative reference. Range checks happen
    /// in the [`RecordGraph`] getters.
    pub fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    pub fn from_index(index: usize) -> Self {
        RecordRef(i32::try_from(index).unwrap_or(-1))
    }
}

impl Default for RecordRef {
    fn default() -> Self {
        Self::NONE
    }
}

// ─── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub enum RecordKind {
    Node(Node),
    Geometry(Geometry),
    Camera(Camera),
    Light(Light),
    TextureEffect(TextureEffect),
    GeometryData(GeometryData),
    Property(Property),
    SourceTexture(SourceTexture),
    PixelData(PixelData),
    Palette(Palette),
    ExtraData(ExtraData),
    Controller(Controller),
    ParticleModifier(ParticleModifier),
    KeyedData(KeyedData),
    SkinInstance(SkinInstance),
    SkinData(SkinData),
    SkinPartition(SkinPartition),
    SequenceHelper(NamedObject),
}

impl RecordKind {
    /// Spatial fields for records placed in the scene hierarchy.
    pub fn spatial(&self) -> Option<&SpatialNode> {
        match self {
            RecordKind::Node(node) => Some(&node.spatial),
            RecordKind::Geometry(geometry) => Some(&geometry.spatial),
            RecordKind::Camera(camera) => Some(&camera.spatial),
            RecordKind::Light(light) => Some(&light.spatial),
            RecordKind::TextureEffect(effect) => Some(&effect.spatial),
            _ => None,
        }
    }

    /// Named-object header, for records that have one.
    pub fn named(&self) -> Option<&NamedObject> {
        match self {
            RecordKind::Property(property) => Some(&property.base),
            RecordKind::SourceTexture(texture) => Some(&texture.base),
            RecordKind::SequenceHelper(base) => Some(base),
            other => other.spatial().map(|spatial| &spatial.base),
        }
    }
}

/// One decoded record. `index` equals its position in [`RecordGraph::records`].
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub index: usize,
    pub tag: String,
    pub kind: RecordKind,
}

/// Flat, immutable record array with its root list.
#[derive(Debug, Clone, Serialize)]
pub struct RecordGraph {
    pub version: FormatVersion,
    pub records: Vec<Record>,
    pub roots: Vec<RecordRef>,
}

/// Decoder output: the graph plus every non-fatal finding.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedFile {
    pub graph: RecordGraph,
    pub issues: Vec<ValidationIssue>,
}

impl RecordGraph {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Resolve a reference; negative or out-of-range references are absent.
    pub fn get(&self, reference: RecordRef) -> Option<&Record> {
        self.records.get(reference.index()?)
    }

    pub fn spatial(&self, reference: RecordRef) -> Option<&SpatialNode> {
        self.get(reference)?.kind.spatial()
    }

    pub fn node(&self, reference: RecordRef) -> Option<&Node> {
        match &self.get(reference)?.kind {
            RecordKind::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn geometry(&self, reference: RecordRef) -> Option<&Geometry> {
        match &self.get(reference)?.kind {
            RecordKind::Geometry(geometry) => Some(geometry),
            _ => None,
        }
    }

    pub fn geometry_data(&self, reference: RecordRef) -> Option<&GeometryData> {
        match &self.get(reference)?.kind {
            RecordKind::GeometryData(data) => Some(data),
            _ => None,
        }
    }

    pub fn property(&self, reference: RecordRef) -> Option<&Property> {
        match &self.get(reference)?.kind {
            RecordKind::Property(property) => Some(property),
            _ => None,
        }
    }

    pub fn source_texture(&self, reference: RecordRef) -> Option<&SourceTexture> {
        match &self.get(reference)?.kind {
            RecordKind::SourceTexture(texture) => Some(texture),
            _ => None,
        }
    }

    pub fn extra_data(&self, reference: RecordRef) -> Option<&ExtraData> {
        match &self.get(reference)?.kind {
            RecordKind::ExtraData(extra) => Some(extra),
            _ => None,
        }
    }

    pub fn controller(&self, reference: RecordRef) -> Option<&Controller> {
        match &self.get(reference)?.kind {
            RecordKind::Controller(controller) => Some(controller),
            _ => None,
        }
    }

    pub fn keyed_data(&self, reference: RecordRef) -> Option<&KeyedData> {
        match &self.get(reference)?.kind {
            RecordKind::KeyedData(data) => Some(data),
            _ => None,
        }
    }

    pub fn skin_instance(&self, reference: RecordRef) -> Option<&SkinInstance> {
        match &self.get(reference)?.kind {
            RecordKind::SkinInstance(skin) => Some(skin),
            _ => None,
        }
    }

    pub fn skin_data(&self, reference: RecordRef) -> Option<&SkinData> {
        match &self.get(reference)?.kind {
            RecordKind::SkinData(data) => Some(data),
            _ => None,
        }
    }

    pub fn skin_partition(&self, reference: RecordRef) -> Option<&SkinPartition> {
        match &self.get(reference)?.kind {
            RecordKind::SkinPartition(partition) => Some(partition),
            _ => None,
        }
    }

    /// Child references of a container node; empty for anything else.
    pub fn children(&self, reference: RecordRef) -> &[RecordRef] {
        self.node(reference)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Child index to parent index. When a record is listed by several
    /// nodes, the first listing wins.
    pub fn parent_map(&self) -> HashMap<usize, usize> {
        let mut parents = HashMap::new();
        for record in &self.records {
            if let RecordKind::Node(node) = &record.kind {
                for child in &node.children {
                    if let Some(child) = child.index().filter(|&i| i < self.records.len()) {
                        parents.entry(child).or_insert(record.index);
                    }
                }
            }
        }
        parents
    }

    /// Walk an extra-data chain from `head`. Stops at a missing link or a
    /// repeated record.
    pub fn extra_chain(&self, head: RecordRef) -> Vec<&ExtraData> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut current = head;
        while let Some(extra) = self.extra_data(current) {
            if !seen.insert(current) {
                break;
            }
            chain.push(extra);
            current = extra.next;
        }
        chain
    }

    /// Walk a controller chain from `head`, with the same stopping rules as
    /// [`RecordGraph::extra_chain`].
    pub fn controller_chain(&self, head: RecordRef) -> Vec<&Controller> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut current = head;
        while let Some(controller) = self.controller(current) {
            if !seen.insert(current) {
                break;
            }
            chain.push(controller);
            current = controller.base.next;
        }
        chain
    }
}

// ─── Decoder ──────────────────────────────────────────────────────────────────

const HEADER_PREFIXES: [&str; 2] = ["NetImmerse File Format", "Gamebryo File Format"];

/// Smallest possible record: a one-byte tag with its length prefix.
const MIN_RECORD_SIZE: usize = 5;

/// Decode a whole file into a record graph.
///
/// # Arguments
/// * `bytes` - Complete file contents.
///
/// # Returns
/// The record graph with exactly as many records as the header announces, or
/// the first fatal error. No partial graph is returned on failure.
pub fn decode(bytes: &[u8]) -> Result<DecodedFile, DecodeError> {
    let mut stream = NifStream::new(bytes);
    let header = stream.read_header_line()?;
    let version = parse_header_version(&header)?;
    if !version.is_supported() {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    stream.set_version(version);

    if version.is_oldest() {
        let redundant = stream.read_u32()?;
        if redundant != version.0 {
            return Err(DecodeError::malformed(format!(
                "version field {:#010x} disagrees with header version {version}",
                redundant
            )));
        }
    }

    let count = stream.read_u32()? as usize;
    let mut records = Vec::with_capacity(count.min(stream.remaining() / MIN_RECORD_SIZE));
    let mut issues = Vec::new();

    for index in 0..count {
        let tag = stream
            .read_tag()
            .map_err(|error| error.in_record(index, "<tag>"))?;
        log::debug!("record {index}: {tag} at byte {}", stream.position());
        let kind = read_record(&mut stream, &tag, &mut issues)
            .map_err(|error| error.in_record(index, &tag))?;
        records.push(Record { index, tag, kind });
    }

    let roots = if version.is_oldest() {
        let root_count = stream.read_u32()? as usize;
        let listed = stream.read_array(root_count, 4, NifStream::read_ref)?;
        listed
            .into_iter()
            .filter(|root| {
                let valid = root.index().is_some_and(|i| i < records.len());
                if !valid {
                    issues.push(ValidationIssue::warning(
                        DANGLING_REFERENCE,
                        format!("root index {} is outside the record array", root.0),
                    ));
                }
                valid
            })
            .collect()
    } else {
        derive_roots(&records)
    };

    log::info!(
        "decoded {} records ({} roots, version {version})",
        records.len(),
        roots.len()
    );

    Ok(DecodedFile {
        graph: RecordGraph {
            version,
            records,
            roots,
        },
        issues,
    })
}

/// Extract the packed version from a header line such as
/// `NetImmerse File Format, Version 4.0.0.2`.
fn parse_header_version(line: &str) -> Result<FormatVersion, DecodeError> {
    if !HEADER_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) {
        return Err(DecodeError::malformed(format!(
            "unrecognized product prefix in {line:?}"
        )));
    }
    let Some(position) = line.find("Version ") else {
        return Err(DecodeError::malformed("header line has no version string"));
    };
    let text = line[position + "Version ".len()..]
        .split_whitespace()
        .next()
        .unwrap_or_default();

    let mut parts = [0u8; 4];
    let components: Vec<&str> = text.split('.').collect();
    if text.is_empty() || components.len() > 4 {
        return Err(DecodeError::malformed(format!(
            "unparseable version string {text:?}"
        )));
    }
    for (slot, component) in parts.iter_mut().zip(&components) {
        *slot = component.parse().map_err(|_| {
            DecodeError::malformed(format!("unparseable version string {text:?}"))
        })?;
    }
    let [major, minor, patch, rev] = parts;
    Ok(FormatVersion::from_parts(major, minor, patch, rev))
}

const NODE_TAGS: [&str; 10] = [
    "NiNode",
    "NiBillboardNode",
    "AvoidNode",
    "NiBSAnimationNode",
    "NiBSParticleNode",
    "RootCollisionNode",
    "NiSwitchNode",
    "NiLODNode",
    "NiFltAnimationNode",
    "NiSortAdjustNode",
];

const PROPERTY_TAGS: [&str; 11] = [
    "NiMaterialProperty",
    "NiTexturingProperty",
    "NiAlphaProperty",
    "NiVertexColorProperty",
    "NiZBufferProperty",
    "NiStencilProperty",
    "NiFogProperty",
    "NiShadeProperty",
    "NiWireframeProperty",
    "NiDitherProperty",
    "NiSpecularProperty",
];

const DATA_TAGS: [&str; 6] = [
    "NiTriShapeData",
    "NiTriStripsData",
    "NiLinesData",
    "NiParticlesData",
    "NiAutoNormalParticlesData",
    "NiRotatingParticlesData",
];

const CONTROLLER_TAGS: [&str; 13] = [
    "NiKeyframeController",
    "NiVisController",
    "NiUVController",
    "NiAlphaController",
    "NiMaterialColorController",
    "NiRollController",
    "NiGeomMorpherController",
    "NiPathController",
    "NiLookAtController",
    "NiFlipController",
    "NiParticleSystemController",
    "NiBSPArrayController",
    // Shares the particle-system layout in this generation.
    "NiBSParticleSystemController",
];

const MODIFIER_TAGS: [&str; 7] = [
    "NiGravity",
    "NiParticleGrowFade",
    "NiParticleColorModifier",
    "NiParticleRotation",
    "NiPlanarCollider",
    "NiSphericalCollider",
    "NiParticleBomb",
];

const KEYED_DATA_TAGS: [&str; 7] = [
    "NiKeyframeData",
    "NiFloatData",
    "NiPosData",
    "NiColorData",
    "NiVisData",
    "NiUVData",
    "NiMorphData",
];

/// Dispatch one record body by tag.
fn read_record(
    stream: &mut NifStream,
    tag: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Result<RecordKind, DecodeError> {
    if let Some(variant) = GeometryVariant::from_tag(tag) {
        return Geometry::read(stream, variant).map(RecordKind::Geometry);
    }

    let kind = match tag {
        t if NODE_TAGS.contains(&t) => RecordKind::Node(Node::read(stream, tag)?),
        "NiCamera" => RecordKind::Camera(Camera::read(stream)?),
        "NiAmbientLight" | "NiDirectionalLight" | "NiPointLight" | "NiSpotLight" => {
            RecordKind::Light(Light::read(stream, tag)?)
        }
        "NiTextureEffect" => RecordKind::TextureEffect(TextureEffect::read(stream)?),
        t if DATA_TAGS.contains(&t) => RecordKind::GeometryData(GeometryData::read(stream, tag)?),
        t if PROPERTY_TAGS.contains(&t) => RecordKind::Property(Property::read(stream, tag)?),
        "NiSourceTexture" => RecordKind::SourceTexture(SourceTexture::read(stream)?),
        "NiPixelData" => RecordKind::PixelData(PixelData::read(stream)?),
        "NiPalette" => RecordKind::Palette(Palette::read(stream)?),
        t if CONTROLLER_TAGS.contains(&t) => RecordKind::Controller(Controller::read(stream, tag)?),
        t if MODIFIER_TAGS.contains(&t) => {
            RecordKind::ParticleModifier(ParticleModifier::read(stream, tag)?)
        }
        t if KEYED_DATA_TAGS.contains(&t) => RecordKind::KeyedData(KeyedData::read(stream, tag)?),
        "NiSkinInstance" => RecordKind::SkinInstance(SkinInstance::read(stream)?),
        "NiSkinData" => RecordKind::SkinData(SkinData::read(stream)?),
        "NiSkinPartition" => RecordKind::SkinPartition(SkinPartition::read(stream)?),
        "NiSequenceStreamHelper" => RecordKind::SequenceHelper(NamedObject::read(stream)?),
        t if t.ends_with("ExtraData") => {
            if !extra::is_known_extra_tag(t) {
                issues.push(ValidationIssue::warning(
                    UNKNOWN_EXTRA_DATA,
                    format!("skipped unrecognized extra data record {t}"),
                ));
            }
            RecordKind::ExtraData(ExtraData::read(stream, tag)?)
        }
        other => {
            return Err(DecodeError::corrupt(
                stream.position(),
                format!("unknown record tag {other:?}"),
            ));
        }
    };
    Ok(kind)
}

/// Spatial records that no node lists as a child, in array order.
fn derive_roots(records: &[Record]) -> Vec<RecordRef> {
    let mut listed = HashSet::new();
    for record in records {
        if let RecordKind::Node(node) = &record.kind {
            listed.extend(node.children.iter().filter_map(|child| child.index()));
        }
    }
    records
        .iter()
        .filter(|record| record.kind.spatial().is_some() && !listed.contains(&record.index))
        .map(|record| RecordRef::from_index(record.index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::count_code;
    use fixture::RecordWriter;

    #[test]
    fn given_two_node_file_when_decoding_then_count_and_roots_match() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 2);
        w.tag("NiNode").node("Scene Root", 0, &[1], &[]);
        w.tag("NiNode").node("Child", 0, &[], &[]);
        w.roots(&[0]);
        let decoded = decode(&w.into_bytes()).expect("decode");

        assert_eq!(decoded.graph.len(), 2);
        assert_eq!(decoded.graph.roots, vec![RecordRef(0)]);
        assert_eq!(decoded.graph.children(RecordRef(0)), &[RecordRef(1)]);
        assert!(decoded.issues.is_empty());
        for (position, record) in decoded.graph.records.iter().enumerate() {
            assert_eq!(record.index, position);
        }
    }

    #[test]
    fn given_tag_length_above_limit_when_decoding_then_corrupt_format_is_returned() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 1);
        w.u32(70_000);
        w.raw(&[b'N'; 64]);
        let error = decode(&w.into_bytes()).expect_err("oversized tag");

        assert!(matches!(error, DecodeError::CorruptFormat { .. }));
    }

    #[test]
    fn given_unknown_extra_data_when_decoding_then_payload_is_skipped_and_decoding_continues() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 2);
        w.tag("NiFancyExtraData");
        w.reference(-1).u32(12).raw(&[0xAB; 12]);
        w.tag("NiNode").node("After", 0, &[], &[]);
        w.roots(&[1]);
        let decoded = decode(&w.into_bytes()).expect("decode");

        assert_eq!(decoded.graph.len(), 2);
        assert_eq!(count_code(&decoded.issues, UNKNOWN_EXTRA_DATA), 1);
        let after = decoded.graph.node(RecordRef(1)).expect("node after blob");
        assert_eq!(after.spatial.name(), "After");
    }

    #[test]
    fn given_unknown_tag_when_decoding_then_corrupt_format_names_the_record() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 1);
        w.tag("NiMysteryBlob").u32(0);
        let error = decode(&w.into_bytes()).expect_err("unknown tag");

        let DecodeError::CorruptFormat { reason, .. } = error else {
            panic!("expected corrupt format");
        };
        assert!(reason.contains("record 0"));
        assert!(reason.contains("NiMysteryBlob"));
    }

    #[test]
    fn given_mismatched_redundant_version_when_decoding_then_header_is_malformed() {
        let mut bytes = b"NetImmerse File Format, Version 4.0.0.2\n".to_vec();
        bytes.extend_from_slice(&0x0401_0000u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let error = decode(&bytes).expect_err("mismatch");

        assert!(matches!(error, DecodeError::MalformedHeader { .. }));
    }

    #[test]
    fn given_newer_unsupported_version_when_decoding_then_version_is_reported() {
        let bytes = b"Gamebryo File Format, Version 20.0.0.5\n";
        let error = decode(bytes).expect_err("unsupported");

        assert_eq!(
            error,
            DecodeError::UnsupportedVersion {
                version: FormatVersion::from_parts(20, 0, 0, 5)
            }
        );
    }

    #[test]
    fn given_foreign_prefix_when_decoding_then_header_is_malformed() {
        let error = decode(b"glTF binary, Version 2.0\n").expect_err("foreign");
        assert!(matches!(error, DecodeError::MalformedHeader { .. }));
    }

    #[test]
    fn given_short_version_string_when_parsing_then_missing_parts_are_zero() {
        let version = parse_header_version("NetImmerse File Format, Version 4.1").expect("version");
        assert_eq!(version, FormatVersion::from_parts(4, 1, 0, 0));
    }

    #[test]
    fn given_newer_version_without_root_list_when_decoding_then_roots_are_derived() {
        let version = FormatVersion::from_parts(4, 2, 2, 0);
        let mut w = RecordWriter::file(version, 3);
        w.tag("NiNode").node("Root", 0, &[2], &[]);
        w.tag("NiNode").node("Detached", 0, &[], &[]);
        w.tag("NiNode").node("Leaf", 0, &[], &[]);
        let decoded = decode(&w.into_bytes()).expect("decode");

        assert_eq!(decoded.graph.roots, vec![RecordRef(0), RecordRef(1)]);
    }

    #[test]
    fn given_truncated_record_when_decoding_then_no_partial_graph_escapes() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 2);
        w.tag("NiNode").node("Only", 0, &[], &[]);
        let error = decode(&w.into_bytes()).expect_err("missing second record");

        assert!(matches!(error, DecodeError::CorruptFormat { .. }));
    }

    #[test]
    fn given_out_of_range_reference_when_resolving_then_it_is_absent() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 1);
        w.tag("NiNode").node("Root", 0, &[7], &[]);
        w.roots(&[0, 9]);
        let decoded = decode(&w.into_bytes()).expect("decode");

        assert!(decoded.graph.get(RecordRef(7)).is_none());
        assert!(decoded.graph.get(RecordRef::NONE).is_none());
        assert_eq!(decoded.graph.roots, vec![RecordRef(0)]);
        assert_eq!(count_code(&decoded.issues, DANGLING_REFERENCE), 1);
    }

    #[test]
    fn given_looping_extra_chain_when_walking_then_each_link_is_visited_once() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 2);
        w.tag("NiStringExtraData").reference(1).u32(8).string("a");
        w.tag("NiStringExtraData").reference(0).u32(8).string("b");
        w.roots(&[]);
        let decoded = decode(&w.into_bytes()).expect("decode");

        assert_eq!(decoded.graph.extra_chain(RecordRef(0)).len(), 2);
    }
}
