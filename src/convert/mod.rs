//! Record graph to runtime scene conversion.

mod animation;
pub mod coords;
mod geometry;
mod material;
mod skeleton;
mod skinning;
mod types;

use std::collections::HashMap;

use nalgebra::{Matrix3, Vector3};

pub use animation::{DEFAULT_CLIP, extract_animations};
pub use geometry::{bounds, expand_lines, expand_strips, expand_triangles, reverse_winding};
pub use material::{alpha_mode, resolve_texture_path};
pub use skeleton::build_skeleton;
pub use skinning::skin_weights;
pub use types::*;

use coords::{convert_normal, convert_transform, convert_vector};
use geometry::build_mesh;
use material::{PropertySet, build_material};

use crate::issue::{DANGLING_REFERENCE, SHARED_NODE, ValidationIssue};
use crate::records::{
    BoundingVolume, ControllerKind, Geometry, NodeVariant, Primitives, RecordGraph, RecordKind,
    RecordRef, SpatialNode, Transform,
};

// ─── Walk state ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct TriangleBuffer {
    vertices: Vec<Vector3<f32>>,
    indices: Vec<u32>,
}

impl TriangleBuffer {
    fn append(&mut self, mesh: &Mesh, world: &Transform) {
        if mesh.topology != PrimitiveTopology::Triangles {
            return;
        }
        let base = self.vertices.len() as u32;
        self.vertices
            .extend(mesh.positions.iter().map(|p| world.apply_point(p)));
        self.indices.extend(mesh.indices.iter().map(|i| base + i));
    }
}

enum Step {
    Enter {
        reference: RecordRef,
        parent: Option<usize>,
        parent_world: Transform,
        in_collision: bool,
    },
    /// Pops the properties pushed when the matching node was entered.
    Leave,
}

struct Entered<'g> {
    index: usize,
    world: Transform,
    in_collision: bool,
    children: &'g [RecordRef],
}

struct SceneBuilder<'g> {
    graph: &'g RecordGraph,
    options: &'g ConvertOptions,
    nodes: Vec<SceneNode>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    material_by_key: HashMap<Vec<(&'static str, usize)>, usize>,
    /// Record index to scene node index.
    converted: HashMap<usize, usize>,
    /// Property lists from the root down to the node being visited.
    property_stack: Vec<&'g [RecordRef]>,
    collision_roots: usize,
    collision_buffer: TriangleBuffer,
    render_buffer: TriangleBuffer,
    boxes: Vec<CollisionBox>,
    issues: Vec<ValidationIssue>,
}

impl<'g> SceneBuilder<'g> {
    fn new(graph: &'g RecordGraph, options: &'g ConvertOptions) -> Self {
        Self {
            graph,
            options,
            nodes: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            material_by_key: HashMap::new(),
            converted: HashMap::new(),
            property_stack: Vec::new(),
            collision_roots: 0,
            collision_buffer: TriangleBuffer::default(),
            render_buffer: TriangleBuffer::default(),
            boxes: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// Convert the tree under `root` depth-first with an explicit work stack,
    /// so hierarchy depth is bounded only by memory. Returns the root's node
    /// index, or `None` when it is not a spatial record or was already
    /// converted.
    fn visit(&mut self, root: RecordRef) -> Option<usize> {
        let mut steps = vec![Step::Enter {
            reference: root,
            parent: None,
            parent_world: Transform::IDENTITY,
            in_collision: false,
        }];
        let mut root_index = None;
        while let Some(step) = steps.pop() {
            let Step::Enter {
                reference,
                parent,
                parent_world,
                in_collision,
            } = step
            else {
                self.property_stack.pop();
                continue;
            };
            let Some(entered) = self.enter(reference, parent, &parent_world, in_collision) else {
                continue;
            };
            if parent.is_none() {
                root_index = Some(entered.index);
            }
            steps.push(Step::Leave);
            steps.extend(
                entered
                    .children
                    .iter()
                    .rev()
                    .filter(|child| !child.is_none())
                    .map(|&child| Step::Enter {
                        reference: child,
                        parent: Some(entered.index),
                        parent_world: entered.world,
                        in_collision: entered.in_collision,
                    }),
            );
        }
        root_index
    }

    /// Create the scene node for `reference`, push its properties and
    /// convert its own geometry. Children are left to the caller.
    fn enter(
        &mut self,
        reference: RecordRef,
        parent: Option<usize>,
        parent_world: &Transform,
        in_collision: bool,
    ) -> Option<Entered<'g>> {
        let graph = self.graph;
        let Some(record) = graph.get(reference) else {
            self.issues.push(ValidationIssue::warning(
                DANGLING_REFERENCE,
                format!("child reference {} is out of range", reference.0),
            ));
            return None;
        };
        let Some(spatial) = record.kind.spatial() else {
            self.issues.push(ValidationIssue::warning(
                DANGLING_REFERENCE,
                format!(
                    "child reference {} names a {} which is not a scene object",
                    reference.0, record.tag
                ),
            ));
            return None;
        };
        if let Some(&existing) = self.converted.get(&record.index) {
            self.issues.push(ValidationIssue::info(
                SHARED_NODE,
                format!(
                    "record {} ('{}') is reached again, keeping the first occurrence as node {existing}",
                    record.index,
                    spatial.name()
                ),
            ));
            return None;
        }

        let local = convert_transform(&spatial.transform);
        let world = parent_world.compose(&local);
        let kind = match &record.kind {
            RecordKind::Node(node) => match &node.variant {
                NodeVariant::Billboard => SceneNodeKind::Billboard,
                NodeVariant::RootCollision => SceneNodeKind::CollisionRoot,
                NodeVariant::Switch { initial_index } => SceneNodeKind::Switch {
                    initial_index: *initial_index,
                },
                NodeVariant::Lod { center, ranges, .. } => SceneNodeKind::Lod {
                    center: convert_vector(center),
                    ranges: ranges.clone(),
                },
                _ => SceneNodeKind::Group,
            },
            RecordKind::Geometry(geometry) if geometry.variant.is_particles() => {
                SceneNodeKind::Particles
            }
            RecordKind::Geometry(_) => SceneNodeKind::Geometry,
            RecordKind::Camera(_) => SceneNodeKind::Camera,
            RecordKind::Light(_) => SceneNodeKind::Light,
            _ => SceneNodeKind::Effect,
        };
        let in_collision = in_collision || kind == SceneNodeKind::CollisionRoot;
        if kind == SceneNodeKind::CollisionRoot {
            self.collision_roots += 1;
        }

        let index = self.nodes.len();
        self.converted.insert(record.index, index);
        self.nodes.push(SceneNode {
            record: record.index,
            name: spatial.name().to_string(),
            kind,
            hidden: spatial.is_hidden(),
            local,
            world,
            parent,
            children: Vec::new(),
            meshes: Vec::new(),
            particles: None,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }

        self.property_stack.push(&spatial.properties);
        self.collect_box(spatial, &world, index);
        let children: &'g [RecordRef] = match &record.kind {
            RecordKind::Geometry(geometry) => {
                self.convert_geometry(record.index, geometry, index, &world, in_collision);
                &[]
            }
            RecordKind::Node(node) => &node.children,
            _ => &[],
        };

        Some(Entered {
            index,
            world,
            in_collision,
            children,
        })
    }

    /// Effective material for the current property stack, shared between
    /// meshes resolving to the same property records.
    fn material_for_stack(&mut self) -> Option<usize> {
        let lists: Vec<&[RecordRef]> = self.property_stack.iter().rev().copied().collect();
        let properties = PropertySet::resolve(self.graph, &lists, &mut self.issues);
        if properties.is_empty() {
            return None;
        }
        let key = properties.key();
        if let Some(&existing) = self.material_by_key.get(&key) {
            return Some(existing);
        }
        let material = build_material(
            self.graph,
            &properties,
            &self.options.texture_prefix,
            &mut self.issues,
        );
        let index = self.materials.len();
        self.materials.push(material);
        self.material_by_key.insert(key, index);
        Some(index)
    }

    fn convert_geometry(
        &mut self,
        record: usize,
        geometry: &Geometry,
        node: usize,
        world: &Transform,
        in_collision: bool,
    ) {
        let graph = self.graph;
        let Some(data) = graph.geometry_data(geometry.data) else {
            self.issues.push(ValidationIssue::warning(
                DANGLING_REFERENCE,
                format!(
                    "geometry '{}' (record {record}) points at {} which is not geometry data",
                    geometry.spatial.name(),
                    geometry.data.0
                ),
            ));
            return;
        };

        if let Primitives::Particles {
            particle_count,
            radius,
            active_count,
            ..
        } = &data.primitives
        {
            let emitter = graph
                .controller_chain(geometry.spatial.base.controller)
                .into_iter()
                .find_map(|controller| match &controller.kind {
                    ControllerKind::ParticleSystem(system) => Some(system),
                    _ => None,
                });
            let material = self.material_for_stack();
            self.nodes[node].particles = Some(ParticleSystem {
                max_particles: usize::from(*particle_count),
                active_particles: *active_count,
                radius: *radius,
                birth_rate: emitter.map(|system| system.birth_rate),
                lifetime: emitter.map(|system| system.lifetime),
                emitter: emitter.and_then(|system| system.emitter.index()),
                material,
            });
            return;
        }

        let Some(mut mesh) = build_mesh(record, geometry, data, node, &mut self.issues) else {
            return;
        };

        if in_collision {
            self.collision_buffer.append(&mesh, world);
            return;
        }

        mesh.material = self.material_for_stack();
        if graph.skin_instance(geometry.skin).is_some() {
            mesh.skin = geometry.skin.index();
        } else if !geometry.skin.is_none() {
            self.issues.push(ValidationIssue::warning(
                DANGLING_REFERENCE,
                format!(
                    "geometry '{}' (record {record}) skin reference {} is not a skin instance",
                    geometry.spatial.name(),
                    geometry.skin.0
                ),
            ));
        }
        self.render_buffer.append(&mesh, world);

        if geometry.spatial.is_hidden() && self.options.skip_hidden_meshes {
            return;
        }
        let mesh_index = self.meshes.len();
        self.meshes.push(mesh);
        self.nodes[node].meshes.push(mesh_index);
    }

    /// Explicit box for nodes flagged with bounding-box collision.
    fn collect_box(&mut self, spatial: &SpatialNode, world: &Transform, node: usize) {
        if !spatial.has_bbox_collision() {
            return;
        }
        let Some(BoundingVolume::Box {
            center,
            axes,
            extents,
        }) = &spatial.bounds
        else {
            return;
        };
        let axes = Matrix3::from_columns(&(*axes).map(|axis| convert_normal(&axis)));
        self.boxes.push(CollisionBox {
            center: world.apply_point(&convert_vector(center)),
            half_extents: extents * (world.scale / coords::UNITS_PER_METRE),
            rotation: world.rotation * axes,
            node,
        });
    }

    fn finish(self) -> Scene {
        let collision = if !self.options.build_collision {
            CollisionGeometry::default()
        } else {
            let (source, buffer) = if self.collision_roots > 0 {
                (CollisionSource::CollisionRoot, self.collision_buffer)
            } else if !self.render_buffer.indices.is_empty() {
                (CollisionSource::RenderMeshes, self.render_buffer)
            } else {
                (CollisionSource::None, TriangleBuffer::default())
            };
            CollisionGeometry {
                source,
                vertices: buffer.vertices,
                indices: buffer.indices,
                boxes: self.boxes,
            }
        };

        Scene {
            version: self.graph.version,
            roots: Vec::new(),
            nodes: self.nodes,
            meshes: self.meshes,
            materials: self.materials,
            collision,
            issues: self.issues,
        }
    }
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Convert a decoded record graph into a target-space scene.
///
/// Every spatial record reachable from a root becomes one [`SceneNode`].
/// Meshes stay in their node's local frame; collision triangles are
/// accumulated in the model frame.
///
/// # Arguments
///
/// * `graph` - Decoded record graph.
/// * `options` - Texture prefix and collision switches.
pub fn convert_scene(graph: &RecordGraph, options: &ConvertOptions) -> Scene {
    let mut builder = SceneBuilder::new(graph, options);
    let mut roots = Vec::with_capacity(graph.roots.len());
    for &root in &graph.roots {
        if let Some(index) = builder.visit(root) {
            roots.push(index);
        }
    }

    let mut scene = builder.finish();
    scene.roots = roots;
    log::info!(
        "converted scene: {} nodes, {} meshes, {} materials, {} collision triangles",
        scene.nodes.len(),
        scene.meshes.len(),
        scene.materials.len(),
        scene.collision.indices.len() / 3
    );
    scene
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::count_code;
    use crate::records::fixture::RecordWriter;
    use crate::records::{ALPHA_BLEND, ALPHA_TEST, FLAG_HIDDEN, decode};
    use crate::stream::FormatVersion;

    const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [70.0, 0.0, 0.0], [0.0, 70.0, 0.0]];

    fn convert(bytes: &[u8]) -> Scene {
        let decoded = decode(bytes).expect("decode");
        convert_scene(&decoded.graph, &ConvertOptions::default())
    }

    #[test]
    fn given_single_triangle_when_converting_then_indices_are_rewound() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 3);
        w.tag("NiNode").node("Root", 0, &[1], &[]);
        w.tag("NiTriShape").tri_shape("Tri", 0, 2, -1, &[]);
        w.tag("NiTriShapeData").tri_shape_data(&TRIANGLE, None, None, &[[0, 1, 2]]);
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        assert_eq!(scene.nodes.len(), 2);
        assert_eq!(scene.roots, vec![0]);
        assert_eq!(scene.nodes[0].children, vec![1]);
        assert_eq!(scene.meshes.len(), 1);
        let mesh = &scene.meshes[0];
        assert_eq!(mesh.indices, vec![0, 2, 1]);
        assert!((mesh.positions[2] - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-6);
        assert_eq!(mesh.material, None);
        assert_eq!(scene.collision.source, CollisionSource::RenderMeshes);
        assert_eq!(scene.collision.indices.len(), 3);
    }

    #[test]
    fn given_properties_on_ancestor_and_geometry_when_converting_then_nearest_wins_per_kind() {
        // 0 root (material 3, alpha 4), 1 shape (alpha 5), 2 data
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 6);
        w.tag("NiNode").node("Root", 0, &[1], &[3, 4]);
        w.tag("NiTriShape").tri_shape("Leaf", 0, 2, -1, &[5]);
        w.tag("NiTriShapeData").tri_shape_data(&TRIANGLE, None, None, &[[0, 1, 2]]);
        w.tag("NiMaterialProperty").material_property("Bark", [0.5, 0.25, 0.0], 0.75);
        w.tag("NiAlphaProperty").alpha_property(ALPHA_BLEND, 0);
        w.tag("NiAlphaProperty").alpha_property(ALPHA_TEST | ALPHA_BLEND, 51);
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        let material = &scene.materials[scene.meshes[0].material.expect("material")];
        assert_eq!(material.name, "Bark");
        assert_eq!(material.diffuse, Vector3::new(0.5, 0.25, 0.0));
        assert_eq!(material.alpha, 0.75);
        assert_eq!(material.alpha_mode, AlphaMode::AlphaScissor { cutoff: 0.2 });
    }

    #[test]
    fn given_external_base_texture_when_converting_then_binding_uses_logical_path() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 5);
        w.tag("NiNode").node("Root", 0, &[1], &[]);
        w.tag("NiTriShape").tri_shape("Floor", 0, 2, -1, &[3]);
        w.tag("NiTriShapeData").tri_shape_data(
            &TRIANGLE,
            None,
            Some(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]),
            &[[0, 1, 2]],
        );
        w.tag("NiTexturingProperty").texturing_base(4);
        w.tag("NiSourceTexture").source_texture_external("Tx\\Floor_Wood.DDS");
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        let mesh = &scene.meshes[0];
        assert_eq!(mesh.uv_sets.len(), 1);
        let texture = scene.materials[mesh.material.expect("material")]
            .texture
            .as_ref()
            .expect("texture");
        assert_eq!(
            texture.source,
            TextureSource::File("textures/tx/floor_wood.dds".to_string())
        );
    }

    #[test]
    fn given_very_deep_node_chain_when_converting_then_every_level_is_kept() {
        const DEPTH: usize = 50_000;
        let mut w = RecordWriter::file(FormatVersion::OLDEST, DEPTH as u32);
        for level in 0..DEPTH {
            let children: &[i32] = if level + 1 < DEPTH { &[level as i32 + 1] } else { &[] };
            w.tag("NiNode").node_at("Link", 0, [70.0, 0.0, 0.0], children, &[]);
        }
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        assert_eq!(scene.nodes.len(), DEPTH);
        assert_eq!(scene.roots, vec![0]);
        let leaf = &scene.nodes[DEPTH - 1];
        assert_eq!(leaf.parent, Some(DEPTH - 2));
        assert!((leaf.world.translation.x - DEPTH as f32).abs() < 1.0);
    }

    #[test]
    fn given_shared_child_when_converting_then_it_is_converted_once() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 2);
        w.tag("NiNode").node("Root", 0, &[1, 1], &[]);
        w.tag("NiNode").node("Shared", 0, &[0], &[]);
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        assert_eq!(scene.nodes.len(), 2);
        assert_eq!(scene.nodes[0].children, vec![1]);
        assert_eq!(count_code(&scene.issues, SHARED_NODE), 2);
    }

    #[test]
    fn given_hidden_and_translated_nodes_when_converting_then_world_transforms_compose() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 2);
        w.tag("NiNode").node_at("Root", 0, [70.0, 0.0, 0.0], &[1], &[]);
        w.tag("NiNode").node_at("Hidden", FLAG_HIDDEN, [0.0, 70.0, 0.0], &[], &[]);
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        let hidden = scene.node_by_name("Hidden").expect("node");
        assert!(hidden.hidden);
        assert!((hidden.world.translation - Vector3::new(1.0, 0.0, -1.0)).norm() < 1e-6);
        assert_eq!(hidden.parent, Some(0));
    }

    #[test]
    fn given_collision_root_when_converting_then_its_meshes_only_feed_collision() {
        // 0 root, 1 visible shape, 2 collision root, 3 collision shape, 4 data
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 5);
        w.tag("NiNode").node("Root", 0, &[1, 2], &[]);
        w.tag("NiTriShape").tri_shape("Visible", 0, 4, -1, &[]);
        w.tag("RootCollisionNode").node("Collision", 0, &[3], &[]);
        w.tag("NiTriShape").tri_shape("Hull", 0, 4, -1, &[]);
        w.tag("NiTriShapeData").tri_shape_data(&TRIANGLE, None, None, &[[0, 1, 2]]);
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        assert_eq!(scene.meshes.len(), 1);
        assert_eq!(scene.meshes[0].name, "Visible");
        assert_eq!(scene.collision.source, CollisionSource::CollisionRoot);
        assert_eq!(scene.collision.indices, vec![0, 2, 1]);
        assert_eq!(
            scene.node_by_name("Collision").map(|node| &node.kind),
            Some(&SceneNodeKind::CollisionRoot)
        );
    }

    #[test]
    fn given_triangle_strip_when_converting_then_mesh_is_a_triangle_list() {
        let mut w = RecordWriter::file(FormatVersion::OLDEST, 3);
        w.tag("NiNode").node("Root", 0, &[1], &[]);
        w.tag("NiTriStrips").tri_shape("Strip", 0, 2, -1, &[]);
        w.tag("NiTriStripsData").tri_strips_data(
            &[[0.0, 0.0, 0.0], [0.0, 70.0, 0.0], [70.0, 0.0, 0.0], [70.0, 70.0, 0.0]],
            &[&[0, 1, 2, 3]],
        );
        w.roots(&[0]);
        let scene = convert(&w.into_bytes());

        assert_eq!(scene.meshes[0].triangle_count(), 2);
        assert_eq!(scene.meshes[0].indices, vec![0, 2, 1, 1, 2, 3]);
    }
}
