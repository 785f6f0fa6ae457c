use nalgebra::{Matrix3, Rotation3, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::issue::ValidationIssue;
use crate::records::{FloatKeyMap, LodRange, QuaternionKeyMap, TextureSlot, Transform};
use crate::records::{KeyMap, Vector3KeyMap};
use crate::stream::FormatVersion;

// ─── Options ──────────────────────────────────────────────────────────────────

/// Conversion options shared by the library, the pipeline and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Logical folder prepended to texture paths that lack it.
    pub texture_prefix: String,
    /// Collect triangle geometry for the physics body.
    pub build_collision: bool,
    /// Leave meshes of hidden nodes out of the rendered mesh list. The nodes
    /// themselves always stay in the hierarchy.
    pub skip_hidden_meshes: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            texture_prefix: "textures/".to_string(),
            build_collision: true,
            skip_hidden_meshes: false,
        }
    }
}

// ─── Scene hierarchy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SceneNodeKind {
    Group,
    Billboard,
    /// Subtree supplies collision triangles only.
    CollisionRoot,
    Switch {
        initial_index: u32,
    },
    Lod {
        center: Vector3<f32>,
        ranges: Vec<LodRange>,
    },
    Geometry,
    Particles,
    Camera,
    Light,
    Effect,
}

/// One runtime node per reachable spatial record.
#[derive(Debug, Clone, Serialize)]
pub struct SceneNode {
    /// Index of the source record.
    pub record: usize,
    pub name: String,
    pub kind: SceneNodeKind,
    pub hidden: bool,
    /// Target-space transform relative to the parent.
    pub local: Transform,
    /// Target-space transform relative to the model root.
    pub world: Transform,
    pub parent: Option<usize>,
    /// Indices into [`Scene::nodes`], in encoded order.
    pub children: Vec<usize>,
    /// Indices into [`Scene::meshes`].
    pub meshes: Vec<usize>,
    pub particles: Option<ParticleSystem>,
}

// ─── Meshes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrimitiveTopology {
    Triangles,
    Lines,
}

/// Target-space vertex arrays in the owning node's local frame.
#[derive(Debug, Clone, Serialize)]
pub struct Mesh {
    pub name: String,
    /// Index into [`Scene::nodes`].
    pub node: usize,
    /// Geometry record this mesh came from.
    pub record: usize,
    pub topology: PrimitiveTopology,
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uv_sets: Vec<Vec<Vector2<f32>>>,
    pub colors: Vec<Vector4<f32>>,
    /// Target winding for triangles, vertex pairs for lines.
    pub indices: Vec<u32>,
    pub material: Option<usize>,
    /// Skin-instance record, when the mesh is skinned.
    pub skin: Option<usize>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        match self.topology {
            PrimitiveTopology::Triangles => self.indices.len() / 3,
            PrimitiveTopology::Lines => 0,
        }
    }
}

/// Particle geometry is summarized rather than meshed.
#[derive(Debug, Clone, Serialize)]
pub struct ParticleSystem {
    pub max_particles: usize,
    pub active_particles: u16,
    pub radius: f32,
    pub birth_rate: Option<f32>,
    pub lifetime: Option<f32>,
    pub emitter: Option<usize>,
    pub material: Option<usize>,
}

// ─── Materials ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AlphaMode {
    Opaque,
    Translucent,
    AlphaScissor { cutoff: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VertexColorMode {
    Ignore,
    Emissive,
    AmbientDiffuse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TextureSource {
    /// Logical path such as `textures/tx_wood.dds`.
    File(String),
    /// Pixel-data record embedded in the file.
    Embedded { pixel_data: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextureRef {
    pub slot: TextureSlot,
    pub source: TextureSource,
    pub uv_set: u32,
    pub clamp: u32,
    pub filter: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Material {
    pub name: String,
    pub ambient: Vector3<f32>,
    pub diffuse: Vector3<f32>,
    pub specular: Vector3<f32>,
    pub emissive: Vector3<f32>,
    pub glossiness: f32,
    pub alpha: f32,
    pub alpha_mode: AlphaMode,
    pub vertex_colors: VertexColorMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub double_sided: bool,
    pub wireframe: bool,
    pub specular_enabled: bool,
    pub texture: Option<TextureRef>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            ambient: Vector3::new(1.0, 1.0, 1.0),
            diffuse: Vector3::new(1.0, 1.0, 1.0),
            specular: Vector3::zeros(),
            emissive: Vector3::zeros(),
            glossiness: 0.0,
            alpha: 1.0,
            alpha_mode: AlphaMode::Opaque,
            vertex_colors: VertexColorMode::AmbientDiffuse,
            depth_test: true,
            depth_write: true,
            double_sided: false,
            wireframe: false,
            specular_enabled: false,
            texture: None,
        }
    }
}

// ─── Collision ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CollisionSource {
    /// No collision geometry was collected.
    #[default]
    None,
    /// Triangles came from a dedicated collision subtree.
    CollisionRoot,
    /// Triangles came from the rendered meshes.
    RenderMeshes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollisionBox {
    pub center: Vector3<f32>,
    pub half_extents: Vector3<f32>,
    pub rotation: Matrix3<f32>,
    /// Node that declared the box.
    pub node: usize,
}

/// Model-space target-frame collision triangles plus explicit boxes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollisionGeometry {
    pub source: CollisionSource,
    pub vertices: Vec<Vector3<f32>>,
    pub indices: Vec<u32>,
    pub boxes: Vec<CollisionBox>,
}

impl CollisionGeometry {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty() && self.boxes.is_empty()
    }
}

// ─── Scene ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Scene {
    pub version: FormatVersion,
    pub nodes: Vec<SceneNode>,
    /// Indices into [`Scene::nodes`].
    pub roots: Vec<usize>,
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub collision: CollisionGeometry,
    pub issues: Vec<ValidationIssue>,
}

impl Scene {
    /// Scene node built from `record`, if it was reachable.
    pub fn node_for_record(&self, record: usize) -> Option<&SceneNode> {
        self.nodes.iter().find(|node| node.record == record)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&SceneNode> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

// ─── Skeleton ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Bone {
    pub name: String,
    /// Bone node record, `None` for placeholders.
    pub record: Option<usize>,
    /// Index into [`Skeleton::bones`].
    pub parent: Option<usize>,
    /// Target-space bind pose in the skinned mesh's frame.
    pub rest_pose: Transform,
    /// Bind pose relative to the parent bone (equal to `rest_pose` for roots).
    pub local_rest_pose: Transform,
}

#[derive(Debug, Clone, Serialize)]
pub struct Skeleton {
    pub skin_instance: usize,
    pub root: Option<usize>,
    pub bones: Vec<Bone>,
    pub issues: Vec<ValidationIssue>,
}

/// Four bone slots per vertex.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SkinWeights {
    pub indices: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
    pub issues: Vec<ValidationIssue>,
}

// ─── Animation ────────────────────────────────────────────────────────────────

/// Composition order of separated Euler curves, outermost first: `Xzy` is
/// `Rx(x) · Rz(z) · Ry(y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EulerOrder {
    Xyz,
    Xzy,
}

impl EulerOrder {
    /// Rotation matrix for `[x, y, z]` angles in radians.
    pub fn compose(self, angles: [f32; 3]) -> Matrix3<f32> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), angles[0]);
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), angles[1]);
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), angles[2]);
        let rotation = match self {
            EulerOrder::Xyz => rx * ry * rz,
            EulerOrder::Xzy => rx * rz * ry,
        };
        rotation.into_inner()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RotationCurve {
    Quaternion(QuaternionKeyMap),
    /// Target-axis X, Y and Z Euler curves.
    Euler {
        order: EulerOrder,
        axes: [FloatKeyMap; 3],
    },
}

/// Keyed motion of one named node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoneTrack {
    pub target: String,
    pub record: usize,
    pub translation: Vector3KeyMap,
    pub rotation: RotationCurve,
    pub scale: KeyMap<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationClip {
    pub name: String,
    /// Source time of the first frame; track keys are rebased to it.
    pub start: f32,
    pub stop: f32,
    pub tracks: Vec<BoneTrack>,
}

impl AnimationClip {
    pub fn duration(&self) -> f32 {
        (self.stop - self.start).max(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnimationSet {
    pub clips: Vec<AnimationClip>,
    pub issues: Vec<ValidationIssue>,
}
