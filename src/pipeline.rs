//! Decode-and-convert orchestration, single-shot or on a worker pool.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};

use crate::collision::{InferenceOptions, ShapeDescriptor, ShapeOverrides, infer_shape};
use crate::convert::{
    AnimationSet, ConvertOptions, Scene, Skeleton, SkinWeights, build_skeleton, convert_scene,
    extract_animations, skin_weights,
};
use crate::error::DecodeError;
use crate::issue::ValidationIssue;
use crate::logging::ResultExt;
use crate::records::{RecordRef, decode};
use crate::simplify::{MeshArrays, SimplifyTarget, simplify, weld_vertices};
use crate::stream::FormatVersion;

// ─── Options and output ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub convert: ConvertOptions,
    /// Decimate every unskinned triangle mesh to this target.
    pub simplify: Option<SimplifyTarget>,
    /// Weld duplicate vertices within this distance before decimating.
    pub weld_threshold: Option<f32>,
    pub overrides: ShapeOverrides,
    pub inference: InferenceOptions,
}

/// Skeleton and weights for one skinned mesh.
#[derive(Debug, Clone, Serialize)]
pub struct RiggedMesh {
    /// Index into [`Scene::meshes`].
    pub mesh: usize,
    pub skeleton: Skeleton,
    pub weights: SkinWeights,
}

/// Everything produced from one model file.
#[derive(Debug, Clone, Serialize)]
pub struct ModelOutput {
    pub identifier: String,
    pub version: FormatVersion,
    pub record_count: usize,
    pub scene: Scene,
    pub rigs: Vec<RiggedMesh>,
    pub animations: AnimationSet,
    /// `None` when the model has no collision triangles.
    pub collision_shape: Option<ShapeDescriptor>,
    /// Meshes replaced by their decimated form.
    pub simplified_meshes: usize,
    /// Decode, scene, rig and animation issues in that order.
    pub issues: Vec<ValidationIssue>,
}

// ─── Single model ─────────────────────────────────────────────────────────────

/// Decimate unskinned triangle meshes in place. Skinned meshes keep their
/// vertex order so weights stay aligned.
fn simplify_meshes(scene: &mut Scene, target: SimplifyTarget, weld_threshold: Option<f32>) -> usize {
    let mut simplified = 0;
    for mesh in scene.meshes.iter_mut().filter(|mesh| mesh.skin.is_none()) {
        let Some(mut arrays) = MeshArrays::from_mesh(mesh) else {
            continue;
        };
        if let Some(threshold) = weld_threshold {
            arrays = weld_vertices(&arrays, threshold);
        }
        let result = simplify(&arrays, target);
        if result.collapses == 0 && weld_threshold.is_none() {
            continue;
        }
        mesh.positions = result.mesh.positions;
        mesh.normals = result.mesh.normals;
        mesh.uv_sets = result.mesh.uv_sets;
        mesh.colors = result.mesh.colors;
        mesh.indices = result.mesh.indices;
        simplified += 1;
    }
    simplified
}

/// Run the full chain on one file: decode, scene conversion, one rig per
/// skinned mesh, animation clips, collision shape and optional decimation.
///
/// # Arguments
///
/// * `identifier` - Model path, used for shape overrides and logging.
/// * `bytes` - Complete file contents.
/// * `options` - Conversion, decimation and collision settings.
///
/// # Returns
///
/// The model output, or the fatal decode error.
pub fn decode_and_convert(
    identifier: &str,
    bytes: &[u8],
    options: &PipelineOptions,
) -> Result<ModelOutput, DecodeError> {
    let decoded = decode(bytes)?;
    let graph = &decoded.graph;

    let mut scene = convert_scene(graph, &options.convert);

    let rigs: Vec<RiggedMesh> = scene
        .meshes
        .iter()
        .enumerate()
        .filter_map(|(index, mesh)| {
            let skin = RecordRef::from_index(mesh.skin?);
            Some(RiggedMesh {
                mesh: index,
                skeleton: build_skeleton(graph, skin),
                weights: skin_weights(graph, skin, mesh.positions.len()),
            })
        })
        .collect();

    let animations = extract_animations(graph, &graph.roots);

    let collision_shape = (!scene.collision.indices.is_empty()).then(|| {
        infer_shape(
            &scene.collision.vertices,
            &scene.collision.indices,
            identifier,
            &options.overrides,
            &options.inference,
        )
    });

    let simplified_meshes = match options.simplify {
        Some(target) => simplify_meshes(&mut scene, target, options.weld_threshold),
        None => 0,
    };

    let mut issues = decoded.issues.clone();
    issues.extend(scene.issues.iter().cloned());
    for rig in &rigs {
        issues.extend(rig.skeleton.issues.iter().cloned());
        issues.extend(rig.weights.issues.iter().cloned());
    }
    issues.extend(animations.issues.iter().cloned());

    log::info!(
        "{identifier}: {} records, {} meshes, {} rigs, {} clips, {} issues",
        graph.len(),
        scene.meshes.len(),
        rigs.len(),
        animations.clips.len(),
        issues.len()
    );

    Ok(ModelOutput {
        identifier: identifier.to_string(),
        version: graph.version,
        record_count: graph.len(),
        scene,
        rigs,
        animations,
        collision_shape,
        simplified_meshes,
        issues,
    })
}

// ─── Worker pool ──────────────────────────────────────────────────────────────

/// Outcome of one submitted file.
#[derive(Debug)]
pub struct DecodeResult {
    pub request_id: u64,
    pub identifier: String,
    pub result: Result<ModelOutput, DecodeError>,
}

/// Decodes files on a rayon pool and hands results back over a channel.
/// Results nobody receives are simply dropped with the pool.
pub struct DecodePool {
    pool: rayon::ThreadPool,
    options: Arc<PipelineOptions>,
    sender: Sender<DecodeResult>,
    receiver: Receiver<DecodeResult>,
}

impl DecodePool {
    /// # Arguments
    ///
    /// * `workers` - Thread count; zero lets rayon pick one per core.
    /// * `options` - Settings shared by every task.
    pub fn new(workers: usize, options: PipelineOptions) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("nif2scene-decode-{index}"))
            .build()?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        Ok(Self {
            pool,
            options: Arc::new(options),
            sender,
            receiver,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue one file. The bytes move into the task.
    pub fn submit(&self, request_id: u64, identifier: impl Into<String>, bytes: Vec<u8>) {
        let identifier = identifier.into();
        let options = Arc::clone(&self.options);
        let sender = self.sender.clone();
        self.pool.spawn(move || {
            let context = format!("request {request_id} ({identifier})");
            let result =
                decode_and_convert(&identifier, &bytes, &options).log_error(Some(context.as_str()));
            // The pool owns a receiver, so this only fails during teardown.
            let _ = sender.send(DecodeResult {
                request_id,
                identifier,
                result,
            });
        });
    }

    /// Next finished result, if one is ready.
    pub fn try_recv(&self) -> Option<DecodeResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next finished result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DecodeResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}
