//! Edge-collapse decimation driven by quadric error metrics.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use nalgebra::{Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::convert::{Mesh, PrimitiveTopology};

/// Output never drops below this many triangles.
pub const MIN_TRIANGLES: usize = 4;
/// Inputs with fewer triangles are returned unchanged.
pub const MIN_INPUT_TRIANGLES: usize = 12;

// ─── Public types ─────────────────────────────────────────────────────────────

/// Indexed triangle list with optional per-vertex attributes. Attribute
/// arrays are either empty or as long as `positions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeshArrays {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uv_sets: Vec<Vec<Vector2<f32>>>,
    pub colors: Vec<Vector4<f32>>,
    pub indices: Vec<u32>,
}

impl MeshArrays {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Triangle mesh arrays of a converted mesh; `None` for line meshes.
    pub fn from_mesh(mesh: &Mesh) -> Option<Self> {
        if mesh.topology != PrimitiveTopology::Triangles {
            return None;
        }
        Some(Self {
            positions: mesh.positions.clone(),
            normals: mesh.normals.clone(),
            uv_sets: mesh.uv_sets.clone(),
            colors: mesh.colors.clone(),
            indices: mesh.indices.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SimplifyTarget {
    /// Keep `floor(triangles * ratio)` triangles.
    Ratio(f32),
    /// Collapse until at most this many vertices are referenced.
    MaxVertices(usize),
}

#[derive(Debug, Clone, Serialize)]
pub struct SimplifyResult {
    pub mesh: MeshArrays,
    pub original_triangles: usize,
    pub result_triangles: usize,
    pub collapses: usize,
}

// ─── Quadrics ─────────────────────────────────────────────────────────────────

/// Symmetric 4×4 plane quadric stored as its upper triangle:
/// `[aa, ab, ac, ad, bb, bc, bd, cc, cd, dd]`.
#[derive(Debug, Clone, Copy, Default)]
struct Quadric([f64; 10]);

impl Quadric {
    fn from_plane(a: f64, b: f64, c: f64, d: f64) -> Self {
        Quadric([
            a * a,
            a * b,
            a * c,
            a * d,
            b * b,
            b * c,
            b * d,
            c * c,
            c * d,
            d * d,
        ])
    }

    fn add(&self, other: &Quadric) -> Quadric {
        let mut sum = self.0;
        for (lhs, rhs) in sum.iter_mut().zip(other.0) {
            *lhs += rhs;
        }
        Quadric(sum)
    }

    /// `vᵀ Q v` for `v = (x, y, z, 1)`.
    fn error(&self, p: &Vector3<f64>) -> f64 {
        let q = &self.0;
        let (x, y, z) = (p.x, p.y, p.z);
        q[0] * x * x
            + 2.0 * q[1] * x * y
            + 2.0 * q[2] * x * z
            + 2.0 * q[3] * x
            + q[4] * y * y
            + 2.0 * q[5] * y * z
            + 2.0 * q[6] * y
            + q[7] * z * z
            + 2.0 * q[8] * z
            + q[9]
    }
}

// ─── Collapse candidates ──────────────────────────────────────────────────────

/// Edge candidate stamped with both endpoints' generations when it was
/// queued. A stamp mismatch on pop means the entry is stale.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    from: u32,
    into: u32,
    from_generation: u32,
    into_generation: u32,
    target: Vector3<f64>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the cheapest edge first.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.from, other.into).cmp(&(self.from, self.into)))
    }
}

struct VertexState {
    position: Vector3<f64>,
    quadric: Quadric,
    /// Incident faces; may still list faces that have since died.
    faces: Vec<usize>,
    generation: u32,
    removed: bool,
}

struct Decimator {
    vertices: Vec<VertexState>,
    faces: Vec<[u32; 3]>,
    alive: Vec<bool>,
    live_faces: usize,
    referenced: usize,
    uv_sets: Vec<Vec<Vector2<f32>>>,
    colors: Vec<Vector4<f32>>,
    heap: BinaryHeap<Candidate>,
}

impl Decimator {
    fn new(mesh: &MeshArrays) -> Self {
        let mut vertices: Vec<VertexState> = mesh
            .positions
            .iter()
            .map(|p| VertexState {
                position: p.cast::<f64>(),
                quadric: Quadric::default(),
                faces: Vec::new(),
                generation: 0,
                removed: false,
            })
            .collect();

        let vertex_count = vertices.len();
        let faces: Vec<[u32; 3]> = mesh
            .indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .filter(|t| {
                t.iter().all(|&i| (i as usize) < vertex_count)
                    && t[0] != t[1]
                    && t[1] != t[2]
                    && t[0] != t[2]
            })
            .collect();

        for (face_index, face) in faces.iter().enumerate() {
            let [a, b, c] = (*face).map(|i| vertices[i as usize].position);
            let normal = (b - a).cross(&(c - a));
            let length = normal.norm();
            for &corner in face {
                vertices[corner as usize].faces.push(face_index);
            }
            if length < 1e-12 {
                continue;
            }
            let n = normal / length;
            let plane = Quadric::from_plane(n.x, n.y, n.z, -n.dot(&a));
            for &corner in face {
                let vertex = &mut vertices[corner as usize];
                vertex.quadric = vertex.quadric.add(&plane);
            }
        }

        let referenced = vertices.iter().filter(|v| !v.faces.is_empty()).count();
        let live_faces = faces.len();
        Self {
            vertices,
            alive: vec![true; live_faces],
            faces,
            live_faces,
            referenced,
            uv_sets: mesh.uv_sets.clone(),
            colors: mesh.colors.clone(),
            heap: BinaryHeap::new(),
        }
    }

    fn neighbours(&self, vertex: u32) -> HashSet<u32> {
        let mut neighbours = HashSet::new();
        for &face in &self.vertices[vertex as usize].faces {
            if !self.alive[face] {
                continue;
            }
            neighbours.extend(self.faces[face].iter().copied().filter(|&v| v != vertex));
        }
        neighbours
    }

    /// Queue the edge `(a, b)`; the lower index always collapses into the
    /// higher one.
    fn queue_edge(&mut self, a: u32, b: u32) {
        let (from, into) = (a.min(b), a.max(b));
        let source = &self.vertices[from as usize];
        let survivor = &self.vertices[into as usize];
        let quadric = source.quadric.add(&survivor.quadric);
        let midpoint = (source.position + survivor.position) * 0.5;
        let (cost, target) = [source.position, survivor.position, midpoint]
            .into_iter()
            .map(|p| (quadric.error(&p), p))
            .min_by(|lhs, rhs| lhs.0.total_cmp(&rhs.0))
            .unwrap_or((0.0, survivor.position));
        self.heap.push(Candidate {
            cost,
            from,
            into,
            from_generation: source.generation,
            into_generation: survivor.generation,
            target,
        });
    }

    fn queue_all_edges(&mut self) {
        let mut seen = HashSet::new();
        for face in 0..self.faces.len() {
            let [a, b, c] = self.faces[face];
            for (u, v) in [(a, b), (b, c), (c, a)] {
                if seen.insert((u.min(v), u.max(v))) {
                    self.queue_edge(u, v);
                }
            }
        }
    }

    fn is_current(&self, candidate: &Candidate) -> bool {
        let source = &self.vertices[candidate.from as usize];
        let survivor = &self.vertices[candidate.into as usize];
        !source.removed
            && !survivor.removed
            && source.generation == candidate.from_generation
            && survivor.generation == candidate.into_generation
    }

    /// Number of faces the collapse would make degenerate.
    fn degenerate_count(&self, candidate: &Candidate) -> usize {
        self.vertices[candidate.from as usize]
            .faces
            .iter()
            .filter(|&&face| self.alive[face] && self.faces[face].contains(&candidate.into))
            .count()
    }

    fn collapse(&mut self, candidate: &Candidate) {
        let from = candidate.from as usize;
        let into = candidate.into as usize;

        let source_quadric = self.vertices[from].quadric;
        let survivor = &mut self.vertices[into];
        survivor.position = candidate.target;
        survivor.quadric = survivor.quadric.add(&source_quadric);
        survivor.generation += 1;
        for set in &mut self.uv_sets {
            if let (Some(&a), Some(&b)) = (set.get(from), set.get(into)) {
                set[into] = (a + b) * 0.5;
            }
        }
        if let (Some(&a), Some(&b)) = (self.colors.get(from), self.colors.get(into)) {
            self.colors[into] = (a + b) * 0.5;
        }

        let source_faces = std::mem::take(&mut self.vertices[from].faces);
        self.vertices[from].removed = true;
        self.vertices[from].generation += 1;
        self.referenced -= 1;

        let mut touched = Vec::new();
        for face in source_faces {
            if !self.alive[face] {
                continue;
            }
            let corners = &mut self.faces[face];
            if corners.contains(&candidate.into) {
                self.alive[face] = false;
                self.live_faces -= 1;
                touched.extend(corners.iter().copied().filter(|&v| v as usize != from));
                continue;
            }
            for corner in corners.iter_mut() {
                if *corner as usize == from {
                    *corner = candidate.into;
                }
            }
            self.vertices[into].faces.push(face);
        }

        // A vertex whose last face just died is no longer referenced.
        for vertex in touched {
            let state = &mut self.vertices[vertex as usize];
            state.faces.retain(|&face| self.alive[face]);
            if state.faces.is_empty() && !state.removed {
                state.removed = true;
                self.referenced -= 1;
            }
        }

        for neighbour in self.neighbours(candidate.into) {
            self.queue_edge(candidate.into, neighbour);
        }
    }

    fn run(&mut self, target: SimplifyTarget) -> usize {
        let original = self.live_faces;
        let done = |decimator: &Decimator| match target {
            SimplifyTarget::Ratio(ratio) => {
                let wanted = (original as f32 * ratio.clamp(0.0, 1.0)).floor() as usize;
                decimator.live_faces <= wanted.max(MIN_TRIANGLES)
            }
            SimplifyTarget::MaxVertices(limit) => {
                decimator.referenced <= limit || decimator.live_faces <= MIN_TRIANGLES
            }
        };

        self.queue_all_edges();
        let mut collapses = 0;
        while !done(self) {
            let Some(candidate) = self.heap.pop() else {
                break;
            };
            if !self.is_current(&candidate) {
                continue;
            }
            if self.live_faces - self.degenerate_count(&candidate) < MIN_TRIANGLES {
                continue;
            }
            self.collapse(&candidate);
            collapses += 1;
        }
        collapses
    }

    fn into_mesh(self, had_normals: bool) -> MeshArrays {
        let mut used = vec![false; self.vertices.len()];
        for (face, _) in self.faces.iter().zip(&self.alive).filter(|(_, alive)| **alive) {
            for &corner in face {
                used[corner as usize] = true;
            }
        }
        let kept: Vec<usize> = (0..self.vertices.len()).filter(|&old| used[old]).collect();
        let mut remap = vec![u32::MAX; self.vertices.len()];
        for (new, &old) in kept.iter().enumerate() {
            remap[old] = new as u32;
        }
        let positions: Vec<Vector3<f32>> = kept
            .iter()
            .map(|&old| self.vertices[old].position.cast::<f32>())
            .collect();

        let indices: Vec<u32> = self
            .faces
            .iter()
            .zip(&self.alive)
            .filter(|(_, alive)| **alive)
            .flat_map(|(face, _)| (*face).map(|corner| remap[corner as usize]))
            .collect();
        let uv_sets = self
            .uv_sets
            .iter()
            .filter(|set| set.len() == self.vertices.len())
            .map(|set| kept.iter().map(|&old| set[old]).collect())
            .collect();
        let colors = if self.colors.len() == self.vertices.len() {
            kept.iter().map(|&old| self.colors[old]).collect()
        } else {
            Vec::new()
        };
        let normals = if had_normals {
            smooth_normals(&positions, &indices)
        } else {
            Vec::new()
        };

        MeshArrays {
            positions,
            normals,
            uv_sets,
            colors,
            indices,
        }
    }
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Area-weighted vertex normals. Vertices without a face get `+Y`.
pub fn smooth_normals(positions: &[Vector3<f32>], indices: &[u32]) -> Vec<Vector3<f32>> {
    let mut normals = vec![Vector3::zeros(); positions.len()];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        if a >= positions.len() || b >= positions.len() || c >= positions.len() {
            continue;
        }
        // Unnormalised cross product weights by twice the face area.
        let face = (positions[b] - positions[a]).cross(&(positions[c] - positions[a]));
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize(1e-12).unwrap_or_else(Vector3::y))
        .collect()
}

/// Merge duplicate vertices and remap indices onto the survivors.
///
/// Two vertices merge when their positions fall in the same `threshold`
/// sized cell and every other attribute is bitwise equal, so texture seams
/// stay split. A `threshold` of zero or less compares positions exactly.
/// Triangles that collapse onto a repeated vertex are dropped.
pub fn weld_vertices(mesh: &MeshArrays, threshold: f32) -> MeshArrays {
    let cell = |value: f32| -> u64 {
        if threshold > 0.0 {
            (value / threshold).round() as i64 as u64
        } else {
            u64::from(value.to_bits())
        }
    };
    let bits = |c: &f32| u64::from(c.to_bits());
    let vertex_key = |i: usize| -> Vec<u64> {
        let p = mesh.positions[i];
        let mut key = vec![cell(p.x), cell(p.y), cell(p.z)];
        if let Some(n) = mesh.normals.get(i) {
            key.extend(n.iter().map(bits));
        }
        for set in &mesh.uv_sets {
            if let Some(uv) = set.get(i) {
                key.extend(uv.iter().map(bits));
            }
        }
        if let Some(color) = mesh.colors.get(i) {
            key.extend(color.iter().map(bits));
        }
        key
    };

    let mut first_of: HashMap<Vec<u64>, u32> = HashMap::new();
    let mut remap = Vec::with_capacity(mesh.positions.len());
    let mut kept = Vec::new();
    for i in 0..mesh.positions.len() {
        let next = kept.len() as u32;
        let target = *first_of.entry(vertex_key(i)).or_insert(next);
        if target == next {
            kept.push(i);
        }
        remap.push(target);
    }

    let indices = mesh
        .indices
        .chunks_exact(3)
        .filter(|t| t.iter().all(|&i| (i as usize) < remap.len()))
        .map(|t| [t[0], t[1], t[2]].map(|i| remap[i as usize]))
        .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
        .flatten()
        .collect();

    MeshArrays {
        positions: kept.iter().map(|&i| mesh.positions[i]).collect(),
        normals: if mesh.normals.len() == mesh.positions.len() {
            kept.iter().map(|&i| mesh.normals[i]).collect()
        } else {
            Vec::new()
        },
        uv_sets: mesh
            .uv_sets
            .iter()
            .filter(|set| set.len() == mesh.positions.len())
            .map(|set| kept.iter().map(|&i| set[i]).collect())
            .collect(),
        colors: if mesh.colors.len() == mesh.positions.len() {
            kept.iter().map(|&i| mesh.colors[i]).collect()
        } else {
            Vec::new()
        },
        indices,
    }
}

/// Decimate a triangle mesh.
///
/// Edges collapse cheapest-first by summed quadric error, each evaluated at
/// the better of its endpoints and midpoint. The lower vertex index always
/// merges into the higher one.
///
/// # Arguments
///
/// * `mesh` - Input triangle list and attributes.
/// * `target` - Ratio of triangles to keep, or a referenced-vertex budget.
///
/// # Returns
///
/// The compacted mesh. Inputs below [`MIN_INPUT_TRIANGLES`] come back
/// unchanged, and the output never has fewer than [`MIN_TRIANGLES`]
/// triangles unless the input did.
pub fn simplify(mesh: &MeshArrays, target: SimplifyTarget) -> SimplifyResult {
    let original_triangles = mesh.triangle_count();
    if original_triangles < MIN_INPUT_TRIANGLES {
        return SimplifyResult {
            mesh: mesh.clone(),
            original_triangles,
            result_triangles: original_triangles,
            collapses: 0,
        };
    }

    let mut decimator = Decimator::new(mesh);
    let collapses = decimator.run(target);
    let output = decimator.into_mesh(!mesh.normals.is_empty());
    let result_triangles = output.triangle_count();
    log::debug!(
        "simplified {original_triangles} -> {result_triangles} triangles in {collapses} collapses"
    );

    SimplifyResult {
        mesh: output,
        original_triangles,
        result_triangles,
        collapses,
    }
}
