//! Physics shape selection for collision geometry.
//!
//! A shape is chosen by, in order: an exact identifier in the override
//! table, the first matching glob pattern, the force-concave policy, then
//! statistical detection over the point cloud. Anything undetected becomes a
//! convex hull.

use std::collections::HashSet;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Point clouds smaller than this skip detection.
pub const MIN_DETECTION_POINTS: usize = 8;

const CYLINDER_MIN_RATIO: f32 = 1.2;
const CAPSULE_MIN_RATIO: f32 = 1.5;
/// Share of the tolerance band a point must be within to count as lying
/// flat on a box face. Round sections never reach full coverage at this width.
const SNUG_FACE_BAND: f32 = 0.25;

// ─── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Sphere,
    Box,
    Cylinder,
    Capsule,
    Convex,
    Concave,
}

/// One override entry. A pattern without `*` or `?` is an exact identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub pattern: String,
    pub shape: ShapeKind,
}

/// Caller-supplied shape overrides, consulted in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeOverrides {
    pub rules: Vec<OverrideRule>,
}

impl ShapeOverrides {
    pub fn new(rules: Vec<OverrideRule>) -> Self {
        Self { rules }
    }

    /// Exact identifiers win over patterns; patterns match in order.
    pub fn lookup(&self, identifier: &str) -> Option<ShapeKind> {
        let identifier = normalize_identifier(identifier);
        let (patterns, exact): (Vec<&OverrideRule>, Vec<&OverrideRule>) =
            self.rules.iter().partition(|rule| is_pattern(&rule.pattern));
        exact
            .iter()
            .find(|rule| normalize_identifier(&rule.pattern) == identifier)
            .or_else(|| {
                patterns
                    .iter()
                    .find(|rule| glob_match(&normalize_identifier(&rule.pattern), &identifier))
            })
            .map(|rule| rule.shape)
    }
}

/// Identifier prefixes whose models always get triangle-mesh collision,
/// typically walkable architecture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionPolicy {
    pub force_concave_prefixes: Vec<String>,
}

impl CollisionPolicy {
    pub fn forces_concave(&self, identifier: &str) -> bool {
        let identifier = normalize_identifier(identifier);
        self.force_concave_prefixes
            .iter()
            .any(|prefix| identifier.starts_with(&normalize_identifier(prefix)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceOptions {
    /// Relative tolerance for every statistical test.
    pub tolerance: f32,
    pub policy: CollisionPolicy,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.15,
            policy: CollisionPolicy::default(),
        }
    }
}

// ─── Result ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CollisionShape {
    Sphere {
        center: Vector3<f32>,
        radius: f32,
    },
    Box {
        center: Vector3<f32>,
        half_extents: Vector3<f32>,
    },
    /// Upright along Y.
    Cylinder {
        center: Vector3<f32>,
        radius: f32,
        half_height: f32,
    },
    /// Upright along Y; `half_height` covers the straight section only.
    Capsule {
        center: Vector3<f32>,
        radius: f32,
        half_height: f32,
    },
    ConvexHull {
        points: Vec<Vector3<f32>>,
    },
    Concave {
        vertices: Vec<Vector3<f32>>,
        indices: Vec<u32>,
    },
}

impl CollisionShape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            CollisionShape::Sphere { .. } => ShapeKind::Sphere,
            CollisionShape::Box { .. } => ShapeKind::Box,
            CollisionShape::Cylinder { .. } => ShapeKind::Cylinder,
            CollisionShape::Capsule { .. } => ShapeKind::Capsule,
            CollisionShape::ConvexHull { .. } => ShapeKind::Convex,
            CollisionShape::Concave { .. } => ShapeKind::Concave,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShapeDecision {
    Override,
    Policy,
    Detected,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShapeDescriptor {
    pub shape: CollisionShape,
    pub decided_by: ShapeDecision,
}

// ─── Identifier matching ──────────────────────────────────────────────────────

fn normalize_identifier(identifier: &str) -> String {
    identifier.replace('\\', "/").to_lowercase()
}

fn is_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// `*` matches any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

// ─── Statistics ───────────────────────────────────────────────────────────────

struct CloudStats {
    min: Vector3<f32>,
    max: Vector3<f32>,
    center: Vector3<f32>,
    extent: Vector3<f32>,
}

impl CloudStats {
    fn of(points: &[Vector3<f32>]) -> Option<Self> {
        let first = *points.first()?;
        let (min, max) = points
            .iter()
            .fold((first, first), |(min, max), p| (min.inf(p), max.sup(p)));
        Some(Self {
            min,
            max,
            center: (min + max) * 0.5,
            extent: max - min,
        })
    }
}

/// `(mean, coefficient of variation)`; CV is infinite for a zero mean.
fn mean_and_cv(values: impl Iterator<Item = f32> + Clone) -> (f32, f32) {
    let count = values.clone().count();
    if count == 0 {
        return (0.0, f32::INFINITY);
    }
    let mean = values.clone().sum::<f32>() / count as f32;
    if mean <= f32::EPSILON {
        return (mean, f32::INFINITY);
    }
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f32>() / count as f32;
    (mean, variance.sqrt() / mean)
}

fn horizontal_radius(p: &Vector3<f32>, center: &Vector3<f32>) -> f32 {
    ((p.x - center.x).powi(2) + (p.z - center.z).powi(2)).sqrt()
}

/// Points in the middle half of the height, or all points when that band
/// is too sparse to judge.
fn middle_band<'p>(points: &'p [Vector3<f32>], stats: &CloudStats) -> Vec<&'p Vector3<f32>> {
    let half_band = stats.extent.y * 0.25;
    let band: Vec<&Vector3<f32>> = points
        .iter()
        .filter(|p| (p.y - stats.center.y).abs() <= half_band)
        .collect();
    if band.len() < MIN_DETECTION_POINTS {
        points.iter().collect()
    } else {
        band
    }
}

fn dedup_points(points: &[Vector3<f32>]) -> Vec<Vector3<f32>> {
    let mut seen = HashSet::new();
    points
        .iter()
        .copied()
        .filter(|p| seen.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]))
        .collect()
}

fn fit_sphere(points: &[Vector3<f32>], stats: &CloudStats) -> CollisionShape {
    let (radius, _) = mean_and_cv(points.iter().map(|p| (p - stats.center).norm()));
    CollisionShape::Sphere {
        center: stats.center,
        radius,
    }
}

fn fit_box(stats: &CloudStats) -> CollisionShape {
    CollisionShape::Box {
        center: stats.center,
        half_extents: stats.extent * 0.5,
    }
}

fn fit_upright(points: &[Vector3<f32>], stats: &CloudStats, capsule: bool) -> CollisionShape {
    let band = middle_band(points, stats);
    let (radius, _) = mean_and_cv(band.iter().map(|p| horizontal_radius(p, &stats.center)));
    let half_height = stats.extent.y * 0.5;
    if capsule {
        CollisionShape::Capsule {
            center: stats.center,
            radius,
            half_height: (half_height - radius).max(0.0),
        }
    } else {
        CollisionShape::Cylinder {
            center: stats.center,
            radius,
            half_height,
        }
    }
}

fn fit_shape(kind: ShapeKind, points: &[Vector3<f32>], indices: &[u32]) -> CollisionShape {
    let Some(stats) = CloudStats::of(points) else {
        return CollisionShape::ConvexHull { points: Vec::new() };
    };
    match kind {
        ShapeKind::Sphere => fit_sphere(points, &stats),
        ShapeKind::Box => fit_box(&stats),
        ShapeKind::Cylinder => fit_upright(points, &stats, false),
        ShapeKind::Capsule => fit_upright(points, &stats, true),
        ShapeKind::Convex => CollisionShape::ConvexHull {
            points: dedup_points(points),
        },
        ShapeKind::Concave => CollisionShape::Concave {
            vertices: points.to_vec(),
            indices: indices.to_vec(),
        },
    }
}

/// Fraction of points within `band × extent` of a bounding-box face.
fn face_coverage(points: &[Vector3<f32>], stats: &CloudStats, band: f32) -> f32 {
    let on_face = points
        .iter()
        .filter(|p| {
            (0..3).any(|axis| {
                let reach = band * stats.extent[axis];
                p[axis] - stats.min[axis] <= reach || stats.max[axis] - p[axis] <= reach
            })
        })
        .count();
    on_face as f32 / points.len() as f32
}

/// Classify a point cloud as a primitive, or `None` when nothing fits.
///
/// Clouds hugging the box faces are boxes before anything else: a cube's
/// distance spread and a square section's radius spread both sit under the
/// default tolerance.
fn detect(points: &[Vector3<f32>], tolerance: f32) -> Option<ShapeKind> {
    if points.len() < MIN_DETECTION_POINTS {
        return None;
    }
    let stats = CloudStats::of(points)?;

    if face_coverage(points, &stats, tolerance * SNUG_FACE_BAND) > 1.0 - tolerance {
        return Some(ShapeKind::Box);
    }

    let (_, distance_cv) = mean_and_cv(points.iter().map(|p| (p - stats.center).norm()));
    if distance_cv < tolerance {
        return Some(ShapeKind::Sphere);
    }

    let horizontal = stats.extent.x.max(stats.extent.z);
    let xz_difference = (stats.extent.x - stats.extent.z).abs() / horizontal.max(f32::EPSILON);
    if horizontal > f32::EPSILON && xz_difference < tolerance {
        let band = middle_band(points, &stats);
        let (_, radius_cv) = mean_and_cv(band.iter().map(|p| horizontal_radius(p, &stats.center)));
        let ratio = stats.extent.y / horizontal;
        if radius_cv < tolerance {
            if ratio > CAPSULE_MIN_RATIO {
                return Some(ShapeKind::Capsule);
            }
            if ratio >= CYLINDER_MIN_RATIO {
                return Some(ShapeKind::Cylinder);
            }
        }
    }

    if face_coverage(points, &stats, tolerance) > 1.0 - tolerance {
        return Some(ShapeKind::Box);
    }
    None
}

// ─── Public API ───────────────────────────────────────────────────────────────

/// Pick a collision shape for one model.
///
/// # Arguments
///
/// * `points` - Collision vertices in the model frame.
/// * `indices` - Triangle list over `points`, kept for concave shapes.
/// * `identifier` - Model path used for override and policy lookup.
/// * `overrides` - Caller's override table.
/// * `options` - Detection tolerance and force-concave policy.
///
/// # Returns
///
/// The fitted shape and which rule chose it.
pub fn infer_shape(
    points: &[Vector3<f32>],
    indices: &[u32],
    identifier: &str,
    overrides: &ShapeOverrides,
    options: &InferenceOptions,
) -> ShapeDescriptor {
    let (kind, decided_by) = if let Some(kind) = overrides.lookup(identifier) {
        (kind, ShapeDecision::Override)
    } else if options.policy.forces_concave(identifier) {
        (ShapeKind::Concave, ShapeDecision::Policy)
    } else if let Some(kind) = detect(points, options.tolerance) {
        (kind, ShapeDecision::Detected)
    } else {
        (ShapeKind::Convex, ShapeDecision::Fallback)
    };

    log::debug!("collision shape for '{identifier}': {kind:?} ({decided_by:?})");
    ShapeDescriptor {
        shape: fit_shape(kind, points, indices),
        decided_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f32::consts::TAU;

    fn sphere_cloud(radius: f32, count: usize) -> Vec<Vector3<f32>> {
        // Fibonacci lattice
        let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
        (0..count)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
                let ring = (1.0 - y * y).sqrt();
                let theta = golden * i as f32;
                Vector3::new(ring * theta.cos(), y, ring * theta.sin()) * radius
            })
            .collect()
    }

    fn box_cloud(half: Vector3<f32>, per_axis: usize) -> Vec<Vector3<f32>> {
        let mut points = Vec::new();
        let steps = per_axis as f32 - 1.0;
        for i in 0..per_axis {
            for j in 0..per_axis {
                let (u, v) = (i as f32 / steps * 2.0 - 1.0, j as f32 / steps * 2.0 - 1.0);
                for sign in [-1.0, 1.0] {
                    points.push(Vector3::new(sign * half.x, u * half.y, v * half.z));
                    points.push(Vector3::new(u * half.x, sign * half.y, v * half.z));
                    points.push(Vector3::new(u * half.x, v * half.y, sign * half.z));
                }
            }
        }
        points
    }

    fn tube_cloud(radius: f32, height: f32) -> Vec<Vector3<f32>> {
        let mut points = Vec::new();
        for ring in 0..=12 {
            let y = height * (ring as f32 / 12.0 - 0.5);
            for step in 0..24 {
                let angle = TAU * step as f32 / 24.0;
                points.push(Vector3::new(radius * angle.cos(), y, radius * angle.sin()));
            }
        }
        points
    }

    fn infer(points: &[Vector3<f32>], identifier: &str, overrides: &ShapeOverrides) -> ShapeDescriptor {
        infer_shape(points, &[], identifier, overrides, &InferenceOptions::default())
    }

    #[test]
    fn given_sphere_cloud_when_inferring_then_sphere_with_mean_radius() {
        let shape = infer(&sphere_cloud(2.0, 200), "meshes/rock.nif", &ShapeOverrides::default());

        assert_eq!(shape.decided_by, ShapeDecision::Detected);
        let CollisionShape::Sphere { center, radius } = shape.shape else {
            panic!("expected sphere, got {:?}", shape.shape.kind());
        };
        assert!((radius - 2.0).abs() < 0.05);
        assert!(center.norm() < 0.05);
    }

    #[test]
    fn given_elongated_box_cloud_when_inferring_then_box_with_half_extents() {
        let half = Vector3::new(1.0, 0.5, 2.0);
        let shape = infer(&box_cloud(half, 6), "meshes/crate.nif", &ShapeOverrides::default());

        let CollisionShape::Box { half_extents, .. } = shape.shape else {
            panic!("expected box, got {:?}", shape.shape.kind());
        };
        assert!((half_extents - half).norm() < 1e-5);
    }

    #[test]
    fn given_cube_cloud_when_inferring_then_box_not_sphere() {
        let half = Vector3::new(0.5, 0.5, 0.5);
        let shape = infer(&box_cloud(half, 10), "meshes/crate_cube.nif", &ShapeOverrides::default());

        assert_eq!(shape.decided_by, ShapeDecision::Detected);
        let CollisionShape::Box { half_extents, .. } = shape.shape else {
            panic!("expected box, got {:?}", shape.shape.kind());
        };
        assert!((half_extents - half).norm() < 1e-5);
    }

    #[test]
    fn given_square_section_box_taller_than_wide_when_inferring_then_box_not_cylinder() {
        let half = Vector3::new(0.5, 0.65, 0.5);
        let shape = infer(&box_cloud(half, 10), "meshes/pillar.nif", &ShapeOverrides::default());

        assert_eq!(shape.shape.kind(), ShapeKind::Box);
    }

    #[test]
    fn given_upright_tubes_when_inferring_then_ratio_picks_cylinder_or_capsule() {
        let short = infer(&tube_cloud(1.0, 2.6), "a", &ShapeOverrides::default());
        let tall = infer(&tube_cloud(1.0, 4.0), "b", &ShapeOverrides::default());

        assert_eq!(short.shape.kind(), ShapeKind::Cylinder);
        assert_eq!(tall.shape.kind(), ShapeKind::Capsule);
        let CollisionShape::Capsule { radius, half_height, .. } = tall.shape else {
            panic!("expected capsule");
        };
        assert!((radius - 1.0).abs() < 1e-4);
        assert!((half_height - 1.0).abs() < 1e-4);
    }

    #[test]
    fn given_scattered_interior_points_when_inferring_then_convex_fallback() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Vector3<f32>> = (0..300)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-0.7..0.7),
                    rng.gen_range(-2.0..2.0),
                )
            })
            .collect();

        let shape = infer(&points, "meshes/debris.nif", &ShapeOverrides::default());

        assert_eq!(shape.decided_by, ShapeDecision::Fallback);
        assert_eq!(shape.shape.kind(), ShapeKind::Convex);
    }

    #[test]
    fn given_too_few_points_when_inferring_then_detection_is_skipped() {
        let shape = infer(&sphere_cloud(1.0, 7), "x", &ShapeOverrides::default());
        assert_eq!(shape.decided_by, ShapeDecision::Fallback);
    }

    #[test]
    fn given_exact_and_glob_overrides_when_inferring_then_exact_wins_then_first_glob() {
        let overrides = ShapeOverrides::new(vec![
            OverrideRule {
                pattern: "meshes/f/*".to_string(),
                shape: ShapeKind::Box,
            },
            OverrideRule {
                pattern: "meshes/f/barrel_??.nif".to_string(),
                shape: ShapeKind::Cylinder,
            },
            OverrideRule {
                pattern: "Meshes\\f\\barrel_01.nif".to_string(),
                shape: ShapeKind::Sphere,
            },
        ]);
        let cloud = sphere_cloud(1.0, 64);

        assert_eq!(
            infer(&cloud, "meshes/f/barrel_01.nif", &overrides).shape.kind(),
            ShapeKind::Sphere
        );
        let barrel = infer(&cloud, "meshes/f/barrel_02.nif", &overrides);
        assert_eq!(barrel.shape.kind(), ShapeKind::Box);
        assert_eq!(barrel.decided_by, ShapeDecision::Override);
    }

    #[test]
    fn given_architecture_prefix_when_inferring_then_policy_forces_concave() {
        let options = InferenceOptions {
            policy: CollisionPolicy {
                force_concave_prefixes: vec!["meshes/x/ex_".to_string()],
            },
            ..InferenceOptions::default()
        };
        let cloud = sphere_cloud(1.0, 64);
        let shape = infer_shape(&cloud, &[0, 1, 2], "Meshes\\x\\Ex_Wall_01.nif", &ShapeOverrides::default(), &options);

        assert_eq!(shape.decided_by, ShapeDecision::Policy);
        let CollisionShape::Concave { indices, .. } = shape.shape else {
            panic!("expected concave");
        };
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn given_patterns_when_globbing_then_star_and_question_mark_behave() {
        assert!(glob_match("*.nif", "meshes/a.nif"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b", "a/c"));
        assert!(glob_match("**", ""));
    }

    #[test]
    fn given_override_table_json_when_parsing_then_rules_keep_order() {
        let json = r#"[{"pattern": "meshes/*", "shape": "capsule"}, {"pattern": "a.nif", "shape": "concave"}]"#;
        let overrides: ShapeOverrides = serde_json::from_str(json).expect("parse");

        assert_eq!(overrides.rules.len(), 2);
        assert_eq!(overrides.rules[0].shape, ShapeKind::Capsule);
        assert_eq!(overrides.lookup("A.NIF"), Some(ShapeKind::Concave));
    }
}
