//! Rigid transforms and the named-frame graph.
//!
//! [`Transform3D`] maps points from a child frame into its parent frame:
//! rotate by `rotation`, then add `translation`.  [`FrameGraph`] stores the
//! latest transform for each `parent → child` edge and composes chains on
//! lookup, walking edges backwards through their inverse when needed.
//!
//! # Example
//!
//! ```rust
//! use tsdf_fusion::transform::{FrameGraph, Transform3D, Vec3, Quaternion};
//!
//! let mut graph = FrameGraph::new();
//! graph.set_transform("world", "tsdf_origin",
//!     Transform3D::new(Vec3::new(-0.3, -0.3, -0.01), Quaternion::identity()));
//! graph.set_transform("world", "camera",
//!     Transform3D::new(Vec3::new(0.0, 0.0, 0.5), Quaternion::identity()));
//!
//! // camera → tsdf_origin goes through world, using the inverse of the
//! // world → tsdf_origin edge.
//! let t = graph.lookup("tsdf_origin", "camera").unwrap();
//! assert!((t.translation.x - 0.3).abs() < 1e-5);
//! assert!((t.translation.z - 0.51).abs() < 1e-5);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Add, Mul, Neg, Sub};

use serde::Serialize;

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector or point (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        (n > 1e-12).then(|| self * (1.0 / n))
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Component by axis index (`0 = x`, `1 = y`, anything else `z`).
    pub fn axis(self, i: usize) -> f32 {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  Use [`normalized`][Self::normalized] when the
    /// input is not known to be unit length.
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about `axis` (need not be unit length).
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let Some(a) = axis.normalized() else {
            return Self::identity();
        };
        let (s, c) = (angle * 0.5).sin_cos();
        Self::new(c, a.x * s, a.y * s, a.z * s)
    }

    pub fn norm(self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit length; `None` when the quaternion is degenerate.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n < 1e-6 {
            return None;
        }
        let inv = 1.0 / n;
        Some(Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv))
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // v' = v + 2w(q × v) + 2 q × (q × v)
        let q = Vec3::new(self.x, self.y, self.z);
        let t = q.cross(v) * 2.0;
        v + t * self.w + q.cross(t)
    }

    /// Row-major 3×3 rotation matrix.
    pub fn to_matrix(self) -> [[f32; 3]; 3] {
        let Self { w, x, y, z } = self;
        [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
            ],
            [
                2.0 * (x * y + w * z),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z - w * x),
            ],
            [
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ]
    }

    pub fn is_finite(self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body transform mapping child-frame points into the parent frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quaternion::identity())
    }

    /// Compose two transforms.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation + self.rotation.rotate(other.translation);
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// T_B_A from T_A_B.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        Self::new(-inv_rot.rotate(self.translation), inv_rot)
    }

    /// Map a point from the child frame into the parent frame.
    pub fn apply(self, p: Vec3) -> Vec3 {
        self.rotation.rotate(p) + self.translation
    }

    pub fn is_finite(self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite()
    }

    /// Matrix form for hot loops.
    pub fn to_rigid(self) -> RigidMatrix {
        RigidMatrix {
            rotation: self.rotation.to_matrix(),
            translation: self.translation,
        }
    }
}

/// [`Transform3D`] expanded to a rotation matrix, cheaper to apply per voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidMatrix {
    pub rotation: [[f32; 3]; 3],
    pub translation: Vec3,
}

impl RigidMatrix {
    pub fn apply(&self, p: Vec3) -> Vec3 {
        let r = &self.rotation;
        Vec3::new(
            r[0][0] * p.x + r[0][1] * p.y + r[0][2] * p.z + self.translation.x,
            r[1][0] * p.x + r[1][1] * p.y + r[1][2] * p.z + self.translation.y,
            r[2][0] * p.x + r[2][1] * p.y + r[2][2] * p.z + self.translation.z,
        )
    }

    /// Rotate without translating (directions, normals).
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        let r = &self.rotation;
        Vec3::new(
            r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameGraph
// ────────────────────────────────────────────────────────────────────────────

/// Named reference frames and the latest [`Transform3D`] on each edge.
///
/// `set_transform("A", "B", t)` records T_A_B.  [`FrameGraph::lookup`] walks
/// edges in either direction, so a static `world → tsdf_origin` edge and a
/// moving `world → camera` edge are enough to answer `tsdf_origin ← camera`.
#[derive(Debug, Default, Clone)]
pub struct FrameGraph {
    /// `edges[parent][child] = T_parent_child`
    edges: HashMap<String, HashMap<String, Transform3D>>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update T_parent_child.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
    }

    /// Number of registered edges.
    pub fn len(&self) -> usize {
        self.edges.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Neighbours of `frame` with T_frame_neighbour, forwards and backwards.
    fn neighbours<'a>(&'a self, frame: &'a str) -> impl Iterator<Item = (&'a str, Transform3D)> + 'a {
        let forward = self
            .edges
            .get(frame)
            .into_iter()
            .flat_map(|children| children.iter().map(|(c, t)| (c.as_str(), *t)));
        let backward = self.edges.iter().filter_map(move |(parent, children)| {
            children
                .get(frame)
                .map(|t| (parent.as_str(), t.inverse()))
        });
        forward.chain(backward)
    }

    /// T_target_source: maps points expressed in `source_frame` into
    /// `target_frame`.
    ///
    /// Returns `None` if the frames are not connected.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform3D> {
        if source_frame == target_frame {
            return Some(Transform3D::identity());
        }

        // BFS from the target; each queue item carries T_target_current.
        let mut queue: VecDeque<(String, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back((target_frame.to_string(), Transform3D::identity()));
        visited.insert(target_frame.to_string());

        while let Some((current, accumulated)) = queue.pop_front() {
            for (next, edge_tf) in self.neighbours(&current) {
                if visited.contains(next) {
                    continue;
                }
                let composed = accumulated.compose(edge_tf);
                if next == source_frame {
                    return Some(composed);
                }
                visited.insert(next.to_string());
                queue.push_back((next.to_string(), composed));
            }
        }

        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

    fn assert_vec(v: Vec3, x: f32, y: f32, z: f32) {
        assert!((v.x - x).abs() < 1e-5, "x={} expected {}", v.x, x);
        assert!((v.y - y).abs() < 1e-5, "y={} expected {}", v.y, y);
        assert!((v.z - z).abs() < 1e-5, "z={} expected {}", v.z, z);
    }

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        assert_vec(q.rotate(Vec3::new(1.0, 0.0, 0.0)), 0.0, 1.0, 0.0);
    }

    #[test]
    fn matrix_matches_quaternion_rotation() {
        let q = Quaternion::from_axis_angle(Vec3::new(1.0, 2.0, 0.5), 0.7);
        let v = Vec3::new(0.3, -1.2, 2.0);
        let by_q = q.rotate(v);
        let by_m = Transform3D::new(Vec3::zero(), q).to_rigid().apply(v);
        assert_vec(by_m, by_q.x, by_q.y, by_q.z);
    }

    #[test]
    fn degenerate_quaternion_does_not_normalize() {
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized().is_none());
        assert!(Quaternion::new(f32::NAN, 0.0, 0.0, 0.0).normalized().is_none());
        let q = Quaternion::new(2.0, 0.0, 0.0, 0.0).normalized().unwrap();
        assert!((q.w - 1.0).abs() < 1e-6);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn inverse_undoes_transform() {
        let t = Transform3D::new(
            Vec3::new(1.0, -2.0, 0.5),
            Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.4),
        );
        let p = Vec3::new(0.2, 0.3, 0.4);
        let back = t.inverse().apply(t.apply(p));
        assert_vec(back, 0.2, 0.3, 0.4);

        let id = t.compose(t.inverse());
        assert_vec(id.translation, 0.0, 0.0, 0.0);
        assert!((id.rotation.w.abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn compose_applies_right_then_left() {
        let yaw = Transform3D::new(Vec3::zero(), Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2));
        let shift = Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0));
        // yaw ∘ shift: shift first, then rotate.
        assert_vec(yaw.compose(shift).apply(Vec3::zero()), 0.0, 1.0, 0.0);
        // shift ∘ yaw: rotate first, then shift.
        assert_vec(shift.compose(yaw).apply(Vec3::zero()), 1.0, 0.0, 0.0);
    }

    // ── FrameGraph ──────────────────────────────────────────────────────────

    #[test]
    fn lookup_same_frame_returns_identity() {
        let graph = FrameGraph::new();
        assert_eq!(graph.lookup("world", "world"), Some(Transform3D::identity()));
    }

    #[test]
    fn lookup_composed_chain() {
        let mut graph = FrameGraph::new();
        graph.set_transform("world", "robot_base", Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0)));
        graph.set_transform("robot_base", "camera", Transform3D::from_translation(Vec3::new(0.5, 0.0, 0.0)));

        let t = graph.lookup("world", "camera").unwrap();
        assert_vec(t.translation, 1.5, 0.0, 0.0);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn lookup_walks_edges_backwards() {
        let mut graph = FrameGraph::new();
        graph.set_transform("world", "camera", Transform3D::from_translation(Vec3::new(0.0, 0.0, 2.0)));

        let t = graph.lookup("camera", "world").unwrap();
        assert_vec(t.apply(Vec3::zero()), 0.0, 0.0, -2.0);
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        let q90z = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let mut graph = FrameGraph::new();
        graph.set_transform("world", "robot_base", Transform3D::new(Vec3::zero(), q90z));
        graph.set_transform("robot_base", "camera", Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0)));

        let t = graph.lookup("world", "camera").unwrap();
        assert_vec(t.translation, 0.0, 1.0, 0.0);
    }

    #[test]
    fn lookup_disconnected_returns_none() {
        let mut graph = FrameGraph::new();
        graph.set_transform("world", "robot_base", Transform3D::identity());
        graph.set_transform("map", "camera", Transform3D::identity());
        assert!(graph.lookup("world", "camera").is_none());
        assert!(graph.lookup("world", "ghost_frame").is_none());
    }

    #[test]
    fn set_transform_overrides_previous() {
        let mut graph = FrameGraph::new();
        graph.set_transform("world", "camera", Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0)));
        graph.set_transform("world", "camera", Transform3D::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        assert_vec(graph.lookup("world", "camera").unwrap().translation, 5.0, 0.0, 0.0);
        assert_eq!(graph.len(), 1);
    }
}
