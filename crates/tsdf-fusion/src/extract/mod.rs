//! Surface extraction.
//!
//! Both extractors are pure functions of a `&TsdfVolume`: they allocate fresh
//! output on every call and leave the volume untouched.
//!
//! A *crossing* is a pair of axis-adjacent voxels whose distances have
//! opposite signs and which have both been observed.  Pairs touching an
//! unobserved voxel never produce surface, otherwise the `+τ` reset value
//! would create phantom walls along the edge of the visible region.
//!
//! - [`extract_mesh`] – surface nets: one vertex per cell (2×2×2 voxels)
//!   straddling the surface, one quad per crossing.
//! - [`extract_points`] – one oriented point per crossing.

mod points;
mod surface_nets;

use serde::Serialize;

use crate::transform::Vec3;
use crate::volume::Voxel;

pub use points::extract_points;
pub use surface_nets::extract_mesh;

/// Indexed triangle mesh in the reference frame.
///
/// Triangles wind counter-clockwise when seen from free space; `normals`
/// holds one unit normal per vertex pointing away from the surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TriangleMesh {
    pub frame_id: String,
    pub vertices: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// A surface sample with its outward normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrientedPoint {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Oriented point set in the reference frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PointCloud {
    pub frame_id: String,
    pub points: Vec<OrientedPoint>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Interpolation parameter of the zero crossing between `a` and `b`, or
/// `None` if the pair is not a crossing.
pub(crate) fn crossing(a: Voxel, b: Voxel) -> Option<f32> {
    if !(a.is_observed() && b.is_observed()) {
        return None;
    }
    if (a.distance < 0.0) == (b.distance < 0.0) {
        return None;
    }
    Some(a.distance / (a.distance - b.distance))
}

/// Unit vector along `axis`.
pub(crate) fn unit_axis(axis: usize) -> Vec3 {
    match axis {
        0 => Vec3::new(1.0, 0.0, 0.0),
        1 => Vec3::new(0.0, 1.0, 0.0),
        _ => Vec3::new(0.0, 0.0, 1.0),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::transform::Transform3D;
    use crate::volume::{TsdfVolume, Voxel};

    /// 5×5×5 volume (s = 0.1, τ = 0.2) fully observed with a horizontal
    /// surface at z = 0.3; free space below.
    pub fn plane_volume() -> TsdfVolume {
        let mut vol = TsdfVolume::new([5, 5, 5], 0.1, 0.2, Transform3D::identity()).unwrap();
        for z in 0..5 {
            let zc = (z as f32 + 0.5) * 0.1;
            let d = (0.3 - zc).clamp(-0.2, 0.2);
            for y in 0..5 {
                for x in 0..5 {
                    vol.set(x, y, z, Voxel { distance: d, weight: 1.0 });
                }
            }
        }
        vol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_requires_both_observed_and_sign_change() {
        let pos = Voxel { distance: 0.1, weight: 1.0 };
        let neg = Voxel { distance: -0.3, weight: 1.0 };
        let unseen = Voxel::unobserved(0.2);
        let unseen_neg = Voxel { distance: -0.1, weight: 0.0 };

        assert!((crossing(pos, neg).unwrap() - 0.25).abs() < 1e-6);
        assert!((crossing(neg, pos).unwrap() - 0.75).abs() < 1e-6);
        assert!(crossing(pos, pos).is_none());
        assert!(crossing(neg, unseen).is_none());
        assert!(crossing(pos, unseen_neg).is_none());
    }

    #[test]
    fn zero_distance_counts_as_free_space() {
        let zero = Voxel { distance: 0.0, weight: 1.0 };
        let neg = Voxel { distance: -0.1, weight: 1.0 };
        assert_eq!(crossing(zero, neg), Some(0.0));
    }
}
