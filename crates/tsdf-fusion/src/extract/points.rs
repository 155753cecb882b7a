//! Oriented point extraction: one sample per crossing voxel pair.

use rayon::prelude::*;

use super::{OrientedPoint, PointCloud, crossing, unit_axis};
use crate::transform::Vec3;
use crate::volume::TsdfVolume;

/// Extract an oriented point set from every observed zero crossing.
///
/// Points are linearly interpolated between the two voxel centres.  Normals
/// come from the TSDF gradient when all neighbours needed for it are
/// observed, otherwise from the crossing direction itself.
pub fn extract_points(vol: &TsdfVolume, frame_id: &str, gradient_delta: f32) -> PointCloud {
    let [dx, dy, dz] = vol.dims();
    let dims = [dx, dy, dz];
    let origin = vol.origin().to_rigid();

    let points = (0..dz)
        .into_par_iter()
        .flat_map_iter(|z| {
            let mut out = Vec::new();
            for y in 0..dy {
                for x in 0..dx {
                    let p = [x, y, z];
                    let here = vol.at(x as i64, y as i64, z as i64);
                    for axis in 0..3 {
                        if p[axis] + 1 >= dims[axis] {
                            continue;
                        }
                        let mut q = p;
                        q[axis] += 1;
                        let next = vol.at(q[0] as i64, q[1] as i64, q[2] as i64);
                        let Some(t) = crossing(here, next) else {
                            continue;
                        };

                        let local = vol.voxel_center(x, y, z) + unit_axis(axis) * (t * vol.voxel_size());
                        // Free space is on the side with the positive distance.
                        let fallback = if here.distance < 0.0 {
                            unit_axis(axis)
                        } else {
                            -unit_axis(axis)
                        };
                        let normal = vol
                            .gradient(local, gradient_delta)
                            .and_then(Vec3::normalized)
                            .unwrap_or(fallback);

                        out.push(OrientedPoint {
                            position: origin.apply(local),
                            normal: origin.rotate(normal),
                        });
                    }
                }
            }
            out
        })
        .collect();

    PointCloud {
        frame_id: frame_id.to_string(),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::plane_volume;
    use crate::transform::Transform3D;
    use crate::volume::Voxel;

    #[test]
    fn empty_volume_yields_no_points() {
        let vol = TsdfVolume::new([4, 4, 4], 0.1, 0.2, Transform3D::identity()).unwrap();
        let cloud = extract_points(&vol, "tsdf_origin", 0.025);
        assert!(cloud.is_empty());
        assert_eq!(cloud.frame_id, "tsdf_origin");
    }

    #[test]
    fn plane_points_lie_on_plane_and_face_free_space() {
        let cloud = extract_points(&plane_volume(), "tsdf_origin", 0.025);
        assert_eq!(cloud.len(), 25);
        for p in &cloud.points {
            assert!((p.position.z - 0.3).abs() < 1e-5);
            assert!((p.normal.z + 1.0).abs() < 1e-4, "normal {:?}", p.normal);
        }
    }

    #[test]
    fn single_observed_voxel_among_unobserved_emits_nothing() {
        let mut vol = TsdfVolume::new([3, 3, 3], 0.1, 0.2, Transform3D::identity()).unwrap();
        // Observed voxel in the corner: three unobserved neighbours.
        vol.set(0, 0, 0, Voxel { distance: -0.1, weight: 1.0 });
        assert!(extract_points(&vol, "tsdf_origin", 0.025).is_empty());
    }

    #[test]
    fn isolated_pair_uses_fallback_normal() {
        let mut vol = TsdfVolume::new([3, 3, 3], 0.1, 0.2, Transform3D::identity()).unwrap();
        vol.set(0, 0, 0, Voxel { distance: -0.05, weight: 1.0 });
        vol.set(1, 0, 0, Voxel { distance: 0.15, weight: 1.0 });
        let cloud = extract_points(&vol, "tsdf_origin", 0.025);
        assert_eq!(cloud.len(), 1);
        let p = cloud.points[0];
        assert!((p.position.x - 0.075).abs() < 1e-6);
        assert_eq!(p.normal, Vec3::new(1.0, 0.0, 0.0));
    }
}
