//! Naive surface nets over the TSDF grid.

use rayon::prelude::*;
use tracing::debug;

use super::{TriangleMesh, crossing};
use crate::transform::Vec3;
use crate::volume::{TsdfVolume, Voxel};

const NO_VERTEX: u32 = u32::MAX;

/// Corner `c` of a cell sits at offset `(c & 1, (c >> 1) & 1, (c >> 2) & 1)`.
fn corner_offset(c: usize) -> [usize; 3] {
    [c & 1, (c >> 1) & 1, (c >> 2) & 1]
}

/// The 12 cell edges as corner pairs differing in one bit.
const CELL_EDGES: [(usize, usize); 12] = [
    (0, 1), (2, 3), (4, 5), (6, 7),
    (0, 2), (1, 3), (4, 6), (5, 7),
    (0, 4), (1, 5), (2, 6), (3, 7),
];

/// Surface vertex and gradient for the cell whose minimum corner is voxel
/// `(x, y, z)`, in volume-local voxel units.
fn cell_vertex(vol: &TsdfVolume, x: usize, y: usize, z: usize) -> Option<(Vec3, Vec3)> {
    let mut corners = [Voxel::unobserved(0.0); 8];
    for (c, corner) in corners.iter_mut().enumerate() {
        let [ox, oy, oz] = corner_offset(c);
        let v = vol.at((x + ox) as i64, (y + oy) as i64, (z + oz) as i64);
        if !v.is_observed() {
            return None;
        }
        *corner = v;
    }

    let mut sum = Vec3::zero();
    let mut count = 0u32;
    for &(a, b) in &CELL_EDGES {
        let Some(t) = crossing(corners[a], corners[b]) else {
            continue;
        };
        let pa = corner_offset(a);
        let pb = corner_offset(b);
        let lerp = |i: usize| pa[i] as f32 + t * (pb[i] as f32 - pa[i] as f32);
        sum = sum + Vec3::new(lerp(0), lerp(1), lerp(2));
        count += 1;
    }
    if count == 0 {
        return None;
    }

    // Forward differences across the cell, averaged over the four parallel
    // edges of each axis.
    let mut grad = [0.0_f32; 3];
    for &(a, b) in &CELL_EDGES {
        let axis = (a ^ b).trailing_zeros() as usize;
        grad[axis] += (corners[b].distance - corners[a].distance) * 0.25;
    }

    let offset = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, z as f32 + 0.5);
    Some((offset + sum * (1.0 / count as f32), Vec3::new(grad[0], grad[1], grad[2])))
}

/// Surface vertex of one crossing cell, in volume-local voxel units.
#[derive(Debug, Clone, Copy)]
struct CellVertex {
    /// `x + y·cx + z·cx·cy` over the `(dx−1)×(dy−1)×(dz−1)` cell grid.
    id: usize,
    position: Vec3,
    gradient: Vec3,
}

/// Cells that contain a crossing, in ascending `id` order.  Cells without
/// one are not stored.
fn crossing_cells(vol: &TsdfVolume) -> Vec<CellVertex> {
    let [dx, dy, dz] = vol.dims();
    if dx < 2 || dy < 2 || dz < 2 {
        return Vec::new();
    }
    let (cx, cy, cz) = (dx - 1, dy - 1, dz - 1);

    // One z-layer of cells per worker; rayon keeps the layers in order.
    (0..cz)
        .into_par_iter()
        .flat_map_iter(|z| {
            (0..cy).flat_map(move |y| {
                (0..cx).filter_map(move |x| {
                    cell_vertex(vol, x, y, z).map(|(position, gradient)| CellVertex {
                        id: x + y * cx + z * cx * cy,
                        position,
                        gradient,
                    })
                })
            })
        })
        .collect()
}

/// Extract a triangle mesh of the zero level set.
///
/// Vertices are expressed in the reference frame (`frame_id`).  An empty or
/// never-observed volume yields an empty mesh.
pub fn extract_mesh(vol: &TsdfVolume, frame_id: &str) -> TriangleMesh {
    let [dx, dy, dz] = vol.dims();
    let mut mesh = TriangleMesh {
        frame_id: frame_id.to_string(),
        ..TriangleMesh::default()
    };
    if dx < 2 || dy < 2 || dz < 2 {
        return mesh;
    }
    let (cx, cy) = (dx - 1, dy - 1);

    let cells = crossing_cells(vol);
    let origin = vol.origin().to_rigid();
    let scale = vol.voxel_size();
    let mut cell_ids = Vec::with_capacity(cells.len());
    mesh.vertices.reserve(cells.len());
    mesh.normals.reserve(cells.len());
    for cell in cells {
        cell_ids.push(cell.id);
        mesh.vertices.push(origin.apply(cell.position * scale));
        mesh.normals.push(cell.gradient.normalized().map(|n| origin.rotate(n)).unwrap_or_default());
    }

    // `cell_ids` is ascending, so a vertex index is a binary search away.
    let cell_at = |x: usize, y: usize, z: usize| {
        cell_ids
            .binary_search(&(x + y * cx + z * cx * cy))
            .map_or(NO_VERTEX, |i| i as u32)
    };

    // One quad per crossing voxel edge, joining the four cells around it.
    for z in 0..dz {
        for y in 0..dy {
            for x in 0..dx {
                let p = [x, y, z];
                let here = vol.at(x as i64, y as i64, z as i64);
                for axis in 0..3 {
                    let (j, k) = ((axis + 1) % 3, (axis + 2) % 3);
                    let dims = [dx, dy, dz];
                    if p[axis] + 1 >= dims[axis]
                        || p[j] == 0
                        || p[k] == 0
                        || p[j] + 1 >= dims[j]
                        || p[k] + 1 >= dims[k]
                    {
                        continue;
                    }
                    let mut q = p;
                    q[axis] += 1;
                    let next = vol.at(q[0] as i64, q[1] as i64, q[2] as i64);
                    if crossing(here, next).is_none() {
                        continue;
                    }

                    let shifted = |dj: usize, dk: usize| {
                        let mut c = p;
                        c[j] -= dj;
                        c[k] -= dk;
                        cell_at(c[0], c[1], c[2])
                    };
                    let quad = [shifted(0, 0), shifted(1, 0), shifted(1, 1), shifted(0, 1)];
                    if quad.contains(&NO_VERTEX) {
                        continue;
                    }
                    // (c0, c1, c2, c3) turns counter-clockwise around +axis.
                    // Flip it when free space lies on the −axis side.
                    let [a, b, c, d] = if here.distance < 0.0 {
                        quad
                    } else {
                        [quad[0], quad[3], quad[2], quad[1]]
                    };
                    mesh.triangles.push([a, b, c]);
                    mesh.triangles.push([a, c, d]);
                }
            }
        }
    }

    debug!(
        vertices = mesh.vertices.len(),
        triangles = mesh.triangles.len(),
        "surface nets extraction finished"
    );
    mesh
}
