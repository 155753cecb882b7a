//! Raycast preview rendering.
//!
//! Marches one ray per pixel of a virtual camera through the volume and
//! reports the first place the interpolated TSDF goes from positive (free
//! space) to negative.  Much cheaper than a full mesh when all that is
//! needed is a view of the current model.

use rayon::prelude::*;
use serde::Serialize;
use tsdf_types::FusionConfig;

use crate::camera::CameraIntrinsics;
use crate::transform::{Transform3D, Vec3};
use crate::volume::TsdfVolume;

/// A viewpoint to render from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualCamera {
    pub intrinsics: CameraIntrinsics,
    /// T_reference_camera.
    pub camera_to_reference: Transform3D,
}

/// Marching step and normal finite-difference step, both in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastParams {
    pub step: f32,
    pub gradient_delta: f32,
}

impl RaycastParams {
    /// Both steps scale with the voxel size.
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            step: config.raycast_step_factor * config.volume_resolution,
            gradient_delta: config.gradient_delta_factor * config.volume_resolution,
        }
    }
}

/// Surface hit for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RayHit {
    /// Depth along the virtual camera's `+z`.
    pub depth: f32,
    /// Hit position in the reference frame.
    pub point: Vec3,
    /// Unit surface normal in the reference frame (zero if the gradient was
    /// not available).
    pub normal: Vec3,
}

/// Row-major per-pixel raycast result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaycastView {
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub hits: Vec<Option<RayHit>>,
}

impl RaycastView {
    /// Hit at pixel `(col, row)`; `None` for misses and out-of-range pixels.
    pub fn hit(&self, col: u32, row: u32) -> Option<RayHit> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.hits[row as usize * self.width as usize + col as usize]
    }

    /// Pixels whose ray found a surface.
    pub fn hit_count(&self) -> usize {
        self.hits.iter().filter(|h| h.is_some()).count()
    }

    /// Depth image with `NaN` for misses.
    pub fn depth_map(&self) -> Vec<f32> {
        self.hits
            .iter()
            .map(|h| h.map_or(f32::NAN, |h| h.depth))
            .collect()
    }

    /// Per-pixel hit positions in the reference frame.
    pub fn vertex_map(&self) -> Vec<Option<Vec3>> {
        self.hits.iter().map(|h| h.map(|h| h.point)).collect()
    }

    /// Per-pixel unit normals in the reference frame.
    pub fn normal_map(&self) -> Vec<Option<Vec3>> {
        self.hits.iter().map(|h| h.map(|h| h.normal)).collect()
    }
}

/// First front-facing crossing along `origin + t·dir`, as `(t, local point)`.
///
/// The march counts fixed steps from the box entry point, so it ends even
/// when `t_enter` is too large for `t_enter + step` to differ from
/// `t_enter` in f32.
fn cast_ray(
    vol: &TsdfVolume,
    origin: Vec3,
    dir: Vec3,
    params: &RaycastParams,
) -> Option<(f32, Vec3)> {
    if !(params.step.is_normal() && params.step > 0.0) {
        return None;
    }
    let (t_enter, t_exit) = vol.bounds().intersect_ray(origin, dir)?;
    let entry = origin + dir * t_enter;
    // NaN or negative spans saturate to zero steps.
    let steps = ((t_exit - t_enter) / params.step).floor() as usize;

    let mut previous: Option<(f32, f32)> = None;
    for i in 0..=steps {
        let s = i as f32 * params.step;
        match (previous, vol.sample_trilinear(entry + dir * s)) {
            (Some((s_prev, d_prev)), Some(d)) if d_prev >= 0.0 && d < 0.0 => {
                let s_hit = s_prev + (s - s_prev) * d_prev / (d_prev - d);
                return Some((t_enter + s_hit, entry + dir * s_hit));
            }
            // Entered the surface from behind; nothing visible on this ray.
            (Some((_, d_prev)), Some(d)) if d_prev < 0.0 && d >= 0.0 => return None,
            (_, Some(d)) => previous = Some((s, d)),
            (_, None) => previous = None,
        }
    }
    None
}

/// Render `camera`'s view of the volume.
pub fn raycast(
    vol: &TsdfVolume,
    camera: &VirtualCamera,
    params: &RaycastParams,
    frame_id: &str,
) -> RaycastView {
    let intr = camera.intrinsics;
    let origin = vol.origin();
    let camera_to_volume = origin.inverse().compose(camera.camera_to_reference);
    let eye = camera_to_volume.translation;
    let to_volume = camera_to_volume.to_rigid();
    let to_reference = origin.to_rigid();

    let hits = (0..intr.height)
        .into_par_iter()
        .flat_map_iter(|row| {
            (0..intr.width).map(move |col| {
                let ray_cam = intr.ray_direction(col as f32, row as f32);
                let dir = to_volume.rotate(ray_cam);
                let (t, local) = cast_ray(vol, eye, dir, params)?;
                let normal = vol
                    .gradient(local, params.gradient_delta)
                    .and_then(Vec3::normalized)
                    .map(|n| to_reference.rotate(n))
                    .unwrap_or_default();
                Some(RayHit {
                    depth: t * ray_cam.z,
                    point: to_reference.apply(local),
                    normal,
                })
            })
        })
        .collect();

    RaycastView {
        frame_id: frame_id.to_string(),
        width: intr.width,
        height: intr.height,
        hits,
    }
}
