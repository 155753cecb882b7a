//! Per-frame TSDF integration.
//!
//! [`integrate_frame`] folds one depth image into the volume.  Every voxel is
//! visited once; its centre is moved into the camera frame, projected, and
//! compared against the measured depth at the nearest pixel:
//!
//! ```text
//! sdf   = measured_depth − voxel_depth          (camera z)
//! sdf < −τ          → skipped (hidden behind the observed surface)
//! d_obs = min(sdf, τ)
//! voxel = voxel.fuse(d_obs, w_obs, max_weight)
//! ```
//!
//! Voxels never read each other, so z-slabs are handed to rayon workers with
//! no synchronisation.  A [`CancelToken`] is polled before each slab; a
//! cancelled frame leaves every voxel either fully updated or untouched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tsdf_types::{FusionConfig, WeightingPolicy};

use crate::camera::CameraIntrinsics;
use crate::depth::DepthFrame;
use crate::pose::CameraPose;
use crate::transform::Vec3;
use crate::volume::TsdfVolume;

// ────────────────────────────────────────────────────────────────────────────
// Parameters / results
// ────────────────────────────────────────────────────────────────────────────

/// Numeric knobs of the update rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationParams {
    /// `τ` in metres.
    pub truncation: f32,
    pub max_weight: f32,
    pub weighting: WeightingPolicy,
}

impl IntegrationParams {
    /// Truncation, weight cap and weighting policy from a validated config.
    pub fn from_config(config: &FusionConfig) -> Self {
        Self {
            truncation: config.truncation_distance(),
            max_weight: config.max_weight,
            weighting: config.weighting,
        }
    }

    /// Confidence of one measurement at `measured_depth`.
    pub fn observation_weight(&self, measured_depth: f32) -> f32 {
        match self.weighting {
            WeightingPolicy::Uniform => 1.0,
            WeightingPolicy::InverseDepth => (1.0 / measured_depth).min(1.0),
        }
    }
}

/// One voxel's contribution from one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub distance: f32,
    pub weight: f32,
}

/// What a call to [`integrate_frame`] did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationReport {
    pub voxels_updated: usize,
    pub slabs_completed: usize,
    pub slabs_total: usize,
    pub elapsed: Duration,
}

impl IntegrationReport {
    /// True when cancellation stopped the frame before every slab ran.
    pub fn interrupted(&self) -> bool {
        self.slabs_completed < self.slabs_total
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CancelToken
// ────────────────────────────────────────────────────────────────────────────

/// Shared flag that stops an in-flight frame between slabs.
///
/// Clones share the same flag.  The session clears it once a frame has
/// finished, so a cancel raised between frames stops the next one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.  Slabs already running finish; the rest are skipped.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested since the last [`clear`](Self::clear).
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Re-arm the token for the next frame.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Kernel
// ────────────────────────────────────────────────────────────────────────────

/// Observation for a point already expressed in the camera frame, or `None`
/// when the point is behind the camera, outside the image, over an invalid
/// pixel, or more than `τ` behind the measured surface.
pub fn observe(
    point_in_camera: Vec3,
    camera: &CameraIntrinsics,
    depth: &DepthFrame,
    params: &IntegrationParams,
) -> Option<Observation> {
    let projected = camera.project(point_in_camera)?;
    let (col, row) = camera.pixel_at(&projected)?;
    let measured = depth.get(col, row)?;

    let sdf = measured - projected.depth;
    if sdf < -params.truncation {
        return None;
    }
    Some(Observation {
        distance: sdf.min(params.truncation),
        weight: params.observation_weight(measured),
    })
}

/// Fuse `depth` seen from `pose` into `volume`.
///
/// The caller guarantees that `depth` matches `camera`'s image size; pixels
/// outside the frame are treated as invalid either way.
pub fn integrate_frame(
    volume: &mut TsdfVolume,
    camera: &CameraIntrinsics,
    depth: &DepthFrame,
    pose: &CameraPose,
    params: &IntegrationParams,
    cancel: &CancelToken,
) -> IntegrationReport {
    let started = Instant::now();
    let [dx, dy, dz] = volume.dims();
    let voxel_size = volume.voxel_size();
    let slab_len = volume.slab_len();
    let to_camera = pose.volume_to_camera.to_rigid();

    let per_slab: Vec<Option<usize>> = volume
        .voxels_mut()
        .par_chunks_mut(slab_len)
        .enumerate()
        .map(|(iz, slab)| {
            if cancel.is_cancelled() {
                return None;
            }
            let z = (iz as f32 + 0.5) * voxel_size;
            let mut updated = 0usize;
            for iy in 0..dy {
                let y = (iy as f32 + 0.5) * voxel_size;
                let row = &mut slab[iy * dx..(iy + 1) * dx];
                for (ix, voxel) in row.iter_mut().enumerate() {
                    let center = Vec3::new((ix as f32 + 0.5) * voxel_size, y, z);
                    let Some(obs) = observe(to_camera.apply(center), camera, depth, params) else {
                        continue;
                    };
                    *voxel = voxel.fuse(obs.distance, obs.weight, params.max_weight);
                    updated += 1;
                }
            }
            Some(updated)
        })
        .collect();

    IntegrationReport {
        voxels_updated: per_slab.iter().flatten().sum(),
        slabs_completed: per_slab.iter().filter(|s| s.is_some()).count(),
        slabs_total: dz,
        elapsed: started.elapsed(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
