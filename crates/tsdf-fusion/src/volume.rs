//! Dense TSDF voxel grid.
//!
//! [`TsdfVolume`] owns a fixed `X × Y × Z` grid of [`Voxel`]s stored x-fastest
//! in one contiguous buffer, so a z-slab (`X · Y` voxels) is a contiguous
//! chunk that the integration kernel can hand to one worker.
//!
//! Coordinates come in two flavours:
//!
//! - *volume-local*: metres from the grid corner, axis-aligned with the grid;
//!   voxel `(i, j, k)` has its centre at `(i + 0.5, j + 0.5, k + 0.5) · s`.
//! - *reference*: the `tsdf_frame_id` frame, reached through the fixed
//!   `origin` transform.
//!
//! Index access is bounds-checked and never fails: reads outside the grid
//! return an unobserved voxel and writes outside the grid are dropped.

use serde::Serialize;
use tsdf_types::{ConfigError, FusionConfig};

use crate::transform::{Quaternion, Transform3D, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Voxel
// ────────────────────────────────────────────────────────────────────────────

/// One TSDF cell: truncated signed distance and accumulated confidence.
///
/// Positive distance is free space between the camera and the surface,
/// negative is behind the surface.  `weight == 0` means never observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    pub distance: f32,
    pub weight: f32,
}

impl Voxel {
    /// The reset state: outside-truncated and never observed.
    pub const fn unobserved(truncation: f32) -> Self {
        Self {
            distance: truncation,
            weight: 0.0,
        }
    }

    /// `weight > 0`: at least one frame has seen this voxel.
    pub fn is_observed(&self) -> bool {
        self.weight > 0.0
    }

    /// Fold one observation into the running weighted average.
    ///
    /// `distance' = (distance·weight + d_obs·w_obs) / (weight + w_obs)` and
    /// `weight' = min(weight + w_obs, max_weight)`.  Below the cap the fold
    /// is order-independent, which is what lets every voxel update run
    /// without synchronisation.
    pub fn fuse(self, d_obs: f32, w_obs: f32, max_weight: f32) -> Self {
        let total = self.weight + w_obs;
        if total <= 0.0 {
            return self;
        }
        Self {
            distance: (self.distance * self.weight + d_obs * w_obs) / total,
            weight: total.min(max_weight),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a bounding box from two opposite corners (normalised so that
    /// `min ≤ max` per axis).
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Slab test: the parameter interval `[t_enter, t_exit]` (clipped to
    /// `t ≥ 0`) over which `origin + t·dir` is inside the box.
    pub fn intersect_ray(&self, origin: Vec3, dir: Vec3) -> Option<(f32, f32)> {
        let mut t_enter = 0.0_f32;
        let mut t_exit = f32::INFINITY;
        for axis in 0..3 {
            let o = origin.axis(axis);
            let d = dir.axis(axis);
            let lo = self.min.axis(axis);
            let hi = self.max.axis(axis);
            if d.abs() < 1e-12 {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                if a <= b { (a, b) } else { (b, a) }
            };
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }
        Some((t_enter, t_exit))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// VolumeInfo
// ────────────────────────────────────────────────────────────────────────────

/// Metadata exposed to callers and logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeInfo {
    pub frame_id: String,
    pub dims: [u32; 3],
    pub voxel_size: f32,
    pub truncation: f32,
    /// Physical size of the grid in metres.
    pub extent: [f32; 3],
    pub observed_voxels: usize,
    pub memory_bytes: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// TsdfVolume
// ────────────────────────────────────────────────────────────────────────────

/// Fixed-size TSDF grid with a rigid pose in the reference frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfVolume {
    dims: [usize; 3],
    voxel_size: f32,
    truncation: f32,
    origin: Transform3D,
    voxels: Vec<Voxel>,
}

impl TsdfVolume {
    /// Allocate a volume in the reset state.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidVolumeDims`], [`ConfigError::InvalidResolution`]
    /// or [`ConfigError::InvalidTunable`] for bad geometry, and
    /// [`ConfigError::Allocation`] when the grid does not fit in memory.
    pub fn new(dims: [u32; 3], voxel_size: f32, truncation: f32, origin: Transform3D) -> Result<Self, ConfigError> {
        if dims.contains(&0) {
            return Err(ConfigError::InvalidVolumeDims {
                x: dims[0],
                y: dims[1],
                z: dims[2],
            });
        }
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(ConfigError::InvalidResolution(voxel_size));
        }
        if !(truncation.is_finite() && truncation > 0.0) {
            return Err(ConfigError::InvalidTunable {
                name: "truncation",
                value: truncation,
            });
        }

        let total = dims[0] as u64 * dims[1] as u64 * dims[2] as u64;
        let count = usize::try_from(total).map_err(|_| ConfigError::Allocation { voxels: total })?;
        let mut voxels = Vec::new();
        voxels
            .try_reserve_exact(count)
            .map_err(|_| ConfigError::Allocation { voxels: total })?;
        voxels.resize(count, Voxel::unobserved(truncation));

        Ok(Self {
            dims: dims.map(|d| d as usize),
            voxel_size,
            truncation,
            origin,
            voxels,
        })
    }

    /// Allocate the volume described by `config` (which must already be
    /// validated for the rotation to be meaningful).
    pub fn from_config(config: &FusionConfig) -> Result<Self, ConfigError> {
        Self::new(
            [config.volume_x, config.volume_y, config.volume_z],
            config.volume_resolution,
            config.truncation_distance(),
            origin_transform(config)?,
        )
    }

    /// Every voxel back to `weight = 0`, `distance = +τ`.
    pub fn reset(&mut self) {
        let blank = Voxel::unobserved(self.truncation);
        self.voxels.fill(blank);
    }

    /// Voxel counts along x, y and z.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Edge length of one voxel in metres.
    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// `τ` in metres.
    pub fn truncation(&self) -> f32 {
        self.truncation
    }

    /// T_reference_volume.
    pub fn origin(&self) -> Transform3D {
        self.origin
    }

    /// Total number of voxels.
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Owned copy of the grid, for callers that need a stable view while
    /// integration continues.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Flat, x-fastest view of the grid.
    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub(crate) fn voxels_mut(&mut self) -> &mut [Voxel] {
        &mut self.voxels
    }

    /// Voxels per z-slab.
    pub fn slab_len(&self) -> usize {
        self.dims[0] * self.dims[1]
    }

    fn index(&self, ix: i64, iy: i64, iz: i64) -> Option<usize> {
        let [dx, dy, dz] = self.dims;
        if ix < 0 || iy < 0 || iz < 0 {
            return None;
        }
        let (x, y, z) = (ix as usize, iy as usize, iz as usize);
        (x < dx && y < dy && z < dz).then(|| x + y * dx + z * dx * dy)
    }

    /// Read a voxel; out-of-range reads return the unobserved voxel.
    pub fn at(&self, ix: i64, iy: i64, iz: i64) -> Voxel {
        match self.index(ix, iy, iz) {
            Some(i) => self.voxels[i],
            None => Voxel::unobserved(self.truncation),
        }
    }

    /// Overwrite a voxel; out-of-range writes are ignored.
    pub fn set(&mut self, ix: i64, iy: i64, iz: i64, voxel: Voxel) {
        if let Some(i) = self.index(ix, iy, iz) {
            self.voxels[i] = voxel;
        }
    }

    /// Apply `f` to a voxel in place; out-of-range indices are ignored.
    pub fn update(&mut self, ix: i64, iy: i64, iz: i64, f: impl FnOnce(Voxel) -> Voxel) {
        if let Some(i) = self.index(ix, iy, iz) {
            self.voxels[i] = f(self.voxels[i]);
        }
    }

    /// Volume-local centre of voxel `(ix, iy, iz)`.
    pub fn voxel_center(&self, ix: usize, iy: usize, iz: usize) -> Vec3 {
        Vec3::new(ix as f32 + 0.5, iy as f32 + 0.5, iz as f32 + 0.5) * self.voxel_size
    }

    /// Centre of voxel `(ix, iy, iz)` expressed in the reference frame.
    pub fn voxel_center_in_reference(&self, ix: usize, iy: usize, iz: usize) -> Vec3 {
        self.origin.apply(self.voxel_center(ix, iy, iz))
    }

    /// Voxel containing a volume-local point, `None` outside the grid.
    pub fn local_to_index(&self, p: Vec3) -> Option<[usize; 3]> {
        let g = p * (1.0 / self.voxel_size);
        if !g.is_finite() {
            return None;
        }
        let (ix, iy, iz) = (g.x.floor() as i64, g.y.floor() as i64, g.z.floor() as i64);
        self.index(ix, iy, iz)
            .map(|_| [ix as usize, iy as usize, iz as usize])
    }

    /// Local axis-aligned extent `[0, dims · voxel_size]`.
    pub fn bounds(&self) -> Aabb {
        let s = self.voxel_size;
        Aabb::new(
            Vec3::zero(),
            Vec3::new(
                self.dims[0] as f32 * s,
                self.dims[1] as f32 * s,
                self.dims[2] as f32 * s,
            ),
        )
    }

    /// Trilinearly interpolated distance at a volume-local point.
    ///
    /// `None` unless all eight surrounding voxel centres are inside the grid
    /// and observed, so interpolation never mixes in unknown space.
    pub fn sample_trilinear(&self, p: Vec3) -> Option<f32> {
        let g = p * (1.0 / self.voxel_size) - Vec3::new(0.5, 0.5, 0.5);
        if !g.is_finite() {
            return None;
        }
        let base = [g.x.floor(), g.y.floor(), g.z.floor()];
        let (fx, fy, fz) = (g.x - base[0], g.y - base[1], g.z - base[2]);
        let (bx, by, bz) = (base[0] as i64, base[1] as i64, base[2] as i64);

        let mut corners = [0.0_f32; 8];
        for (n, corner) in corners.iter_mut().enumerate() {
            let (ox, oy, oz) = ((n & 1) as i64, ((n >> 1) & 1) as i64, ((n >> 2) & 1) as i64);
            let i = self.index(bx + ox, by + oy, bz + oz)?;
            let v = self.voxels[i];
            if !v.is_observed() {
                return None;
            }
            *corner = v.distance;
        }

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let x00 = lerp(corners[0], corners[1], fx);
        let x10 = lerp(corners[2], corners[3], fx);
        let x01 = lerp(corners[4], corners[5], fx);
        let x11 = lerp(corners[6], corners[7], fx);
        let y0 = lerp(x00, x10, fy);
        let y1 = lerp(x01, x11, fy);
        Some(lerp(y0, y1, fz))
    }

    /// Central-difference gradient of the interpolated field at a
    /// volume-local point, `delta` metres either side.
    pub fn gradient(&self, p: Vec3, delta: f32) -> Option<Vec3> {
        let axis = |d: Vec3| -> Option<f32> {
            let hi = self.sample_trilinear(p + d)?;
            let lo = self.sample_trilinear(p - d)?;
            Some((hi - lo) / (2.0 * delta))
        };
        Some(Vec3::new(
            axis(Vec3::new(delta, 0.0, 0.0))?,
            axis(Vec3::new(0.0, delta, 0.0))?,
            axis(Vec3::new(0.0, 0.0, delta))?,
        ))
    }

    /// Number of voxels with `weight > 0`.
    pub fn observed_count(&self) -> usize {
        self.voxels.iter().filter(|v| v.is_observed()).count()
    }

    /// Serialisable summary tagged with the reference frame.
    pub fn info(&self, frame_id: &str) -> VolumeInfo {
        let b = self.bounds().max;
        VolumeInfo {
            frame_id: frame_id.to_string(),
            dims: self.dims.map(|d| d as u32),
            voxel_size: self.voxel_size,
            truncation: self.truncation,
            extent: [b.x, b.y, b.z],
            observed_voxels: self.observed_count(),
            memory_bytes: self.voxels.len() * std::mem::size_of::<Voxel>(),
        }
    }
}

/// T_reference_volume from `config.volume_origin`, rotation normalised.
pub fn origin_transform(config: &FusionConfig) -> Result<Transform3D, ConfigError> {
    let o = &config.volume_origin;
    let [w, x, y, z] = o.rotation;
    let rotation = Quaternion::new(w, x, y, z)
        .normalized()
        .ok_or(ConfigError::InvalidVolumeOrigin)?;
    Ok(Transform3D::new(Vec3::from_array(o.translation), rotation))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
