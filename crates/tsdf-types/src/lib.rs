//! `tsdf-types` – shared configuration and error taxonomy.
//!
//! Everything a reconstruction session is parameterised with lives in
//! [`FusionConfig`], an immutable value passed at construction.  Failures are
//! split in two families:
//!
//! - [`ConfigError`] – fatal; the session never reaches `Ready`.
//! - [`SkipReason`] – one depth frame is dropped; the stream continues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole intrinsics in pixels, as read from `camera_intrinsic_params`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsicParams {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Default for CameraIntrinsicParams {
    fn default() -> Self {
        Self {
            fx: 550.0,
            fy: 550.0,
            cx: 320.0,
            cy: 240.0,
        }
    }
}

/// How much a single depth observation contributes to a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingPolicy {
    /// Every observation counts as `1`.
    #[default]
    Uniform,
    /// `min(1, 1 / depth)`: far measurements are noisier and count less.
    InverseDepth,
}

impl std::fmt::Display for WeightingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightingPolicy::Uniform => write!(f, "uniform"),
            WeightingPolicy::InverseDepth => write!(f, "inverse_depth"),
        }
    }
}

/// Rigid pose of the volume's corner relative to `tsdf_frame_id`.
///
/// `rotation` is a quaternion in `(w, x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeOrigin {
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
}

fn identity_rotation() -> [f32; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

impl Default for VolumeOrigin {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: identity_rotation(),
        }
    }
}

/// Immutable parameters of one reconstruction session.
///
/// Field names follow the parameter names of the fusion node
/// (`tsdf_frame_id`, `camera_intrinsic_params`, `cols`, `rows`,
/// `volume_resolution`, `volume_x/y/z`).  Changing any of them requires a new
/// session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Reference frame the volume (and every extracted surface) lives in.
    #[serde(default = "default_frame_id")]
    pub tsdf_frame_id: String,

    #[serde(default)]
    pub camera_intrinsic_params: CameraIntrinsicParams,

    /// Depth image width in pixels.
    #[serde(default = "default_cols")]
    pub cols: u32,

    /// Depth image height in pixels.
    #[serde(default = "default_rows")]
    pub rows: u32,

    /// Edge length of one voxel in metres.
    #[serde(default = "default_resolution")]
    pub volume_resolution: f32,

    #[serde(default = "default_volume_xy")]
    pub volume_x: u32,
    #[serde(default = "default_volume_xy")]
    pub volume_y: u32,
    #[serde(default = "default_volume_z")]
    pub volume_z: u32,

    /// Truncation band `τ` expressed in voxel widths.
    #[serde(default = "default_truncation_factor")]
    pub truncation_factor: f32,

    /// Upper bound on the accumulated per-voxel weight.
    #[serde(default = "default_max_weight")]
    pub max_weight: f32,

    /// Frames whose camera moved less than this (metres) since the last
    /// accepted frame are skipped.  `0` disables the gate.
    #[serde(default = "default_min_translation")]
    pub min_translation: f32,

    #[serde(default)]
    pub weighting: WeightingPolicy,

    /// Raycast marching step, in voxel widths.
    #[serde(default = "default_quarter")]
    pub raycast_step_factor: f32,

    /// Finite-difference step for surface normals, in voxel widths.
    #[serde(default = "default_quarter")]
    pub gradient_delta_factor: f32,

    #[serde(default)]
    pub volume_origin: VolumeOrigin,
}

fn default_frame_id() -> String {
    "tsdf_origin".to_string()
}
fn default_cols() -> u32 {
    640
}
fn default_rows() -> u32 {
    480
}
fn default_resolution() -> f32 {
    0.001
}
fn default_volume_xy() -> u32 {
    640
}
fn default_volume_z() -> u32 {
    192
}
fn default_truncation_factor() -> f32 {
    2.0
}
fn default_max_weight() -> f32 {
    50.0
}
fn default_min_translation() -> f32 {
    0.00001
}
fn default_quarter() -> f32 {
    0.25
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            tsdf_frame_id: default_frame_id(),
            camera_intrinsic_params: CameraIntrinsicParams::default(),
            cols: default_cols(),
            rows: default_rows(),
            volume_resolution: default_resolution(),
            volume_x: default_volume_xy(),
            volume_y: default_volume_xy(),
            volume_z: default_volume_z(),
            truncation_factor: default_truncation_factor(),
            max_weight: default_max_weight(),
            min_translation: default_min_translation(),
            weighting: WeightingPolicy::default(),
            raycast_step_factor: default_quarter(),
            gradient_delta_factor: default_quarter(),
            volume_origin: VolumeOrigin::default(),
        }
    }
}

impl FusionConfig {
    /// Truncation distance `τ` in metres.
    pub fn truncation_distance(&self) -> f32 {
        self.truncation_factor * self.volume_resolution
    }

    /// Total number of voxels in the grid.
    pub fn voxel_count(&self) -> u64 {
        self.volume_x as u64 * self.volume_y as u64 * self.volume_z as u64
    }

    /// Check every invariant a session relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tsdf_frame_id.trim().is_empty() {
            return Err(ConfigError::EmptyFrameId);
        }

        let intr = &self.camera_intrinsic_params;
        let finite = [intr.fx, intr.fy, intr.cx, intr.cy]
            .iter()
            .all(|v| v.is_finite());
        if !finite || intr.fx <= 0.0 || intr.fy <= 0.0 {
            return Err(ConfigError::InvalidIntrinsics {
                fx: intr.fx,
                fy: intr.fy,
            });
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(ConfigError::InvalidImageSize {
                cols: self.cols,
                rows: self.rows,
            });
        }

        if self.volume_x == 0 || self.volume_y == 0 || self.volume_z == 0 {
            return Err(ConfigError::InvalidVolumeDims {
                x: self.volume_x,
                y: self.volume_y,
                z: self.volume_z,
            });
        }
        if !(self.volume_resolution.is_finite() && self.volume_resolution > 0.0) {
            return Err(ConfigError::InvalidResolution(self.volume_resolution));
        }

        check_positive("truncation_factor", self.truncation_factor)?;
        check_positive("max_weight", self.max_weight)?;
        check_positive("raycast_step_factor", self.raycast_step_factor)?;
        check_positive("gradient_delta_factor", self.gradient_delta_factor)?;
        if !(self.min_translation.is_finite() && self.min_translation >= 0.0) {
            return Err(ConfigError::InvalidTunable {
                name: "min_translation",
                value: self.min_translation,
            });
        }

        let origin = &self.volume_origin;
        let norm_sq: f32 = origin.rotation.iter().map(|c| c * c).sum();
        let finite = origin
            .translation
            .iter()
            .chain(origin.rotation.iter())
            .all(|v| v.is_finite());
        if !finite || norm_sq < 1e-6 {
            return Err(ConfigError::InvalidVolumeOrigin);
        }

        Ok(())
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTunable { name, value })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Fatal construction-time failure: the session cannot start.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tsdf_frame_id must not be empty")]
    EmptyFrameId,

    #[error("invalid camera intrinsics: fx={fx}, fy={fy} (focal lengths must be finite and > 0)")]
    InvalidIntrinsics { fx: f32, fy: f32 },

    #[error("invalid image size {cols}x{rows}")]
    InvalidImageSize { cols: u32, rows: u32 },

    #[error("invalid volume dimensions {x}x{y}x{z}")]
    InvalidVolumeDims { x: u32, y: u32, z: u32 },

    #[error("volume_resolution must be > 0, got {0}")]
    InvalidResolution(f32),

    #[error("{name} must be finite and positive, got {value}")]
    InvalidTunable { name: &'static str, value: f32 },

    #[error("volume_origin must be finite with a non-zero rotation quaternion")]
    InvalidVolumeOrigin,

    #[error("cannot allocate {voxels} voxels")]
    Allocation { voxels: u64 },

    #[error("failed to read config at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Discriminant of [`SkipReason`], used as a counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    NotInitialized,
    DimensionMismatch,
    MissingPose,
    FrameMismatch,
    SourceFrameMismatch,
    InvalidPose,
    StaleFrame,
    InsufficientMotion,
}

/// Why a depth frame was dropped.  Never fatal to the session.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkipReason {
    #[error("session volume has not been allocated")]
    NotInitialized,

    #[error("depth frame is {actual_cols}x{actual_rows}, expected {expected_cols}x{expected_rows}")]
    DimensionMismatch {
        expected_cols: u32,
        expected_rows: u32,
        actual_cols: u32,
        actual_rows: u32,
    },

    #[error("no pose for camera frame {camera_frame}: {details}")]
    MissingPose {
        camera_frame: String,
        details: String,
    },

    #[error("pose targets frame {actual}, volume lives in {expected}")]
    FrameMismatch { expected: String, actual: String },

    #[error("pose source frame {pose_frame} does not match depth frame {depth_frame}")]
    SourceFrameMismatch {
        depth_frame: String,
        pose_frame: String,
    },

    #[error("pose is not a finite rigid transform")]
    InvalidPose,

    #[error("frame stamped {received} is older than last accepted frame {last}")]
    StaleFrame {
        last: DateTime<Utc>,
        received: DateTime<Utc>,
    },

    #[error("camera moved {translation} m since the last accepted frame")]
    InsufficientMotion { translation: f32 },
}

impl SkipReason {
    pub fn kind(&self) -> SkipKind {
        match self {
            SkipReason::NotInitialized => SkipKind::NotInitialized,
            SkipReason::DimensionMismatch { .. } => SkipKind::DimensionMismatch,
            SkipReason::MissingPose { .. } => SkipKind::MissingPose,
            SkipReason::FrameMismatch { .. } => SkipKind::FrameMismatch,
            SkipReason::SourceFrameMismatch { .. } => SkipKind::SourceFrameMismatch,
            SkipReason::InvalidPose => SkipKind::InvalidPose,
            SkipReason::StaleFrame { .. } => SkipKind::StaleFrame,
            SkipReason::InsufficientMotion { .. } => SkipKind::InsufficientMotion,
        }
    }
}
