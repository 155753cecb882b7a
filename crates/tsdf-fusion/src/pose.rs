//! Pose/frame adapter.
//!
//! Turns an externally supplied, frame-tagged rigid transform into the
//! camera-to-volume pose the integration kernel consumes.  Every check here
//! produces a [`SkipReason`] rather than an error: a bad pose drops one
//! frame, it never ends the session.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tsdf_types::SkipReason;

use crate::transform::{FrameGraph, Transform3D, Vec3};

/// A rigid transform tagged with the frames it connects.
///
/// Maps points expressed in `child_frame` (the camera) into `parent_frame`
/// (expected to be the volume's `tsdf_frame_id`).
#[derive(Debug, Clone, PartialEq)]
pub struct StampedTransform {
    pub parent_frame: String,
    pub child_frame: String,
    pub stamp: DateTime<Utc>,
    pub transform: Transform3D,
}

impl StampedTransform {
    pub fn new(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        stamp: DateTime<Utc>,
        transform: Transform3D,
    ) -> Self {
        Self {
            parent_frame: parent_frame.into(),
            child_frame: child_frame.into(),
            stamp,
            transform,
        }
    }
}

/// A validated camera pose relative to the voxel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// T_volume_camera: camera-frame points into volume-local coordinates.
    pub camera_to_volume: Transform3D,
    /// T_camera_volume.
    pub volume_to_camera: Transform3D,
}

impl CameraPose {
    pub fn from_camera_to_volume(camera_to_volume: Transform3D) -> Self {
        Self {
            camera_to_volume,
            volume_to_camera: camera_to_volume.inverse(),
        }
    }

    /// Camera optical centre in volume-local coordinates.
    pub fn camera_position(&self) -> Vec3 {
        self.camera_to_volume.translation
    }
}

/// Failure to produce a transform for a requested frame pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PoseLookupError(pub String);

/// Anything that can answer "where was `source` relative to `target` at
/// `stamp`?" – a transform buffer, a robot's forward kinematics, a log.
pub trait PoseSource {
    /// Returns T_target_source as a [`StampedTransform`] with
    /// `parent_frame == target` and `child_frame == source`.
    fn lookup(&self, target: &str, source: &str, stamp: DateTime<Utc>) -> Result<StampedTransform, PoseLookupError>;
}

impl PoseSource for FrameGraph {
    /// Latest-value lookup: the graph keeps no history, so `stamp` is copied
    /// onto the result unchanged.
    fn lookup(&self, target: &str, source: &str, stamp: DateTime<Utc>) -> Result<StampedTransform, PoseLookupError> {
        FrameGraph::lookup(self, target, source)
            .map(|t| StampedTransform::new(target, source, stamp, t))
            .ok_or_else(|| PoseLookupError(format!("no transform chain from {source} to {target}")))
    }
}

/// Validates frame identifiers and converts reference-frame camera poses into
/// volume-local ones.
#[derive(Debug, Clone)]
pub struct PoseAdapter {
    reference_frame: String,
    /// T_volume_reference.
    reference_to_volume: Transform3D,
}

impl PoseAdapter {
    /// `volume_origin` is T_reference_volume.
    pub fn new(reference_frame: impl Into<String>, volume_origin: Transform3D) -> Self {
        Self {
            reference_frame: reference_frame.into(),
            reference_to_volume: volume_origin.inverse(),
        }
    }

    pub fn reference_frame(&self) -> &str {
        &self.reference_frame
    }

    /// Adapt `pose` for a depth frame captured in `camera_frame`.
    ///
    /// # Errors
    ///
    /// - [`SkipReason::FrameMismatch`] – the pose targets another frame.
    /// - [`SkipReason::SourceFrameMismatch`] – the pose is for another camera.
    /// - [`SkipReason::InvalidPose`] – non-finite values or a degenerate
    ///   rotation.
    pub fn adapt(&self, pose: &StampedTransform, camera_frame: &str) -> Result<CameraPose, SkipReason> {
        if pose.parent_frame != self.reference_frame {
            return Err(SkipReason::FrameMismatch {
                expected: self.reference_frame.clone(),
                actual: pose.parent_frame.clone(),
            });
        }
        if pose.child_frame != camera_frame {
            return Err(SkipReason::SourceFrameMismatch {
                depth_frame: camera_frame.to_string(),
                pose_frame: pose.child_frame.clone(),
            });
        }
        if !pose.transform.translation.is_finite() {
            return Err(SkipReason::InvalidPose);
        }
        let rotation = pose.transform.rotation.normalized().ok_or(SkipReason::InvalidPose)?;
        let camera_to_reference = Transform3D::new(pose.transform.translation, rotation);

        Ok(CameraPose::from_camera_to_volume(
            self.reference_to_volume.compose(camera_to_reference),
        ))
    }

    /// Look up the pose for `camera_frame` at `stamp` and adapt it.
    ///
    /// A failed lookup is reported as [`SkipReason::MissingPose`]; there is
    /// no retry.
    pub fn lookup_and_adapt(
        &self,
        source: &dyn PoseSource,
        camera_frame: &str,
        stamp: DateTime<Utc>,
    ) -> Result<CameraPose, SkipReason> {
        let pose = source
            .lookup(&self.reference_frame, camera_frame, stamp)
            .map_err(|e| SkipReason::MissingPose {
                camera_frame: camera_frame.to_string(),
                details: e.to_string(),
            })?;
        self.adapt(&pose, camera_frame)
    }
}
