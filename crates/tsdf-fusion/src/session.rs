//! Reconstruction session.
//!
//! A [`Session`] owns one volume and everything needed to feed it: the
//! validated [`FusionConfig`], camera intrinsics, the pose adapter, the
//! motion gate and the frame counters.
//!
//! ```text
//! Uninitialized ──initialize()──▶ Ready ──integrate()──▶ Integrating ──▶ Ready
//!        └────────────reset()───────▲
//! ```
//!
//! Every call to [`Session::integrate`] returns a [`FrameOutcome`].  Frames
//! are checked in a fixed order and the first failing check decides the skip
//! reason:
//!
//! 1. volume allocated
//! 2. image size equals `cols × rows`
//! 3. pose frames and values (see [`PoseAdapter::adapt`])
//! 4. stamp not older than the last accepted frame
//! 5. camera moved at least `min_translation` since the last accepted frame
//!
//! A skipped frame never touches the volume.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use tsdf_types::{ConfigError, FusionConfig, SkipKind, SkipReason};

use crate::camera::CameraIntrinsics;
use crate::depth::DepthFrame;
use crate::extract::{self, PointCloud, TriangleMesh};
use crate::integrate::{CancelToken, IntegrationParams, IntegrationReport, integrate_frame};
use crate::pose::{CameraPose, PoseAdapter, PoseSource, StampedTransform};
use crate::raycast::{self, RaycastParams, RaycastView, VirtualCamera};
use crate::transform::Vec3;
use crate::volume::{self, TsdfVolume, VolumeInfo};

// ────────────────────────────────────────────────────────────────────────────
// Outcomes and counters
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Integrating,
}

/// Result of offering one depth frame to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Integrated(IntegrationReport),
    /// The cancel token fired mid-frame; only the listed slabs were updated.
    Interrupted(IntegrationReport),
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn is_integrated(&self) -> bool {
        matches!(self, FrameOutcome::Integrated(_))
    }

    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            FrameOutcome::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Lifetime frame counters.  Survive [`Session::reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub received: u64,
    pub integrated: u64,
    pub interrupted: u64,
    pub skipped: BTreeMap<SkipKind, u64>,
}

impl SessionStats {
    pub fn skipped(&self, kind: SkipKind) -> u64 {
        self.skipped.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_skipped(&self) -> u64 {
        self.skipped.values().sum()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

pub struct Session {
    config: FusionConfig,
    camera: CameraIntrinsics,
    adapter: PoseAdapter,
    params: IntegrationParams,
    raycast_params: RaycastParams,
    volume: Option<TsdfVolume>,
    state: SessionState,
    cancel: CancelToken,
    last_position: Option<Vec3>,
    last_stamp: Option<DateTime<Utc>>,
    stats: SessionStats,
}

impl Session {
    /// Validate `config` and prepare a session.  The voxel grid is not
    /// allocated until [`initialize`](Self::initialize) or
    /// [`reset`](Self::reset).
    pub fn new(config: FusionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let camera = CameraIntrinsics::from_config(&config)?;
        let adapter = PoseAdapter::new(config.tsdf_frame_id.clone(), volume::origin_transform(&config)?);
        Ok(Self {
            camera,
            adapter,
            params: IntegrationParams::from_config(&config),
            raycast_params: RaycastParams::from_config(&config),
            volume: None,
            state: SessionState::Uninitialized,
            cancel: CancelToken::new(),
            last_position: None,
            last_stamp: None,
            stats: SessionStats::default(),
            config,
        })
    }

    /// Allocate the volume.  A no-op when already initialised.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Allocation`] when the grid does not fit in memory.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.volume.is_some() {
            return Ok(());
        }
        let vol = TsdfVolume::from_config(&self.config)?;
        info!(
            frame_id = %self.config.tsdf_frame_id,
            dims = ?vol.dims(),
            voxel_size = vol.voxel_size(),
            truncation = vol.truncation(),
            "TSDF volume allocated"
        );
        self.volume = Some(vol);
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Return to an empty volume and forget motion/stamp history.
    /// Counters are kept.
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        match self.volume.as_mut() {
            Some(vol) => vol.reset(),
            None => self.initialize()?,
        }
        self.last_position = None;
        self.last_stamp = None;
        self.state = SessionState::Ready;
        info!(frame_id = %self.config.tsdf_frame_id, "TSDF volume reset");
        Ok(())
    }

    /// The validated configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraIntrinsics {
        &self.camera
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Snapshot of the frame counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    /// The allocated volume, if any.
    pub fn volume(&self) -> Option<&TsdfVolume> {
        self.volume.as_ref()
    }

    /// Volume metadata, `None` before initialisation.
    pub fn volume_info(&self) -> Option<VolumeInfo> {
        self.volume.as_ref().map(|v| v.info(&self.config.tsdf_frame_id))
    }

    /// Handle for cancelling the frame being integrated, or the next one
    /// when none is in flight.  Safe to call from another thread or a signal
    /// handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Fuse one depth frame taken from `pose`.
    pub fn integrate(&mut self, frame: &DepthFrame, pose: &StampedTransform) -> FrameOutcome {
        self.stats.received += 1;
        match self.admit(frame, |adapter| adapter.adapt(pose, frame.frame_id())) {
            Ok(camera_pose) => self.fuse(frame, &camera_pose),
            Err(reason) => self.skip(frame, reason),
        }
    }

    /// Like [`integrate`](Self::integrate) but looks the pose up from
    /// `source` (`tsdf_frame_id ← frame.frame_id()` at the frame stamp).
    pub fn integrate_from(&mut self, frame: &DepthFrame, source: &dyn PoseSource) -> FrameOutcome {
        self.stats.received += 1;
        let admitted = self.admit(frame, |adapter| {
            adapter.lookup_and_adapt(source, frame.frame_id(), frame.stamp())
        });
        match admitted {
            Ok(camera_pose) => self.fuse(frame, &camera_pose),
            Err(reason) => self.skip(frame, reason),
        }
    }

    fn admit(
        &self,
        frame: &DepthFrame,
        resolve_pose: impl FnOnce(&PoseAdapter) -> Result<CameraPose, SkipReason>,
    ) -> Result<CameraPose, SkipReason> {
        if self.volume.is_none() {
            return Err(SkipReason::NotInitialized);
        }
        if frame.width() != self.config.cols || frame.height() != self.config.rows {
            return Err(SkipReason::DimensionMismatch {
                expected_cols: self.config.cols,
                expected_rows: self.config.rows,
                actual_cols: frame.width(),
                actual_rows: frame.height(),
            });
        }

        let camera_pose = resolve_pose(&self.adapter)?;

        if let Some(last) = self.last_stamp
            && frame.stamp() < last
        {
            return Err(SkipReason::StaleFrame {
                last,
                received: frame.stamp(),
            });
        }

        let min = self.config.min_translation;
        if min > 0.0
            && let Some(previous) = self.last_position
        {
            let translation = (camera_pose.camera_position() - previous).norm();
            if translation < min {
                return Err(SkipReason::InsufficientMotion { translation });
            }
        }

        Ok(camera_pose)
    }

    fn fuse(&mut self, frame: &DepthFrame, pose: &CameraPose) -> FrameOutcome {
        let Some(vol) = self.volume.as_mut() else {
            return self.skip(frame, SkipReason::NotInitialized);
        };

        self.state = SessionState::Integrating;
        let report = integrate_frame(vol, &self.camera, frame, pose, &self.params, &self.cancel);
        self.state = SessionState::Ready;
        // A cancel raised before slab work started belongs to this frame too.
        self.cancel.clear();

        // Voxels from an interrupted frame are in the volume too, so it
        // still advances the gate and the stamp.
        self.last_position = Some(pose.camera_position());
        self.last_stamp = Some(frame.stamp());

        if report.interrupted() {
            self.stats.interrupted += 1;
            warn!(
                camera_frame = %frame.frame_id(),
                slabs_completed = report.slabs_completed,
                slabs_total = report.slabs_total,
                "integration interrupted"
            );
            FrameOutcome::Interrupted(report)
        } else {
            self.stats.integrated += 1;
            debug!(
                camera_frame = %frame.frame_id(),
                voxels_updated = report.voxels_updated,
                elapsed_ms = report.elapsed.as_secs_f64() * 1e3,
                "frame integrated"
            );
            FrameOutcome::Integrated(report)
        }
    }

    fn skip(&mut self, frame: &DepthFrame, reason: SkipReason) -> FrameOutcome {
        *self.stats.skipped.entry(reason.kind()).or_insert(0) += 1;
        warn!(
            camera_frame = %frame.frame_id(),
            stamp = %frame.stamp(),
            reason = %reason,
            "depth frame skipped"
        );
        FrameOutcome::Skipped(reason)
    }

    /// Triangle mesh of the current model; empty before initialisation.
    pub fn extract_mesh(&self) -> TriangleMesh {
        let frame_id = &self.config.tsdf_frame_id;
        let mesh = match &self.volume {
            Some(vol) => extract::extract_mesh(vol, frame_id),
            None => TriangleMesh {
                frame_id: frame_id.clone(),
                ..TriangleMesh::default()
            },
        };
        info!(
            vertices = mesh.vertices.len(),
            triangles = mesh.triangles.len(),
            "mesh extracted"
        );
        mesh
    }

    /// Oriented surface points of the current model.
    pub fn extract_points(&self) -> PointCloud {
        let frame_id = &self.config.tsdf_frame_id;
        let cloud = match &self.volume {
            Some(vol) => extract::extract_points(vol, frame_id, self.raycast_params.gradient_delta),
            None => PointCloud {
                frame_id: frame_id.clone(),
                points: Vec::new(),
            },
        };
        info!(points = cloud.len(), "point cloud extracted");
        cloud
    }

    /// Render the model from `camera`, or `None` before initialisation.
    pub fn raycast(&self, camera: &VirtualCamera) -> Option<RaycastView> {
        let vol = self.volume.as_ref()?;
        Some(raycast::raycast(vol, camera, &self.raycast_params, &self.config.tsdf_frame_id))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SharedSession
// ────────────────────────────────────────────────────────────────────────────

/// A session shared between an integrating thread and readers.
///
/// Integration takes the write lock for the whole frame, so extraction never
/// observes a half-updated voxel.  A poisoned lock is recovered: every voxel
/// is written in one assignment, so the grid is consistent even after a
/// panic.
#[derive(Clone)]
pub struct SharedSession(Arc<RwLock<Session>>);

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(RwLock::new(session)))
    }

    /// Read access for callers that need more than the helpers below.
    pub fn with_read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    pub fn with_write<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    pub fn integrate(&self, frame: &DepthFrame, pose: &StampedTransform) -> FrameOutcome {
        self.with_write(|s| s.integrate(frame, pose))
    }

    pub fn extract_mesh(&self) -> TriangleMesh {
        self.with_read(Session::extract_mesh)
    }

    pub fn extract_points(&self) -> PointCloud {
        self.with_read(Session::extract_points)
    }

    pub fn stats(&self) -> SessionStats {
        self.with_read(Session::stats)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{FrameGraph, Quaternion, Transform3D};
    use chrono::{Duration, TimeZone};
    use tsdf_types::CameraIntrinsicParams;

    /// 10×10×10 grid of 0.1 m voxels, wide 10×10 camera.
    fn config() -> FusionConfig {
        FusionConfig {
            camera_intrinsic_params: CameraIntrinsicParams {
                fx: 10.0,
                fy: 10.0,
                cx: 4.5,
                cy: 4.5,
            },
            cols: 10,
            rows: 10,
            volume_resolution: 0.1,
            volume_x: 10,
            volume_y: 10,
            volume_z: 10,
            ..FusionConfig::default()
        }
    }

    fn ready() -> Session {
        let mut s = Session::new(config()).unwrap();
        s.initialize().unwrap();
        s
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn frame(secs: i64, depth: f32) -> DepthFrame {
        DepthFrame::constant("camera", t(secs), 10, 10, depth)
    }

    fn pose_at(secs: i64, x: f32, y: f32, z: f32) -> StampedTransform {
        StampedTransform::new("tsdf_origin", "camera", t(secs), Transform3D::from_translation(Vec3::new(x, y, z)))
    }

    /// Camera half a metre in front of the grid; a 1 m constant frame puts
    /// the surface at z = 0.5.
    fn front_pose(secs: i64) -> StampedTransform {
        pose_at(secs, 0.5, 0.5, -0.5)
    }

    fn voxels(s: &Session) -> Vec<crate::volume::Voxel> {
        s.volume().unwrap().voxels().to_vec()
    }

    // ── Lifecycle ──

    #[test]
    fn new_rejects_invalid_config() {
        let mut cfg = config();
        cfg.volume_resolution = 0.0;
        assert!(matches!(Session::new(cfg), Err(ConfigError::InvalidResolution(_))));
    }

    #[test]
    fn uninitialized_session_skips_frames() {
        let mut s = Session::new(config()).unwrap();
        assert_eq!(s.state(), SessionState::Uninitialized);
        assert!(s.volume_info().is_none());

        let outcome = s.integrate(&frame(0, 1.0), &front_pose(0));
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::NotInitialized));
        let stats = s.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.skipped(SkipKind::NotInitialized), 1);

        assert!(s.extract_mesh().is_empty());
        assert_eq!(s.extract_points().frame_id, "tsdf_origin");
        assert!(s.raycast(&VirtualCamera {
            intrinsics: *s.camera(),
            camera_to_reference: Transform3D::identity(),
        })
        .is_none());
    }

    #[test]
    fn initialize_reports_volume_info() {
        let s = ready();
        assert_eq!(s.state(), SessionState::Ready);
        let info = s.volume_info().unwrap();
        assert_eq!(info.dims, [10, 10, 10]);
        assert_eq!(info.observed_voxels, 0);
        assert!((info.truncation - 0.2).abs() < 1e-6);
    }

    #[test]
    fn reset_is_idempotent_and_keeps_counters() {
        let mut s = ready();
        let fresh = voxels(&s);
        assert!(s.integrate(&frame(0, 1.0), &front_pose(0)).is_integrated());
        assert_ne!(voxels(&s), fresh);

        s.reset().unwrap();
        assert_eq!(voxels(&s), fresh);
        s.reset().unwrap();
        assert_eq!(voxels(&s), fresh);
        assert_eq!(s.state(), SessionState::Ready);
        assert_eq!(s.stats().integrated, 1);

        // History is cleared: an older stamp at the same pose is accepted.
        assert!(s.integrate(&frame(-5, 1.0), &front_pose(-5)).is_integrated());
    }

    #[test]
    fn reset_allocates_an_uninitialized_session() {
        let mut s = Session::new(config()).unwrap();
        s.reset().unwrap();
        assert_eq!(s.state(), SessionState::Ready);
        assert!(s.volume().is_some());
    }

    // ── Integration ──

    #[test]
    fn plane_frame_builds_a_surface() {
        let mut s = ready();
        let outcome = s.integrate(&frame(0, 1.0), &front_pose(0));
        let FrameOutcome::Integrated(report) = outcome else {
            panic!("expected integration, got {outcome:?}");
        };
        assert!(report.voxels_updated > 0);
        assert_eq!(report.slabs_completed, 10);

        let vol = s.volume().unwrap();
        let tau = vol.truncation();
        for v in vol.voxels().iter().filter(|v| v.is_observed()) {
            assert!(v.distance >= -tau - 1e-6 && v.distance <= tau + 1e-6);
        }
        // Voxel centres at z = 0.45 / 0.55 straddle the surface at z = 0.5.
        assert!((vol.at(5, 5, 4).distance - 0.05).abs() < 1e-5);
        assert!((vol.at(5, 5, 5).distance + 0.05).abs() < 1e-5);

        let points = s.extract_points();
        assert_eq!(points.len(), 100);
        for p in &points.points {
            assert!((p.position.z - 0.5).abs() < 1e-4);
        }

        let mesh = s.extract_mesh();
        assert!(!mesh.is_empty());
        assert_eq!(mesh.frame_id, "tsdf_origin");
        for v in &mesh.vertices {
            assert!((v.z - 0.5).abs() < 1e-4);
        }
    }

    #[test]
    fn raycast_sees_the_integrated_plane() {
        let mut s = ready();
        s.integrate(&frame(0, 1.0), &front_pose(0));
        let view = s
            .raycast(&VirtualCamera {
                intrinsics: *s.camera(),
                camera_to_reference: front_pose(0).transform,
            })
            .unwrap();
        let hit = view.hit(5, 5).unwrap();
        assert!((hit.depth - 1.0).abs() < 1e-3, "depth {}", hit.depth);
        assert!(hit.normal.z < -0.99);
    }

    #[test]
    fn frame_order_does_not_change_the_result() {
        // (depth, camera position)
        let a = (1.0, Vec3::new(0.5, 0.5, -0.5));
        let b = (0.8, Vec3::new(0.3, 0.5, -0.4));

        let run = |order: [(f32, Vec3); 2]| {
            let mut s = ready();
            for (i, (depth, p)) in order.into_iter().enumerate() {
                let secs = i as i64;
                assert!(s.integrate(&frame(secs, depth), &pose_at(secs, p.x, p.y, p.z)).is_integrated());
            }
            voxels(&s)
        };

        assert_eq!(run([a, b]), run([b, a]));
    }

    #[test]
    fn far_away_and_backward_poses_stay_in_bounds() {
        let mut s = ready();
        let far = pose_at(0, -50.0, 80.0, -1000.0);
        assert!(s.integrate(&frame(0, 2000.0), &far).is_integrated());

        let backwards = StampedTransform::new(
            "tsdf_origin",
            "camera",
            t(1),
            Transform3D::new(
                Vec3::new(0.5, 0.5, -0.5),
                Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), std::f32::consts::PI),
            ),
        );
        assert!(s.integrate(&frame(1, 1.0), &backwards).is_integrated());

        let vol = s.volume().unwrap();
        let tau = vol.truncation();
        assert!(vol.voxels().iter().all(|v| v.distance.is_finite() && v.distance.abs() <= tau + 1e-6));
    }

    // ── Skips ──

    #[test]
    fn rejected_frame_leaves_volume_bit_identical() {
        let mut s = ready();
        s.integrate(&frame(0, 1.0), &front_pose(0));
        let before = s.volume().unwrap().snapshot();
        let stats = s.stats();

        let wrong_size = DepthFrame::constant("camera", t(1), 8, 10, 1.0);
        let outcome = s.integrate(&wrong_size, &pose_at(1, 0.4, 0.5, -0.5));
        assert_eq!(
            outcome,
            FrameOutcome::Skipped(SkipReason::DimensionMismatch {
                expected_cols: 10,
                expected_rows: 10,
                actual_cols: 8,
                actual_rows: 10,
            })
        );

        let after = voxels(&s);
        assert!(
            before
                .voxels()
                .iter()
                .zip(&after)
                .all(|(a, b)| a.distance.to_bits() == b.distance.to_bits() && a.weight.to_bits() == b.weight.to_bits())
        );
        assert_eq!(s.stats().integrated, stats.integrated);
        assert_eq!(s.stats().skipped(SkipKind::DimensionMismatch), 1);
    }

    #[test]
    fn motion_gate_skips_a_stationary_camera() {
        let mut s = ready();
        assert!(s.integrate(&frame(0, 1.0), &front_pose(0)).is_integrated());

        let outcome = s.integrate(&frame(1, 1.0), &front_pose(1));
        assert_eq!(outcome.skip_reason().map(SkipReason::kind), Some(SkipKind::InsufficientMotion));

        assert!(s.integrate(&frame(2, 1.0), &pose_at(2, 0.5, 0.5, -0.49)).is_integrated());
        assert_eq!(s.stats().integrated, 2);
    }

    #[test]
    fn disabled_motion_gate_accepts_repeats() {
        let mut cfg = config();
        cfg.min_translation = 0.0;
        let mut s = Session::new(cfg).unwrap();
        s.initialize().unwrap();
        assert!(s.integrate(&frame(0, 1.0), &front_pose(0)).is_integrated());
        assert!(s.integrate(&frame(1, 1.0), &front_pose(1)).is_integrated());
        assert_eq!(s.volume().unwrap().at(5, 5, 5).weight, 2.0);
    }

    #[test]
    fn stale_frame_is_skipped() {
        let mut s = ready();
        s.integrate(&frame(10, 1.0), &front_pose(10));
        let outcome = s.integrate(&frame(5, 1.0), &pose_at(5, 0.4, 0.5, -0.5));
        assert_eq!(
            outcome,
            FrameOutcome::Skipped(SkipReason::StaleFrame {
                last: t(10),
                received: t(5),
            })
        );
    }

    #[test]
    fn pose_frame_mismatches_are_skipped() {
        let mut s = ready();
        let wrong_parent = StampedTransform::new("map", "camera", t(0), Transform3D::identity());
        assert_eq!(
            s.integrate(&frame(0, 1.0), &wrong_parent),
            FrameOutcome::Skipped(SkipReason::FrameMismatch {
                expected: "tsdf_origin".into(),
                actual: "map".into(),
            })
        );

        let wrong_child = StampedTransform::new("tsdf_origin", "ir_camera", t(0), Transform3D::identity());
        assert_eq!(
            s.integrate(&frame(0, 1.0), &wrong_child).skip_reason().map(SkipReason::kind),
            Some(SkipKind::SourceFrameMismatch)
        );

        let stats = s.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.total_skipped(), 2);
        assert_eq!(s.volume().unwrap().observed_count(), 0);
    }

    #[test]
    fn degenerate_rotation_is_invalid_pose() {
        let mut s = ready();
        let pose = StampedTransform::new(
            "tsdf_origin",
            "camera",
            t(0),
            Transform3D::new(Vec3::zero(), Quaternion::new(0.0, 0.0, 0.0, 0.0)),
        );
        assert_eq!(
            s.integrate(&frame(0, 1.0), &pose),
            FrameOutcome::Skipped(SkipReason::InvalidPose)
        );
    }

    // ── Pose sources ──

    #[test]
    fn integrate_from_frame_graph() {
        let mut graph = FrameGraph::new();
        graph.set_transform("tsdf_origin", "base_link", Transform3D::from_translation(Vec3::new(0.5, 0.5, -0.6)));
        graph.set_transform("base_link", "camera", Transform3D::from_translation(Vec3::new(0.0, 0.0, 0.1)));

        let mut s = ready();
        assert!(s.integrate_from(&frame(0, 1.0), &graph).is_integrated());
        assert!((s.volume().unwrap().at(5, 5, 4).distance - 0.05).abs() < 1e-5);

        let orphan = DepthFrame::constant("rear_camera", t(1), 10, 10, 1.0);
        assert_eq!(
            s.integrate_from(&orphan, &graph).skip_reason().map(SkipReason::kind),
            Some(SkipKind::MissingPose)
        );
    }

    // ── Cancellation / sharing ──

    #[test]
    fn pending_cancel_interrupts_the_next_frame() {
        let mut s = ready();
        let before = voxels(&s);
        s.cancel_token().cancel();

        // A skipped frame leaves the cancel pending.
        let wrong_size = DepthFrame::constant("camera", t(0), 8, 10, 1.0);
        assert!(s.integrate(&wrong_size, &front_pose(0)).skip_reason().is_some());
        assert!(s.cancel_token().is_cancelled());

        let FrameOutcome::Interrupted(report) = s.integrate(&frame(0, 1.0), &front_pose(0)) else {
            panic!("expected the pending cancel to interrupt the frame");
        };
        assert_eq!(report.slabs_completed, 0);
        assert_eq!(voxels(&s), before);
        assert!(!s.cancel_token().is_cancelled());
        assert_eq!(s.stats().interrupted, 1);

        // Consumed: the following frame runs to completion.
        assert!(s.integrate(&frame(1, 1.0), &pose_at(1, 0.6, 0.5, -0.5)).is_integrated());
    }

    #[test]
    fn shared_session_serialises_readers_and_writer() {
        let shared = SharedSession::new(ready());
        let writer = shared.clone();
        let handle = std::thread::spawn(move || writer.integrate(&frame(0, 1.0), &front_pose(0)));
        assert!(handle.join().unwrap().is_integrated());

        assert_eq!(shared.stats().integrated, 1);
        assert_eq!(shared.extract_points().len(), 100);
        assert!(!shared.extract_mesh().is_empty());
        assert_eq!(shared.with_read(|s| s.state()), SessionState::Ready);
    }
}
