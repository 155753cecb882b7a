//! `tsdf-fusion` – Volumetric Depth Fusion
//!
//! Fuses a stream of posed depth images into a truncated signed distance
//! field (TSDF) and extracts surfaces from it.
//!
//! # Modules
//!
//! - [`transform`] – [`Vec3`], [`Quaternion`], [`Transform3D`] and the
//!   [`FrameGraph`][transform::FrameGraph] used to chain frame-to-frame
//!   transforms.
//! - [`camera`] – [`CameraIntrinsics`]: pinhole projection and
//!   back-projection.
//! - [`depth`] – [`DepthFrame`]: a metric depth image tagged with frame and
//!   stamp.
//! - [`volume`] – [`TsdfVolume`]: the dense voxel grid, trilinear sampling
//!   and gradients.
//! - [`pose`] – [`PoseAdapter`]: turns frame-tagged poses into
//!   camera-to-volume transforms, or a [`SkipReason`][tsdf_types::SkipReason].
//! - [`integrate`] – [`integrate_frame`][integrate::integrate_frame]: the
//!   data-parallel weighted-average update.
//! - [`extract`] – surface nets mesh and oriented point extraction.
//! - [`raycast`] – per-pixel preview rendering from a virtual camera.
//! - [`session`] – [`Session`]: lifecycle, frame admission, counters; and
//!   [`SharedSession`] for reader/writer sharing.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use tsdf_fusion::{DepthFrame, Session, StampedTransform, Transform3D, Vec3};
//! use tsdf_types::{CameraIntrinsicParams, FusionConfig};
//!
//! let config = FusionConfig {
//!     camera_intrinsic_params: CameraIntrinsicParams { fx: 50.0, fy: 50.0, cx: 32.0, cy: 24.0 },
//!     cols: 64,
//!     rows: 48,
//!     volume_resolution: 0.02,
//!     volume_x: 32,
//!     volume_y: 32,
//!     volume_z: 32,
//!     ..FusionConfig::default()
//! };
//! let mut session = Session::new(config).unwrap();
//! session.initialize().unwrap();
//!
//! let now = Utc::now();
//! let frame = DepthFrame::constant("camera", now, 64, 48, 0.5);
//! let pose = StampedTransform::new(
//!     "tsdf_origin",
//!     "camera",
//!     now,
//!     Transform3D::from_translation(Vec3::new(0.32, 0.32, 0.0)),
//! );
//! assert!(session.integrate(&frame, &pose).is_integrated());
//! let _mesh = session.extract_mesh();
//! ```

pub mod camera;
pub mod depth;
pub mod extract;
pub mod integrate;
pub mod pose;
pub mod raycast;
pub mod session;
pub mod transform;
pub mod volume;

pub use camera::CameraIntrinsics;
pub use depth::DepthFrame;
pub use extract::{OrientedPoint, PointCloud, TriangleMesh};
pub use integrate::{CancelToken, IntegrationReport};
pub use pose::{PoseAdapter, PoseSource, StampedTransform};
pub use raycast::{RaycastView, VirtualCamera};
pub use session::{FrameOutcome, Session, SessionState, SessionStats, SharedSession};
pub use transform::{FrameGraph, Quaternion, Transform3D, Vec3};
pub use volume::{TsdfVolume, Voxel};
