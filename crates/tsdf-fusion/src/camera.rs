//! Pinhole camera model.
//!
//! Pure functions over [`CameraIntrinsics`]: projection of camera-frame
//! points into pixel space and back-projection of pixels into rays/points.
//! The camera looks down `+z`; `x` grows with the column index and `y` with
//! the row index.

use tsdf_types::{ConfigError, FusionConfig};

use crate::transform::Vec3;

/// A projected point: continuous pixel coordinates plus depth along `+z`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImagePoint {
    pub u: f32,
    pub v: f32,
    pub depth: f32,
}

/// Focal lengths / principal point in pixels and image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    /// Construct and validate intrinsics.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidIntrinsics`] for non-positive or non-finite
    /// focal lengths, [`ConfigError::InvalidImageSize`] for an empty image.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: u32, height: u32) -> Result<Self, ConfigError> {
        let finite = fx.is_finite() && fy.is_finite() && cx.is_finite() && cy.is_finite();
        if !finite || fx <= 0.0 || fy <= 0.0 {
            return Err(ConfigError::InvalidIntrinsics { fx, fy });
        }
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidImageSize {
                cols: width,
                rows: height,
            });
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    /// Intrinsics and image size from `camera_intrinsic_params`, `cols`
    /// and `rows`.
    pub fn from_config(config: &FusionConfig) -> Result<Self, ConfigError> {
        let p = &config.camera_intrinsic_params;
        Self::new(p.fx, p.fy, p.cx, p.cy, config.cols, config.rows)
    }

    /// `width × height`.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pinhole projection.  `None` when the point is on or behind the image
    /// plane.
    pub fn project(&self, p: Vec3) -> Option<ImagePoint> {
        if !(p.z > 0.0) {
            return None;
        }
        let inv_z = 1.0 / p.z;
        Some(ImagePoint {
            u: self.fx * p.x * inv_z + self.cx,
            v: self.fy * p.y * inv_z + self.cy,
            depth: p.z,
        })
    }

    /// Camera-frame point at `depth` along `+z` through pixel `(u, v)`.
    pub fn back_project(&self, u: f32, v: f32, depth: f32) -> Vec3 {
        Vec3::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }

    /// Unit ray through pixel `(u, v)`.
    pub fn ray_direction(&self, u: f32, v: f32) -> Vec3 {
        let p = self.back_project(u, v, 1.0);
        // z = 1, so the norm is never zero.
        p * (1.0 / p.norm())
    }

    /// Nearest pixel `(col, row)` for a projected point, `None` outside the
    /// image.
    pub fn pixel_at(&self, p: &ImagePoint) -> Option<(u32, u32)> {
        let col = p.u.round();
        let row = p.v.round();
        if col >= 0.0 && row >= 0.0 && col < self.width as f32 && row < self.height as f32 {
            Some((col as u32, row as u32))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CameraIntrinsics {
        CameraIntrinsics::new(100.0, 100.0, 5.0, 5.0, 10, 10).unwrap()
    }

    #[test]
    fn rejects_invalid_intrinsics() {
        assert!(CameraIntrinsics::new(0.0, 100.0, 5.0, 5.0, 10, 10).is_err());
        assert!(CameraIntrinsics::new(100.0, -1.0, 5.0, 5.0, 10, 10).is_err());
        assert!(CameraIntrinsics::new(f32::NAN, 100.0, 5.0, 5.0, 10, 10).is_err());
        assert!(matches!(
            CameraIntrinsics::new(100.0, 100.0, 5.0, 5.0, 0, 10),
            Err(ConfigError::InvalidImageSize { cols: 0, rows: 10 })
        ));
    }

    #[test]
    fn from_config_uses_node_parameters() {
        let cam = CameraIntrinsics::from_config(&FusionConfig::default()).unwrap();
        assert_eq!(cam.width, 640);
        assert_eq!(cam.height, 480);
        assert!((cam.cx - 320.0).abs() < f32::EPSILON);
        assert_eq!(cam.pixel_count(), 640 * 480);
    }

    #[test]
    fn principal_axis_projects_to_principal_point() {
        let p = small().project(Vec3::new(0.0, 0.0, 2.0)).unwrap();
        assert!((p.u - 5.0).abs() < 1e-6);
        assert!((p.v - 5.0).abs() < 1e-6);
        assert!((p.depth - 2.0).abs() < 1e-6);
    }

    #[test]
    fn behind_camera_does_not_project() {
        assert!(small().project(Vec3::new(0.0, 0.0, 0.0)).is_none());
        assert!(small().project(Vec3::new(0.1, 0.0, -1.0)).is_none());
    }

    #[test]
    fn back_project_inverts_project() {
        let cam = small();
        let p = Vec3::new(0.012, -0.02, 0.8);
        let ip = cam.project(p).unwrap();
        let back = cam.back_project(ip.u, ip.v, ip.depth);
        assert!((back - p).norm() < 1e-6);
    }

    #[test]
    fn ray_direction_is_unit_and_forward() {
        let d = small().ray_direction(9.0, 0.0);
        assert!((d.norm() - 1.0).abs() < 1e-6);
        assert!(d.z > 0.0 && d.x > 0.0 && d.y < 0.0);
    }

    #[test]
    fn pixel_at_rounds_and_bounds_checks() {
        let cam = small();
        let at = |u, v| cam.pixel_at(&ImagePoint { u, v, depth: 1.0 });
        assert_eq!(at(4.6, 5.4), Some((5, 5)));
        assert_eq!(at(-0.4, 0.0), Some((0, 0)));
        assert_eq!(at(9.4, 9.4), Some((9, 9)));
        assert_eq!(at(9.6, 0.0), None);
        assert_eq!(at(-0.6, 0.0), None);
    }
}
