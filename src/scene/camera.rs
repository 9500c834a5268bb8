//! Camera resources.

use glam::{Mat4, Vec3};

use crate::dispatch::Nanos;

use super::ObjectKey;

/// Projection state for a camera.
#[derive(Debug, Clone)]
pub enum CameraProjection {
    /// A single perspective projection derived from the vertical field of
    /// view (the renderer supplies aspect and depth range).
    Perspective {
        /// Vertical field of view in radians. 0 selects an orthographic
        /// projection.
        fovy: f32,
    },
    /// Explicit per-eye projections for stereo rendering. Each eye
    /// renders to one half of the output image.
    Stereo {
        /// Projection for the left eye.
        left_projection: Mat4,
        /// Projection for the right eye.
        right_projection: Mat4,
    },
}

/// A pose buffer attached to a camera for head-mounted use.
///
/// The core only threads the reference and timing parameters through to
/// the renderer, which latches the most recent pose whose timestamp is at
/// or before the frame's target presentation time.
#[derive(Debug, Clone)]
pub struct PoseBufferBinding {
    /// The Buffer resource holding poses.
    pub buffer: ObjectKey,
    /// Number of pose entries in the buffer.
    pub num_entries: u32,
    /// Timestamp of entry 0, in nanoseconds.
    pub base_time: Nanos,
    /// Time delta between consecutive entries, in nanoseconds.
    pub time_interval: Nanos,
}

/// A camera viewing one Scene.
#[derive(Debug, Clone)]
pub struct CameraAttrs {
    /// The Scene this camera renders. Counted reference.
    pub scene: ObjectKey,
    /// Eye position in world space.
    pub eye_position: Vec3,
    /// Point the eye looks at.
    pub eye_look_at: Vec3,
    /// Up vector.
    pub eye_up: Vec3,
    /// Projection state. Stereo cameras are created with
    /// [`CameraProjection::Stereo`] and keep it for life.
    pub projection: CameraProjection,
    /// Optional pose buffer for HMD rendering.
    pub pose_buffer: Option<PoseBufferBinding>,
}

impl CameraAttrs {
    /// Creates a monoscopic camera viewing `scene`.
    #[must_use]
    pub fn new(scene: ObjectKey) -> Self {
        Self {
            scene,
            eye_position: Vec3::ZERO,
            eye_look_at: Vec3::new(0.0, 0.0, -1.0),
            eye_up: Vec3::Y,
            projection: CameraProjection::Perspective { fovy: 0.0 },
            pose_buffer: None,
        }
    }

    /// Creates a stereo camera viewing `scene` with identity projections.
    #[must_use]
    pub fn new_stereo(scene: ObjectKey) -> Self {
        Self {
            projection: CameraProjection::Stereo {
                left_projection: Mat4::IDENTITY,
                right_projection: Mat4::IDENTITY,
            },
            ..Self::new(scene)
        }
    }

    /// Returns `true` for a stereo camera.
    #[must_use]
    pub fn is_stereo(&self) -> bool {
        matches!(self.projection, CameraProjection::Stereo { .. })
    }
}
