//! Shared geometric types.

use glam::{Mat4, Quat, Vec3, Vec4};

/// TRS-plus-anchor transform for scene nodes.
///
/// The anchor shifts the origin that rotation and scale are applied
/// around: the composed matrix is
/// `translate(translation) * translate(anchor) * rotate * scale * translate(-anchor)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Local translation relative to the parent.
    pub translation: Vec3,
    /// Local non-uniform scale.
    pub scale: Vec3,
    /// Local rotation.
    pub rotation: Quat,
    /// Pivot point for rotation and scale.
    pub anchor: Vec3,
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        scale: Vec3::ONE,
        rotation: Quat::IDENTITY,
        anchor: Vec3::ZERO,
    };

    /// Returns `true` if every component is at its identity value.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Composes the transform into a matrix.
    #[must_use]
    pub fn to_mat4(&self) -> Mat4 {
        let mut m = Mat4::from_translation(self.translation + self.anchor);
        m *= Mat4::from_quat(self.rotation);
        m *= Mat4::from_scale(self.scale);
        m *= Mat4::from_translation(-self.anchor);
        m
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A ray in homogeneous coordinates: `origin.w == 1`, `direction.w == 0`,
/// which lets a single `Mat4` multiply transform both.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Ray origin (w = 1).
    pub origin: Vec4,
    /// Ray direction (w = 0). Not necessarily normalized; hit distances
    /// are parametric in this direction.
    pub direction: Vec4,
}

impl Ray {
    /// Builds a ray from an origin point and a direction vector.
    #[must_use]
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin: origin.extend(1.0),
            direction: direction.extend(0.0),
        }
    }

    /// Applies `matrix` to both origin and direction.
    #[must_use]
    pub fn transformed(&self, matrix: Mat4) -> Self {
        Self {
            origin: matrix * self.origin,
            direction: matrix * self.direction,
        }
    }

    /// The point at parametric distance `t`.
    #[must_use]
    pub fn at(&self, t: f32) -> Vec4 {
        self.origin + self.direction * t
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl BoundingBox {
    /// Builds a box from its two corners.
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Returns `true` for a degenerate (zero-volume) box.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min == self.max
    }

    /// Slab test: the parametric distance at which `ray` first enters the
    /// box, or `None` if it misses.
    #[must_use]
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            if direction.abs() < f32::EPSILON {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
            } else {
                let mut t0 = (self.min[axis] - origin) / direction;
                let mut t1 = (self.max[axis] - origin) / direction;
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                t_min = t_min.max(t0);
                t_max = t_max.min(t1);
                if t_min > t_max {
                    return None;
                }
            }
        }
        Some(t_min)
    }
}

/// A half-space used as a clip plane: points `p` with
/// `dot(normal, p) + distance >= 0` are kept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane3 {
    /// Unit plane normal.
    pub normal: Vec3,
    /// Signed distance term.
    pub distance: f32,
}

impl Plane3 {
    /// Builds a half-space from a normal and distance term.
    #[must_use]
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    /// Returns `true` if `point` is on the kept side.
    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        self.normal.dot(point) + self.distance >= 0.0
    }
}

/// Scale metrics reported to nodes subscribed via the metrics event mask.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metrics {
    /// Global x scale factor.
    pub scale_x: f32,
    /// Global y scale factor.
    pub scale_y: f32,
    /// Global z scale factor.
    pub scale_z: f32,
}

impl Metrics {
    /// Extracts per-axis scale factors from a global transform.
    #[must_use]
    pub fn from_global_transform(matrix: &Mat4) -> Self {
        Self {
            scale_x: matrix.x_axis.truncate().length(),
            scale_y: matrix.y_axis.truncate().length(),
            scale_z: matrix.z_axis.truncate().length(),
        }
    }
}
