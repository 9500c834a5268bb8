//! Shape resources and ray intersection.

use super::types::{BoundingBox, Ray};
use super::ObjectKey;

/// A shape drawable by a ShapeNode.
///
/// All planar shapes live in their local z = 0 plane, centered at the
/// origin; intersection distances are parametric in the ray direction.
#[derive(Debug, Clone)]
pub enum ShapeAttrs {
    /// A filled circle of the given radius.
    Circle {
        /// Radius in local units.
        radius: f32,
    },
    /// An axis-aligned rectangle.
    Rectangle {
        /// Full width.
        width: f32,
        /// Full height.
        height: f32,
    },
    /// A rectangle with per-corner rounding.
    RoundedRectangle {
        /// Full width.
        width: f32,
        /// Full height.
        height: f32,
        /// Top-left corner radius.
        top_left_radius: f32,
        /// Top-right corner radius.
        top_right_radius: f32,
        /// Bottom-right corner radius.
        bottom_right_radius: f32,
        /// Bottom-left corner radius.
        bottom_left_radius: f32,
    },
    /// Client-provided mesh geometry. The core only keeps the bounding
    /// box (for hit testing) and references to the backing buffers.
    Mesh {
        /// Index buffer resource, once bound.
        index_buffer: Option<ObjectKey>,
        /// Vertex buffer resource, once bound.
        vertex_buffer: Option<ObjectKey>,
        /// Bounding box of the bound geometry.
        bounding_box: BoundingBox,
    },
}

impl ShapeAttrs {
    /// An unbound mesh shape.
    #[must_use]
    pub fn empty_mesh() -> Self {
        Self::Mesh {
            index_buffer: None,
            vertex_buffer: None,
            bounding_box: BoundingBox::default(),
        }
    }

    /// Intersects `ray` (in the shape's local space) with the shape,
    /// returning the parametric hit distance or `None`.
    #[must_use]
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        match self {
            Self::Circle { radius } => plane_hit(ray).filter(|&t| {
                let p = ray.at(t);
                p.x * p.x + p.y * p.y <= radius * radius
            }),
            Self::Rectangle { width, height } => plane_hit(ray).filter(|&t| {
                let p = ray.at(t);
                p.x.abs() <= width / 2.0 && p.y.abs() <= height / 2.0
            }),
            Self::RoundedRectangle {
                width,
                height,
                top_left_radius,
                top_right_radius,
                bottom_right_radius,
                bottom_left_radius,
            } => plane_hit(ray).filter(|&t| {
                let p = ray.at(t);
                let (half_w, half_h) = (width / 2.0, height / 2.0);
                if p.x.abs() > half_w || p.y.abs() > half_h {
                    return false;
                }
                // Top is -y, matching the screen-space convention of the
                // rest of the pipeline.
                let corner_radius = match (p.x < 0.0, p.y < 0.0) {
                    (true, true) => *top_left_radius,
                    (false, true) => *top_right_radius,
                    (false, false) => *bottom_right_radius,
                    (true, false) => *bottom_left_radius,
                };
                if corner_radius <= 0.0 {
                    return true;
                }
                let dx = (p.x.abs() - (half_w - corner_radius)).max(0.0);
                let dy = (p.y.abs() - (half_h - corner_radius)).max(0.0);
                dx * dx + dy * dy <= corner_radius * corner_radius
            }),
            Self::Mesh { bounding_box, .. } => {
                if bounding_box.is_empty() {
                    None
                } else {
                    bounding_box.intersect(ray)
                }
            }
        }
    }

    /// Short name for error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Circle { .. } => "CircleShape",
            Self::Rectangle { .. } => "RectangleShape",
            Self::RoundedRectangle { .. } => "RoundedRectangleShape",
            Self::Mesh { .. } => "MeshShape",
        }
    }
}

// Distance along `ray` to its z = 0 plane crossing, if it crosses in the
// forward direction.
fn plane_hit(ray: &Ray) -> Option<f32> {
    if ray.direction.z.abs() < f32::EPSILON {
        return None;
    }
    let t = -ray.origin.z / ray.direction.z;
    (t >= 0.0).then_some(t)
}
