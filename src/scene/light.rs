//! Light resources.

use glam::Vec3;

use super::ObjectKey;

/// What kind of light a light resource is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Uniform illumination with no direction.
    Ambient,
    /// Parallel rays along a direction.
    Directional,
    /// Emission from a point with distance falloff.
    Point,
}

/// A light attachable to a Scene.
#[derive(Debug, Clone)]
pub struct LightAttrs {
    /// The light's kind; fixed at creation.
    pub kind: LightKind,
    /// Linear RGB color (doubles as intensity).
    pub color: Vec3,
    /// Direction of a directional light.
    pub direction: Vec3,
    /// Position of a point light.
    pub position: Vec3,
    /// Distance falloff of a point light.
    pub falloff: f32,
    /// The Scene this light is attached to, if any.
    pub scene: Option<ObjectKey>,
}

impl LightAttrs {
    /// Creates a light of `kind` with white color and default geometry.
    #[must_use]
    pub fn new(kind: LightKind) -> Self {
        Self {
            kind,
            color: Vec3::ONE,
            direction: Vec3::new(0.0, 0.0, -1.0),
            position: Vec3::ZERO,
            falloff: 1.0,
            scene: None,
        }
    }

    /// Short name for error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self.kind {
            LightKind::Ambient => "AmbientLight",
            LightKind::Directional => "DirectionalLight",
            LightKind::Point => "PointLight",
        }
    }
}
