//! Layers, layer stacks, and compositors.

use glam::{Vec2, Vec3, Vec4};

use super::ObjectKey;

/// Shadow algorithm selection for a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowTechnique {
    /// No shadows.
    #[default]
    Unshadowed,
    /// Single-pass screen-space shadows.
    ScreenSpace,
    /// Conventional shadow mapping.
    ShadowMap,
    /// Moment shadow mapping.
    MomentShadowMap,
}

/// A renderer resource: camera plus rendering parameters.
#[derive(Debug, Clone, Default)]
pub struct RendererAttrs {
    /// The camera to render with, once set. Counted reference.
    pub camera: Option<ObjectKey>,
    /// Shadow algorithm.
    pub shadow_technique: ShadowTechnique,
    /// Render debug visualization on top of the content.
    pub enable_debugging: bool,
    /// Disable clipping for debugging purposes.
    pub disable_clipping: bool,
}

/// A layer composed onto a display: rendered content plus placement.
#[derive(Debug, Clone)]
pub struct LayerAttrs {
    /// The renderer producing this layer's content, if any. Counted
    /// reference.
    pub renderer: Option<ObjectKey>,
    /// Size in pixels; a layer with an empty size is not drawable.
    pub size: Vec2,
    /// Placement within the hardware layer, in pixels.
    pub translation: Vec3,
    /// Solid color modulating the layer.
    pub color: Vec4,
    /// Whether the layer is known to be fully opaque.
    pub opaque: bool,
    /// The layer stack currently holding this layer (weak back-reference).
    pub layer_stack: Option<ObjectKey>,
}

impl LayerAttrs {
    /// Creates an empty, undrawable layer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            renderer: None,
            size: Vec2::ZERO,
            translation: Vec3::ZERO,
            color: Vec4::ONE,
            opaque: false,
            layer_stack: None,
        }
    }

    /// A layer is drawable iff it has a renderer and a non-empty size.
    #[must_use]
    pub fn is_drawable(&self) -> bool {
        self.renderer.is_some() && self.size.x > 0.0 && self.size.y > 0.0
    }
}

impl Default for LayerAttrs {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered set of layers.
#[derive(Debug, Clone, Default)]
pub struct LayerStackAttrs {
    /// Layers bottom to top. Counted references.
    pub layers: Vec<ObjectKey>,
}

/// Binds a layer stack to a swapchain target.
#[derive(Debug, Clone, Default)]
pub struct CompositorAttrs {
    /// The layer stack being composed, if set. Counted reference.
    pub layer_stack: Option<ObjectKey>,
    /// Whether this compositor targets the physical display.
    pub is_display_compositor: bool,
}
