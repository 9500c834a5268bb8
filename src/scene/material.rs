//! Material resources.

use glam::Vec4;

use super::ObjectKey;

/// A color plus optional texture reference.
#[derive(Debug, Clone)]
pub struct MaterialAttrs {
    /// RGBA color, each channel in `[0, 1]`.
    pub color: Vec4,
    /// Texture source (an Image or ImagePipe resource), if any.
    pub texture: Option<ObjectKey>,
}

impl MaterialAttrs {
    /// An opaque white, untextured material.
    #[must_use]
    pub fn new() -> Self {
        Self {
            color: Vec4::ONE,
            texture: None,
        }
    }
}

impl Default for MaterialAttrs {
    fn default() -> Self {
        Self::new()
    }
}
