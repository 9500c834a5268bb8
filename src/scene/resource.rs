//! The resource variant and its GPU-opaque kinds.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Quat, Vec3};

use crate::session::image_pipe::ImagePipe;

use super::camera::CameraAttrs;
use super::compositor::{CompositorAttrs, LayerAttrs, LayerStackAttrs, RendererAttrs};
use super::light::LightAttrs;
use super::material::MaterialAttrs;
use super::node::{EventMask, NodeAttrs};
use super::shape::ShapeAttrs;
use super::view::ViewAttrs;
use super::{ResourceId, SessionId};

/// GPU memory, opaque to the core beyond its size.
#[derive(Debug, Clone, Copy)]
pub struct MemoryAttrs {
    /// Allocation size in bytes.
    pub size: u64,
}

/// A GPU buffer backed by a Memory resource.
#[derive(Debug, Clone, Copy)]
pub struct BufferAttrs {
    /// The backing Memory resource. Counted reference.
    pub memory: super::ObjectKey,
    /// Buffer size in bytes.
    pub size: u64,
}

/// A GPU image, opaque to the core beyond its geometry.
#[derive(Debug, Clone, Copy)]
pub struct ImageAttrs {
    /// The backing Memory resource. Counted reference.
    pub memory: super::ObjectKey,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The value held by a Variable resource.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableValue {
    /// A scalar.
    Float(f32),
    /// A three-component vector.
    Vector3(Vec3),
    /// A rotation quaternion.
    Quaternion(Quat),
}

/// A Variable resource: a value plus the node properties bound to it.
#[derive(Debug, Clone)]
pub struct VariableAttrs {
    /// Current value.
    pub value: VariableValue,
    /// Nodes whose properties follow this variable (weak back-references;
    /// pruned when a binding is overwritten or the node dies).
    pub bindings: Vec<(super::ObjectKey, super::node::NodeProperty)>,
}

/// The tagged variant of everything a session can create.
#[derive(Debug)]
pub enum ResourceKind {
    /// Any node kind, including Scene and ViewHolder.
    Node(NodeAttrs),
    /// A shape for ShapeNodes.
    Shape(ShapeAttrs),
    /// A color/texture material.
    Material(MaterialAttrs),
    /// GPU memory.
    Memory(MemoryAttrs),
    /// A GPU buffer.
    Buffer(BufferAttrs),
    /// A GPU image.
    Image(ImageAttrs),
    /// A stream of client-produced images.
    ImagePipe(Rc<RefCell<ImagePipe>>),
    /// A camera (mono or stereo).
    Camera(CameraAttrs),
    /// A renderer binding a camera to layer content.
    Renderer(RendererAttrs),
    /// A composed layer.
    Layer(LayerAttrs),
    /// An ordered set of layers.
    LayerStack(LayerStackAttrs),
    /// Binds a layer stack to a swapchain.
    Compositor(CompositorAttrs),
    /// A light attachable to a Scene.
    Light(LightAttrs),
    /// The importing side of a cross-session link.
    View(ViewAttrs),
    /// A client-settable value that can drive node properties.
    Variable(VariableAttrs),
}

impl ResourceKind {
    /// Short kind name for error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Node(node) => node.kind.name(),
            Self::Shape(shape) => shape.name(),
            Self::Material(_) => "Material",
            Self::Memory(_) => "Memory",
            Self::Buffer(_) => "Buffer",
            Self::Image(_) => "Image",
            Self::ImagePipe(_) => "ImagePipe",
            Self::Camera(camera) => {
                if camera.is_stereo() {
                    "StereoCamera"
                } else {
                    "Camera"
                }
            }
            Self::Renderer(_) => "Renderer",
            Self::Layer(_) => "Layer",
            Self::LayerStack(_) => "LayerStack",
            Self::Compositor(compositor) => {
                if compositor.is_display_compositor {
                    "DisplayCompositor"
                } else {
                    "Compositor"
                }
            }
            Self::Light(light) => light.name(),
            Self::View(_) => "View",
            Self::Variable(_) => "Variable",
        }
    }
}

/// One entity in the arena, globally identified by
/// `(session_id, resource_id)`.
#[derive(Debug)]
pub struct Resource {
    /// The session that created this resource.
    pub session_id: SessionId,
    /// The id the session knows it by. Stays meaningful (for events and
    /// errors) even after the session releases its mapping.
    pub resource_id: ResourceId,
    /// Optional client-provided debug label.
    pub label: String,
    /// Event subscriptions.
    pub event_mask: EventMask,
    /// The typed payload.
    pub kind: ResourceKind,
}

impl Resource {
    /// Creates a resource owned by `session_id` with the given payload.
    #[must_use]
    pub fn new(session_id: SessionId, resource_id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            session_id,
            resource_id,
            label: String::new(),
            event_mask: EventMask::empty(),
            kind,
        }
    }

    /// Short kind name for error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    /// The node payload, if this is a node.
    #[must_use]
    pub fn as_node(&self) -> Option<&NodeAttrs> {
        match &self.kind {
            ResourceKind::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Mutable node payload, if this is a node.
    pub fn as_node_mut(&mut self) -> Option<&mut NodeAttrs> {
        match &mut self.kind {
            ResourceKind::Node(node) => Some(node),
            _ => None,
        }
    }
}
