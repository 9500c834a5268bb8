//! Node attributes and capabilities.

use bitflags::bitflags;
use glam::Mat4;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::types::{Metrics, Plane3, Transform};
use super::view::ViewHolderAttrs;
use super::ObjectKey;

bitflags! {
    /// Event subscriptions carried by a resource's event mask.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct EventMask: u32 {
        /// Deliver `MetricsChanged` events for this node.
        const METRICS = 1 << 0;
    }
}

bitflags! {
    /// What a node kind is allowed to do.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct NodeCapabilities: u32 {
        /// May have child nodes attached.
        const HAS_CHILDREN  = 1 << 0;
        /// May have part nodes attached.
        const HAS_PARTS     = 1 << 1;
        /// May have its transform set.
        const HAS_TRANSFORM = 1 << 2;
        /// May have clip parameters set.
        const HAS_CLIP      = 1 << 3;
        /// May have its opacity set.
        const HAS_OPACITY   = 1 << 4;
    }
}

/// How a node hangs off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRelation {
    /// An ordinary child.
    Child,
    /// A part: owned geometry that participates in clipping, invisible to
    /// the client-facing child list.
    Part,
    /// Attached on behalf of an imported resource delegate.
    ImportDelegate,
}

/// Whether a node participates in hit testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HitTestBehavior {
    /// Test this node and its subtree normally.
    #[default]
    Default,
    /// Prune this node and its whole subtree from hit testing.
    Suppress,
}

/// Per-kind node payload.
#[derive(Debug, Default)]
pub enum NodeKind {
    /// A plain grouping node.
    #[default]
    Entity,
    /// A node that draws a shape with a material.
    Shape {
        /// The shape resource, if set.
        shape: Option<ObjectKey>,
        /// The material resource, if set.
        material: Option<ObjectKey>,
    },
    /// A node that applies group opacity to its subtree.
    Opacity {
        /// Opacity in `[0, 1]`.
        opacity: f32,
    },
    /// A node whose parts clip its descendants.
    Clip,
    /// The root of a scene; holds the lights.
    Scene {
        /// Ambient light resources.
        ambient_lights: Vec<ObjectKey>,
        /// Directional light resources.
        directional_lights: Vec<ObjectKey>,
        /// Point light resources.
        point_lights: Vec<ObjectKey>,
    },
    /// The phantom node a View hangs its subtree from.
    View {
        /// The owning View resource.
        view: ObjectKey,
    },
    /// The attachment point for a linked View from another session.
    ViewHolder(ViewHolderAttrs),
}

impl NodeKind {
    /// The capability set for this kind.
    #[must_use]
    pub fn capabilities(&self) -> NodeCapabilities {
        match self {
            Self::Entity => {
                NodeCapabilities::HAS_CHILDREN
                    | NodeCapabilities::HAS_PARTS
                    | NodeCapabilities::HAS_TRANSFORM
                    | NodeCapabilities::HAS_CLIP
            }
            Self::Shape { .. } => NodeCapabilities::HAS_TRANSFORM,
            Self::Opacity { .. } => {
                NodeCapabilities::HAS_CHILDREN
                    | NodeCapabilities::HAS_PARTS
                    | NodeCapabilities::HAS_TRANSFORM
                    | NodeCapabilities::HAS_OPACITY
            }
            Self::Clip => NodeCapabilities::HAS_PARTS | NodeCapabilities::HAS_TRANSFORM,
            Self::Scene { .. } => {
                NodeCapabilities::HAS_CHILDREN | NodeCapabilities::HAS_TRANSFORM
            }
            Self::View { .. } => {
                NodeCapabilities::HAS_CHILDREN | NodeCapabilities::HAS_TRANSFORM
            }
            // A ViewHolder accepts exactly one child (its linked View's
            // node); that extra rule is enforced at attach time.
            Self::ViewHolder(_) => {
                NodeCapabilities::HAS_CHILDREN | NodeCapabilities::HAS_TRANSFORM
            }
        }
    }

    /// Short name for error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Entity => "EntityNode",
            Self::Shape { .. } => "ShapeNode",
            Self::Opacity { .. } => "OpacityNode",
            Self::Clip => "ClipNode",
            Self::Scene { .. } => "Scene",
            Self::View { .. } => "ViewNode",
            Self::ViewHolder(_) => "ViewHolder",
        }
    }
}

/// Node properties that can be driven by a Variable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeProperty {
    /// The translation component.
    Translation,
    /// The scale component.
    Scale,
    /// The rotation component.
    Rotation,
    /// The anchor component.
    Anchor,
}

/// The flat attribute bag shared by every node kind.
#[derive(Debug)]
pub struct NodeAttrs {
    /// Per-kind payload and discriminant.
    pub kind: NodeKind,
    /// Local transform.
    pub transform: Transform,
    /// The parent, if attached, and how.
    pub parent: Option<(ObjectKey, ParentRelation)>,
    /// Ordered child nodes.
    pub children: Vec<ObjectKey>,
    /// Ordered part nodes.
    pub parts: Vec<ObjectKey>,
    /// Hit-test tag; 0 means untagged.
    pub tag_value: u32,
    /// Hit-test participation.
    pub hit_test_behavior: HitTestBehavior,
    /// Clip descendants to this node's parts.
    pub clip_to_self: bool,
    /// Additional half-space clip planes.
    pub clip_planes: SmallVec<[Plane3; 2]>,
    /// Cached containing Scene, refreshed on re-parenting.
    pub scene: Option<ObjectKey>,
    /// Cached global transform; valid only when `!global_transform_dirty`.
    pub global_transform: Mat4,
    /// Set when an ancestor transform changed since the cache was filled.
    pub global_transform_dirty: bool,
    /// Last metrics delivered to the client, if subscribed.
    pub reported_metrics: Option<Metrics>,
    /// One-way bindings from Variable resources to node properties.
    pub bound_variables: FxHashMap<NodeProperty, ObjectKey>,
}

impl NodeAttrs {
    /// Creates a node of `kind` with identity transform and no parent.
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            transform: Transform::IDENTITY,
            parent: None,
            children: Vec::new(),
            parts: Vec::new(),
            tag_value: 0,
            hit_test_behavior: HitTestBehavior::Default,
            clip_to_self: false,
            clip_planes: SmallVec::new(),
            scene: None,
            global_transform: Mat4::IDENTITY,
            global_transform_dirty: true,
            reported_metrics: None,
            bound_variables: FxHashMap::default(),
        }
    }

    /// The capability set of this node's kind.
    #[must_use]
    pub fn capabilities(&self) -> NodeCapabilities {
        self.kind.capabilities()
    }

    /// Key of the parent node, if attached.
    #[must_use]
    pub fn parent_key(&self) -> Option<ObjectKey> {
        self.parent.map(|(key, _)| key)
    }

    /// The ViewHolder payload, if this is a ViewHolder node.
    #[must_use]
    pub fn as_view_holder(&self) -> Option<&ViewHolderAttrs> {
        match &self.kind {
            NodeKind::ViewHolder(attrs) => Some(attrs),
            _ => None,
        }
    }

    /// Mutable ViewHolder payload, if this is a ViewHolder node.
    pub fn as_view_holder_mut(&mut self) -> Option<&mut ViewHolderAttrs> {
        match &mut self.kind {
            NodeKind::ViewHolder(attrs) => Some(attrs),
            _ => None,
        }
    }
}
