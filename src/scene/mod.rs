//! Scene Graph
//!
//! The retained scene model authored by client sessions: typed resource
//! entities (nodes, shapes, materials, cameras, renderers, layers,
//! compositors, lights, views) stored in one arena and wired together by
//! parent/child/part relationships.
//!
//! # Storage
//!
//! All resources live in a single [`ResourceArena`] keyed by
//! [`ObjectKey`] (a generation-checked `slotmap` key). Strong references
//! point downward only — a parent holds a counted reference on each
//! child, a shape node on its shape and material, a layer on its
//! renderer — while upward references (`parent`, `scene`, `layer_stack`)
//! are plain keys whose liveness the arena checks on access. This breaks
//! the reference cycles a pointer-based graph would have.
//!
//! Resources are identified globally by `(SessionId, ResourceId)`. A
//! session's id map holds one reference on each of its resources;
//! releasing the id drops that reference, but the entity persists while
//! anything in the graph still reaches it.
//!
//! # Node kinds
//!
//! Rather than a subtype hierarchy, [`NodeAttrs`] carries a flat
//! attribute bag plus a [`NodeKind`] discriminant; the few polymorphic
//! operations (capability checks, ray intersection) dispatch on the
//! discriminant.

pub mod camera;
pub mod compositor;
pub mod graph;
pub mod hit_test;
pub mod light;
pub mod material;
pub mod node;
pub mod resource;
pub mod shape;
pub mod types;
pub mod view;

pub use camera::{CameraAttrs, CameraProjection, PoseBufferBinding};
pub use compositor::{
    CompositorAttrs, LayerAttrs, LayerStackAttrs, RendererAttrs, ShadowTechnique,
};
pub use graph::{GraphEffect, ResourceArena, SceneGraph};
pub use hit_test::{Hit, HitTester};
pub use light::{LightAttrs, LightKind};
pub use material::MaterialAttrs;
pub use node::{EventMask, HitTestBehavior, NodeAttrs, NodeKind, ParentRelation};
pub use resource::{
    BufferAttrs, ImageAttrs, MemoryAttrs, Resource, ResourceKind, VariableAttrs, VariableValue,
};
pub use shape::ShapeAttrs;
pub use types::{BoundingBox, Metrics, Plane3, Ray, Transform};
pub use view::{ViewAttrs, ViewHolderAttrs, ViewProperties, ViewState};

use slotmap::new_key_type;

new_key_type! {
    /// Generation-checked key into the resource arena.
    pub struct ObjectKey;
}

/// Identifies a client session. Process-unique, never reused.
pub type SessionId = u64;

/// A session-scoped resource id chosen by the client. Id 0 is reserved
/// as "invalid/none".
pub type ResourceId = u32;

/// The reserved "no resource" id.
pub const INVALID_RESOURCE_ID: ResourceId = 0;
