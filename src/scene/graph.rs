//! The resource arena and scene-graph mutations.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use log::warn;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::errors::{SessionError, SessionResult};
use crate::session::event::SessionEvent;

use super::camera::{CameraProjection, PoseBufferBinding};
use super::compositor::ShadowTechnique;
use super::light::LightKind;
use super::node::{
    EventMask, HitTestBehavior, NodeAttrs, NodeCapabilities, NodeKind, NodeProperty,
    ParentRelation,
};
use super::resource::{Resource, ResourceKind, VariableValue};
use super::types::{Plane3, Transform};
use super::view::{ViewProperties, ViewState};
use super::{ObjectKey, SessionId};

/// Side effects of graph mutations that need handling outside the graph
/// (the engine replays these against the linker and the dispatcher).
#[derive(Debug)]
pub enum GraphEffect {
    /// A ViewHolder node was destroyed; its linker export must go too.
    ViewHolderDestroyed {
        /// The linker endpoint id.
        export_koid: u64,
    },
    /// A View resource was destroyed; its linker import must go too.
    ViewDestroyed {
        /// The linker endpoint id.
        import_koid: u64,
    },
    /// A new first-render event must be armed for this ViewHolder.
    ResetRenderEvent {
        /// The ViewHolder node.
        holder: ObjectKey,
    },
    /// The ViewHolder's first-render event is obsolete; cancel the watch.
    CloseRenderEvent {
        /// The ViewHolder node.
        holder: ObjectKey,
    },
}

struct Entry {
    refs: u32,
    resource: Resource,
}

/// Reference-counted storage for all resources across all sessions.
///
/// Every counted reference is explicit: a session's id map holds one, and
/// each downward graph edge (parent to child, shape node to shape, layer
/// stack to layer, …) holds one. Dropping the last reference destroys the
/// entry and cascades to everything it referenced.
#[derive(Default)]
pub struct ResourceArena {
    entries: SlotMap<ObjectKey, Entry>,
}

impl ResourceArena {
    /// Looks up a resource.
    #[must_use]
    pub fn get(&self, key: ObjectKey) -> Option<&Resource> {
        self.entries.get(key).map(|entry| &entry.resource)
    }

    /// Looks up a resource mutably.
    pub fn get_mut(&mut self, key: ObjectKey) -> Option<&mut Resource> {
        self.entries.get_mut(key).map(|entry| &mut entry.resource)
    }

    /// Returns `true` while `key` refers to a live entry.
    #[must_use]
    pub fn contains(&self, key: ObjectKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current reference count of an entry (0 for dead keys).
    #[must_use]
    pub fn ref_count(&self, key: ObjectKey) -> u32 {
        self.entries.get(key).map_or(0, |entry| entry.refs)
    }
}

/// The scene graph: the arena plus relationship bookkeeping, buffered
/// session events, and buffered side effects.
///
/// Mutations never call back into sessions or the linker directly;
/// client-visible events accumulate in a pending list the engine drains
/// after each update, and linker-facing effects likewise. That keeps the
/// graph re-entrancy free.
#[derive(Default)]
pub struct SceneGraph {
    arena: ResourceArena,
    compositors: Vec<ObjectKey>,
    pending_events: Vec<(SessionId, SessionEvent)>,
    pending_effects: Vec<GraphEffect>,
}

impl SceneGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the arena.
    #[must_use]
    pub fn arena(&self) -> &ResourceArena {
        &self.arena
    }

    /// Mutable access to the arena.
    pub fn arena_mut(&mut self) -> &mut ResourceArena {
        &mut self.arena
    }

    /// Compositors currently alive, in creation order.
    #[must_use]
    pub fn compositors(&self) -> &[ObjectKey] {
        &self.compositors
    }

    /// The primary compositor, if any exists.
    #[must_use]
    pub fn first_compositor(&self) -> Option<ObjectKey> {
        self.compositors.first().copied()
    }

    /// Drains the buffered `(session, event)` pairs.
    pub fn take_events(&mut self) -> Vec<(SessionId, SessionEvent)> {
        std::mem::take(&mut self.pending_events)
    }

    /// Drains the buffered side effects.
    pub fn take_effects(&mut self) -> Vec<GraphEffect> {
        std::mem::take(&mut self.pending_effects)
    }

    /// Queues an event for delivery to `session_id`.
    pub fn push_event(&mut self, session_id: SessionId, event: SessionEvent) {
        self.pending_events.push((session_id, event));
    }

    // ========================================================================
    // Insertion, reference counting, destruction
    // ========================================================================

    /// Inserts a resource with one reference (the creating session's map
    /// entry). Scene nodes get their containing-scene cache pointed at
    /// themselves; compositors are tracked for rendering.
    pub fn insert(&mut self, resource: Resource) -> ObjectKey {
        let is_compositor = matches!(resource.kind, ResourceKind::Compositor(_));
        let is_scene = matches!(
            resource.kind,
            ResourceKind::Node(NodeAttrs {
                kind: NodeKind::Scene { .. },
                ..
            })
        );
        let key = self.arena.entries.insert(Entry { refs: 1, resource });
        if is_scene {
            if let Some(node) = self.node_mut_opt(key) {
                node.scene = Some(key);
            }
        }
        if is_compositor {
            self.compositors.push(key);
        }
        key
    }

    /// Adds a counted reference to `key`.
    pub fn add_ref(&mut self, key: ObjectKey) {
        if let Some(entry) = self.arena.entries.get_mut(key) {
            entry.refs += 1;
        } else {
            debug_assert!(false, "add_ref on dead key");
        }
    }

    /// Drops a counted reference; destroys the entry (and cascades) when
    /// the count reaches zero.
    pub fn release_ref(&mut self, key: ObjectKey) {
        let mut worklist = vec![key];
        while let Some(key) = worklist.pop() {
            let destroy = match self.arena.entries.get_mut(key) {
                Some(entry) => {
                    debug_assert!(entry.refs > 0);
                    entry.refs -= 1;
                    entry.refs == 0
                }
                None => {
                    debug_assert!(false, "release_ref on dead key");
                    false
                }
            };
            if destroy {
                let entry = self
                    .arena
                    .entries
                    .remove(key)
                    .expect("entry must exist after its ref count was decremented");
                self.destroy(key, entry.resource, &mut worklist);
            }
        }
    }

    // Tear down one resource's outgoing edges, queueing the referenced
    // keys for release and any linker-facing effects.
    fn destroy(&mut self, key: ObjectKey, resource: Resource, worklist: &mut Vec<ObjectKey>) {
        match resource.kind {
            ResourceKind::Node(node) => {
                // Detach descendants without firing client-level detach
                // events; only their refs are dropped.
                for child in node.children.iter().chain(node.parts.iter()) {
                    if let Some(attrs) = self.node_mut_opt(*child) {
                        attrs.parent = None;
                    }
                    self.refresh_scene(*child, None);
                    self.invalidate_global_transform(*child);
                    worklist.push(*child);
                }
                for (_, variable) in &node.bound_variables {
                    if let Some(ResourceKind::Variable(attrs)) =
                        self.arena.get_mut(*variable).map(|r| &mut r.kind)
                    {
                        attrs.bindings.retain(|(bound, _)| *bound != key);
                    }
                    worklist.push(*variable);
                }
                match node.kind {
                    NodeKind::Shape { shape, material } => {
                        worklist.extend(shape);
                        worklist.extend(material);
                    }
                    NodeKind::Scene {
                        ambient_lights,
                        directional_lights,
                        point_lights,
                    } => {
                        for light in ambient_lights
                            .into_iter()
                            .chain(directional_lights)
                            .chain(point_lights)
                        {
                            if let Some(ResourceKind::Light(attrs)) =
                                self.arena.get_mut(light).map(|r| &mut r.kind)
                            {
                                attrs.scene = None;
                            }
                            worklist.push(light);
                        }
                    }
                    NodeKind::ViewHolder(holder) => {
                        self.pending_effects.push(GraphEffect::ViewHolderDestroyed {
                            export_koid: holder.export_koid,
                        });
                        self.pending_effects
                            .push(GraphEffect::CloseRenderEvent { holder: key });
                    }
                    NodeKind::Entity
                    | NodeKind::Opacity { .. }
                    | NodeKind::Clip
                    | NodeKind::View { .. } => {}
                }
            }
            ResourceKind::View(view) => {
                self.pending_effects.push(GraphEffect::ViewDestroyed {
                    import_koid: view.import_koid,
                });
                self.detach_internal(view.view_node);
                worklist.push(view.view_node);
            }
            ResourceKind::Variable(variable) => {
                for (node_key, property) in variable.bindings {
                    if let Some(attrs) = self.node_mut_opt(node_key) {
                        attrs.bound_variables.remove(&property);
                    }
                }
            }
            ResourceKind::Shape(shape) => {
                if let super::shape::ShapeAttrs::Mesh {
                    index_buffer,
                    vertex_buffer,
                    ..
                } = shape
                {
                    worklist.extend(index_buffer);
                    worklist.extend(vertex_buffer);
                }
            }
            ResourceKind::Material(material) => {
                worklist.extend(material.texture);
            }
            ResourceKind::Buffer(buffer) => worklist.push(buffer.memory),
            ResourceKind::Image(image) => worklist.push(image.memory),
            ResourceKind::Camera(camera) => {
                worklist.push(camera.scene);
                if let Some(binding) = camera.pose_buffer {
                    worklist.push(binding.buffer);
                }
            }
            ResourceKind::Renderer(renderer) => {
                worklist.extend(renderer.camera);
            }
            ResourceKind::Layer(layer) => {
                worklist.extend(layer.renderer);
            }
            ResourceKind::LayerStack(stack) => {
                for layer in stack.layers {
                    if let Some(ResourceKind::Layer(attrs)) =
                        self.arena.get_mut(layer).map(|r| &mut r.kind)
                    {
                        attrs.layer_stack = None;
                    }
                    worklist.push(layer);
                }
            }
            ResourceKind::Compositor(compositor) => {
                self.compositors.retain(|c| *c != key);
                worklist.extend(compositor.layer_stack);
            }
            ResourceKind::Memory(_) | ResourceKind::ImagePipe(_) | ResourceKind::Light(_) => {}
        }
    }

    // ========================================================================
    // Typed lookups
    // ========================================================================

    fn stale() -> SessionError {
        SessionError::InvalidResourceId(super::INVALID_RESOURCE_ID)
    }

    /// The node payload of `key`, if alive and a node.
    #[must_use]
    pub fn node(&self, key: ObjectKey) -> Option<&NodeAttrs> {
        self.arena.get(key).and_then(Resource::as_node)
    }

    fn node_mut_opt(&mut self, key: ObjectKey) -> Option<&mut NodeAttrs> {
        self.arena.get_mut(key).and_then(Resource::as_node_mut)
    }

    fn expect_node(&self, key: ObjectKey) -> SessionResult<&NodeAttrs> {
        let resource = self.arena.get(key).ok_or_else(Self::stale)?;
        resource.as_node().ok_or(SessionError::TypeMismatch {
            id: resource.resource_id,
            actual: resource.kind_name(),
            expected: "Node",
        })
    }

    fn expect_node_mut(&mut self, key: ObjectKey) -> SessionResult<&mut NodeAttrs> {
        let resource = self.arena.get_mut(key).ok_or_else(Self::stale)?;
        let (id, name) = (resource.resource_id, resource.kind_name());
        resource.as_node_mut().ok_or(SessionError::TypeMismatch {
            id,
            actual: name,
            expected: "Node",
        })
    }

    fn check_capability(
        &self,
        key: ObjectKey,
        capability: NodeCapabilities,
        operation: &'static str,
    ) -> SessionResult<()> {
        let resource = self.arena.get(key).ok_or_else(Self::stale)?;
        let node = resource.as_node().ok_or(SessionError::TypeMismatch {
            id: resource.resource_id,
            actual: resource.kind_name(),
            expected: "Node",
        })?;
        if node.capabilities().contains(capability) {
            Ok(())
        } else {
            Err(SessionError::UnsupportedNodeOperation {
                id: resource.resource_id,
                kind: node.kind.name(),
                operation,
            })
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Attaches `child` as a child of `parent`, re-parenting if needed.
    pub fn add_child(&mut self, parent: ObjectKey, child: ObjectKey) -> SessionResult<()> {
        self.check_capability(parent, NodeCapabilities::HAS_CHILDREN, "have children")?;
        self.check_not_scene(child, "be re-parented")?;
        self.check_view_holder_child_rule(parent, child)?;

        let child_attrs = self.expect_node(child)?;
        if child_attrs.parent == Some((parent, ParentRelation::Child)) {
            return Ok(());
        }

        self.detach_internal(child);
        let parent_scene = self.expect_node(parent)?.scene;
        {
            let attrs = self.expect_node_mut(child)?;
            attrs.parent = Some((parent, ParentRelation::Child));
        }
        self.expect_node_mut(parent)?.children.push(child);
        self.add_ref(child);
        self.refresh_scene(child, parent_scene);
        self.invalidate_global_transform(child);
        Ok(())
    }

    /// Attaches `part` as a part of `parent`, re-parenting if needed.
    pub fn add_part(&mut self, parent: ObjectKey, part: ObjectKey) -> SessionResult<()> {
        self.check_capability(parent, NodeCapabilities::HAS_PARTS, "have parts")?;
        self.check_not_scene(part, "be re-parented")?;

        let part_attrs = self.expect_node(part)?;
        if part_attrs.parent == Some((parent, ParentRelation::Part)) {
            return Ok(());
        }

        self.detach_internal(part);
        let parent_scene = self.expect_node(parent)?.scene;
        {
            let attrs = self.expect_node_mut(part)?;
            attrs.parent = Some((parent, ParentRelation::Part));
        }
        self.expect_node_mut(parent)?.parts.push(part);
        self.add_ref(part);
        self.refresh_scene(part, parent_scene);
        self.invalidate_global_transform(part);
        Ok(())
    }

    fn check_not_scene(&self, key: ObjectKey, operation: &'static str) -> SessionResult<()> {
        let resource = self.arena.get(key).ok_or_else(Self::stale)?;
        if let Some(node) = resource.as_node() {
            if matches!(node.kind, NodeKind::Scene { .. }) {
                return Err(SessionError::UnsupportedNodeOperation {
                    id: resource.resource_id,
                    kind: node.kind.name(),
                    operation,
                });
            }
            Ok(())
        } else {
            Err(SessionError::TypeMismatch {
                id: resource.resource_id,
                actual: resource.kind_name(),
                expected: "Node",
            })
        }
    }

    // A ViewHolder accepts exactly one child: the ViewNode of its linked
    // View.
    fn check_view_holder_child_rule(
        &self,
        parent: ObjectKey,
        child: ObjectKey,
    ) -> SessionResult<()> {
        let parent_node = self.expect_node(parent)?;
        let Some(holder) = parent_node.as_view_holder() else {
            return Ok(());
        };
        let allowed = holder.view.is_some_and(|view| {
            matches!(
                self.arena.get(view).map(|r| &r.kind),
                Some(ResourceKind::View(attrs)) if attrs.view_node == child
            )
        });
        if allowed && parent_node.children.is_empty() {
            Ok(())
        } else {
            let resource = self.arena.get(parent).ok_or_else(Self::stale)?;
            Err(SessionError::UnsupportedNodeOperation {
                id: resource.resource_id,
                kind: "ViewHolder",
                operation: "accept a child other than its linked view's node",
            })
        }
    }

    /// Client-facing detach: removes `key` from its parent. A node with
    /// no parent detaches trivially.
    pub fn detach(&mut self, key: ObjectKey) -> SessionResult<()> {
        self.check_not_scene(key, "be detached")?;
        self.detach_internal(key);
        Ok(())
    }

    // Detach without client-level callbacks. Releases the parent's ref,
    // which may destroy `key` if nothing else holds it.
    fn detach_internal(&mut self, key: ObjectKey) {
        let Some((parent, relation)) = self.node(key).and_then(|n| n.parent) else {
            return;
        };
        if let Some(parent_attrs) = self.node_mut_opt(parent) {
            match relation {
                ParentRelation::Child | ParentRelation::ImportDelegate => {
                    parent_attrs.children.retain(|c| *c != key);
                }
                ParentRelation::Part => parent_attrs.parts.retain(|p| *p != key),
            }
        }
        if let Some(attrs) = self.node_mut_opt(key) {
            attrs.parent = None;
        }
        self.refresh_scene(key, None);
        self.invalidate_global_transform(key);
        self.release_ref(key);
    }

    /// Detaches all of a node's children (parts are unaffected).
    pub fn detach_children(&mut self, key: ObjectKey) -> SessionResult<()> {
        self.check_capability(key, NodeCapabilities::HAS_CHILDREN, "have children")?;
        let children = std::mem::take(&mut self.expect_node_mut(key)?.children);
        for child in children {
            if let Some(attrs) = self.node_mut_opt(child) {
                attrs.parent = None;
            }
            self.refresh_scene(child, None);
            self.invalidate_global_transform(child);
            self.release_ref(child);
        }
        Ok(())
    }

    // ========================================================================
    // Containing-scene cache & view attach/detach events
    // ========================================================================

    // Refresh the cached scene pointer for `key` and its whole subtree.
    // ViewHolder nodes whose scene changes emit attach/detach events for
    // their linked View's session.
    fn refresh_scene(&mut self, key: ObjectKey, new_scene: Option<ObjectKey>) {
        let mut stack = vec![(key, new_scene)];
        while let Some((key, new_scene)) = stack.pop() {
            let Some(node) = self.node(key) else { continue };
            if node.scene == new_scene {
                continue;
            }
            let children: Vec<ObjectKey> =
                node.children.iter().chain(node.parts.iter()).copied().collect();
            if let Some(attrs) = self.node_mut_opt(key) {
                attrs.scene = new_scene;
            }
            if self.node(key).is_some_and(|n| n.as_view_holder().is_some()) {
                self.on_view_holder_scene_changed(key, new_scene.is_some());
            }
            for child in children {
                stack.push((child, new_scene));
            }
        }
    }

    fn on_view_holder_scene_changed(&mut self, holder: ObjectKey, attached: bool) {
        let Some((view_key, properties)) = self.node(holder).and_then(|n| {
            n.as_view_holder()
                .map(|h| (h.view, h.view_properties))
        }) else {
            return;
        };
        let Some(view_key) = view_key else { return };
        let Some((view_session, view_id)) = self
            .arena
            .get(view_key)
            .map(|r| (r.session_id, r.resource_id))
        else {
            return;
        };
        if attached {
            self.pending_events.push((
                view_session,
                SessionEvent::ViewAttachedToScene {
                    view_id,
                    properties,
                },
            ));
        } else {
            // The view can no longer be rendering once off-scene; re-arm
            // the first-render event for the next attach cycle.
            self.set_is_view_rendering(holder, false);
            self.pending_effects
                .push(GraphEffect::ResetRenderEvent { holder });
            self.pending_events
                .push((view_session, SessionEvent::ViewDetachedFromScene { view_id }));
        }
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// Marks the cached global transform of `key` and every descendant
    /// dirty.
    pub fn invalidate_global_transform(&mut self, key: ObjectKey) {
        let mut stack = vec![key];
        while let Some(key) = stack.pop() {
            let Some(node) = self.node_mut_opt(key) else {
                continue;
            };
            if node.global_transform_dirty {
                continue;
            }
            node.global_transform_dirty = true;
            stack.extend(node.children.iter().chain(node.parts.iter()).copied());
        }
    }

    /// The node's global transform, recomputing any dirty ancestors.
    #[must_use]
    pub fn global_transform(&mut self, key: ObjectKey) -> Mat4 {
        // Walk up to the nearest clean ancestor, then compute downward.
        let mut chain = Vec::new();
        let mut cursor = Some(key);
        while let Some(current) = cursor {
            let Some(node) = self.node(current) else { break };
            if !node.global_transform_dirty {
                break;
            }
            chain.push(current);
            cursor = node.parent_key();
        }
        for current in chain.into_iter().rev() {
            let parent_global = self
                .node(current)
                .and_then(NodeAttrs::parent_key)
                .and_then(|p| self.node(p))
                .map_or(Mat4::IDENTITY, |p| p.global_transform);
            if let Some(node) = self.node_mut_opt(current) {
                node.global_transform = parent_global * node.transform.to_mat4();
                node.global_transform_dirty = false;
            }
        }
        self.node(key).map_or(Mat4::IDENTITY, |n| n.global_transform)
    }

    fn set_transform_component(
        &mut self,
        key: ObjectKey,
        property: NodeProperty,
        apply: impl FnOnce(&mut Transform),
    ) -> SessionResult<()> {
        self.check_capability(key, NodeCapabilities::HAS_TRANSFORM, "have its transform set")?;
        let unbound = {
            let node = self.expect_node_mut(key)?;
            apply(&mut node.transform);
            node.bound_variables.remove(&property)
        };
        if let Some(variable) = unbound {
            if let Some(ResourceKind::Variable(attrs)) =
                self.arena.get_mut(variable).map(|r| &mut r.kind)
            {
                attrs.bindings.retain(|(node, p)| !(*node == key && *p == property));
            }
            self.release_ref(variable);
        }
        self.invalidate_global_transform(key);
        Ok(())
    }

    /// Sets a node's (or a layer's) translation.
    pub fn set_translation(&mut self, key: ObjectKey, translation: Vec3) -> SessionResult<()> {
        if let Some(ResourceKind::Layer(layer)) = self.arena.get_mut(key).map(|r| &mut r.kind) {
            layer.translation = translation;
            return Ok(());
        }
        self.set_transform_component(key, NodeProperty::Translation, |t| {
            t.translation = translation;
        })
    }

    /// Sets a node's scale.
    pub fn set_scale(&mut self, key: ObjectKey, scale: Vec3) -> SessionResult<()> {
        self.set_transform_component(key, NodeProperty::Scale, |t| t.scale = scale)
    }

    /// Sets a node's rotation.
    pub fn set_rotation(&mut self, key: ObjectKey, rotation: Quat) -> SessionResult<()> {
        self.set_transform_component(key, NodeProperty::Rotation, |t| t.rotation = rotation)
    }

    /// Sets a node's anchor point.
    pub fn set_anchor(&mut self, key: ObjectKey, anchor: Vec3) -> SessionResult<()> {
        self.set_transform_component(key, NodeProperty::Anchor, |t| t.anchor = anchor)
    }

    /// Binds a node transform property to a Variable resource.
    pub fn bind_variable(
        &mut self,
        key: ObjectKey,
        property: NodeProperty,
        variable: ObjectKey,
    ) -> SessionResult<()> {
        self.check_capability(key, NodeCapabilities::HAS_TRANSFORM, "have its transform set")?;
        {
            let resource = self.arena.get(variable).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Variable(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Variable",
                });
            }
        }
        let previous = {
            let node = self.expect_node_mut(key)?;
            node.bound_variables.insert(property, variable)
        };
        if let Some(previous) = previous {
            if let Some(ResourceKind::Variable(attrs)) =
                self.arena.get_mut(previous).map(|r| &mut r.kind)
            {
                attrs.bindings.retain(|(node, p)| !(*node == key && *p == property));
            }
            self.release_ref(previous);
        }
        self.add_ref(variable);
        if let Some(ResourceKind::Variable(attrs)) =
            self.arena.get_mut(variable).map(|r| &mut r.kind)
        {
            attrs.bindings.push((key, property));
        }
        // Apply the current value right away.
        let value = match self.arena.get(variable).map(|r| &r.kind) {
            Some(ResourceKind::Variable(attrs)) => attrs.value,
            _ => return Ok(()),
        };
        self.apply_variable_to_node(key, property, value);
        Ok(())
    }

    /// Updates a Variable's value and re-applies it to every bound node
    /// property.
    pub fn set_variable_value(
        &mut self,
        variable: ObjectKey,
        value: VariableValue,
    ) -> SessionResult<()> {
        let bindings = {
            let resource = self.arena.get_mut(variable).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::Variable(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "Variable",
                });
            };
            if std::mem::discriminant(&attrs.value) != std::mem::discriminant(&value) {
                return Err(SessionError::InvalidArgument {
                    command: "SetVariableValue",
                    message: "value type does not match the variable's type".to_owned(),
                });
            }
            attrs.value = value;
            attrs.bindings.clone()
        };
        for (node, property) in bindings {
            self.apply_variable_to_node(node, property, value);
        }
        Ok(())
    }

    fn apply_variable_to_node(
        &mut self,
        key: ObjectKey,
        property: NodeProperty,
        value: VariableValue,
    ) {
        let Some(node) = self.node_mut_opt(key) else {
            return;
        };
        match (property, value) {
            (NodeProperty::Translation, VariableValue::Vector3(v)) => {
                node.transform.translation = v;
            }
            (NodeProperty::Scale, VariableValue::Vector3(v)) => node.transform.scale = v,
            (NodeProperty::Anchor, VariableValue::Vector3(v)) => node.transform.anchor = v,
            (NodeProperty::Rotation, VariableValue::Quaternion(q)) => {
                node.transform.rotation = q;
            }
            _ => {
                warn!("variable value type does not match bound property; binding ignored");
                return;
            }
        }
        self.invalidate_global_transform(key);
    }

    // ========================================================================
    // Per-node flags
    // ========================================================================

    /// Sets a node's hit-test tag.
    pub fn set_tag(&mut self, key: ObjectKey, tag_value: u32) -> SessionResult<()> {
        self.expect_node_mut(key)?.tag_value = tag_value;
        Ok(())
    }

    /// Sets a node's hit-test behavior.
    pub fn set_hit_test_behavior(
        &mut self,
        key: ObjectKey,
        behavior: HitTestBehavior,
    ) -> SessionResult<()> {
        self.expect_node_mut(key)?.hit_test_behavior = behavior;
        Ok(())
    }

    /// Sets a resource's event mask. Dropping the metrics subscription
    /// clears the cached reported metrics so a fresh value is delivered
    /// on resubscribe.
    pub fn set_event_mask(&mut self, key: ObjectKey, mask: EventMask) -> SessionResult<()> {
        let resource = self.arena.get_mut(key).ok_or_else(Self::stale)?;
        resource.event_mask = mask;
        if !mask.contains(EventMask::METRICS) {
            if let Some(node) = resource.as_node_mut() {
                node.reported_metrics = None;
            }
        }
        Ok(())
    }

    /// Sets a resource's debug label.
    pub fn set_label(&mut self, key: ObjectKey, label: String) -> SessionResult<()> {
        self.arena.get_mut(key).ok_or_else(Self::stale)?.label = label;
        Ok(())
    }

    /// Enables or disables clip-to-parts on a clip-capable node.
    pub fn set_clip_to_self(&mut self, key: ObjectKey, clip_to_self: bool) -> SessionResult<()> {
        self.check_capability(key, NodeCapabilities::HAS_CLIP, "have clip params set")?;
        self.expect_node_mut(key)?.clip_to_self = clip_to_self;
        Ok(())
    }

    /// Replaces a node's clip planes.
    pub fn set_clip_planes(&mut self, key: ObjectKey, planes: Vec<Plane3>) -> SessionResult<()> {
        self.check_capability(key, NodeCapabilities::HAS_CLIP, "have clip planes set")?;
        self.expect_node_mut(key)?.clip_planes = SmallVec::from_vec(planes);
        Ok(())
    }

    /// Sets an OpacityNode's opacity (clamped to `[0, 1]`).
    pub fn set_opacity(&mut self, key: ObjectKey, opacity: f32) -> SessionResult<()> {
        self.check_capability(key, NodeCapabilities::HAS_OPACITY, "have opacity set")?;
        let node = self.expect_node_mut(key)?;
        if let NodeKind::Opacity { opacity: stored } = &mut node.kind {
            *stored = opacity.clamp(0.0, 1.0);
        }
        Ok(())
    }

    // ========================================================================
    // Shapes & materials
    // ========================================================================

    /// Sets the shape drawn by a ShapeNode.
    pub fn set_shape(&mut self, node: ObjectKey, shape: ObjectKey) -> SessionResult<()> {
        {
            let resource = self.arena.get(shape).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Shape(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Shape",
                });
            }
        }
        let node_id = self.arena.get(node).map_or(0, |r| r.resource_id);
        let previous = {
            let attrs = self.expect_node_mut(node)?;
            let NodeKind::Shape { shape: stored, .. } = &mut attrs.kind else {
                return Err(SessionError::UnsupportedNodeOperation {
                    id: node_id,
                    kind: attrs.kind.name(),
                    operation: "have a shape set",
                });
            };
            stored.replace(shape)
        };
        self.add_ref(shape);
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    /// Sets the material used by a ShapeNode.
    pub fn set_material(&mut self, node: ObjectKey, material: ObjectKey) -> SessionResult<()> {
        {
            let resource = self.arena.get(material).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Material(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Material",
                });
            }
        }
        let node_id = self.arena.get(node).map_or(0, |r| r.resource_id);
        let previous = {
            let attrs = self.expect_node_mut(node)?;
            let NodeKind::Shape { material: stored, .. } = &mut attrs.kind else {
                return Err(SessionError::UnsupportedNodeOperation {
                    id: node_id,
                    kind: attrs.kind.name(),
                    operation: "have a material set",
                });
            };
            stored.replace(material)
        };
        self.add_ref(material);
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    /// Sets a material's color.
    pub fn set_color(&mut self, material: ObjectKey, color: Vec4) -> SessionResult<()> {
        let resource = self.arena.get_mut(material).ok_or_else(Self::stale)?;
        let (id, name) = (resource.resource_id, resource.kind_name());
        let ResourceKind::Material(attrs) = &mut resource.kind else {
            return Err(SessionError::TypeMismatch {
                id,
                actual: name,
                expected: "Material",
            });
        };
        attrs.color = color;
        Ok(())
    }

    /// Sets (or clears) a material's texture.
    pub fn set_texture(
        &mut self,
        material: ObjectKey,
        texture: Option<ObjectKey>,
    ) -> SessionResult<()> {
        if let Some(texture) = texture {
            let resource = self.arena.get(texture).ok_or_else(Self::stale)?;
            if !matches!(
                resource.kind,
                ResourceKind::Image(_) | ResourceKind::ImagePipe(_)
            ) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Image or ImagePipe",
                });
            }
        }
        let previous = {
            let resource = self.arena.get_mut(material).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::Material(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "Material",
                });
            };
            std::mem::replace(&mut attrs.texture, texture)
        };
        if let Some(texture) = texture {
            self.add_ref(texture);
        }
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    /// Binds mesh geometry buffers and the bounding box used for hit
    /// testing.
    pub fn bind_mesh_buffers(
        &mut self,
        mesh: ObjectKey,
        index_buffer: ObjectKey,
        vertex_buffer: ObjectKey,
        bounding_box: super::types::BoundingBox,
    ) -> SessionResult<()> {
        for buffer in [index_buffer, vertex_buffer] {
            let resource = self.arena.get(buffer).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Buffer(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Buffer",
                });
            }
        }
        let previous = {
            let resource = self.arena.get_mut(mesh).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::Shape(super::shape::ShapeAttrs::Mesh {
                index_buffer: stored_index,
                vertex_buffer: stored_vertex,
                bounding_box: stored_box,
            }) = &mut resource.kind
            else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "MeshShape",
                });
            };
            *stored_box = bounding_box;
            (
                stored_index.replace(index_buffer),
                stored_vertex.replace(vertex_buffer),
            )
        };
        self.add_ref(index_buffer);
        self.add_ref(vertex_buffer);
        if let Some(previous) = previous.0 {
            self.release_ref(previous);
        }
        if let Some(previous) = previous.1 {
            self.release_ref(previous);
        }
        Ok(())
    }

    // ========================================================================
    // Lights
    // ========================================================================

    /// Attaches a light to a Scene, detaching it from any previous one.
    pub fn add_light(&mut self, scene: ObjectKey, light: ObjectKey) -> SessionResult<()> {
        let kind = {
            let resource = self.arena.get(light).ok_or_else(Self::stale)?;
            let ResourceKind::Light(attrs) = &resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Light",
                });
            };
            attrs.kind
        };
        self.detach_light(light)?;
        let scene_id = self.arena.get(scene).map_or(0, |r| r.resource_id);
        {
            let node = self.expect_node_mut(scene)?;
            let NodeKind::Scene {
                ambient_lights,
                directional_lights,
                point_lights,
            } = &mut node.kind
            else {
                return Err(SessionError::UnsupportedNodeOperation {
                    id: scene_id,
                    kind: node.kind.name(),
                    operation: "hold lights",
                });
            };
            match kind {
                LightKind::Ambient => ambient_lights.push(light),
                LightKind::Directional => directional_lights.push(light),
                LightKind::Point => point_lights.push(light),
            }
        }
        self.add_ref(light);
        if let Some(ResourceKind::Light(attrs)) = self.arena.get_mut(light).map(|r| &mut r.kind) {
            attrs.scene = Some(scene);
        }
        Ok(())
    }

    /// Detaches a light from its Scene, if attached.
    pub fn detach_light(&mut self, light: ObjectKey) -> SessionResult<()> {
        let scene = {
            let resource = self.arena.get_mut(light).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::Light(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "Light",
                });
            };
            attrs.scene.take()
        };
        let Some(scene) = scene else { return Ok(()) };
        if let Some(node) = self.node_mut_opt(scene) {
            if let NodeKind::Scene {
                ambient_lights,
                directional_lights,
                point_lights,
            } = &mut node.kind
            {
                ambient_lights.retain(|l| *l != light);
                directional_lights.retain(|l| *l != light);
                point_lights.retain(|l| *l != light);
            }
        }
        self.release_ref(light);
        Ok(())
    }

    /// Detaches every light from a Scene.
    pub fn detach_lights(&mut self, scene: ObjectKey) -> SessionResult<()> {
        let scene_id = self.arena.get(scene).map_or(0, |r| r.resource_id);
        let lights: Vec<ObjectKey> = {
            let node = self.expect_node(scene)?;
            let NodeKind::Scene {
                ambient_lights,
                directional_lights,
                point_lights,
            } = &node.kind
            else {
                return Err(SessionError::UnsupportedNodeOperation {
                    id: scene_id,
                    kind: node.kind.name(),
                    operation: "hold lights",
                });
            };
            ambient_lights
                .iter()
                .chain(directional_lights)
                .chain(point_lights)
                .copied()
                .collect()
        };
        for light in lights {
            self.detach_light(light)?;
        }
        Ok(())
    }

    fn expect_light_mut(&mut self, key: ObjectKey) -> SessionResult<&mut super::light::LightAttrs> {
        let resource = self.arena.get_mut(key).ok_or_else(Self::stale)?;
        let (id, name) = (resource.resource_id, resource.kind_name());
        match &mut resource.kind {
            ResourceKind::Light(attrs) => Ok(attrs),
            _ => Err(SessionError::TypeMismatch {
                id,
                actual: name,
                expected: "Light",
            }),
        }
    }

    /// Sets a light's color.
    pub fn set_light_color(&mut self, light: ObjectKey, color: Vec3) -> SessionResult<()> {
        self.expect_light_mut(light)?.color = color;
        Ok(())
    }

    /// Sets a directional light's direction.
    pub fn set_light_direction(&mut self, light: ObjectKey, direction: Vec3) -> SessionResult<()> {
        let attrs = self.expect_light_mut(light)?;
        if attrs.kind != LightKind::Directional {
            return Err(SessionError::InvalidArgument {
                command: "SetLightDirection",
                message: format!("{} has no direction", attrs.name()),
            });
        }
        attrs.direction = direction;
        Ok(())
    }

    /// Sets a point light's position.
    pub fn set_point_light_position(
        &mut self,
        light: ObjectKey,
        position: Vec3,
    ) -> SessionResult<()> {
        let attrs = self.expect_light_mut(light)?;
        if attrs.kind != LightKind::Point {
            return Err(SessionError::InvalidArgument {
                command: "SetPointLightPosition",
                message: format!("{} has no position", attrs.name()),
            });
        }
        attrs.position = position;
        Ok(())
    }

    /// Sets a point light's falloff.
    pub fn set_point_light_falloff(&mut self, light: ObjectKey, falloff: f32) -> SessionResult<()> {
        let attrs = self.expect_light_mut(light)?;
        if attrs.kind != LightKind::Point {
            return Err(SessionError::InvalidArgument {
                command: "SetPointLightFalloff",
                message: format!("{} has no falloff", attrs.name()),
            });
        }
        attrs.falloff = falloff;
        Ok(())
    }

    // ========================================================================
    // Cameras & renderers
    // ========================================================================

    fn expect_camera_mut(
        &mut self,
        key: ObjectKey,
    ) -> SessionResult<&mut super::camera::CameraAttrs> {
        let resource = self.arena.get_mut(key).ok_or_else(Self::stale)?;
        let (id, name) = (resource.resource_id, resource.kind_name());
        match &mut resource.kind {
            ResourceKind::Camera(attrs) => Ok(attrs),
            _ => Err(SessionError::TypeMismatch {
                id,
                actual: name,
                expected: "Camera",
            }),
        }
    }

    /// Sets a camera's view parameters.
    pub fn set_camera_transform(
        &mut self,
        camera: ObjectKey,
        eye_position: Vec3,
        eye_look_at: Vec3,
        eye_up: Vec3,
    ) -> SessionResult<()> {
        let attrs = self.expect_camera_mut(camera)?;
        attrs.eye_position = eye_position;
        attrs.eye_look_at = eye_look_at;
        attrs.eye_up = eye_up;
        Ok(())
    }

    /// Sets a monoscopic camera's projection.
    pub fn set_camera_projection(&mut self, camera: ObjectKey, fovy: f32) -> SessionResult<()> {
        let attrs = self.expect_camera_mut(camera)?;
        if attrs.is_stereo() {
            return Err(SessionError::InvalidArgument {
                command: "SetCameraProjection",
                message: "stereo cameras take per-eye projections".to_owned(),
            });
        }
        attrs.projection = CameraProjection::Perspective { fovy };
        Ok(())
    }

    /// Sets a stereo camera's per-eye projections.
    pub fn set_stereo_camera_projection(
        &mut self,
        camera: ObjectKey,
        left_projection: Mat4,
        right_projection: Mat4,
    ) -> SessionResult<()> {
        let attrs = self.expect_camera_mut(camera)?;
        if !attrs.is_stereo() {
            return Err(SessionError::InvalidArgument {
                command: "SetStereoCameraProjection",
                message: "camera is not a StereoCamera".to_owned(),
            });
        }
        attrs.projection = CameraProjection::Stereo {
            left_projection,
            right_projection,
        };
        Ok(())
    }

    /// Attaches a pose buffer to a camera for render-time latching.
    pub fn set_camera_pose_buffer(
        &mut self,
        camera: ObjectKey,
        binding: PoseBufferBinding,
    ) -> SessionResult<()> {
        {
            let resource = self.arena.get(binding.buffer).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Buffer(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Buffer",
                });
            }
        }
        let buffer = binding.buffer;
        let previous = self
            .expect_camera_mut(camera)?
            .pose_buffer
            .replace(binding)
            .map(|b| b.buffer);
        self.add_ref(buffer);
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    fn expect_renderer_mut(
        &mut self,
        key: ObjectKey,
    ) -> SessionResult<&mut super::compositor::RendererAttrs> {
        let resource = self.arena.get_mut(key).ok_or_else(Self::stale)?;
        let (id, name) = (resource.resource_id, resource.kind_name());
        match &mut resource.kind {
            ResourceKind::Renderer(attrs) => Ok(attrs),
            _ => Err(SessionError::TypeMismatch {
                id,
                actual: name,
                expected: "Renderer",
            }),
        }
    }

    /// Points a renderer at a camera.
    pub fn set_renderer_camera(
        &mut self,
        renderer: ObjectKey,
        camera: ObjectKey,
    ) -> SessionResult<()> {
        {
            let resource = self.arena.get(camera).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Camera(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Camera",
                });
            }
        }
        let previous = self.expect_renderer_mut(renderer)?.camera.replace(camera);
        self.add_ref(camera);
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    /// Sets a renderer's shadow technique.
    pub fn set_shadow_technique(
        &mut self,
        renderer: ObjectKey,
        technique: ShadowTechnique,
    ) -> SessionResult<()> {
        self.expect_renderer_mut(renderer)?.shadow_technique = technique;
        Ok(())
    }

    /// Toggles a renderer's debug visualization.
    pub fn set_enable_debugging(&mut self, renderer: ObjectKey, enable: bool) -> SessionResult<()> {
        self.expect_renderer_mut(renderer)?.enable_debugging = enable;
        Ok(())
    }

    /// Toggles clipping on a renderer.
    pub fn set_disable_clipping(
        &mut self,
        renderer: ObjectKey,
        disable: bool,
    ) -> SessionResult<()> {
        self.expect_renderer_mut(renderer)?.disable_clipping = disable;
        Ok(())
    }

    // ========================================================================
    // Layers & compositors
    // ========================================================================

    fn expect_layer_mut(
        &mut self,
        key: ObjectKey,
    ) -> SessionResult<&mut super::compositor::LayerAttrs> {
        let resource = self.arena.get_mut(key).ok_or_else(Self::stale)?;
        let (id, name) = (resource.resource_id, resource.kind_name());
        match &mut resource.kind {
            ResourceKind::Layer(attrs) => Ok(attrs),
            _ => Err(SessionError::TypeMismatch {
                id,
                actual: name,
                expected: "Layer",
            }),
        }
    }

    /// Points a layer at a renderer.
    pub fn set_layer_renderer(
        &mut self,
        layer: ObjectKey,
        renderer: ObjectKey,
    ) -> SessionResult<()> {
        {
            let resource = self.arena.get(renderer).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::Renderer(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "Renderer",
                });
            }
        }
        let previous = self.expect_layer_mut(layer)?.renderer.replace(renderer);
        self.add_ref(renderer);
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    /// Sets a layer's size in pixels.
    pub fn set_layer_size(&mut self, layer: ObjectKey, size: Vec2) -> SessionResult<()> {
        if size.x < 0.0 || size.y < 0.0 {
            return Err(SessionError::InvalidArgument {
                command: "SetSize",
                message: format!("negative size {size}"),
            });
        }
        self.expect_layer_mut(layer)?.size = size;
        Ok(())
    }

    /// Sets a layer's opacity color.
    pub fn set_layer_color(&mut self, layer: ObjectKey, color: Vec4) -> SessionResult<()> {
        self.expect_layer_mut(layer)?.color = color;
        Ok(())
    }

    /// Appends a layer to a stack. A layer belongs to at most one stack.
    pub fn add_layer(&mut self, stack: ObjectKey, layer: ObjectKey) -> SessionResult<()> {
        {
            let attrs = self.expect_layer_mut(layer)?;
            if attrs.layer_stack.is_some() {
                return Err(SessionError::InvalidArgument {
                    command: "AddLayer",
                    message: "layer already belongs to a layer stack".to_owned(),
                });
            }
        }
        {
            let resource = self.arena.get_mut(stack).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::LayerStack(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "LayerStack",
                });
            };
            attrs.layers.push(layer);
        }
        self.add_ref(layer);
        self.expect_layer_mut(layer)?.layer_stack = Some(stack);
        Ok(())
    }

    /// Removes a layer from a stack.
    pub fn remove_layer(&mut self, stack: ObjectKey, layer: ObjectKey) -> SessionResult<()> {
        let removed = {
            let resource = self.arena.get_mut(stack).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::LayerStack(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "LayerStack",
                });
            };
            let before = attrs.layers.len();
            attrs.layers.retain(|l| *l != layer);
            before != attrs.layers.len()
        };
        if removed {
            if let Some(attrs) = self.arena.get_mut(layer).and_then(|r| match &mut r.kind {
                ResourceKind::Layer(attrs) => Some(attrs),
                _ => None,
            }) {
                attrs.layer_stack = None;
            }
            self.release_ref(layer);
        }
        Ok(())
    }

    /// Removes every layer from a stack.
    pub fn remove_all_layers(&mut self, stack: ObjectKey) -> SessionResult<()> {
        let layers = {
            let resource = self.arena.get_mut(stack).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::LayerStack(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "LayerStack",
                });
            };
            std::mem::take(&mut attrs.layers)
        };
        for layer in layers {
            if let Some(ResourceKind::Layer(attrs)) =
                self.arena.get_mut(layer).map(|r| &mut r.kind)
            {
                attrs.layer_stack = None;
            }
            self.release_ref(layer);
        }
        Ok(())
    }

    /// Binds a layer stack to a compositor.
    pub fn set_layer_stack(
        &mut self,
        compositor: ObjectKey,
        stack: ObjectKey,
    ) -> SessionResult<()> {
        {
            let resource = self.arena.get(stack).ok_or_else(Self::stale)?;
            if !matches!(resource.kind, ResourceKind::LayerStack(_)) {
                return Err(SessionError::TypeMismatch {
                    id: resource.resource_id,
                    actual: resource.kind_name(),
                    expected: "LayerStack",
                });
            }
        }
        let previous = {
            let resource = self.arena.get_mut(compositor).ok_or_else(Self::stale)?;
            let (id, name) = (resource.resource_id, resource.kind_name());
            let ResourceKind::Compositor(attrs) = &mut resource.kind else {
                return Err(SessionError::TypeMismatch {
                    id,
                    actual: name,
                    expected: "Compositor",
                });
            };
            attrs.layer_stack.replace(stack)
        };
        self.add_ref(stack);
        if let Some(previous) = previous {
            self.release_ref(previous);
        }
        Ok(())
    }

    /// The drawable layers of a compositor's stack, bottom to top.
    #[must_use]
    pub fn drawable_layers(&self, compositor: ObjectKey) -> Vec<ObjectKey> {
        let Some(ResourceKind::Compositor(attrs)) = self.arena.get(compositor).map(|r| &r.kind)
        else {
            return Vec::new();
        };
        let Some(stack) = attrs.layer_stack else {
            return Vec::new();
        };
        let Some(ResourceKind::LayerStack(stack)) = self.arena.get(stack).map(|r| &r.kind) else {
            return Vec::new();
        };
        stack
            .layers
            .iter()
            .copied()
            .filter(|layer| {
                matches!(
                    self.arena.get(*layer).map(|r| &r.kind),
                    Some(ResourceKind::Layer(attrs)) if attrs.is_drawable()
                )
            })
            .collect()
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Stores new ViewProperties on a ViewHolder; if a View is linked the
    /// change is delivered to its session.
    pub fn set_view_properties(
        &mut self,
        holder: ObjectKey,
        properties: ViewProperties,
    ) -> SessionResult<()> {
        let holder_id = self.arena.get(holder).map_or(0, |r| r.resource_id);
        let view = {
            let node = self.expect_node_mut(holder)?;
            let Some(attrs) = node.as_view_holder_mut() else {
                return Err(SessionError::UnsupportedNodeOperation {
                    id: holder_id,
                    kind: node.kind.name(),
                    operation: "have view properties set",
                });
            };
            if attrs.view_properties == properties {
                return Ok(());
            }
            attrs.view_properties = properties;
            attrs.view
        };
        if let Some(view) = view {
            self.send_view_properties_changed(holder, view);
        }
        Ok(())
    }

    fn send_view_properties_changed(&mut self, holder: ObjectKey, view: ObjectKey) {
        let Some(properties) = self
            .node(holder)
            .and_then(NodeAttrs::as_view_holder)
            .map(|h| h.view_properties)
        else {
            return;
        };
        if let Some((session, view_id)) = self
            .arena
            .get(view)
            .map(|r| (r.session_id, r.resource_id))
        {
            self.pending_events.push((
                session,
                SessionEvent::ViewPropertiesChanged {
                    view_id,
                    properties,
                },
            ));
        }
    }

    /// Joins a resolved link: records the peer references, attaches the
    /// View's node under the ViewHolder, and emits the connection events
    /// (export side first, then import side, then the property
    /// delivery that guarantees the View sees any pre-link properties).
    pub fn resolve_view_link(&mut self, holder: ObjectKey, view: ObjectKey) {
        let Some((holder_session, holder_id)) = self
            .arena
            .get(holder)
            .map(|r| (r.session_id, r.resource_id))
        else {
            return;
        };
        let Some((view_session, view_id, view_node)) =
            self.arena.get(view).and_then(|r| match &r.kind {
                ResourceKind::View(attrs) => {
                    Some((r.session_id, r.resource_id, attrs.view_node))
                }
                _ => None,
            })
        else {
            return;
        };

        let in_scene = {
            let Some(node) = self.node_mut_opt(holder) else {
                return;
            };
            let scene = node.scene;
            let Some(attrs) = node.as_view_holder_mut() else {
                return;
            };
            debug_assert!(attrs.view.is_none());
            attrs.view = Some(view);
            scene.is_some()
        };
        if let Some(ResourceKind::View(attrs)) = self.arena.get_mut(view).map(|r| &mut r.kind) {
            attrs.view_holder = Some(holder);
        }

        // Export (ViewHolder) side fires first.
        self.pending_events
            .push((holder_session, SessionEvent::ViewConnected { view_holder_id: holder_id }));
        if in_scene {
            self.on_view_holder_scene_changed_attach_event(holder, view);
        }

        // Import (View) side: splice the subtree, then notify.
        if let Err(error) = self.add_child(holder, view_node) {
            warn!("failed to attach linked view node: {error}");
        }
        self.pending_events
            .push((view_session, SessionEvent::ViewHolderConnected { view_id }));

        // Deliver current properties even if they were set before the
        // link resolved.
        self.send_view_properties_changed(holder, view);
        self.pending_effects
            .push(GraphEffect::ResetRenderEvent { holder });
    }

    fn on_view_holder_scene_changed_attach_event(&mut self, holder: ObjectKey, view: ObjectKey) {
        let Some(properties) = self
            .node(holder)
            .and_then(NodeAttrs::as_view_holder)
            .map(|h| h.view_properties)
        else {
            return;
        };
        if let Some((session, view_id)) = self
            .arena
            .get(view)
            .map(|r| (r.session_id, r.resource_id))
        {
            self.pending_events.push((
                session,
                SessionEvent::ViewAttachedToScene {
                    view_id,
                    properties,
                },
            ));
        }
    }

    /// The link failed or its peer died, observed from the ViewHolder
    /// (export) side.
    pub fn view_holder_link_disconnected(&mut self, holder: ObjectKey) {
        let Some((session, holder_id)) = self
            .arena
            .get(holder)
            .map(|r| (r.session_id, r.resource_id))
        else {
            return;
        };
        if let Some(attrs) = self.node_mut_opt(holder).and_then(NodeAttrs::as_view_holder_mut) {
            attrs.view = None;
            attrs.render_event = None;
        }
        self.pending_effects
            .push(GraphEffect::CloseRenderEvent { holder });
        self.set_is_view_rendering(holder, false);
        self.pending_events
            .push((session, SessionEvent::ViewDisconnected { view_holder_id: holder_id }));
    }

    /// The link failed or its peer died, observed from the View (import)
    /// side.
    pub fn view_link_disconnected(&mut self, view: ObjectKey) {
        let Some((session, view_id, view_node)) =
            self.arena.get_mut(view).and_then(|r| match &mut r.kind {
                ResourceKind::View(attrs) => {
                    attrs.view_holder = None;
                    attrs.render_handle = None;
                    Some((r.session_id, r.resource_id, attrs.view_node))
                }
                _ => None,
            })
        else {
            return;
        };
        self.detach_internal(view_node);
        self.pending_events
            .push((session, SessionEvent::ViewHolderDisconnected { view_id }));
    }

    /// Arms the first-render event for a ViewHolder's current attach
    /// cycle: the holder keeps one handle, the linked View gets a
    /// duplicate to signal when its content first draws.
    pub fn arm_view_render_event(&mut self, holder: ObjectKey, fence: crate::sync::Fence) {
        let view = {
            let Some(attrs) = self.node_mut_opt(holder).and_then(NodeAttrs::as_view_holder_mut)
            else {
                return;
            };
            attrs.render_event = Some(fence.duplicate());
            attrs.view
        };
        if let Some(view) = view {
            if let Some(ResourceKind::View(attrs)) = self.arena.get_mut(view).map(|r| &mut r.kind)
            {
                attrs.render_handle = Some(fence);
            }
        }
    }

    /// Drops both halves of a ViewHolder's first-render event.
    pub fn clear_view_render_event(&mut self, holder: ObjectKey) {
        let view = {
            let Some(attrs) = self.node_mut_opt(holder).and_then(NodeAttrs::as_view_holder_mut)
            else {
                return;
            };
            attrs.render_event = None;
            attrs.view
        };
        if let Some(view) = view {
            if let Some(ResourceKind::View(attrs)) = self.arena.get_mut(view).map(|r| &mut r.kind)
            {
                attrs.render_handle = None;
            }
        }
    }

    /// Takes a View's first-render handle for signalling. Returns `None`
    /// once the cycle's signal has been consumed.
    pub fn take_view_render_handle(&mut self, view: ObjectKey) -> Option<crate::sync::Fence> {
        match self.arena.get_mut(view).map(|r| &mut r.kind) {
            Some(ResourceKind::View(attrs)) => attrs.render_handle.take(),
            _ => None,
        }
    }

    /// Updates a ViewHolder's observed `is_rendering` state, emitting a
    /// `ViewStateChanged` event if it actually changed.
    pub fn set_is_view_rendering(&mut self, holder: ObjectKey, is_rendering: bool) {
        let Some((session, holder_id)) = self
            .arena
            .get(holder)
            .map(|r| (r.session_id, r.resource_id))
        else {
            return;
        };
        let changed = {
            let Some(attrs) = self.node_mut_opt(holder).and_then(NodeAttrs::as_view_holder_mut)
            else {
                return;
            };
            if attrs.view_state.is_rendering == is_rendering {
                false
            } else {
                attrs.view_state.is_rendering = is_rendering;
                true
            }
        };
        if changed {
            let state = ViewState { is_rendering };
            self.pending_events
                .push((session, SessionEvent::ViewStateChanged { view_holder_id: holder_id, state }));
        }
    }
}
