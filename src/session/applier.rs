//! Command validation and application.
//!
//! Applies one client command at a time against the scene graph. Every
//! command is validated first — resource-id existence and uniqueness,
//! target kind, node capabilities — and a failure aborts the whole
//! update (the session is torn down by the engine).

use std::cell::RefCell;
use std::rc::Rc;

use crate::dispatch::Dispatcher;
use crate::errors::{SessionError, SessionResult};
use crate::link::{LinkAction, LinkSide, ViewLinker};
use crate::scene::node::NodeProperty;
use crate::scene::{
    BufferAttrs, CameraAttrs, CompositorAttrs, EventMask, ImageAttrs, LayerAttrs, LayerStackAttrs,
    LightAttrs, LightKind, MaterialAttrs, MemoryAttrs, NodeAttrs, NodeKind, ObjectKey,
    PoseBufferBinding, RendererAttrs, Resource, ResourceKind, SceneGraph, ShapeAttrs,
    VariableAttrs, ViewAttrs, ViewHolderAttrs, INVALID_RESOURCE_ID,
};
use crate::sync::ReleaseFenceSignaller;

use super::command::{Command, QuatValue, RendererParam, ResourceSpec, Vec3Value};
use super::image_pipe::ImagePipe;
use super::session::Session;

/// Shared mutable state a command applies against.
pub struct CommandContext<'a> {
    /// The scene graph.
    pub graph: &'a mut SceneGraph,
    /// The cross-session view linker.
    pub linker: &'a mut ViewLinker,
    /// Staging for release fences.
    pub release_signaller: &'a mut ReleaseFenceSignaller,
    /// The dispatcher, for peer-death watches.
    pub dispatcher: &'a Dispatcher,
    /// Hook invoked (asynchronously) when an unresolved link token's peer
    /// is closed; the engine routes it back into the linker.
    pub link_peer_closed: &'a Rc<dyn Fn(u64, LinkSide)>,
    /// Link actions produced while applying; the engine replays them
    /// after the update.
    pub link_actions: &'a mut Vec<LinkAction>,
}

/// Validates and applies a single command on behalf of `session`.
pub fn apply_command(
    ctx: &mut CommandContext<'_>,
    session: &mut Session,
    command: Command,
) -> SessionResult<()> {
    match command {
        Command::CreateResource { id, spec } => create_resource(ctx, session, id, spec),
        Command::ReleaseResource { id } => {
            let key = session.unmap_resource(id)?;
            ctx.graph.release_ref(key);
            Ok(())
        }
        Command::SetLabel { id, label } => {
            let key = session.resolve(id)?;
            ctx.graph.set_label(key, label)
        }
        Command::AddChild { node_id, child_id } => {
            let parent = node_target(ctx, session.resolve(node_id)?);
            let child = node_target(ctx, session.resolve(child_id)?);
            ctx.graph.add_child(parent, child)
        }
        Command::AddPart { node_id, part_id } => {
            let parent = session.resolve(node_id)?;
            let part = session.resolve(part_id)?;
            ctx.graph.add_part(parent, part)
        }
        Command::Detach { id } => {
            let key = node_target(ctx, session.resolve(id)?);
            ctx.graph.detach(key)
        }
        Command::DetachChildren { node_id } => {
            let key = node_target(ctx, session.resolve(node_id)?);
            ctx.graph.detach_children(key)
        }
        Command::SetTranslation { id, value } => {
            let key = session.resolve(id)?;
            match value {
                Vec3Value::Immediate(v) => ctx.graph.set_translation(key, v),
                Vec3Value::Variable(variable_id) => {
                    let variable = session.resolve(variable_id)?;
                    ctx.graph.bind_variable(key, NodeProperty::Translation, variable)
                }
            }
        }
        Command::SetScale { id, value } => {
            let key = session.resolve(id)?;
            match value {
                Vec3Value::Immediate(v) => ctx.graph.set_scale(key, v),
                Vec3Value::Variable(variable_id) => {
                    let variable = session.resolve(variable_id)?;
                    ctx.graph.bind_variable(key, NodeProperty::Scale, variable)
                }
            }
        }
        Command::SetRotation { id, value } => {
            let key = session.resolve(id)?;
            match value {
                QuatValue::Immediate(q) => ctx.graph.set_rotation(key, q),
                QuatValue::Variable(variable_id) => {
                    let variable = session.resolve(variable_id)?;
                    ctx.graph.bind_variable(key, NodeProperty::Rotation, variable)
                }
            }
        }
        Command::SetAnchor { id, value } => {
            let key = session.resolve(id)?;
            match value {
                Vec3Value::Immediate(v) => ctx.graph.set_anchor(key, v),
                Vec3Value::Variable(variable_id) => {
                    let variable = session.resolve(variable_id)?;
                    ctx.graph.bind_variable(key, NodeProperty::Anchor, variable)
                }
            }
        }
        Command::SetOpacity { node_id, opacity } => {
            let key = session.resolve(node_id)?;
            ctx.graph.set_opacity(key, opacity)
        }
        Command::SetShape { node_id, shape_id } => {
            let node = session.resolve(node_id)?;
            let shape = session.resolve(shape_id)?;
            ctx.graph.set_shape(node, shape)
        }
        Command::SetMaterial {
            node_id,
            material_id,
        } => {
            let node = session.resolve(node_id)?;
            let material = session.resolve(material_id)?;
            ctx.graph.set_material(node, material)
        }
        Command::SetColor { material_id, color } => {
            let material = session.resolve(material_id)?;
            ctx.graph.set_color(material, color)
        }
        Command::SetTexture {
            material_id,
            texture_id,
        } => {
            let material = session.resolve(material_id)?;
            let texture = if texture_id == INVALID_RESOURCE_ID {
                None
            } else {
                Some(session.resolve(texture_id)?)
            };
            ctx.graph.set_texture(material, texture)
        }
        Command::SetClip {
            node_id,
            clip_to_self,
        } => {
            let key = session.resolve(node_id)?;
            ctx.graph.set_clip_to_self(key, clip_to_self)
        }
        Command::SetClipPlanes { node_id, planes } => {
            let key = session.resolve(node_id)?;
            ctx.graph.set_clip_planes(key, planes)
        }
        Command::SetHitTestBehavior { node_id, behavior } => {
            let key = session.resolve(node_id)?;
            ctx.graph.set_hit_test_behavior(key, behavior)
        }
        Command::SetTag {
            node_id,
            tag_value,
        } => {
            let key = session.resolve(node_id)?;
            ctx.graph.set_tag(key, tag_value)
        }
        Command::SetEventMask { id, event_mask } => {
            let key = session.resolve(id)?;
            ctx.graph
                .set_event_mask(key, EventMask::from_bits_truncate(event_mask))
        }
        Command::SetViewProperties {
            view_holder_id,
            properties,
        } => {
            let key = session.resolve(view_holder_id)?;
            ctx.graph.set_view_properties(key, properties)
        }
        Command::SetCamera {
            renderer_id,
            camera_id,
        } => {
            let renderer = session.resolve(renderer_id)?;
            let camera = session.resolve(camera_id)?;
            ctx.graph.set_renderer_camera(renderer, camera)
        }
        Command::SetCameraTransform {
            camera_id,
            eye_position,
            eye_look_at,
            eye_up,
        } => {
            let camera = session.resolve(camera_id)?;
            ctx.graph
                .set_camera_transform(camera, eye_position, eye_look_at, eye_up)
        }
        Command::SetCameraProjection { camera_id, fovy } => {
            let camera = session.resolve(camera_id)?;
            ctx.graph.set_camera_projection(camera, fovy)
        }
        Command::SetStereoCameraProjection {
            camera_id,
            left_projection,
            right_projection,
        } => {
            let camera = session.resolve(camera_id)?;
            ctx.graph
                .set_stereo_camera_projection(camera, left_projection, right_projection)
        }
        Command::SetCameraPoseBuffer {
            camera_id,
            buffer_id,
            num_entries,
            base_time,
            time_interval,
        } => {
            if num_entries == 0 || time_interval <= 0 {
                return Err(SessionError::InvalidArgument {
                    command: "SetCameraPoseBuffer",
                    message: "pose buffer needs entries and a positive interval".to_owned(),
                });
            }
            let camera = session.resolve(camera_id)?;
            let buffer = session.resolve(buffer_id)?;
            ctx.graph.set_camera_pose_buffer(
                camera,
                PoseBufferBinding {
                    buffer,
                    num_entries,
                    base_time,
                    time_interval,
                },
            )
        }
        Command::SetRenderer {
            layer_id,
            renderer_id,
        } => {
            let layer = session.resolve(layer_id)?;
            let renderer = session.resolve(renderer_id)?;
            ctx.graph.set_layer_renderer(layer, renderer)
        }
        Command::SetRendererParam { renderer_id, param } => {
            let renderer = session.resolve(renderer_id)?;
            match param {
                RendererParam::ShadowTechnique(technique) => {
                    ctx.graph.set_shadow_technique(renderer, technique)
                }
                RendererParam::EnableDebugging(enable) => {
                    ctx.graph.set_enable_debugging(renderer, enable)
                }
            }
        }
        Command::SetDisableClipping {
            renderer_id,
            disable_clipping,
        } => {
            let renderer = session.resolve(renderer_id)?;
            ctx.graph.set_disable_clipping(renderer, disable_clipping)
        }
        Command::AddLight { scene_id, light_id } => {
            let scene = session.resolve(scene_id)?;
            let light = session.resolve(light_id)?;
            ctx.graph.add_light(scene, light)
        }
        Command::DetachLight { light_id } => {
            let light = session.resolve(light_id)?;
            ctx.graph.detach_light(light)
        }
        Command::DetachLights { scene_id } => {
            let scene = session.resolve(scene_id)?;
            ctx.graph.detach_lights(scene)
        }
        Command::SetLightColor { light_id, color } => {
            let light = session.resolve(light_id)?;
            ctx.graph.set_light_color(light, color)
        }
        Command::SetLightDirection {
            light_id,
            direction,
        } => {
            let light = session.resolve(light_id)?;
            ctx.graph.set_light_direction(light, direction)
        }
        Command::SetPointLightPosition { light_id, position } => {
            let light = session.resolve(light_id)?;
            ctx.graph.set_point_light_position(light, position)
        }
        Command::SetPointLightFalloff { light_id, falloff } => {
            let light = session.resolve(light_id)?;
            ctx.graph.set_point_light_falloff(light, falloff)
        }
        Command::SetSize { layer_id, size } => {
            let layer = session.resolve(layer_id)?;
            ctx.graph.set_layer_size(layer, size)
        }
        Command::SetLayerStack {
            compositor_id,
            layer_stack_id,
        } => {
            let compositor = session.resolve(compositor_id)?;
            let stack = session.resolve(layer_stack_id)?;
            ctx.graph.set_layer_stack(compositor, stack)
        }
        Command::AddLayer {
            layer_stack_id,
            layer_id,
        } => {
            let stack = session.resolve(layer_stack_id)?;
            let layer = session.resolve(layer_id)?;
            ctx.graph.add_layer(stack, layer)
        }
        Command::RemoveLayer {
            layer_stack_id,
            layer_id,
        } => {
            let stack = session.resolve(layer_stack_id)?;
            let layer = session.resolve(layer_id)?;
            ctx.graph.remove_layer(stack, layer)
        }
        Command::RemoveAllLayers { layer_stack_id } => {
            let stack = session.resolve(layer_stack_id)?;
            ctx.graph.remove_all_layers(stack)
        }
        Command::SetVariableValue { variable_id, value } => {
            let variable = session.resolve(variable_id)?;
            ctx.graph.set_variable_value(variable, value)
        }
        Command::BindMeshBuffers {
            mesh_id,
            index_buffer_id,
            vertex_buffer_id,
            bounding_box,
        } => {
            let mesh = session.resolve(mesh_id)?;
            let index_buffer = session.resolve(index_buffer_id)?;
            let vertex_buffer = session.resolve(vertex_buffer_id)?;
            ctx.graph
                .bind_mesh_buffers(mesh, index_buffer, vertex_buffer, bounding_box)
        }
    }
}

fn create_resource(
    ctx: &mut CommandContext<'_>,
    session: &mut Session,
    id: crate::scene::ResourceId,
    spec: ResourceSpec,
) -> SessionResult<()> {
    session.check_unmapped(id)?;
    let session_id = session.id();

    let key = match spec {
        ResourceSpec::EntityNode => insert_node(ctx, session_id, id, NodeKind::Entity),
        ResourceSpec::ShapeNode => insert_node(
            ctx,
            session_id,
            id,
            NodeKind::Shape {
                shape: None,
                material: None,
            },
        ),
        ResourceSpec::OpacityNode => {
            insert_node(ctx, session_id, id, NodeKind::Opacity { opacity: 1.0 })
        }
        ResourceSpec::ClipNode => insert_node(ctx, session_id, id, NodeKind::Clip),
        ResourceSpec::Scene => insert_node(
            ctx,
            session_id,
            id,
            NodeKind::Scene {
                ambient_lights: Vec::new(),
                directional_lights: Vec::new(),
                point_lights: Vec::new(),
            },
        ),
        ResourceSpec::Circle { radius } => {
            if radius < 0.0 {
                return Err(negative_argument("CreateResource(Circle)", "radius"));
            }
            insert(ctx, session_id, id, ResourceKind::Shape(ShapeAttrs::Circle { radius }))
        }
        ResourceSpec::Rectangle { width, height } => {
            if width < 0.0 || height < 0.0 {
                return Err(negative_argument("CreateResource(Rectangle)", "size"));
            }
            insert(
                ctx,
                session_id,
                id,
                ResourceKind::Shape(ShapeAttrs::Rectangle { width, height }),
            )
        }
        ResourceSpec::RoundedRectangle {
            width,
            height,
            top_left_radius,
            top_right_radius,
            bottom_right_radius,
            bottom_left_radius,
        } => {
            if width < 0.0 || height < 0.0 {
                return Err(negative_argument("CreateResource(RoundedRectangle)", "size"));
            }
            insert(
                ctx,
                session_id,
                id,
                ResourceKind::Shape(ShapeAttrs::RoundedRectangle {
                    width,
                    height,
                    top_left_radius,
                    top_right_radius,
                    bottom_right_radius,
                    bottom_left_radius,
                }),
            )
        }
        ResourceSpec::Mesh => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Shape(ShapeAttrs::empty_mesh()),
        ),
        ResourceSpec::Material => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Material(MaterialAttrs::new()),
        ),
        ResourceSpec::Memory { size } => {
            insert(ctx, session_id, id, ResourceKind::Memory(MemoryAttrs { size }))
        }
        ResourceSpec::Buffer { memory_id, size } => {
            let memory = session.resolve(memory_id)?;
            expect_kind(ctx.graph, memory, "Memory", |kind| {
                matches!(kind, ResourceKind::Memory(_))
            })?;
            let key = insert(
                ctx,
                session_id,
                id,
                ResourceKind::Buffer(BufferAttrs { memory, size }),
            );
            ctx.graph.add_ref(memory);
            key
        }
        ResourceSpec::Image {
            memory_id,
            width,
            height,
        } => {
            let memory = session.resolve(memory_id)?;
            expect_kind(ctx.graph, memory, "Memory", |kind| {
                matches!(kind, ResourceKind::Memory(_))
            })?;
            let key = insert(
                ctx,
                session_id,
                id,
                ResourceKind::Image(ImageAttrs {
                    memory,
                    width,
                    height,
                }),
            );
            ctx.graph.add_ref(memory);
            key
        }
        ResourceSpec::ImagePipe => insert(
            ctx,
            session_id,
            id,
            ResourceKind::ImagePipe(Rc::new(RefCell::new(ImagePipe::new()))),
        ),
        ResourceSpec::Camera { scene_id } => {
            let scene = resolve_scene(ctx, session, scene_id)?;
            let key = insert(
                ctx,
                session_id,
                id,
                ResourceKind::Camera(CameraAttrs::new(scene)),
            );
            ctx.graph.add_ref(scene);
            key
        }
        ResourceSpec::StereoCamera { scene_id } => {
            let scene = resolve_scene(ctx, session, scene_id)?;
            let key = insert(
                ctx,
                session_id,
                id,
                ResourceKind::Camera(CameraAttrs::new_stereo(scene)),
            );
            ctx.graph.add_ref(scene);
            key
        }
        ResourceSpec::Renderer => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Renderer(RendererAttrs::default()),
        ),
        ResourceSpec::Layer => {
            insert(ctx, session_id, id, ResourceKind::Layer(LayerAttrs::new()))
        }
        ResourceSpec::LayerStack => insert(
            ctx,
            session_id,
            id,
            ResourceKind::LayerStack(LayerStackAttrs::default()),
        ),
        ResourceSpec::Compositor => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Compositor(CompositorAttrs {
                layer_stack: None,
                is_display_compositor: false,
            }),
        ),
        ResourceSpec::DisplayCompositor => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Compositor(CompositorAttrs {
                layer_stack: None,
                is_display_compositor: true,
            }),
        ),
        ResourceSpec::AmbientLight => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Light(LightAttrs::new(LightKind::Ambient)),
        ),
        ResourceSpec::DirectionalLight => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Light(LightAttrs::new(LightKind::Directional)),
        ),
        ResourceSpec::PointLight => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Light(LightAttrs::new(LightKind::Point)),
        ),
        ResourceSpec::View { token } => {
            let hook = Rc::clone(ctx.link_peer_closed);
            let koid = ctx.linker.register_import(token, ctx.dispatcher, move |koid| {
                hook(koid, LinkSide::Import);
            })?;

            // The phantom node shares the View's id; it has no entry in
            // the session's id map.
            let view_node = ctx.graph.insert(Resource::new(
                session_id,
                id,
                ResourceKind::Node(NodeAttrs::new(NodeKind::View {
                    view: ObjectKey::default(),
                })),
            ));
            let view = insert(
                ctx,
                session_id,
                id,
                ResourceKind::View(ViewAttrs {
                    import_koid: koid,
                    view_node,
                    view_holder: None,
                    render_handle: None,
                }),
            );
            if let Some(NodeKind::View { view: stored }) = ctx
                .graph
                .arena_mut()
                .get_mut(view_node)
                .and_then(|r| r.as_node_mut())
                .map(|n| &mut n.kind)
            {
                *stored = view;
            }
            ctx.link_actions
                .extend(ctx.linker.initialize(koid, LinkSide::Import, view));
            view
        }
        ResourceSpec::ViewHolder { token } => {
            let hook = Rc::clone(ctx.link_peer_closed);
            let koid = ctx.linker.register_export(token, ctx.dispatcher, move |koid| {
                hook(koid, LinkSide::Export);
            })?;
            let holder = insert_node(
                ctx,
                session_id,
                id,
                NodeKind::ViewHolder(ViewHolderAttrs::new(koid)),
            );
            ctx.link_actions
                .extend(ctx.linker.initialize(koid, LinkSide::Export, holder));
            holder
        }
        ResourceSpec::Variable { initial_value } => insert(
            ctx,
            session_id,
            id,
            ResourceKind::Variable(VariableAttrs {
                value: initial_value,
                bindings: Vec::new(),
            }),
        ),
    };

    session.map_resource(id, key);
    Ok(())
}

fn insert(
    ctx: &mut CommandContext<'_>,
    session_id: crate::scene::SessionId,
    id: crate::scene::ResourceId,
    kind: ResourceKind,
) -> ObjectKey {
    ctx.graph.insert(Resource::new(session_id, id, kind))
}

fn insert_node(
    ctx: &mut CommandContext<'_>,
    session_id: crate::scene::SessionId,
    id: crate::scene::ResourceId,
    kind: NodeKind,
) -> ObjectKey {
    insert(ctx, session_id, id, ResourceKind::Node(NodeAttrs::new(kind)))
}

// A View stands in for its phantom node wherever a node is expected.
fn node_target(ctx: &CommandContext<'_>, key: ObjectKey) -> ObjectKey {
    match ctx.graph.arena().get(key).map(|r| &r.kind) {
        Some(ResourceKind::View(attrs)) => attrs.view_node,
        _ => key,
    }
}

fn resolve_scene(
    ctx: &CommandContext<'_>,
    session: &Session,
    scene_id: crate::scene::ResourceId,
) -> SessionResult<ObjectKey> {
    let scene = session.resolve(scene_id)?;
    let resource = ctx
        .graph
        .arena()
        .get(scene)
        .ok_or(SessionError::InvalidResourceId(scene_id))?;
    let is_scene = matches!(
        resource.as_node().map(|n| &n.kind),
        Some(NodeKind::Scene { .. })
    );
    if is_scene {
        Ok(scene)
    } else {
        Err(SessionError::TypeMismatch {
            id: scene_id,
            actual: resource.kind_name(),
            expected: "Scene",
        })
    }
}

fn expect_kind(
    graph: &SceneGraph,
    key: ObjectKey,
    expected: &'static str,
    predicate: impl FnOnce(&ResourceKind) -> bool,
) -> SessionResult<()> {
    let resource = graph
        .arena()
        .get(key)
        .ok_or(SessionError::InvalidResourceId(INVALID_RESOURCE_ID))?;
    if predicate(&resource.kind) {
        Ok(())
    } else {
        Err(SessionError::TypeMismatch {
            id: resource.resource_id,
            actual: resource.kind_name(),
            expected,
        })
    }
}

fn negative_argument(command: &'static str, what: &str) -> SessionError {
    SessionError::InvalidArgument {
        command,
        message: format!("{what} must be non-negative"),
    }
}
