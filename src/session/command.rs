//! The client command set.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

use crate::dispatch::Nanos;
use crate::scene::{BoundingBox, HitTestBehavior, Plane3, ResourceId, ShadowTechnique, VariableValue, ViewProperties};
use crate::sync::EventPair;

/// A vector argument: either a literal or a reference to a Variable
/// resource, which installs a one-way binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Vec3Value {
    /// A literal value.
    Immediate(Vec3),
    /// Follow the named Variable.
    Variable(ResourceId),
}

impl From<Vec3> for Vec3Value {
    fn from(value: Vec3) -> Self {
        Self::Immediate(value)
    }
}

/// A quaternion argument: literal or Variable-backed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuatValue {
    /// A literal value.
    Immediate(Quat),
    /// Follow the named Variable.
    Variable(ResourceId),
}

impl From<Quat> for QuatValue {
    fn from(value: Quat) -> Self {
        Self::Immediate(value)
    }
}

/// A renderer parameter, settable via [`Command::SetRendererParam`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererParam {
    /// Select the shadow algorithm.
    ShadowTechnique(ShadowTechnique),
    /// Toggle debug visualization.
    EnableDebugging(bool),
}

/// What [`Command::CreateResource`] creates.
#[derive(Debug)]
pub enum ResourceSpec {
    /// A plain grouping node.
    EntityNode,
    /// A node that draws a shape.
    ShapeNode,
    /// A node applying group opacity.
    OpacityNode,
    /// A node whose parts clip its descendants.
    ClipNode,
    /// A scene root.
    Scene,
    /// A circle shape.
    Circle {
        /// Radius in local units.
        radius: f32,
    },
    /// A rectangle shape.
    Rectangle {
        /// Full width.
        width: f32,
        /// Full height.
        height: f32,
    },
    /// A rounded-rectangle shape.
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
    /// A mesh shape; geometry arrives via
    /// [`Command::BindMeshBuffers`].
    Mesh,
    /// A color/texture material.
    Material,
    /// GPU memory of the given size.
    Memory {
        /// Allocation size in bytes.
        size: u64,
    },
    /// A buffer over a Memory resource.
    Buffer {
        /// The backing Memory resource.
        memory_id: ResourceId,
        /// Buffer size in bytes.
        size: u64,
    },
    /// An image over a Memory resource.
    Image {
        /// The backing Memory resource.
        memory_id: ResourceId,
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// A streaming image pipe.
    ImagePipe,
    /// A monoscopic camera viewing a Scene.
    Camera {
        /// The Scene to view.
        scene_id: ResourceId,
    },
    /// A stereo camera viewing a Scene.
    StereoCamera {
        /// The Scene to view.
        scene_id: ResourceId,
    },
    /// A renderer.
    Renderer,
    /// A composed layer.
    Layer,
    /// An ordered set of layers.
    LayerStack,
    /// A compositor with no display binding.
    Compositor,
    /// The compositor bound to the physical display.
    DisplayCompositor,
    /// An ambient light.
    AmbientLight,
    /// A directional light.
    DirectionalLight,
    /// A point light.
    PointLight,
    /// The importing half of a cross-session link.
    View {
        /// One half of a token pair; the peer half identifies the
        /// ViewHolder.
        token: EventPair,
    },
    /// The exporting half of a cross-session link.
    ViewHolder {
        /// One half of a token pair; the peer half identifies the View.
        token: EventPair,
    },
    /// A client-settable variable.
    Variable {
        /// Initial value; also fixes the variable's type.
        initial_value: VariableValue,
    },
}

/// One operation authored by a client via `Enqueue`.
#[derive(Debug)]
pub enum Command {
    /// Creates a resource under a fresh session-scoped id.
    CreateResource {
        /// The id to bind; must be unused and non-zero.
        id: ResourceId,
        /// What to create.
        spec: ResourceSpec,
    },
    /// Releases the session's mapping for `id`. The resource survives
    /// while the graph still references it.
    ReleaseResource {
        /// The id to unbind.
        id: ResourceId,
    },
    /// Attaches a debug label to a resource.
    SetLabel {
        /// Target resource.
        id: ResourceId,
        /// The new label.
        label: String,
    },
    /// Adds a child to a node.
    AddChild {
        /// The parent node.
        node_id: ResourceId,
        /// The child node.
        child_id: ResourceId,
    },
    /// Adds a part to a node.
    AddPart {
        /// The parent node.
        node_id: ResourceId,
        /// The part node.
        part_id: ResourceId,
    },
    /// Detaches a node from its parent.
    Detach {
        /// The node to detach.
        id: ResourceId,
    },
    /// Detaches all children of a node.
    DetachChildren {
        /// The parent node.
        node_id: ResourceId,
    },
    /// Sets a node's (or layer's) translation.
    SetTranslation {
        /// Target node or layer.
        id: ResourceId,
        /// New translation.
        value: Vec3Value,
    },
    /// Sets a node's scale.
    SetScale {
        /// Target node.
        id: ResourceId,
        /// New scale.
        value: Vec3Value,
    },
    /// Sets a node's rotation.
    SetRotation {
        /// Target node.
        id: ResourceId,
        /// New rotation.
        value: QuatValue,
    },
    /// Sets a node's anchor point.
    SetAnchor {
        /// Target node.
        id: ResourceId,
        /// New anchor.
        value: Vec3Value,
    },
    /// Sets an OpacityNode's opacity.
    SetOpacity {
        /// Target node.
        node_id: ResourceId,
        /// Opacity in `[0, 1]`.
        opacity: f32,
    },
    /// Sets the shape drawn by a ShapeNode.
    SetShape {
        /// Target shape node.
        node_id: ResourceId,
        /// The shape resource.
        shape_id: ResourceId,
    },
    /// Sets the material used by a ShapeNode.
    SetMaterial {
        /// Target shape node.
        node_id: ResourceId,
        /// The material resource.
        material_id: ResourceId,
    },
    /// Sets a material's color.
    SetColor {
        /// Target material.
        material_id: ResourceId,
        /// RGBA color.
        color: Vec4,
    },
    /// Sets or clears a material's texture.
    SetTexture {
        /// Target material.
        material_id: ResourceId,
        /// Image or ImagePipe resource; 0 clears.
        texture_id: ResourceId,
    },
    /// Enables clip-to-parts on a node.
    SetClip {
        /// Target node.
        node_id: ResourceId,
        /// Whether descendants clip to this node's parts.
        clip_to_self: bool,
    },
    /// Replaces a node's clip planes.
    SetClipPlanes {
        /// Target node.
        node_id: ResourceId,
        /// The half-spaces to clip against.
        planes: Vec<Plane3>,
    },
    /// Sets a node's hit-test behavior.
    SetHitTestBehavior {
        /// Target node.
        node_id: ResourceId,
        /// New behavior.
        behavior: HitTestBehavior,
    },
    /// Sets a node's hit-test tag.
    SetTag {
        /// Target node.
        node_id: ResourceId,
        /// New tag; 0 untags.
        tag_value: u32,
    },
    /// Sets a resource's event mask bits.
    SetEventMask {
        /// Target resource.
        id: ResourceId,
        /// Raw mask bits.
        event_mask: u32,
    },
    /// Authors ViewProperties on a ViewHolder.
    SetViewProperties {
        /// Target ViewHolder.
        view_holder_id: ResourceId,
        /// The new properties.
        properties: ViewProperties,
    },
    /// Points a renderer at a camera.
    SetCamera {
        /// Target renderer.
        renderer_id: ResourceId,
        /// The camera resource.
        camera_id: ResourceId,
    },
    /// Sets a camera's view parameters.
    SetCameraTransform {
        /// Target camera.
        camera_id: ResourceId,
        /// Eye position.
        eye_position: Vec3,
        /// Look-at point.
        eye_look_at: Vec3,
        /// Up vector.
        eye_up: Vec3,
    },
    /// Sets a monoscopic camera's projection.
    SetCameraProjection {
        /// Target camera.
        camera_id: ResourceId,
        /// Vertical field of view in radians; 0 selects orthographic.
        fovy: f32,
    },
    /// Sets a stereo camera's per-eye projections.
    SetStereoCameraProjection {
        /// Target stereo camera.
        camera_id: ResourceId,
        /// Left-eye projection.
        left_projection: Mat4,
        /// Right-eye projection.
        right_projection: Mat4,
    },
    /// Attaches a pose buffer to a camera.
    SetCameraPoseBuffer {
        /// Target camera.
        camera_id: ResourceId,
        /// The Buffer resource holding poses.
        buffer_id: ResourceId,
        /// Number of pose entries.
        num_entries: u32,
        /// Timestamp of entry 0.
        base_time: Nanos,
        /// Delta between entries.
        time_interval: Nanos,
    },
    /// Points a layer at a renderer.
    SetRenderer {
        /// Target layer.
        layer_id: ResourceId,
        /// The renderer resource.
        renderer_id: ResourceId,
    },
    /// Sets a renderer parameter.
    SetRendererParam {
        /// Target renderer.
        renderer_id: ResourceId,
        /// The parameter to set.
        param: RendererParam,
    },
    /// Toggles clipping on a renderer.
    SetDisableClipping {
        /// Target renderer.
        renderer_id: ResourceId,
        /// Whether clipping is disabled.
        disable_clipping: bool,
    },
    /// Attaches a light to a Scene.
    AddLight {
        /// Target scene.
        scene_id: ResourceId,
        /// The light resource.
        light_id: ResourceId,
    },
    /// Detaches a light from its Scene.
    DetachLight {
        /// The light to detach.
        light_id: ResourceId,
    },
    /// Detaches every light from a Scene.
    DetachLights {
        /// Target scene.
        scene_id: ResourceId,
    },
    /// Sets a light's color.
    SetLightColor {
        /// Target light.
        light_id: ResourceId,
        /// Linear RGB color.
        color: Vec3,
    },
    /// Sets a directional light's direction.
    SetLightDirection {
        /// Target directional light.
        light_id: ResourceId,
        /// New direction.
        direction: Vec3,
    },
    /// Sets a point light's position.
    SetPointLightPosition {
        /// Target point light.
        light_id: ResourceId,
        /// New position.
        position: Vec3,
    },
    /// Sets a point light's falloff.
    SetPointLightFalloff {
        /// Target point light.
        light_id: ResourceId,
        /// New falloff.
        falloff: f32,
    },
    /// Sets a layer's size in pixels.
    SetSize {
        /// Target layer.
        layer_id: ResourceId,
        /// New size.
        size: Vec2,
    },
    /// Binds a layer stack to a compositor.
    SetLayerStack {
        /// Target compositor.
        compositor_id: ResourceId,
        /// The layer stack resource.
        layer_stack_id: ResourceId,
    },
    /// Appends a layer to a stack.
    AddLayer {
        /// Target layer stack.
        layer_stack_id: ResourceId,
        /// The layer resource.
        layer_id: ResourceId,
    },
    /// Removes a layer from a stack.
    RemoveLayer {
        /// Target layer stack.
        layer_stack_id: ResourceId,
        /// The layer resource.
        layer_id: ResourceId,
    },
    /// Removes every layer from a stack.
    RemoveAllLayers {
        /// Target layer stack.
        layer_stack_id: ResourceId,
    },
    /// Updates a Variable's value.
    SetVariableValue {
        /// Target variable.
        variable_id: ResourceId,
        /// The new value; must match the variable's type.
        value: VariableValue,
    },
    /// Binds geometry buffers to a mesh shape.
    BindMeshBuffers {
        /// Target mesh shape.
        mesh_id: ResourceId,
        /// Index buffer resource.
        index_buffer_id: ResourceId,
        /// Vertex buffer resource.
        vertex_buffer_id: ResourceId,
        /// Bounding box of the geometry, used for hit testing.
        bounding_box: BoundingBox,
    },
}
