//! View and ViewHolder resources.
//!
//! A View/ViewHolder pair splices one session's subtree into another
//! session's parent node. The ViewHolder is a node (it can be attached
//! under a parent within its own session); the View owns a single
//! phantom ViewNode that, once the link resolves, becomes the
//! ViewHolder's sole child. ViewProperties are authored on the ViewHolder
//! and delivered as events to the View's session.

use glam::Vec3;

use crate::sync::Fence;

use super::types::BoundingBox;
use super::ObjectKey;

/// Layout properties authored on a ViewHolder and observed by its View.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewProperties {
    /// The box the view's content should fit inside.
    pub bounding_box: BoundingBox,
    /// Inset from the box's minimum corner.
    pub inset_from_min: Vec3,
    /// Inset from the box's maximum corner.
    pub inset_from_max: Vec3,
}

/// Observable state of a linked View, reported to the ViewHolder's
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewState {
    /// Whether the view's content has been rendered since it was last
    /// attached to a scene.
    pub is_rendering: bool,
}

/// Attributes of a View resource.
#[derive(Debug)]
pub struct ViewAttrs {
    /// Linker endpoint id derived from the client's token.
    pub import_koid: u64,
    /// The phantom node the view's subtree hangs from. Counted reference.
    pub view_node: ObjectKey,
    /// The linked ViewHolder node, once resolved (weak back-reference).
    pub view_holder: Option<ObjectKey>,
    /// Handle used to signal the first render of this view's content.
    /// Re-armed by the ViewHolder on each attach cycle; `None` once the
    /// cycle's signal has been consumed or while unlinked.
    pub render_handle: Option<Fence>,
}

/// Attributes carried by a ViewHolder node.
#[derive(Debug)]
pub struct ViewHolderAttrs {
    /// Linker endpoint id derived from the client's token.
    pub export_koid: u64,
    /// The View resource on the other side of the link, once resolved
    /// (weak back-reference; the linked subtree is held via the child
    /// list instead).
    pub view: Option<ObjectKey>,
    /// Properties delivered to the View's session.
    pub view_properties: ViewProperties,
    /// Last reported view state.
    pub view_state: ViewState,
    /// The first-render event for the current attach cycle.
    pub render_event: Option<Fence>,
}

impl ViewHolderAttrs {
    /// Creates an unlinked ViewHolder for the endpoint `export_koid`.
    #[must_use]
    pub fn new(export_koid: u64) -> Self {
        Self {
            export_koid,
            view: None,
            view_properties: ViewProperties::default(),
            view_state: ViewState::default(),
            render_event: None,
        }
    }
}
