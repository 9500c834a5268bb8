//! Events delivered to client sessions.

use crate::scene::{Metrics, ResourceId, ViewProperties, ViewState};

/// An event queued for delivery to a session's client.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A node subscribed to metrics got new scale factors.
    MetricsChanged {
        /// The subscribed node.
        node_id: ResourceId,
        /// The new metrics.
        metrics: Metrics,
    },
    /// A View was linked to this session's ViewHolder.
    ViewConnected {
        /// The ViewHolder whose link resolved.
        view_holder_id: ResourceId,
    },
    /// The linked View (or its session) went away.
    ViewDisconnected {
        /// The ViewHolder whose link broke.
        view_holder_id: ResourceId,
    },
    /// A ViewHolder was linked to this session's View.
    ViewHolderConnected {
        /// The View whose link resolved.
        view_id: ResourceId,
    },
    /// The linked ViewHolder (or its session) went away.
    ViewHolderDisconnected {
        /// The View whose link broke.
        view_id: ResourceId,
    },
    /// The ViewHolder on the other side of the link was attached to a
    /// scene.
    ViewAttachedToScene {
        /// The View observing the attach.
        view_id: ResourceId,
        /// The ViewHolder's current properties.
        properties: ViewProperties,
    },
    /// The ViewHolder on the other side of the link left the scene.
    ViewDetachedFromScene {
        /// The View observing the detach.
        view_id: ResourceId,
    },
    /// The ViewHolder's authored properties changed.
    ViewPropertiesChanged {
        /// The View observing the change.
        view_id: ResourceId,
        /// The new properties.
        properties: ViewProperties,
    },
    /// The linked View's observed state changed.
    ViewStateChanged {
        /// The ViewHolder observing the change.
        view_holder_id: ResourceId,
        /// The new state.
        state: ViewState,
    },
}
