//! Ray/scene-graph hit testing.

use glam::Mat4;

use super::graph::SceneGraph;
use super::node::{HitTestBehavior, NodeAttrs, NodeKind};
use super::resource::ResourceKind;
use super::types::Ray;
use super::{ObjectKey, SessionId};

/// One hit-test result.
#[derive(Debug, Clone)]
pub struct Hit {
    /// The tag of the node that was hit.
    pub tag_value: u32,
    /// The node that was hit.
    pub node: ObjectKey,
    /// The ray, transformed into the hit node's coordinate system.
    pub ray: Ray,
    /// Accumulated inverse transform from the starting node to the hit
    /// node's local frame.
    pub inverse_transform: Mat4,
    /// Parametric distance along the ray to the nearest intersection
    /// within the tagged node's content.
    pub distance: f32,
}

struct RayInfo {
    ray: Ray,
    inverse_transform: Mat4,
}

#[derive(Default)]
struct TagInfo {
    distance: Option<f32>,
}

impl TagInfo {
    fn report_intersection(&mut self, distance: f32) {
        self.distance = Some(match self.distance {
            Some(current) => current.min(distance),
            None => distance,
        });
    }
}

/// Traverses a subtree accumulating ray hits against tagged nodes.
///
/// The ray starts in the coordinate system of the node handed to
/// [`hit_test`](HitTester::hit_test) and is re-expressed in each node's
/// local frame on the way down. A node records a hit when it is tagged
/// (and, for session-scoped queries, belongs to the querying session) and
/// anything in its subtree intersects the ray. `Suppress` prunes whole
/// subtrees; `clip_to_self` and ClipNode parts prune rays that fall
/// outside the part geometry.
///
/// Results are sorted by ascending distance; ties keep traversal order.
pub struct HitTester<'a> {
    graph: &'a SceneGraph,
    session_filter: Option<SessionId>,
}

impl<'a> HitTester<'a> {
    /// A hit tester that reports every tagged node.
    #[must_use]
    pub fn new(graph: &'a SceneGraph) -> Self {
        Self {
            graph,
            session_filter: None,
        }
    }

    /// A hit tester that reports only nodes owned by `session_id`.
    #[must_use]
    pub fn new_session_scoped(graph: &'a SceneGraph, session_id: SessionId) -> Self {
        Self {
            graph,
            session_filter: Some(session_id),
        }
    }

    /// Casts `ray` (in `node`'s coordinate system) through the subtree.
    #[must_use]
    pub fn hit_test(&self, node: ObjectKey, ray: Ray) -> Vec<Hit> {
        let mut hits = Vec::new();
        let ray_info = RayInfo {
            ray,
            inverse_transform: Mat4::IDENTITY,
        };
        self.accumulate_hits_local(node, &ray_info, None, &mut hits);
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }

    fn should_participate(&self, resource_session: SessionId, tag_value: u32) -> bool {
        tag_value != 0
            && self
                .session_filter
                .is_none_or(|session| session == resource_session)
    }

    // Re-express the ray in the node's local frame, then accumulate.
    fn accumulate_hits_outer(
        &self,
        key: ObjectKey,
        ray_info: &RayInfo,
        tag: Option<&mut TagInfo>,
        hits: &mut Vec<Hit>,
    ) {
        let Some(node) = self.graph.node(key) else {
            return;
        };
        if node.transform.is_identity() {
            self.accumulate_hits_local(key, ray_info, tag, hits);
            return;
        }
        let inverse = node.transform.to_mat4().inverse();
        let local_ray_info = RayInfo {
            ray: ray_info.ray.transformed(inverse),
            inverse_transform: inverse * ray_info.inverse_transform,
        };
        self.accumulate_hits_local(key, &local_ray_info, tag, hits);
    }

    fn accumulate_hits_local(
        &self,
        key: ObjectKey,
        ray_info: &RayInfo,
        tag: Option<&mut TagInfo>,
        hits: &mut Vec<Hit>,
    ) {
        let Some(resource) = self.graph.arena().get(key) else {
            return;
        };
        let Some(node) = resource.as_node() else {
            return;
        };
        if node.hit_test_behavior == HitTestBehavior::Suppress {
            return;
        }

        if !self.should_participate(resource.session_id, node.tag_value) {
            self.accumulate_hits_inner(key, ray_info, tag, hits);
            return;
        }

        // The node is tagged for this query: collect the nearest
        // intersection within its subtree, then record the hit and
        // propagate the distance outward.
        let mut local_tag = TagInfo::default();
        self.accumulate_hits_inner(key, ray_info, Some(&mut local_tag), hits);

        if let Some(distance) = local_tag.distance {
            hits.push(Hit {
                tag_value: node.tag_value,
                node: key,
                ray: ray_info.ray,
                inverse_transform: ray_info.inverse_transform,
                distance,
            });
            if let Some(outer) = tag {
                outer.report_intersection(distance);
            }
        }
    }

    fn accumulate_hits_inner(
        &self,
        key: ObjectKey,
        ray_info: &RayInfo,
        mut tag: Option<&mut TagInfo>,
        hits: &mut Vec<Hit>,
    ) {
        let Some(node) = self.graph.node(key) else {
            return;
        };
        if node.clip_to_self && !self.is_ray_within_parts_inner(node, &ray_info.ray) {
            return;
        }

        if tag.is_some() {
            if let Some(distance) = self.node_intersection(node, &ray_info.ray) {
                if let Some(tag) = tag.as_deref_mut() {
                    tag.report_intersection(distance);
                }
            }
        }

        for child in node.children.iter().chain(node.parts.iter()) {
            self.accumulate_hits_outer(*child, ray_info, tag.as_deref_mut(), hits);
        }
    }

    // The node's own content intersection: only shape nodes with a shape
    // have any.
    fn node_intersection(&self, node: &NodeAttrs, ray: &Ray) -> Option<f32> {
        let NodeKind::Shape {
            shape: Some(shape), ..
        } = &node.kind
        else {
            return None;
        };
        match self.graph.arena().get(*shape).map(|r| &r.kind) {
            Some(ResourceKind::Shape(attrs)) => attrs.intersect(ray),
            _ => None,
        }
    }

    fn is_ray_within_parts_inner(&self, node: &NodeAttrs, ray: &Ray) -> bool {
        node.parts
            .iter()
            .any(|part| self.is_ray_within_clipped_content_outer(*part, ray))
    }

    fn is_ray_within_clipped_content_outer(&self, key: ObjectKey, ray: &Ray) -> bool {
        let Some(node) = self.graph.node(key) else {
            return false;
        };
        if node.transform.is_identity() {
            return self.is_ray_within_clipped_content_inner(key, ray);
        }
        let local_ray = ray.transformed(node.transform.to_mat4().inverse());
        self.is_ray_within_clipped_content_inner(key, &local_ray)
    }

    fn is_ray_within_clipped_content_inner(&self, key: ObjectKey, ray: &Ray) -> bool {
        let Some(node) = self.graph.node(key) else {
            return false;
        };
        if self.node_intersection(node, ray).is_some() {
            return true;
        }
        if self.is_ray_within_parts_inner(node, ray) {
            return true;
        }
        if node.clip_to_self {
            return false;
        }
        node.children
            .iter()
            .any(|child| self.is_ray_within_clipped_content_outer(*child, ray))
    }
}
