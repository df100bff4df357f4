use crate::assets::SpriteDefinition;
use crate::hit_region::HitRegion;
use crate::host::ObjectId;
use crate::renderer::{NodeHandle, NodeState};
use glam::{Affine2, Vec2};
use std::collections::HashMap;
use std::sync::Arc;

/// Frame position of a node driven by the animation scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationCursor {
    pub frame: usize,
    /// Absolute time (ms) of the next advance.
    pub next_at: f64,
}

#[derive(Debug, Clone)]
pub struct VisualNode {
    pub handle: NodeHandle,
    /// Object interactions are attributed to. For proxies this is the proxy owner.
    pub object: ObjectId,
    /// Object whose sprite set supplied the definition. Differs from `object` behind a proxy.
    pub source: ObjectId,
    /// Definition rendered by this node, compared by identity for reuse.
    pub definition: Option<Arc<SpriteDefinition>>,
    /// Sprite offset, including every proxy offset on the way to the definition.
    pub offset: Vec2,
    pub state: NodeState,
    pub hit: HitRegion,
    pub animation: Option<AnimationCursor>,
}

impl VisualNode {
    pub fn placeholder(handle: NodeHandle, object: ObjectId, state: NodeState) -> Self {
        Self {
            handle,
            object,
            source: object,
            definition: None,
            offset: Vec2::ZERO,
            state,
            hit: HitRegion::Empty,
            animation: None,
        }
    }

    pub fn renders(&self, definition: &Arc<SpriteDefinition>) -> bool {
        self.definition.as_ref().map_or(false, |current| Arc::ptr_eq(current, definition))
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    /// Stage-space transform: translate to the pivot, rotate (degrees), scale, translate back.
    pub fn world_transform(&self) -> Affine2 {
        let state = &self.state;
        Affine2::from_translation(state.position + state.pivot)
            * Affine2::from_angle(state.rotation_deg.to_radians())
            * Affine2::from_scale(state.scale)
            * Affine2::from_translation(-state.pivot)
    }

    /// Map a stage-space point into node space. `None` when the transform is degenerate.
    pub fn local_point(&self, point: Vec2) -> Option<Vec2> {
        let local = self.world_transform().inverse().transform_point2(point);
        local.is_finite().then_some(local)
    }

    /// Local hit point when `point` falls inside the node's region.
    pub fn hit_test(&self, point: Vec2) -> Option<Vec2> {
        let local = self.local_point(point)?;
        self.hit.contains(local).then_some(local)
    }
}

/// Live nodes by handle. Stage slots and the animation scheduler refer to nodes through handles.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<NodeHandle, VisualNode>,
}

impl NodeArena {
    pub fn insert(&mut self, node: VisualNode) -> NodeHandle {
        let handle = node.handle;
        self.nodes.insert(handle, node);
        handle
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&VisualNode> {
        self.nodes.get(&handle)
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut VisualNode> {
        self.nodes.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: NodeHandle) -> Option<VisualNode> {
        self.nodes.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(state: NodeState) -> VisualNode {
        let mut node = VisualNode::placeholder(NodeHandle(1), ObjectId(0), state);
        node.hit = HitRegion::Rect(Vec2::new(10.0, 20.0));
        node
    }

    #[test]
    fn hit_test_uses_inverse_transform() {
        let state = NodeState {
            position: Vec2::new(100.0, 50.0),
            pivot: Vec2::new(5.0, 10.0),
            ..NodeState::default()
        };
        let node = node(state);
        assert_eq!(node.hit_test(Vec2::new(101.0, 51.0)), Some(Vec2::new(1.0, 1.0)));
        assert_eq!(node.hit_test(Vec2::new(99.0, 51.0)), None);
    }

    #[test]
    fn rotation_turns_around_pivot() {
        let state = NodeState {
            pivot: Vec2::new(5.0, 10.0),
            rotation_deg: 90.0,
            ..NodeState::default()
        };
        let node = node(state);
        // A 10x20 box turned a quarter around (5,10) spans x in [-5,15], y in [5,15].
        assert!(node.hit_test(Vec2::new(-4.0, 9.0)).is_some());
        assert!(node.hit_test(Vec2::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn mirrored_scale_flips_local_x() {
        let state =
            NodeState { pivot: Vec2::new(5.0, 10.0), scale: Vec2::new(-1.0, 1.0), ..NodeState::default() };
        let node = node(state);
        let local = node.local_point(Vec2::new(1.0, 2.0)).expect("invertible");
        assert!((local.x - 9.0).abs() < 1e-4 && (local.y - 2.0).abs() < 1e-4);
    }

    #[test]
    fn collapsed_scale_never_hits() {
        let state = NodeState { scale: Vec2::ZERO, ..NodeState::default() };
        assert!(node(state).hit_test(Vec2::new(0.0, 0.0)).is_none());
    }
}
