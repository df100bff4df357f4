use crate::assets::SpriteDefinition;
use crate::events::{EventBus, HostEvent};
use crate::hit_region::HitRegion;
use crate::renderer::{NodeContent, NodeHandle, RenderBackend};
use crate::scene::node::{AnimationCursor, NodeArena};
use std::collections::BTreeSet;

/// Nodes currently showing an animation sprite.
#[derive(Debug, Default)]
pub struct AnimationScheduler {
    members: BTreeSet<NodeHandle>,
}

impl AnimationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: NodeHandle) {
        self.members.insert(handle);
    }

    pub fn unregister(&mut self, handle: NodeHandle) -> bool {
        self.members.remove(&handle)
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.members.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Earliest pending frame advance.
    pub fn next_due(&self, arena: &NodeArena) -> Option<f64> {
        self.members
            .iter()
            .filter_map(|handle| arena.get(*handle).and_then(|node| node.animation))
            .map(|cursor| cursor.next_at)
            .reduce(f64::min)
    }

    /// Step every due node by one frame. Returns whether anything changed on screen.
    ///
    /// Wrapping back to frame 0 queues a loop notification before the frame is applied,
    /// so a sprite swap requested by the handler lands on the next tick.
    pub fn advance(
        &mut self,
        now: f64,
        arena: &mut NodeArena,
        renderer: &mut dyn RenderBackend,
        events: &mut EventBus,
    ) -> bool {
        let mut advanced = false;
        let mut stale = Vec::new();
        for handle in self.members.iter().copied() {
            let Some(node) = arena.get_mut(handle) else {
                stale.push(handle);
                continue;
            };
            let Some(cursor) = node.animation else {
                stale.push(handle);
                continue;
            };
            if cursor.next_at > now {
                continue;
            }
            let frames = match node.definition.as_deref() {
                Some(SpriteDefinition::Animation { frames }) if !frames.is_empty() => frames,
                _ => {
                    stale.push(handle);
                    continue;
                }
            };
            let next = (cursor.frame + 1) % frames.len();
            if next == 0 {
                events.push(HostEvent::Loop { object: node.object });
            }
            let previous = &frames[cursor.frame.min(frames.len() - 1)];
            let frame = &frames[next];
            let shift = frame.offset - previous.offset;
            node.offset += shift;
            node.state.position += shift;
            node.state.pivot = frame.image.size() * 0.5;
            node.state.content = NodeContent::Image(frame.image.clone());
            node.hit = HitRegion::for_image(&frame.image);
            node.animation = Some(AnimationCursor { frame: next, next_at: now + frame.delay_ms });
            renderer.update_node(handle, &node.state);
            advanced = true;
        }
        for handle in stale {
            log::debug!("[anim] dropping stale member {}", handle.0);
            self.members.remove(&handle);
        }
        advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AnimationFrame, ImageAsset};
    use crate::host::ObjectId;
    use crate::renderer::{HeadlessRenderer, NodeState};
    use crate::scene::node::VisualNode;
    use glam::Vec2;
    use std::sync::Arc;

    fn image(hash: &str) -> Arc<ImageAsset> {
        Arc::new(ImageAsset { hash: hash.to_string(), width: 4, height: 4, hitmap: None })
    }

    fn animated_node(renderer: &mut HeadlessRenderer, arena: &mut NodeArena) -> NodeHandle {
        let definition = Arc::new(SpriteDefinition::Animation {
            frames: vec![
                AnimationFrame { image: image("a"), offset: Vec2::ZERO, delay_ms: 100.0 },
                AnimationFrame { image: image("b"), offset: Vec2::new(2.0, 0.0), delay_ms: 50.0 },
            ],
        });
        let state =
            NodeState { content: NodeContent::Image(image("a")), visible: true, ..NodeState::default() };
        let handle = renderer.create_node(&state);
        let mut node = VisualNode::placeholder(handle, ObjectId(7), state);
        node.definition = Some(definition);
        node.animation = Some(AnimationCursor { frame: 0, next_at: 100.0 });
        arena.insert(node)
    }

    #[test]
    fn loops_notify_before_frame_zero() {
        let mut renderer = HeadlessRenderer::new();
        let mut arena = NodeArena::default();
        let mut events = EventBus::default();
        let mut scheduler = AnimationScheduler::new();
        let handle = animated_node(&mut renderer, &mut arena);
        scheduler.register(handle);

        assert!(!scheduler.advance(99.0, &mut arena, &mut renderer, &mut events));
        assert!(scheduler.advance(100.0, &mut arena, &mut renderer, &mut events));
        let node = arena.get(handle).expect("node");
        assert_eq!(node.animation, Some(AnimationCursor { frame: 1, next_at: 150.0 }));
        assert_eq!(node.state.position, Vec2::new(2.0, 0.0));
        assert!(events.is_empty());
        assert_eq!(scheduler.next_due(&arena), Some(150.0));

        assert!(scheduler.advance(160.0, &mut arena, &mut renderer, &mut events));
        assert_eq!(events.drain(), vec![HostEvent::Loop { object: ObjectId(7) }]);
        let node = arena.get(handle).expect("node");
        assert_eq!(node.animation.map(|cursor| cursor.frame), Some(0));
        assert_eq!(node.state.position, Vec2::ZERO);
    }

    #[test]
    fn destroyed_nodes_leave_the_set() {
        let mut renderer = HeadlessRenderer::new();
        let mut arena = NodeArena::default();
        let mut events = EventBus::default();
        let mut scheduler = AnimationScheduler::new();
        let handle = animated_node(&mut renderer, &mut arena);
        scheduler.register(handle);
        arena.remove(handle);
        assert!(!scheduler.advance(500.0, &mut arena, &mut renderer, &mut events));
        assert!(scheduler.is_empty());
    }
}
